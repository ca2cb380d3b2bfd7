//! Robocall and IVR detection
//!
//! Accumulates per-call signals (silence, barge-in rate, phrase repetition,
//! hold keywords) and classifies the call. Recording methods are called only
//! by the owning session; `check`/`check_text` are idempotent reads.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use call_agent_config::RobocallConfig;

/// Window entries kept beyond any sane threshold are dead weight.
const MAX_BARGE_IN_WINDOW: usize = 64;

/// Why a call was classified as automated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RobocallReason {
    ProlongedSilence,
    RapidBargeIns,
    PhraseRepetition(String),
}

impl std::fmt::Display for RobocallReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RobocallReason::ProlongedSilence => f.write_str("prolonged_silence"),
            RobocallReason::RapidBargeIns => f.write_str("rapid_barge_ins"),
            RobocallReason::PhraseRepetition(phrase) => {
                write!(f, "phrase_repetition:{}", phrase)
            }
        }
    }
}

/// Per-call robocall signal accumulator
pub struct RobocallDetector {
    config: RobocallConfig,
    started_at: Instant,
    first_speech: Option<Instant>,
    last_speech: Option<Instant>,
    barge_ins: VecDeque<Instant>,
    agent_turns: u32,
    phrase_counts: HashMap<String, u32>,
}

impl RobocallDetector {
    pub fn new(config: RobocallConfig, started_at: Instant) -> Self {
        Self {
            config,
            started_at,
            first_speech: None,
            last_speech: None,
            barge_ins: VecDeque::new(),
            agent_turns: 0,
            phrase_counts: HashMap::new(),
        }
    }

    /// Record one finalized caller utterance
    ///
    /// Phrases under 3 words are excluded from repetition counting to avoid
    /// false positives on short natural replies ("yes", "that's right").
    pub fn record_speech(&mut self, text: &str, now: Instant) {
        self.first_speech.get_or_insert(now);
        self.last_speech = Some(now);

        let normalized = normalize(text);
        if normalized.split(' ').count() >= 3 {
            *self.phrase_counts.entry(normalized).or_insert(0) += 1;
        }
    }

    /// Record one barge-in
    pub fn record_barge_in(&mut self, now: Instant) {
        let window = Duration::from_millis(self.config.barge_in_window_ms);
        while let Some(&front) = self.barge_ins.front() {
            if now.duration_since(front) > window || self.barge_ins.len() >= MAX_BARGE_IN_WINDOW {
                self.barge_ins.pop_front();
            } else {
                break;
            }
        }
        self.barge_ins.push_back(now);
    }

    /// Record one completed (uninterrupted) agent turn
    pub fn record_agent_turn(&mut self) {
        self.agent_turns += 1;
    }

    /// True once any caller speech has ever been recorded
    pub fn heard_caller(&self) -> bool {
        self.first_speech.is_some()
    }

    /// Evaluate the accumulated signals; first matching condition wins
    pub fn check(&self, now: Instant) -> Option<RobocallReason> {
        if self.prolonged_silence(now) {
            return Some(RobocallReason::ProlongedSilence);
        }
        if self.rapid_barge_ins(now) {
            return Some(RobocallReason::RapidBargeIns);
        }
        if let Some(phrase) = self.repeated_phrase() {
            return Some(RobocallReason::PhraseRepetition(phrase));
        }
        None
    }

    /// Stateless hold-keyword scan of a single utterance
    pub fn check_text(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.config
            .hold_keywords
            .iter()
            .find(|kw| !kw.is_empty() && lowered.contains(&kw.to_lowercase()))
            .map(|kw| kw.as_str())
    }

    fn prolonged_silence(&self, now: Instant) -> bool {
        self.config.silence_threshold_ms > 0
            && self.agent_turns >= self.config.min_agent_turns
            && self.first_speech.is_none()
            && now.duration_since(self.started_at)
                >= Duration::from_millis(self.config.silence_threshold_ms)
    }

    fn rapid_barge_ins(&self, now: Instant) -> bool {
        if self.config.barge_in_threshold == 0 {
            return false;
        }
        let window = Duration::from_millis(self.config.barge_in_window_ms);
        let recent = self
            .barge_ins
            .iter()
            .filter(|&&t| now.duration_since(t) <= window)
            .count();
        recent >= self.config.barge_in_threshold as usize
    }

    fn repeated_phrase(&self) -> Option<String> {
        if self.config.repetition_threshold == 0 {
            return None;
        }
        self.phrase_counts
            .iter()
            .filter(|(_, &count)| count >= self.config.repetition_threshold)
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(phrase, _)| phrase.clone())
    }
}

/// Lowercase and collapse whitespace
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
