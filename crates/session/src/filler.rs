//! Filler stalling policy
//!
//! Decides whether to speak a short stalling utterance ("Hmm...") while the
//! LLM is slow. A cooldown gates how often fillers may occur; past the
//! cooldown the decision is probabilistic. Phrase selection is a separate
//! concern from the gate.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use call_agent_config::FillerConfig;

/// Per-session filler policy; owns its randomness source
pub struct FillerPolicy {
    cooldown: Duration,
    probability: f64,
    phrases: Vec<String>,
    last_spoken: Option<Instant>,
    rng: StdRng,
}

impl FillerPolicy {
    pub fn new(config: &FillerConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic policy for tests
    pub fn seeded(config: &FillerConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &FillerConfig, rng: StdRng) -> Self {
        Self {
            cooldown: Duration::from_millis(config.cooldown_ms),
            probability: config.probability,
            phrases: config.phrases.clone(),
            last_spoken: None,
            rng,
        }
    }

    /// Decide whether to speak a filler now
    ///
    /// Never true inside the cooldown. The never-spoken state counts as
    /// "cooldown elapsed".
    pub fn should_speak(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_spoken {
            if now.duration_since(last) < self.cooldown {
                return false;
            }
        }
        self.rng.gen_bool(self.probability)
    }

    /// Record that a filler was spoken, restarting the cooldown
    pub fn mark_spoken(&mut self, now: Instant) {
        self.last_spoken = Some(now);
    }

    /// Pick a phrase uniformly
    pub fn pick_phrase(&mut self) -> Option<String> {
        if self.phrases.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..self.phrases.len());
        Some(self.phrases[idx].clone())
    }

    /// Milliseconds since the last filler, for eventlog data
    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        self.last_spoken
            .map(|last| now.duration_since(last).as_millis() as u64)
            .unwrap_or(u64::MAX)
    }
}
