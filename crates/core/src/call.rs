//! Call identity, state machine, and turn records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for one phone call
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Generate a fresh random call id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an identifier supplied by the telephony provider
    pub fn from_provider(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Turn-taking state of one call
///
/// `Listening` is the initial state. The loop is
/// `Listening -> CallerSpeaking -> Finalizing -> Thinking -> AgentSpeaking -> Listening`.
/// Barge-in jumps from `Thinking`/`AgentSpeaking` straight back to
/// `CallerSpeaking`. Any state may move to `Ending -> Ended`; `Ended` is
/// terminal and no further audio is processed or emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Waiting for the caller to start speaking
    Listening,
    /// Caller speech in progress, transcript accumulating
    CallerSpeaking,
    /// Endpointing fired, turn is being closed out
    Finalizing,
    /// LLM in flight; a filler may be spoken
    Thinking,
    /// Agent audio playing out
    AgentSpeaking,
    /// Terminal path entered, pipeline being torn down
    Ending,
    /// Call finished
    Ended,
}

impl CallState {
    /// True while the agent owns the audio channel and barge-in applies
    pub fn interruptible(&self) -> bool {
        matches!(self, CallState::Thinking | CallState::AgentSpeaking)
    }

    /// True once the call has entered a terminal path
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ending | CallState::Ended)
    }
}

/// Why a call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalCause {
    CallerHangup,
    AgentHangup,
    Forwarded,
    RobocallDetected,
    MaxDuration,
    Error,
}

impl TerminalCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalCause::CallerHangup => "caller_hangup",
            TerminalCause::AgentHangup => "agent_hangup",
            TerminalCause::Forwarded => "forwarded",
            TerminalCause::RobocallDetected => "robocall_detected",
            TerminalCause::MaxDuration => "max_duration",
            TerminalCause::Error => "error",
        }
    }
}

/// Which side of the call produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Caller,
    Agent,
}

/// One finalized utterance by either party
///
/// Created when a turn is finalized and never mutated afterward. Sequence
/// numbers are strictly increasing within a call, interleaving caller and
/// agent turns in real completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Sequence number, strictly increasing within the call
    pub seq: u64,

    /// Who spoke
    pub speaker: Speaker,

    /// Finalized text
    pub text: String,

    /// When the utterance started
    pub started_at: DateTime<Utc>,

    /// When the turn was finalized
    pub ended_at: DateTime<Utc>,

    /// STT confidence; caller turns only
    pub confidence: Option<f32>,

    /// True if the turn was cut short by barge-in
    pub interrupted: bool,
}

impl Turn {
    /// Caller turn from a finalized transcript
    pub fn caller(seq: u64, text: impl Into<String>, confidence: f32) -> Self {
        let now = Utc::now();
        Self {
            seq,
            speaker: Speaker::Caller,
            text: text.into(),
            started_at: now,
            ended_at: now,
            confidence: Some(confidence),
            interrupted: false,
        }
    }

    /// Agent turn from a completed (or interrupted) response
    pub fn agent(seq: u64, text: impl Into<String>, interrupted: bool) -> Self {
        let now = Utc::now();
        Self {
            seq,
            speaker: Speaker::Agent,
            text: text.into(),
            started_at: now,
            ended_at: now,
            confidence: None,
            interrupted,
        }
    }

    /// Set the start/end timestamps
    pub fn with_times(mut self, started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self.ended_at = ended_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_interruptible() {
        assert!(CallState::Thinking.interruptible());
        assert!(CallState::AgentSpeaking.interruptible());
        assert!(!CallState::Listening.interruptible());
        assert!(!CallState::Ended.interruptible());
    }

    #[test]
    fn test_state_terminal() {
        assert!(CallState::Ending.is_terminal());
        assert!(CallState::Ended.is_terminal());
        assert!(!CallState::Listening.is_terminal());
        assert!(!CallState::AgentSpeaking.is_terminal());
    }

    #[test]
    fn test_terminal_cause_str() {
        assert_eq!(TerminalCause::RobocallDetected.as_str(), "robocall_detected");
        assert_eq!(TerminalCause::CallerHangup.as_str(), "caller_hangup");
    }

    #[test]
    fn test_turn_constructors() {
        let t = Turn::caller(1, "hello there", 0.92);
        assert_eq!(t.speaker, Speaker::Caller);
        assert_eq!(t.confidence, Some(0.92));
        assert!(!t.interrupted);

        let t = Turn::agent(2, "hi", true);
        assert_eq!(t.speaker, Speaker::Agent);
        assert!(t.confidence.is_none());
        assert!(t.interrupted);
    }
}
