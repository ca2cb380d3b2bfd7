//! Per-tenant call behavior configuration

use serde::{Deserialize, Serialize};

/// Everything one tenant controls about how their calls are handled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Tenant identifier
    #[serde(default = "default_tenant_id")]
    pub id: String,

    /// System prompt for response generation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Greeting spoken when the call is answered; empty disables it
    #[serde(default = "default_greeting")]
    pub greeting: String,

    /// Recognition language passed to the STT adapter
    #[serde(default = "default_language")]
    pub language: String,

    /// Spoken while waiting for a caller who has not said anything yet;
    /// empty disables re-prompting
    #[serde(default = "default_reprompt")]
    pub reprompt: String,

    /// Silence gap before each re-prompt (ms); 0 disables
    #[serde(default = "default_reprompt_after_ms")]
    pub reprompt_after_ms: u64,

    /// Voice parameters passed to the TTS adapter
    #[serde(default)]
    pub voice: VoiceConfig,

    /// Endpointing and turn timing
    #[serde(default)]
    pub endpointing: EndpointingConfig,

    /// Filler stalling behavior
    #[serde(default)]
    pub filler: FillerConfig,

    /// Robocall detection thresholds and policy
    #[serde(default)]
    pub robocall: RobocallConfig,

    /// Hard cap on total call duration (ms)
    #[serde(default = "default_max_call_duration_ms")]
    pub max_call_duration_ms: u64,
}

fn default_tenant_id() -> String {
    "default".to_string()
}
fn default_system_prompt() -> String {
    "You are a polite assistant answering phone calls on behalf of the user. \
     Keep replies short, they will be spoken aloud. Emit <hangup/> when the \
     conversation is over, or <forward to=\"owner\"/> when the caller should \
     be connected through."
        .to_string()
}
fn default_greeting() -> String {
    "Hello, you have reached the assistant. How can I help you?".to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_reprompt() -> String {
    "Hello? Is anyone there?".to_string()
}
fn default_reprompt_after_ms() -> u64 {
    6_000
}
fn default_max_call_duration_ms() -> u64 {
    10 * 60 * 1000
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            id: default_tenant_id(),
            system_prompt: default_system_prompt(),
            greeting: default_greeting(),
            language: default_language(),
            reprompt: default_reprompt(),
            reprompt_after_ms: default_reprompt_after_ms(),
            voice: VoiceConfig::default(),
            endpointing: EndpointingConfig::default(),
            filler: FillerConfig::default(),
            robocall: RobocallConfig::default(),
            max_call_duration_ms: default_max_call_duration_ms(),
        }
    }
}

/// Voice parameters for synthesis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Provider voice identifier
    #[serde(default = "default_voice_id")]
    pub voice_id: String,

    /// Speaking rate multiplier
    #[serde(default = "default_rate")]
    pub rate: f32,
}

fn default_voice_id() -> String {
    "neutral-1".to_string()
}
fn default_rate() -> f32 {
    1.0
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_id: default_voice_id(),
            rate: default_rate(),
        }
    }
}

/// Adaptive endpointing parameters
///
/// The silence wait after the caller stops speaking starts at `base_ms`,
/// shrinks by `per_char_decay_ms` for every transcript character, drops a
/// further `sentence_end_bonus_ms` when the transcript ends on sentence-final
/// punctuation, and never goes below `min_ms`. `max_turn_timeout_ms` is an
/// independent hard fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointingConfig {
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,

    #[serde(default = "default_min_ms")]
    pub min_ms: u64,

    #[serde(default = "default_per_char_decay_ms")]
    pub per_char_decay_ms: u64,

    #[serde(default = "default_sentence_end_bonus_ms")]
    pub sentence_end_bonus_ms: u64,

    #[serde(default = "default_max_turn_timeout_ms")]
    pub max_turn_timeout_ms: u64,
}

fn default_base_ms() -> u64 {
    1400
}
fn default_min_ms() -> u64 {
    400
}
fn default_per_char_decay_ms() -> u64 {
    8
}
fn default_sentence_end_bonus_ms() -> u64 {
    300
}
fn default_max_turn_timeout_ms() -> u64 {
    12_000
}

impl Default for EndpointingConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            min_ms: default_min_ms(),
            per_char_decay_ms: default_per_char_decay_ms(),
            sentence_end_bonus_ms: default_sentence_end_bonus_ms(),
            max_turn_timeout_ms: default_max_turn_timeout_ms(),
        }
    }
}

/// Filler stalling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillerConfig {
    /// Minimum gap between fillers (ms)
    #[serde(default = "default_filler_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Probability of speaking once the cooldown has elapsed
    #[serde(default = "default_filler_probability")]
    pub probability: f64,

    /// How long to wait for the first LLM token before considering a filler (ms)
    #[serde(default = "default_filler_delay_ms")]
    pub first_token_delay_ms: u64,

    /// Phrases to choose from, uniformly
    #[serde(default = "default_filler_phrases")]
    pub phrases: Vec<String>,
}

fn default_filler_cooldown_ms() -> u64 {
    10_000
}
fn default_filler_probability() -> f64 {
    0.7
}
fn default_filler_delay_ms() -> u64 {
    1200
}
fn default_filler_phrases() -> Vec<String> {
    vec![
        "Hmm...".to_string(),
        "One moment...".to_string(),
        "Let me see...".to_string(),
    ]
}

impl Default for FillerConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_filler_cooldown_ms(),
            probability: default_filler_probability(),
            first_token_delay_ms: default_filler_delay_ms(),
            phrases: default_filler_phrases(),
        }
    }
}

/// What to do when a call is classified as automated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RobocallAction {
    /// End the call immediately
    #[default]
    Hangup,
    /// Keep the call alive, flag it for downstream review
    Flag,
}

/// Robocall detection thresholds
///
/// A threshold of 0 disables the corresponding check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobocallConfig {
    /// Silence threshold for the prolonged-silence check (ms)
    #[serde(default = "default_silence_threshold_ms")]
    pub silence_threshold_ms: u64,

    /// Agent turns that must complete before silence counts
    #[serde(default = "default_min_agent_turns")]
    pub min_agent_turns: u32,

    /// Barge-ins within the window that trigger detection; 0 disables
    #[serde(default = "default_barge_in_threshold")]
    pub barge_in_threshold: u32,

    /// Trailing window for the barge-in check (ms)
    #[serde(default = "default_barge_in_window_ms")]
    pub barge_in_window_ms: u64,

    /// Repetitions of one normalized phrase that trigger detection; 0 disables
    #[serde(default = "default_repetition_threshold")]
    pub repetition_threshold: u32,

    /// Case-insensitive hold/IVR keywords for per-utterance scanning
    #[serde(default = "default_hold_keywords")]
    pub hold_keywords: Vec<String>,

    /// Policy applied on a positive determination
    #[serde(default)]
    pub action: RobocallAction,
}

fn default_silence_threshold_ms() -> u64 {
    15_000
}
fn default_min_agent_turns() -> u32 {
    2
}
fn default_barge_in_threshold() -> u32 {
    3
}
fn default_barge_in_window_ms() -> u64 {
    5_000
}
fn default_repetition_threshold() -> u32 {
    3
}
fn default_hold_keywords() -> Vec<String> {
    vec![
        "please hold".to_string(),
        "do not hang up".to_string(),
        "your call is important".to_string(),
        "next available agent".to_string(),
    ]
}

impl Default for RobocallConfig {
    fn default() -> Self {
        Self {
            silence_threshold_ms: default_silence_threshold_ms(),
            min_agent_turns: default_min_agent_turns(),
            barge_in_threshold: default_barge_in_threshold(),
            barge_in_window_ms: default_barge_in_window_ms(),
            repetition_threshold: default_repetition_threshold(),
            hold_keywords: default_hold_keywords(),
            action: RobocallAction::default(),
        }
    }
}

impl TenantConfig {
    /// Validate tenant configuration before a call is admitted
    pub fn validate(&self) -> Result<(), crate::ConfigError> {
        if self.system_prompt.trim().is_empty() {
            return Err(crate::ConfigError::Missing("tenant.system_prompt".to_string()));
        }
        if !(0.0..=1.0).contains(&self.filler.probability) {
            return Err(crate::ConfigError::InvalidValue {
                field: "tenant.filler.probability".to_string(),
                message: "must be between 0.0 and 1.0".to_string(),
            });
        }
        if self.endpointing.min_ms == 0 || self.endpointing.min_ms > self.endpointing.base_ms {
            return Err(crate::ConfigError::InvalidValue {
                field: "tenant.endpointing.min_ms".to_string(),
                message: "must be nonzero and at most base_ms".to_string(),
            });
        }
        if self.endpointing.max_turn_timeout_ms <= self.endpointing.base_ms {
            return Err(crate::ConfigError::InvalidValue {
                field: "tenant.endpointing.max_turn_timeout_ms".to_string(),
                message: "must exceed base_ms".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let tenant = TenantConfig::default();
        assert!(tenant.validate().is_ok());
        assert_eq!(tenant.filler.cooldown_ms, 10_000);
        assert_eq!(tenant.robocall.barge_in_threshold, 3);
        assert_eq!(tenant.robocall.action, RobocallAction::Hangup);
    }

    #[test]
    fn test_validation_rejects_bad_probability() {
        let mut tenant = TenantConfig::default();
        tenant.filler.probability = 1.5;
        assert!(tenant.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_endpointing() {
        let mut tenant = TenantConfig::default();
        tenant.endpointing.min_ms = tenant.endpointing.base_ms + 1;
        assert!(tenant.validate().is_err());
    }
}
