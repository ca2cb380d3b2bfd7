//! Adaptive endpointing
//!
//! How long to wait, after the caller stops producing new speech, before the
//! turn is declared complete. Long or clearly finished utterances need less
//! silence than short fragments; a hard max-turn timeout elsewhere guarantees
//! the turn finalizes regardless.

use std::time::Duration;

use call_agent_config::EndpointingConfig;

/// Compute the silence wait for the current transcript
///
/// Starts from `base_ms`, shrinks per transcript character, drops further
/// when the transcript ends on sentence-final punctuation, and never goes
/// below `min_ms`.
pub fn silence_wait(transcript: &str, config: &EndpointingConfig) -> Duration {
    let trimmed = transcript.trim();
    let chars = trimmed.chars().count() as u64;

    let mut wait_ms = config.base_ms.saturating_sub(chars * config.per_char_decay_ms);

    if trimmed.ends_with(['.', '!', '?']) {
        wait_ms = wait_ms.saturating_sub(config.sentence_end_bonus_ms);
    }

    Duration::from_millis(wait_ms.max(config.min_ms))
}
