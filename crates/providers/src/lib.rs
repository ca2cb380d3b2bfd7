//! Provider adapters for the call agent
//!
//! Abstract interfaces for the streaming STT, LLM, and TTS collaborators,
//! plus simulated implementations used in development and tests. Vendor wire
//! formats live behind these traits; the session layer only sees channels of
//! typed events.

pub mod llm;
pub mod simulated;
pub mod stt;
pub mod tts;

pub use llm::{CallAnalysis, ChatMessage, ChatRole, LlmProvider, TokenResult};
pub use simulated::{LoopbackStt, ScriptedStt, SimulatedLlm, SimulatedTts, SttScript};
pub use stt::{SttProvider, SttResult, SttStream};
pub use tts::{AudioChunk, TtsProvider};

use thiserror::Error;

/// Provider errors
///
/// A provider failure never propagates raw to the caller; the session layer
/// degrades gracefully and reports through the eventlog.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("STT error: {0}")]
    Stt(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Stream closed unexpectedly")]
    StreamClosed,

    #[error("Missing credentials: {0}")]
    Credentials(String),
}
