//! Per-call real-time session orchestration
//!
//! This crate is the core of the system: the turn-taking state machine that
//! owns one call's duplex audio/text pipeline, the sentence boundary
//! extractor that lets synthesis start before the model finishes, the
//! filler-injection policy, the robocall signal detector, and the
//! process-wide call registry that enables zero-downtime draining.

pub mod call;
pub mod directive;
pub mod endpointing;
pub mod filler;
pub mod registry;
pub mod robocall;
pub mod sentence;

pub use call::{CallSession, CallSummary, Providers};
pub use directive::{extract_directives, Directive};
pub use endpointing::silence_wait;
pub use filler::FillerPolicy;
pub use registry::{CallGuard, CallRegistry};
pub use robocall::{RobocallDetector, RobocallReason};
pub use sentence::{extract_sentences, SentenceSplitter};

use thiserror::Error;

/// Session errors
///
/// Most failures are absorbed inside the session loop (the caller never
/// hears a raw error); only admission-time configuration rejection surfaces
/// to the accepting server.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(#[from] call_agent_config::ConfigError),
}
