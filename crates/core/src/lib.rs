//! Core types for the call agent
//!
//! This crate provides foundational types used across all other crates:
//! - Call identity and the call state machine
//! - Turn records
//! - STT transcript events
//! - Structured eventlog vocabulary and sink trait
//!
//! Errors live with the layer that produces them; each crate carries its own
//! thiserror enum.

pub mod call;
pub mod events;
pub mod transcript;

pub use call::{CallId, CallState, Speaker, TerminalCause, Turn};
pub use events::{CallEvent, EventSink, TracingEventSink};
pub use transcript::TranscriptEvent;
