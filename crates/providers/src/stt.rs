//! Streaming speech-to-text adapter

use async_trait::async_trait;
use tokio::sync::mpsc;

use call_agent_core::TranscriptEvent;

use crate::ProviderError;

/// One item on the recognition result stream
pub type SttResult = Result<TranscriptEvent, ProviderError>;

/// An open recognition stream
///
/// Audio goes in through `audio`; recognition results and errors come back on
/// `events`. Dropping `audio` closes the stream, after which `events` drains
/// and closes. An `events` closure while `audio` is still open is an
/// unexpected provider failure.
pub struct SttStream {
    /// Raw decoded audio frames, forwarded from the transport
    pub audio: mpsc::Sender<Vec<u8>>,

    /// Recognition results and stream errors
    pub events: mpsc::Receiver<SttResult>,
}

/// Streaming STT provider
#[async_trait]
pub trait SttProvider: Send + Sync {
    /// Open a fresh recognition stream
    async fn open(&self, language: &str) -> Result<SttStream, ProviderError>;
}
