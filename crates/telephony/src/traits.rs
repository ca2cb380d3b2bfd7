//! Transport traits
//!
//! Split read/write halves so the session's ingestion and emission tasks can
//! own their side of the transport independently.

use async_trait::async_trait;

use crate::{InboundFrame, TransportError};

/// Read half: the inbound frame stream
#[async_trait]
pub trait FrameSource: Send {
    /// Next inbound frame; `Ok(None)` means the stream closed normally
    async fn next_frame(&mut self) -> Result<Option<InboundFrame>, TransportError>;
}

/// Write half: playback audio and control frames
///
/// Shared between the emission task and the control task (for clears), so it
/// takes `&self` and must be cheap to use concurrently.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Queue one chunk of playback audio
    async fn send_audio(&self, chunk: &[u8]) -> Result<(), TransportError>;

    /// Discard any buffered-but-unplayed audio; issued on barge-in before
    /// any new turn's audio
    async fn clear(&self) -> Result<(), TransportError>;
}
