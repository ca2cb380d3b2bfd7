//! In-process duplex transport
//!
//! Channel-backed implementation of the transport traits, used by session
//! tests and the dev loopback. The peer endpoint plays the telephony
//! provider: it injects inbound frames and observes playback output.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::frame::{InboundFrame, OutboundFrame};
use crate::traits::{FrameSource, PlaybackSink};
use crate::TransportError;

/// Provider-side handle for an in-process transport
pub struct PeerEndpoint {
    inbound_tx: mpsc::Sender<InboundFrame>,
    outbound_rx: mpsc::Receiver<OutboundFrame>,
}

impl PeerEndpoint {
    /// Inject an inbound frame, as if received from the wire
    pub async fn send(&self, frame: InboundFrame) -> Result<(), TransportError> {
        self.inbound_tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Inject a caller audio chunk
    pub async fn send_audio(&self, audio: &[u8]) -> Result<(), TransportError> {
        self.send(InboundFrame::media(audio)).await
    }

    /// Next outbound frame produced by the session, if any
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.outbound_rx.recv().await
    }

    /// Drain whatever outbound frames are currently queued
    pub fn drain(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound_rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Hang up: close the inbound stream
    pub fn hangup(self) {
        drop(self.inbound_tx);
    }
}

/// Session-side read half
pub struct ChannelFrameSource {
    inbound_rx: mpsc::Receiver<InboundFrame>,
}

#[async_trait]
impl FrameSource for ChannelFrameSource {
    async fn next_frame(&mut self) -> Result<Option<InboundFrame>, TransportError> {
        Ok(self.inbound_rx.recv().await)
    }
}

/// Session-side write half
#[derive(Clone)]
pub struct ChannelPlaybackSink {
    outbound_tx: mpsc::Sender<OutboundFrame>,
}

#[async_trait]
impl PlaybackSink for ChannelPlaybackSink {
    async fn send_audio(&self, chunk: &[u8]) -> Result<(), TransportError> {
        self.outbound_tx
            .send(OutboundFrame::media(chunk))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn clear(&self) -> Result<(), TransportError> {
        self.outbound_tx
            .send(OutboundFrame::Clear)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

/// Build a connected transport pair
pub fn in_process(capacity: usize) -> (PeerEndpoint, ChannelFrameSource, ChannelPlaybackSink) {
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

    (
        PeerEndpoint { inbound_tx, outbound_rx },
        ChannelFrameSource { inbound_rx },
        ChannelPlaybackSink { outbound_tx },
    )
}
