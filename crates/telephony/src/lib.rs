//! Telephony media transport
//!
//! The telephony provider speaks JSON frames over a duplex byte stream:
//! inbound frames carry call metadata and base64 audio payloads, outbound
//! frames carry playback audio and an explicit clear instruction used on
//! barge-in. Signaling (call setup and teardown) is the provider's problem;
//! this crate only covers the media leg.

pub mod duplex;
pub mod frame;
pub mod traits;

pub use duplex::{in_process, ChannelFrameSource, ChannelPlaybackSink, PeerEndpoint};
pub use frame::{decode_inbound, encode_outbound, InboundFrame, OutboundFrame};
pub use traits::{FrameSource, PlaybackSink};

use thiserror::Error;

/// Transport errors; terminal for the call
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Connection closed")]
    Closed,

    #[error("Send failed: {0}")]
    Send(String),
}
