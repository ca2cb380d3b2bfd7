//! Wire frame codec

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::TransportError;

/// Frame received from the telephony provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Media stream opened
    Start {
        call_id: String,
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        to: Option<String>,
    },
    /// One chunk of caller audio, base64-encoded
    Media { payload: String },
    /// Media stream closed (caller hung up or provider tore down)
    Stop,
}

impl InboundFrame {
    /// Build a media frame from raw audio
    pub fn media(audio: &[u8]) -> Self {
        InboundFrame::Media { payload: BASE64.encode(audio) }
    }

    /// Decode the audio payload of a media frame
    pub fn audio(&self) -> Result<Vec<u8>, TransportError> {
        match self {
            InboundFrame::Media { payload } => BASE64
                .decode(payload)
                .map_err(|e| TransportError::MalformedFrame(format!("bad base64 payload: {e}"))),
            _ => Err(TransportError::MalformedFrame("not a media frame".to_string())),
        }
    }
}

/// Frame sent to the telephony provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// One chunk of playback audio, base64-encoded
    Media { payload: String },
    /// Discard any buffered-but-unplayed audio immediately
    Clear,
}

impl OutboundFrame {
    /// Build a playback frame from raw audio
    pub fn media(audio: &[u8]) -> Self {
        OutboundFrame::Media { payload: BASE64.encode(audio) }
    }
}

/// Parse one inbound frame from its JSON text
pub fn decode_inbound(text: &str) -> Result<InboundFrame, TransportError> {
    serde_json::from_str(text).map_err(|e| TransportError::MalformedFrame(e.to_string()))
}

/// Serialize one outbound frame to JSON text
pub fn encode_outbound(frame: &OutboundFrame) -> String {
    // The outbound enum has no non-serializable fields, so this cannot fail.
    serde_json::to_string(frame).unwrap_or_default()
}
