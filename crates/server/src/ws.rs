//! WebSocket media bridge
//!
//! Adapts one WebSocket connection to the transport traits the session
//! consumes: text frames in are decoded into inbound frames, playback audio
//! and clears go back out as text frames. The first frame on a connection
//! must be `start`; everything before admission happens without holding a
//! registry slot.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tracing::{info, warn};

use call_agent_core::CallId;
use call_agent_session::CallSession;
use call_agent_telephony::{
    decode_inbound, encode_outbound, FrameSource, InboundFrame, OutboundFrame, PlaybackSink,
    TransportError,
};

use crate::AppState;

pub async fn media_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.registry.is_draining()
        || state.registry.active_count() >= state.settings.server.max_calls
    {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handle_media(state, socket))
}

async fn handle_media(state: Arc<AppState>, socket: WebSocket) {
    let (tx, rx) = socket.split();
    let mut source = WsFrameSource { rx };

    // The provider announces the call before any media flows.
    let call_id = match source.next_frame().await {
        Ok(Some(InboundFrame::Start { call_id, from, to })) => {
            info!(call_id = %call_id, from = ?from, to = ?to, "media stream opened");
            CallId::from_provider(call_id)
        }
        Ok(other) => {
            warn!(frame = ?other, "stream did not open with a start frame");
            return;
        }
        Err(e) => {
            warn!(error = %e, "failed to read opening frame");
            return;
        }
    };

    // A rejected configuration never occupies a registry slot.
    if let Err(e) = state.settings.tenant.validate() {
        warn!(call_id = %call_id, error = %e, "tenant configuration rejected");
        return;
    }

    let Some(guard) = state.registry.register() else {
        info!(call_id = %call_id, "draining, rejecting call");
        return;
    };

    let session = match CallSession::new(
        call_id.clone(),
        state.settings.tenant.clone(),
        state.providers.clone(),
        state.store.clone(),
        state.events.clone(),
        guard,
    ) {
        Ok(session) => session,
        Err(e) => {
            warn!(call_id = %call_id, error = %e, "failed to build session");
            return;
        }
    };

    let sink = Arc::new(WsPlaybackSink { tx: Mutex::new(tx) });
    let summary = session.run(Box::new(source), sink).await;
    info!(
        call_id = %summary.call_id,
        cause = summary.cause.as_str(),
        turns = summary.turns,
        duration_ms = summary.duration.as_millis() as u64,
        "call finished",
    );
}

struct WsFrameSource {
    rx: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn next_frame(&mut self) -> Result<Option<InboundFrame>, TransportError> {
        loop {
            match self.rx.next().await {
                Some(Ok(Message::Text(text))) => match decode_inbound(&text) {
                    Ok(frame) => return Ok(Some(frame)),
                    Err(e) => {
                        warn!(error = %e, "skipping malformed frame");
                        continue;
                    }
                },
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Pings and pongs are handled by axum; binary is not ours.
                Some(Ok(_)) => continue,
                Some(Err(_)) => return Ok(None),
            }
        }
    }
}

struct WsPlaybackSink {
    tx: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsPlaybackSink {
    async fn send_frame(&self, frame: &OutboundFrame) -> Result<(), TransportError> {
        self.tx
            .lock()
            .await
            .send(Message::Text(encode_outbound(frame)))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

#[async_trait]
impl PlaybackSink for WsPlaybackSink {
    async fn send_audio(&self, chunk: &[u8]) -> Result<(), TransportError> {
        self.send_frame(&OutboundFrame::media(chunk)).await
    }

    async fn clear(&self) -> Result<(), TransportError> {
        self.send_frame(&OutboundFrame::Clear).await
    }
}
