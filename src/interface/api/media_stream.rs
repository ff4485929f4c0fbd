//! Telephony media stream WebSocket endpoint

use super::state::AppState;
use crate::domain::shared::error::RelayError;
use crate::domain::shared::value_objects::ChannelSide;
use crate::infrastructure::protocols::wire::{WireChannel, WireFrame};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{future, SinkExt, StreamExt};
use tracing::{debug, info, warn};

const SIDE: ChannelSide = ChannelSide::Telephony;

/// Upgrade the provider's request and run a call session on the socket
pub async fn media_stream_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("Telephony media stream connected");

    match state.sessions.run(wire_channel(socket)).await {
        Ok(outcome) => info!(
            session_id = %outcome.session_id,
            stream_sid = %outcome.stream_sid,
            end_reason = %outcome.end_reason,
            "Telephony media stream finished"
        ),
        Err(e) => warn!("Telephony media stream rejected: {}", e),
    }
}

/// View an axum socket as a [`WireChannel`]
pub fn wire_channel(socket: WebSocket) -> WireChannel {
    let (sink, stream) = socket.split();

    let incoming = stream.filter_map(|message| {
        future::ready(match message {
            Ok(Message::Text(text)) => Some(Ok(WireFrame::Text(text))),
            Ok(Message::Binary(data)) => Some(Ok(WireFrame::Binary(data))),
            Ok(Message::Close(frame)) => {
                debug!(?frame, "Telephony provider closed the socket");
                Some(Ok(WireFrame::Close))
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
            Err(e) => Some(Err(RelayError::disconnect(SIDE, e.to_string()))),
        })
    });

    let outgoing = sink
        .sink_map_err(|e| RelayError::disconnect(SIDE, e.to_string()))
        .with(|frame: WireFrame| {
            future::ready(Ok::<_, RelayError>(match frame {
                WireFrame::Text(text) => Message::Text(text),
                WireFrame::Binary(data) => Message::Binary(data),
                WireFrame::Close => Message::Close(None),
            }))
        });

    WireChannel::new(incoming, outgoing)
}
