//! Dialling the realtime voice service

use crate::config::RealtimeConfig;
use crate::domain::shared::error::RelayError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::ChannelSide;
use crate::infrastructure::protocols::wire::{WireChannel, WireFrame};
use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

const SIDE: ChannelSide = ChannelSide::Realtime;

/// Opens a socket to the realtime service
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(&self, config: &RealtimeConfig) -> Result<WireChannel>;
}

/// WebSocket client connector
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

fn handshake_failed(message: impl Into<String>) -> RelayError {
    RelayError::HandshakeFailed {
        side: SIDE,
        message: message.into(),
    }
}

#[async_trait]
impl RealtimeConnector for TungsteniteConnector {
    async fn connect(&self, config: &RealtimeConfig) -> Result<WireChannel> {
        let url = config.connect_url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| handshake_failed(format!("invalid realtime URL: {}", e)))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| handshake_failed(format!("invalid API key header: {}", e)))?;
        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (socket, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| handshake_failed(e.to_string()))?;
        info!(model = %config.model, status = %response.status(), "Connected to realtime service");

        let (sink, stream) = socket.split();

        let incoming = stream.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(WireFrame::Text(text))),
                Ok(Message::Binary(data)) => Some(Ok(WireFrame::Binary(data))),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Realtime service closed the socket");
                    Some(Ok(WireFrame::Close))
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
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

        Ok(WireChannel::new(incoming, outgoing))
    }
}

/// Hands out pre-built channels in order, e.g. in-memory pairs
#[derive(Default)]
pub struct InMemoryConnector {
    channels: Mutex<VecDeque<WireChannel>>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, channel: WireChannel) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.push_back(channel);
        }
    }
}

#[async_trait]
impl RealtimeConnector for InMemoryConnector {
    async fn connect(&self, _config: &RealtimeConfig) -> Result<WireChannel> {
        let next = self
            .channels
            .lock()
            .map_err(|_| RelayError::Internal("connector lock poisoned".to_string()))?
            .pop_front();
        next.ok_or_else(|| handshake_failed("no channel available"))
    }
}
