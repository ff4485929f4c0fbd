//! Transport-neutral view of a message socket
//!
//! Adapters only see a stream of [`WireFrame`]s and a sink accepting them, so
//! the same adapter code runs over an axum WebSocket, a tungstenite client
//! socket, or an in-memory pair in tests.

use crate::domain::shared::error::RelayError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::ChannelSide;
use futures::channel::mpsc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio::task::JoinHandle;

/// One message on the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
    /// Orderly close initiated by either end
    Close,
}

pub type WireStream = Pin<Box<dyn Stream<Item = Result<WireFrame>> + Send>>;
pub type WireSink = Pin<Box<dyn Sink<WireFrame, Error = RelayError> + Send>>;

/// Both halves of a socket
pub struct WireChannel {
    pub incoming: WireStream,
    pub outgoing: WireSink,
}

impl WireChannel {
    pub fn new<I, O>(incoming: I, outgoing: O) -> Self
    where
        I: Stream<Item = Result<WireFrame>> + Send + 'static,
        O: Sink<WireFrame, Error = RelayError> + Send + 'static,
    {
        Self {
            incoming: Box::pin(incoming),
            outgoing: Box::pin(outgoing),
        }
    }

    /// In-memory socket pair. The returned peer plays the remote end.
    pub fn pair(side: ChannelSide, capacity: usize) -> (WireChannel, WirePeer) {
        let (to_relay, from_peer) = mpsc::channel::<Result<WireFrame>>(capacity);
        let (to_peer, from_relay) = mpsc::channel::<WireFrame>(capacity);

        let outgoing = to_peer
            .sink_map_err(move |e| RelayError::disconnect(side, format!("peer gone: {}", e)));

        let channel = WireChannel::new(from_peer, outgoing);
        let peer = WirePeer {
            to_relay,
            from_relay,
        };
        (channel, peer)
    }
}

/// Remote end of an in-memory [`WireChannel`]
pub struct WirePeer {
    to_relay: mpsc::Sender<Result<WireFrame>>,
    from_relay: mpsc::Receiver<WireFrame>,
}

impl WirePeer {
    pub async fn send_text(&mut self, text: impl Into<String>) -> bool {
        self.to_relay.send(Ok(WireFrame::Text(text.into()))).await.is_ok()
    }

    pub async fn send_json(&mut self, value: &serde_json::Value) -> bool {
        self.send_text(value.to_string()).await
    }

    pub async fn send_frame(&mut self, frame: WireFrame) -> bool {
        self.to_relay.send(Ok(frame)).await.is_ok()
    }

    /// Deliver a transport error to the relay
    pub async fn fail(&mut self, error: RelayError) -> bool {
        self.to_relay.send(Err(error)).await.is_ok()
    }

    /// Drop the relay-bound half without a close frame
    pub fn hang_up(&mut self) {
        self.to_relay.close_channel();
    }

    /// Next frame the relay sent; `None` once the relay dropped its sink
    pub async fn recv(&mut self) -> Option<WireFrame> {
        self.from_relay.next().await
    }

    /// Next frame parsed as JSON; `None` for anything but a JSON text frame
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        match self.recv().await? {
            WireFrame::Text(text) => serde_json::from_str(&text).ok(),
            _ => None,
        }
    }

    /// Everything already sent by the relay, without waiting
    pub fn drain(&mut self) -> Vec<WireFrame> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = self.from_relay.try_next() {
            frames.push(frame);
        }
        frames
    }
}

/// Command channel and tasks of one running adapter
pub struct AdapterHandle<C> {
    pub commands: tokio::sync::mpsc::Sender<C>,
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}
