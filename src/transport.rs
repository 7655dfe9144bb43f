//! Transport abstraction over a single bidirectional binary channel:
//! whole-message read/write plus ping/pong hooks, independent of any one
//! socket implementation. The production implementation wraps
//! `axum::extract::ws::WebSocket` split into its sink/stream halves. A
//! channel-backed mock is provided for tests so the reader/writer state
//! machines can be exercised without a real socket.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

/// One event read off a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A whole binary application message.
    Binary(Vec<u8>),
    /// A pong frame -- extends the read deadline, carries no data.
    Pong,
    /// A ping frame initiated by the peer (uncommon from a client, but
    /// passed through rather than silently dropped).
    Ping,
}

/// Transport-layer failure: read error, write error, EOF, or close frame.
#[derive(Debug, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Read half of a transport. Exclusively owned by a connection's reader task.
#[allow(async_fn_in_trait)]
pub trait TransportReader: Send {
    /// Read one event. Returns `Err` on any failure (timeout is applied by
    /// the caller via `tokio::time::timeout`, not here) and `Ok(None)` on
    /// orderly close/EOF.
    async fn recv(&mut self) -> Result<Option<TransportEvent>, TransportError>;
}

/// Write half of a transport. Exclusively owned by a connection's writer task.
#[allow(async_fn_in_trait)]
pub trait TransportWriter: Send {
    async fn send_binary(&mut self, data: Vec<u8>) -> Result<(), TransportError>;
    async fn send_ping(&mut self) -> Result<(), TransportError>;
    async fn send_close(&mut self) -> Result<(), TransportError>;
}

/// Split an axum WebSocket into its transport reader/writer halves.
pub fn split_axum(socket: WebSocket) -> (AxumReader, AxumWriter) {
    let (sink, stream) = socket.split();
    (AxumReader(stream), AxumWriter(sink))
}

pub struct AxumReader(SplitStream<WebSocket>);
pub struct AxumWriter(SplitSink<WebSocket, WsMessage>);

impl TransportReader for AxumReader {
    async fn recv(&mut self) -> Result<Option<TransportEvent>, TransportError> {
        loop {
            return match self.0.next().await {
                None => Ok(None),
                Some(Ok(WsMessage::Binary(data))) => Ok(Some(TransportEvent::Binary(data.to_vec()))),
                Some(Ok(WsMessage::Pong(_))) => Ok(Some(TransportEvent::Pong)),
                Some(Ok(WsMessage::Ping(_))) => Ok(Some(TransportEvent::Ping)),
                Some(Ok(WsMessage::Close(_))) => Ok(None),
                Some(Ok(WsMessage::Text(_))) => continue,
                Some(Err(e)) => Err(TransportError(e.to_string())),
            };
        }
    }
}

impl TransportWriter for AxumWriter {
    async fn send_binary(&mut self, data: Vec<u8>) -> Result<(), TransportError> {
        self.0
            .send(WsMessage::Binary(data.into()))
            .await
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.0
            .send(WsMessage::Ping(Vec::new().into()))
            .await
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn send_close(&mut self) -> Result<(), TransportError> {
        self.0
            .send(WsMessage::Close(None))
            .await
            .map_err(|e| TransportError(e.to_string()))
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    //! In-memory transport pair for tests: `mock::pair()` returns a
    //! `(MockReader, MockWriter)` for the "server side" and the opposite
    //! pair for a "peer" driving it, connected by `tokio::sync::mpsc`.

    use super::*;
    use tokio::sync::mpsc;

    pub struct MockReader(pub mpsc::Receiver<TransportEvent>);
    pub struct MockWriter(pub mpsc::Sender<WsSent>);

    /// What a `MockWriter` recorded having sent, observable by a test peer.
    #[derive(Debug)]
    pub enum WsSent {
        Binary(Vec<u8>),
        Ping,
        Close,
    }

    impl TransportReader for MockReader {
        async fn recv(&mut self) -> Result<Option<TransportEvent>, TransportError> {
            Ok(self.0.recv().await)
        }
    }

    impl TransportWriter for MockWriter {
        async fn send_binary(&mut self, data: Vec<u8>) -> Result<(), TransportError> {
            self.0
                .send(WsSent::Binary(data))
                .await
                .map_err(|_| TransportError("mock peer dropped".to_string()))
        }

        async fn send_ping(&mut self) -> Result<(), TransportError> {
            self.0
                .send(WsSent::Ping)
                .await
                .map_err(|_| TransportError("mock peer dropped".to_string()))
        }

        async fn send_close(&mut self) -> Result<(), TransportError> {
            let _ = self.0.send(WsSent::Close).await;
            Ok(())
        }
    }

    /// Build a connected mock transport plus the test-side handles used to
    /// feed inbound events and observe outbound frames.
    pub fn pair() -> (
        MockReader,
        MockWriter,
        mpsc::Sender<TransportEvent>,
        mpsc::Receiver<WsSent>,
    ) {
        let (inbound_tx, inbound_rx) = mpsc::channel(32);
        let (outbound_tx, outbound_rx) = mpsc::channel(32);
        (
            MockReader(inbound_rx),
            MockWriter(outbound_tx),
            inbound_tx,
            outbound_rx,
        )
    }
}
