//! An embeddable runtime for connection-and-room multicast over a binary
//! WebSocket transport: a hub/registry, per-room actor tasks, per-connection
//! reader/writer tasks, a length-prefixed wire codec, and a custom-event
//! dispatch table.
//!
//! The entry point is [`RoomServer`]: construct one with a
//! [`RoomServerConfig`], optionally install an auth hook and custom event
//! handlers, then mount [`RoomServer::router`] into an `axum` application.

mod codec;
mod config;
mod connection;
mod dispatch;
mod error;
mod hub;
mod room;
mod transport;
mod upgrade;

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use axum::Router;

pub use codec::Message;
pub use config::RoomServerConfig;
pub use connection::Connection;
pub use dispatch::Handler;
pub use error::HandlerError;
pub use transport::{TransportError, TransportEvent, TransportReader, TransportWriter};

#[cfg(any(test, feature = "test-util"))]
pub use transport::mock;

use hub::Hub;

/// The embeddable room-relay runtime. Holds the hub (connection/room
/// registry), the dispatch table, and the optional auth hook; hands out an
/// `axum` router for the single upgrade endpoint.
pub struct RoomServer {
    hub: Arc<Hub>,
}

impl RoomServer {
    pub fn new(config: RoomServerConfig) -> Self {
        let mut config = config;
        config.validate();
        Self { hub: Hub::new(config) }
    }

    /// Register a handler for a custom (non-reserved) event name. See
    /// [`Handler`].
    pub fn register_handler(
        &self,
        event: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> Result<(), HandlerError> {
        self.hub.dispatch().register(event, handler)
    }

    /// Install the authentication hook run on every upgrade request. `None`
    /// is treated by the hook itself as rejection; accepting every upgrade
    /// unconditionally is the default when no hook is installed at all.
    pub fn set_auth(&self, auth: impl Fn(&HeaderMap) -> Option<HashMap<String, String>> + Send + Sync + 'static) {
        self.hub.set_auth(Arc::new(auth));
    }

    /// The single-route `axum` [`Router`] for the upgrade endpoint
    /// (`GET /ws`). Embedders who already run their own router should nest
    /// or merge this, or call [`upgrade::router`] directly with their own
    /// path.
    pub fn router(&self) -> Router {
        upgrade::router(Arc::clone(&self.hub))
    }

    /// Number of rooms currently tracked by the hub. Exposed for embedders
    /// building their own diagnostics; not a stable count (rooms come and
    /// go as members join and leave).
    pub fn room_count(&self) -> usize {
        self.hub.room_count()
    }
}

/// Broadcast `event`/`payload` to every other member of `room`, framed with
/// `conn` as `src`. `conn.send_to_room(...)` is equivalent sugar.
pub async fn send_to_room(conn: &Connection, room: &str, event: &str, payload: impl Into<Vec<u8>>) {
    conn.send_to_room(room, event, payload).await;
}

/// Send a direct message to another client by id.
pub fn send_to_client(conn: &Connection, dst: &str, event: &str, payload: impl Into<Vec<u8>>) -> bool {
    conn.send_to_client(dst, event, payload)
}

/// Non-blocking enqueue of a pre-encoded frame onto `conn`'s outbound queue.
pub fn try_send(conn: &Connection, bytes: Vec<u8>) -> bool {
    conn.try_send_raw(bytes)
}

#[cfg(any(test, feature = "test-util"))]
impl RoomServer {
    /// A bare connection handle with no reader/writer tasks and no real
    /// transport, registered with this server's hub. The returned receiver
    /// stands in for "what the writer would have sent" -- for embedders who
    /// want to drive the dispatch/room logic directly in their own
    /// integration tests.
    pub fn test_connection(&self, id: &str) -> (Connection, tokio::sync::mpsc::Receiver<Vec<u8>>) {
        connection::test_support::test_connection(&self.hub, id)
    }

    /// Accept a connection over the in-memory mock transport: spawns real
    /// reader/writer tasks against a channel-backed transport instead of a
    /// live socket.
    pub async fn accept_mock(
        &self,
    ) -> (
        Connection,
        tokio::sync::mpsc::Sender<TransportEvent>,
        tokio::sync::mpsc::Receiver<mock::WsSent>,
    ) {
        let (reader, writer, inbound_tx, outbound_rx) = mock::pair();
        let conn = connection::accept(&self.hub, HashMap::new(), reader, writer).await;
        (conn, inbound_tx, outbound_rx)
    }

    /// Whether the hub still indexes a connection with this id. For
    /// asserting cleanup/eviction has (or hasn't) happened yet.
    pub fn contains_conn(&self, id: &str) -> bool {
        self.hub.get_conn(id).is_some()
    }
}
