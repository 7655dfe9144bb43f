//! Custom-event dispatch table plus the reserved-event switch applied to
//! every inbound message.
//!
//! Handler registration rejects empty names and duplicates. The
//! reserved-event switch is what a decoded [`crate::codec::Message`] goes
//! through before it ever reaches a registered handler.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::codec::Message;
use crate::connection::Connection;
use crate::error::HandlerError;

/// A registered handler for a custom event name.
///
/// An error is logged against the offending event and source connection id
/// but never tears the connection down.
pub trait Handler: Send + Sync {
    fn call(&self, conn: &Connection, msg: &Message) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

impl<F, E> Handler for F
where
    F: Fn(&Connection, &Message) -> Result<(), E> + Send + Sync,
    E: std::error::Error + Send + Sync + 'static,
{
    fn call(&self, conn: &Connection, msg: &Message) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (self)(conn, msg).map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
    }
}

/// The set of custom-event handlers an embedder registers ahead of time.
/// `join`, `leave`, and direct messages (non-empty `dst`) never reach this
/// table -- they're handled by the reserved switch in [`handle_inbound`].
#[derive(Default)]
pub struct DispatchTable {
    handlers: RwLock<HashMap<String, Box<dyn Handler>>>,
}

const RESERVED_EVENTS: &[&str] = &["join", "leave", "join_ack", "leave_ack", "new_member", "member_left"];

impl DispatchTable {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for a custom event name.
    ///
    /// Rejects an empty name, a name already registered, and any of the
    /// names this crate reserves for its own join/leave/ack machinery --
    /// those names are not free for reuse by a custom handler.
    pub fn register(&self, event: impl Into<String>, handler: impl Handler + 'static) -> Result<(), HandlerError> {
        let event = event.into();
        if event.is_empty() {
            return Err(HandlerError::EmptyEventName);
        }
        if RESERVED_EVENTS.contains(&event.as_str()) {
            return Err(HandlerError::ReservedEventName(event));
        }
        let mut handlers = self.handlers.write().unwrap();
        if handlers.contains_key(&event) {
            return Err(HandlerError::AlreadyRegistered(event));
        }
        handlers.insert(event, Box::new(handler));
        Ok(())
    }

    fn invoke(&self, conn: &Connection, msg: &Message) -> bool {
        let handlers = self.handlers.read().unwrap();
        match handlers.get(msg.event.as_str()) {
            Some(handler) => {
                if let Err(err) = handler.call(conn, msg) {
                    tracing::error!(conn = %conn.id(), event = %msg.event, error = %err, "custom handler failed");
                }
                true
            }
            None => false,
        }
    }
}

/// Route one decoded inbound message through the reserved-event switch,
/// then the custom dispatch table, then room broadcast:
///
/// 1. `join` -- hub room membership change; the room task replies with a
///    `join_ack` once the connection is inserted.
/// 2. `leave` -- reply with a `leave_ack` carrying this connection's id,
///    then ask the hub to remove it from `msg.room`.
/// 3. non-empty `dst` -- direct message, delivered to that connection only
///    (or silently dropped if the id is unknown).
/// 4. a name registered in the dispatch table -- invoked; a handler error
///    is logged, never torn down the connection.
/// 5. otherwise -- broadcast to `msg.room` if that room currently exists,
///    else dropped.
pub(crate) async fn handle_inbound(conn: &Connection, msg: Message) {
    tracing::debug!(conn = %conn.id(), event = %msg.event, room = %msg.room, dst = %msg.dst, "dispatching inbound message");
    match msg.event.as_str() {
        "join" => {
            conn.hub_join(&msg.room).await;
        }
        "leave" => {
            let ack = Message::construct(&msg.room, "leave_ack", "", "", conn.id().as_bytes().to_vec());
            conn.try_send_raw(ack.encode());
            conn.hub_leave(&msg.room).await;
        }
        _ if !msg.dst.is_empty() => {
            if !conn.relay_to_client(&msg) {
                tracing::debug!(conn = %conn.id(), dst = %msg.dst, "direct message dropped, unknown destination");
            }
        }
        _ => {
            let delivered = conn.dispatch().invoke(conn, &msg);
            if !delivered {
                conn.send_to_room(&msg.room, &msg.event, msg.payload).await;
            }
        }
    }
}
