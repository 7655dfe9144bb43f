//! A connection: one stable identity, two cooperating tasks (reader,
//! writer), and a single-consumer outbound queue.
//!
//! Reader and writer each own one half of a split transport, so neither can
//! reach into the other's half to close it directly. A `watch`-based
//! shutdown signal ties the two together: whichever task exits first
//! signals the other, rather than relying on both sides separately closing
//! the same socket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch, OnceCell};

use crate::codec::Message;
use crate::hub::Hub;
use crate::transport::{TransportEvent, TransportReader, TransportWriter};

struct ConnectionInner {
    id: String,
    claims: HashMap<String, String>,
    hub: Arc<Hub>,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    shutdown_tx: watch::Sender<bool>,
    cleanup: OnceCell<()>,
}

/// A cheap-to-clone handle to a connection. Every room and the hub index
/// hold clones of this; only the reader/writer tasks hold the transport
/// and outbound-queue receiver exclusively.
#[derive(Clone)]
pub struct Connection(Arc<ConnectionInner>);

impl Connection {
    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn claims(&self) -> &HashMap<String, String> {
        &self.0.claims
    }

    /// Non-blocking enqueue onto this connection's outbound queue.
    ///
    /// This is the only safe way external producers deliver to a
    /// connection -- room broadcasts and direct messages both route
    /// through it. Returns `false` and initiates this connection's cleanup
    /// if the queue is full or already closed.
    pub fn try_send_raw(&self, bytes: Vec<u8>) -> bool {
        match self.0.outbound_tx.try_send(bytes) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(conn = %self.id(), reason = %err, "outbound queue full or closed, evicting");
                self.spawn_cleanup();
                false
            }
        }
    }

    pub(crate) fn dispatch(&self) -> &crate::dispatch::DispatchTable {
        self.0.hub.dispatch()
    }

    /// Join this connection to a hub room (the `join` reserved event).
    pub(crate) async fn hub_join(&self, room: &str) {
        self.0.hub.join_room(room, self.clone()).await;
    }

    /// Leave a hub room (the `leave` reserved event).
    pub(crate) async fn hub_leave(&self, room: &str) {
        self.0.hub.leave_room(room, self.clone()).await;
    }

    /// Broadcast `event`/`payload` to every other member of `room`, framed
    /// with this connection as `src`.
    pub async fn send_to_room(&self, room: &str, event: &str, payload: impl Into<Vec<u8>>) {
        if let Some(handle) = self.0.hub.get_room(room) {
            let msg = Message::construct(room, event, "", self.id(), payload.into());
            handle.emit(self.clone(), msg.encode()).await;
        }
    }

    /// Send a direct message to another client by id, framed as a
    /// server-originated message in the given room.
    pub fn send_to_client(&self, dst: &str, event: &str, payload: impl Into<Vec<u8>>) -> bool {
        match self.0.hub.get_conn(dst) {
            Some(target) => {
                let msg = Message::construct("root", event, dst, self.id(), payload.into());
                target.try_send_raw(msg.encode())
            }
            None => false,
        }
    }

    /// Forward an inbound message to its declared `dst` verbatim, rewriting
    /// only `src` to this connection's id. Keeps `room`, `event`, and
    /// `payload` exactly as the sender framed them.
    pub(crate) fn relay_to_client(&self, msg: &Message) -> bool {
        match self.0.hub.get_conn(&msg.dst) {
            Some(target) => {
                let relayed = Message::construct(
                    msg.room.clone(),
                    msg.event.clone(),
                    msg.dst.clone(),
                    self.id(),
                    msg.payload.clone(),
                );
                target.try_send_raw(relayed.encode())
            }
            None => false,
        }
    }

    /// One-shot teardown: removes this connection from every room, from
    /// the hub, and signals both tasks to close the transport and the
    /// outbound queue. Safe to call from any task, any number of times --
    /// only the first call does anything.
    pub(crate) async fn cleanup(&self) {
        let inner = Arc::clone(&self.0);
        let this = self.clone();
        inner
            .cleanup
            .get_or_init(|| async move {
                tracing::info!(conn = %this.id(), "connection cleanup");
                this.0.hub.leave_all_rooms(this.clone()).await;
                this.0.hub.remove_conn(this.id());
                let _ = this.0.shutdown_tx.send(true);
            })
            .await;
    }

    /// Fire-and-forget cleanup from a non-async call site (e.g.
    /// [`Connection::try_send_raw`]).
    fn spawn_cleanup(&self) {
        let this = self.clone();
        tokio::spawn(async move { this.cleanup().await });
    }
}

/// Accept a newly upgraded transport: construct the connection, register
/// it with the hub, spawn its reader and writer tasks, and join it to the
/// hub's root room. The writer is spawned first, then root is joined
/// (which queues a `join_ack`), then the reader is spawned.
pub async fn accept<R, W>(hub: &Arc<Hub>, claims: HashMap<String, String>, reader: R, writer: W) -> Connection
where
    R: TransportReader + 'static,
    W: TransportWriter + 'static,
{
    let id = generate_id();
    let (outbound_tx, outbound_rx) = mpsc::channel(hub.config().outbound_capacity);
    let (shutdown_tx, shutdown_rx_writer) = watch::channel(false);
    let shutdown_rx_reader = shutdown_tx.subscribe();

    let conn = Connection(Arc::new(ConnectionInner {
        id,
        claims,
        hub: Arc::clone(hub),
        outbound_tx,
        shutdown_tx,
        cleanup: OnceCell::new(),
    }));

    hub.add_conn(conn.clone());

    tokio::spawn(writer_loop(
        conn.clone(),
        writer,
        outbound_rx,
        shutdown_rx_writer,
    ));

    let root = hub.config().root_room.clone();
    hub.join_room(&root, conn.clone()).await;

    tokio::spawn(reader_loop(conn.clone(), reader, shutdown_rx_reader));

    conn
}

fn generate_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

async fn reader_loop<R: TransportReader>(
    conn: Connection,
    mut reader: R,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let read_deadline = conn.0.hub.config().read_deadline;
    let mut deadline = Instant::now() + read_deadline;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = tokio::time::sleep_until(deadline.into()) => {
                tracing::debug!(conn = %conn.id(), "read deadline expired");
                break;
            }
            event = reader.recv() => {
                match event {
                    Ok(Some(TransportEvent::Binary(bytes))) => {
                        match Message::decode(&bytes) {
                            Some(msg) => crate::dispatch::handle_inbound(&conn, msg).await,
                            None => {
                                tracing::warn!(conn = %conn.id(), "malformed frame, terminating");
                                break;
                            }
                        }
                    }
                    Ok(Some(TransportEvent::Pong)) => {
                        deadline = Instant::now() + read_deadline;
                    }
                    Ok(Some(TransportEvent::Ping)) => {}
                    Ok(None) => break,
                    Err(err) => {
                        tracing::debug!(conn = %conn.id(), error = %err, "read failed");
                        break;
                    }
                }
            }
        }
    }
    conn.cleanup().await;
}

async fn writer_loop<W: TransportWriter>(
    conn: Connection,
    mut writer: W,
    mut outbound_rx: mpsc::Receiver<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let cfg = conn.0.hub.config().clone();
    let mut ticker = tokio::time::interval(cfg.ping_period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // first tick fires immediately; consume it

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                let _ = tokio::time::timeout(cfg.write_deadline, writer.send_close()).await;
                break;
            }
            maybe = outbound_rx.recv() => {
                match maybe {
                    Some(bytes) => {
                        match tokio::time::timeout(cfg.write_deadline, writer.send_binary(bytes)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => {
                                tracing::debug!(conn = %conn.id(), error = %err, "write failed");
                                break;
                            }
                            Err(_) => {
                                tracing::debug!(conn = %conn.id(), "write deadline expired");
                                break;
                            }
                        }
                    }
                    None => {
                        let _ = tokio::time::timeout(cfg.write_deadline, writer.send_close()).await;
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                match tokio::time::timeout(cfg.write_deadline, writer.send_ping()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::debug!(conn = %conn.id(), error = %err, "ping write failed");
                        break;
                    }
                    Err(_) => {
                        tracing::debug!(conn = %conn.id(), "ping write deadline expired");
                        break;
                    }
                }
            }
        }
    }
    conn.cleanup().await;
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    //! Build a bare connection handle -- no reader/writer tasks, no real
    //! transport -- for exercising the hub/room/dispatch logic in
    //! isolation. The returned receiver stands in for "what the writer
    //! would have sent."

    use super::*;

    pub fn test_connection(hub: &Arc<Hub>, id: &str) -> (Connection, mpsc::Receiver<Vec<u8>>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(hub.config().outbound_capacity);
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let conn = Connection(Arc::new(ConnectionInner {
            id: id.to_string(),
            claims: HashMap::new(),
            hub: Arc::clone(hub),
            outbound_tx,
            shutdown_tx,
            cleanup: OnceCell::new(),
        }));
        (conn, outbound_rx)
    }
}
