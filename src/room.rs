//! A room: one task owning the authoritative member set, fed by a bounded
//! inbox of register/unregister/send events.
//!
//! The room stops itself once its member set goes empty, guarded by a
//! oneshot sender behind a mutex so the stop signal fires at most once --
//! the same one-shot idiom this crate uses for connection cleanup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use crate::connection::Connection;
use crate::hub::Hub;

/// A broadcast request queued on a room's `send` channel: the sender
/// (excluded from delivery) and the already-framed bytes to deliver.
pub(crate) struct RoomMessage {
    pub sender: Connection,
    pub bytes: Vec<u8>,
}

/// Handle to a running room task. Cheap to clone; the members map is
/// shared so external readers (join-ack snapshot) can take the room's
/// mutex without round-tripping through the task.
pub struct RoomHandle {
    pub name: String,
    members: Arc<Mutex<HashMap<String, Connection>>>,
    register_tx: mpsc::Sender<Connection>,
    unregister_tx: mpsc::Sender<Connection>,
    send_tx: mpsc::Sender<RoomMessage>,
}

impl RoomHandle {
    /// Spawn the room's task and return a handle to it. The task removes
    /// itself from `hub` when its member set becomes empty.
    pub(crate) fn spawn(name: String, hub: Arc<Hub>) -> Arc<Self> {
        let cfg = hub.config();
        let (register_tx, register_rx) = mpsc::channel(cfg.room_register_capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(cfg.room_unregister_capacity);
        let (send_tx, send_rx) = mpsc::channel(cfg.room_send_capacity);
        let (stop_tx, stop_rx) = oneshot::channel();
        let members = Arc::new(Mutex::new(HashMap::new()));

        let handle = Arc::new(Self {
            name: name.clone(),
            members: Arc::clone(&members),
            register_tx,
            unregister_tx,
            send_tx,
        });

        tokio::spawn(run(
            name,
            hub,
            members,
            register_rx,
            unregister_rx,
            send_rx,
            stop_tx,
            stop_rx,
        ));

        handle
    }

    /// Queue a connection to join. Suspends the caller (briefly, under
    /// contention) if the room's register inbox is full -- backpressure on
    /// the caller, never a deadlock. The room task never exits while
    /// holding its receivers, so the send side only fails if the room
    /// already terminated, which is silently ignored: a room that's gone
    /// needed no join.
    pub async fn register(&self, conn: Connection) {
        let _ = self.register_tx.send(conn).await;
    }

    /// Queue a connection to leave.
    pub async fn unregister(&self, conn: Connection) {
        let _ = self.unregister_tx.send(conn).await;
    }

    /// Queue a broadcast, excluding `sender`.
    pub async fn emit(&self, sender: Connection, bytes: Vec<u8>) {
        let _ = self.send_tx.send(RoomMessage { sender, bytes }).await;
    }

    /// Snapshot of member ids at this instant, for a join acknowledgement
    /// or a test assertion. Takes the room's mutex.
    pub fn member_ids(&self) -> Vec<String> {
        self.members.lock().unwrap().keys().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn member_count(&self) -> usize {
        self.members.lock().unwrap().len()
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    name: String,
    hub: Arc<Hub>,
    members: Arc<Mutex<HashMap<String, Connection>>>,
    mut register_rx: mpsc::Receiver<Connection>,
    mut unregister_rx: mpsc::Receiver<Connection>,
    mut send_rx: mpsc::Receiver<RoomMessage>,
    stop_tx: oneshot::Sender<()>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    // Held so `handle_unregister` can fire it; wrapped so a raced empty
    // check can never fire it twice.
    let stop_tx = Mutex::new(Some(stop_tx));

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            maybe = register_rx.recv() => {
                match maybe {
                    Some(conn) => handle_join(&name, &members, conn),
                    None => break,
                }
            }
            maybe = unregister_rx.recv() => {
                match maybe {
                    Some(conn) => handle_leave(&name, &members, conn, &stop_tx),
                    None => break,
                }
            }
            maybe = send_rx.recv() => {
                match maybe {
                    Some(msg) => broadcast(&members, msg),
                    None => break,
                }
            }
        }
    }
    hub.remove_room(&name);
}

fn handle_join(name: &str, members: &Arc<Mutex<HashMap<String, Connection>>>, conn: Connection) {
    let id = conn.id().to_string();
    let snapshot: Vec<String> = {
        let mut guard = members.lock().unwrap();
        guard.insert(id.clone(), conn.clone());
        guard.keys().cloned().collect()
    };
    tracing::debug!(room = name, conn = %id, "member joined");

    let ack_payload = serde_json::to_vec(&snapshot).unwrap_or_default();
    conn.try_send_raw(crate::codec::Message::construct(name, "join_ack", "", "", ack_payload).encode());

    broadcast(
        members,
        RoomMessage {
            sender: conn,
            bytes: crate::codec::Message::construct(name, "new_member", "", "", id.into_bytes())
                .encode(),
        },
    );
}

fn handle_leave(
    name: &str,
    members: &Arc<Mutex<HashMap<String, Connection>>>,
    conn: Connection,
    stop_tx: &Mutex<Option<oneshot::Sender<()>>>,
) {
    let id = conn.id().to_string();
    let empty = {
        let mut guard = members.lock().unwrap();
        guard.remove(&id);
        guard.is_empty()
    };
    tracing::debug!(room = name, conn = %id, "member left");
    broadcast(
        members,
        RoomMessage {
            sender: conn,
            bytes: crate::codec::Message::construct(name, "member_left", "", "", id.into_bytes())
                .encode(),
        },
    );
    if empty {
        if let Some(tx) = stop_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

/// Fan out `msg.bytes` to every member except the sender, via a
/// non-blocking enqueue. A member whose outbound queue is full is dropped
/// from this broadcast and its cleanup is initiated -- the room task never
/// blocks on a slow member.
fn broadcast(members: &Arc<Mutex<HashMap<String, Connection>>>, msg: RoomMessage) {
    let snapshot: Vec<Connection> = {
        let guard = members.lock().unwrap();
        guard
            .values()
            .filter(|c| c.id() != msg.sender.id())
            .cloned()
            .collect()
    };
    for member in snapshot {
        member.try_send_raw(msg.bytes.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoomServerConfig;
    use crate::connection::test_support::test_connection;
    use crate::hub::Hub;

    #[tokio::test]
    async fn join_then_leave_converges_members_to_empty_set() {
        let hub = Hub::new(RoomServerConfig::default());
        let (a, _rx_a) = test_connection(&hub, "A");
        let (b, _rx_b) = test_connection(&hub, "B");

        hub.join_room("game", a.clone()).await;
        hub.join_room("game", b.clone()).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let room = hub.get_room("game").unwrap();
        assert_eq!(room.member_count(), 2);

        hub.leave_room("game", a.clone()).await;
        tokio::task::yield_now().await;
        assert_eq!(room.member_count(), 1);

        hub.leave_room("game", b.clone()).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        // Room became empty and removed itself from the hub.
        assert!(hub.get_room("game").is_none());
    }

    #[tokio::test]
    async fn broadcast_never_reaches_the_sender() {
        let hub = Hub::new(RoomServerConfig::default());
        let (a, mut rx_a) = test_connection(&hub, "A");
        let (b, mut rx_b) = test_connection(&hub, "B");

        hub.join_room("room1", a.clone()).await;
        hub.join_room("room1", b.clone()).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        // Drain join-time notifications before exercising the broadcast.
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        let room = hub.get_room("room1").unwrap();
        let msg = crate::codec::Message::construct("room1", "chat", "", "A", b"hi".to_vec());
        room.emit(a.clone(), msg.encode()).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(rx_a.try_recv().is_err(), "sender must not receive its own broadcast");
        let received = rx_b.try_recv().expect("other member should receive it");
        let decoded = crate::codec::Message::decode(&received).unwrap();
        assert_eq!(decoded.src, "A");
        assert_eq!(decoded.payload, b"hi".to_vec());
    }
}
