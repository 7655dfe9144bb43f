//! The process-wide registry of connections and rooms.
//!
//! Two maps behind a single `RwLock`: lookups shared, mutations exclusive.
//! Registry operations never fail. Creating a room and registering the join
//! must not hold the write lock across the room's channel send -- the
//! insert happens under the write lock, the subsequent send on `register`
//! happens after releasing it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::http::HeaderMap;

use crate::config::RoomServerConfig;
use crate::connection::Connection;
use crate::dispatch::DispatchTable;
use crate::room::RoomHandle;

/// An optional authentication hook run on every upgrade request before a
/// connection is constructed. Returns the claims to attach to the
/// connection, or `None` to reject the upgrade.
pub type AuthFn = Arc<dyn Fn(&HeaderMap) -> Option<HashMap<String, String>> + Send + Sync>;

/// The shared registry of connections and rooms.
///
/// Cheap to clone (wraps an `Arc` internally is not necessary -- embedders
/// hold a `Arc<Hub>` themselves); all state lives behind `RwLock`s.
pub struct Hub {
    rooms: RwLock<HashMap<String, Arc<RoomHandle>>>,
    conns: RwLock<HashMap<String, Connection>>,
    pub(crate) config: RoomServerConfig,
    pub(crate) dispatch: DispatchTable,
    auth: RwLock<Option<AuthFn>>,
}

impl Hub {
    pub fn new(config: RoomServerConfig) -> Arc<Self> {
        Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
            conns: RwLock::new(HashMap::new()),
            config,
            dispatch: DispatchTable::new(),
            auth: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &RoomServerConfig {
        &self.config
    }

    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    /// Install the authentication hook run on every upgrade request.
    /// Replaces any previously installed hook.
    pub fn set_auth(&self, auth: AuthFn) {
        *self.auth.write().unwrap() = Some(auth);
    }

    /// Run the installed auth hook, if any. No hook installed means every
    /// upgrade is accepted with an empty claims map, matching the Go
    /// original's default `authFn == nil` behavior (`handler.go`).
    pub(crate) fn authenticate(&self, headers: &HeaderMap) -> Option<HashMap<String, String>> {
        match self.auth.read().unwrap().as_ref() {
            Some(auth) => auth(headers),
            None => Some(HashMap::new()),
        }
    }

    /// Look up a connection by id.
    pub fn get_conn(&self, id: &str) -> Option<Connection> {
        self.conns.read().unwrap().get(id).cloned()
    }

    /// Register a newly constructed connection.
    pub fn add_conn(&self, conn: Connection) {
        self.conns.write().unwrap().insert(conn.id().to_string(), conn);
    }

    /// Remove a connection from the registry (does not touch room
    /// membership -- callers use [`Hub::leave_all_rooms`] for that).
    pub fn remove_conn(&self, id: &str) {
        self.conns.write().unwrap().remove(id);
    }

    /// Look up a room by name.
    pub fn get_room(&self, name: &str) -> Option<Arc<RoomHandle>> {
        self.rooms.read().unwrap().get(name).cloned()
    }

    /// Remove a room from the registry. Called by the room's own task when
    /// its member set becomes empty (§4.3's `stop` transition).
    pub fn remove_room(&self, name: &str) {
        let removed = self.rooms.write().unwrap().remove(name);
        if removed.is_some() {
            tracing::info!(room = name, "room removed (empty)");
        }
    }

    /// Join `conn` to the named room, creating the room on demand.
    ///
    /// Room creation and the registry insert happen under the write lock;
    /// the channel send to the room happens after the lock is released, so
    /// a full room inbox only backpressures the calling task, never blocks
    /// other hub callers.
    pub async fn join_room(self: &Arc<Self>, name: &str, conn: Connection) {
        let handle = {
            let mut rooms = self.rooms.write().unwrap();
            if let Some(existing) = rooms.get(name) {
                Arc::clone(existing)
            } else {
                tracing::info!(room = name, "room created");
                let handle = RoomHandle::spawn(name.to_string(), Arc::clone(self));
                rooms.insert(name.to_string(), Arc::clone(&handle));
                handle
            }
        };
        handle.register(conn).await;
    }

    /// Remove `conn` from the named room, if it exists. No-op otherwise.
    pub async fn leave_room(&self, name: &str, conn: Connection) {
        if let Some(room) = self.get_room(name) {
            room.unregister(conn).await;
        }
    }

    /// Remove `conn` from every room it currently belongs to.
    ///
    /// Snapshots the room-name set under the read lock, releases it, then
    /// forwards a leave to each -- tolerating rooms that disappear
    /// mid-iteration.
    pub async fn leave_all_rooms(&self, conn: Connection) {
        let names: Vec<String> = self.rooms.read().unwrap().keys().cloned().collect();
        for name in names {
            self.leave_room(&name, conn.clone()).await;
        }
    }

    /// Number of rooms currently tracked.
    pub fn room_count(&self) -> usize {
        self.rooms.read().unwrap().len()
    }

    #[cfg(test)]
    pub(crate) fn conn_count(&self) -> usize {
        self.conns.read().unwrap().len()
    }
}
