//! Server-wide tunables
//!
//! Outbound queue capacity, read/write deadlines, ping period, and room
//! channel capacities are all exposed here so an embedder can vary them
//! without touching the runtime code. Loading these from a file or
//! environment is left to the embedder -- this type only defines the shape
//! and the defaults.

use std::time::Duration;

/// Tunables for the connection/room runtime.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RoomServerConfig {
    /// Capacity of each connection's outbound queue. Overflow evicts the
    /// slow consumer (§4.3, §4.5).
    pub outbound_capacity: usize,
    /// Capacity of a room's `register` channel.
    pub room_register_capacity: usize,
    /// Capacity of a room's `unregister` channel.
    pub room_unregister_capacity: usize,
    /// Capacity of a room's `send` (broadcast) channel.
    pub room_send_capacity: usize,
    /// Read deadline; renewed on every pong (§4.4).
    pub read_deadline: Duration,
    /// Ping period for the writer's liveness ticker (§4.5).
    pub ping_period: Duration,
    /// Write deadline applied to every outbound frame (§4.5).
    pub write_deadline: Duration,
    /// Maximum inbound message size accepted from a transport (§4.4).
    pub max_message_size: usize,
    /// Name of the room every connection joins at construction.
    pub root_room: String,
}

impl Default for RoomServerConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            room_register_capacity: 16,
            room_unregister_capacity: 16,
            room_send_capacity: 64,
            read_deadline: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            write_deadline: Duration::from_secs(10),
            max_message_size: 64 * 1024,
            root_room: "root".to_string(),
        }
    }
}

impl RoomServerConfig {
    /// Clamp nonsensical values rather than fail, logging when it does.
    ///
    /// A ping period at or beyond the read deadline would never let a pong
    /// land before the peer is declared dead, so it's pulled back to 90%
    /// of the read deadline -- the same ratio the defaults use (54s ping
    /// period, 60s read deadline).
    pub fn validate(&mut self) {
        if self.ping_period >= self.read_deadline {
            tracing::warn!(
                ping_period = ?self.ping_period,
                read_deadline = ?self.read_deadline,
                "ping_period >= read_deadline, clamping to 90% of read_deadline",
            );
            self.ping_period = self.read_deadline * 9 / 10;
        }
        if self.outbound_capacity == 0 {
            tracing::warn!("outbound_capacity of 0 would evict every send, forcing to 1");
            self.outbound_capacity = 1;
        }
    }
}
