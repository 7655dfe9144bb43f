//! Error types surfaced across the embedding surface

use thiserror::Error;

/// Errors returned by [`crate::dispatch::DispatchTable::register`].
///
/// These are the only errors this crate ever surfaces to the embedding
/// program at runtime -- connection, room, and hub internals are designed
/// to never fail.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// `register` was called with an empty event name.
    #[error("event name cannot be empty")]
    EmptyEventName,
    /// `register` was called for an event that already has a handler.
    #[error("handler for event {0:?} is already registered")]
    AlreadyRegistered(String),
    /// `register` was called with one of the event names this crate
    /// reserves for its own join/leave/ack machinery.
    #[error("event name {0:?} is reserved")]
    ReservedEventName(String),
}
