//! The axum upgrade entry point: one HTTP handler that turns a GET request
//! into a running connection.
//!
//! Rejects non-GET requests, runs the optional auth hook, then constructs
//! the connection and joins it to `"root"` (which queues the `join_ack`).

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::hub::Hub;
use crate::transport::split_axum;

/// Build a one-route axum [`Router`] that upgrades `GET` requests to a
/// room connection. Embedders who already run their own router can instead
/// call [`upgrade`] directly from their own handler.
pub fn router(hub: Arc<Hub>) -> Router {
    Router::new().route("/ws", get(upgrade)).with_state(hub)
}

async fn upgrade(
    method: Method,
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if method != Method::GET {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let claims = match hub.authenticate(&headers) {
        Some(claims) => claims,
        None => {
            tracing::info!("upgrade rejected by auth hook");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let max_message_size = hub.config().max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            let (reader, writer) = split_axum(socket);
            crate::connection::accept(&hub, claims, reader, writer).await;
        })
}
