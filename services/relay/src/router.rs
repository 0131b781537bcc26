//! Axum router for the relay.

use crate::{relay::ws_handler, state::AppState};
use axum::{Router, routing::get};

/// The relay upgrades connections on `/`, matching the URL clients already use.
pub fn create_router(app_state: AppState) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(app_state)
}
