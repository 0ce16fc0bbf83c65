//! Quotebook Server - reference remote item store.
//!
//! Serves the canonical quote set over HTTP so clients running
//! quotebook-engine can fetch, push and reconcile against it.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
mod routes;

use crate::db::ItemTable;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone, Default)]
pub struct AppState {
    pub items: Arc<ItemTable>,
}

impl AppState {
    /// State over an empty item table.
    pub fn new() -> Self {
        Self {
            items: ItemTable::new_shared(),
        }
    }
}

/// Build the router with tracing and permissive CORS.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
