//! Item endpoint routes.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::get,
    Json, Router,
};
use quotebook_engine::{Error as EngineError, Item};

use crate::error::Result;
use crate::handlers::{handle_pull, handle_push, PullQuery};
use crate::AppState;

/// Create item routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/items", get(pull_handler).post(push_handler))
        .route("/items/{id}", get(get_handler))
}

/// GET /items - Every stored item.
async fn pull_handler(
    State(state): State<AppState>,
    Query(query): Query<PullQuery>,
) -> Json<Vec<Item>> {
    Json(handle_pull(&state.items, query))
}

/// POST /items - Push one item.
async fn push_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<Item>, JsonRejection>,
) -> Result<Json<Item>> {
    let Json(item) = payload?;
    let stored = handle_push(&state.items, item)?;
    Ok(Json(stored))
}

/// GET /items/{id} - One stored item.
async fn get_handler(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Item>> {
    let item = state
        .items
        .get(&id)
        .ok_or(EngineError::ItemNotFound(id))?;
    Ok(Json(item))
}
