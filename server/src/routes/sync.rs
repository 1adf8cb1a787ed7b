//! Merge endpoint route.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    routing::post,
    Json, Router,
};
use serene_engine::{SyncResponse, SYNC_PATH};

use crate::error::Result;
use crate::handlers::handle_sync;
use crate::AppState;

/// Create sync routes accepting bodies up to `max_body_bytes`.
pub fn routes(max_body_bytes: usize) -> Router<AppState> {
    Router::new().route(
        SYNC_PATH,
        post(sync_handler).layer(DefaultBodyLimit::max(max_body_bytes)),
    )
}

/// POST /api/sync - Store a batch of offline captures.
async fn sync_handler(State(state): State<AppState>, body: Bytes) -> Result<Json<SyncResponse>> {
    let response = handle_sync(
        state.repo.as_ref(),
        &state.schema,
        state.config.max_batch_records,
        &body,
    )
    .await?;
    Ok(Json(response))
}
