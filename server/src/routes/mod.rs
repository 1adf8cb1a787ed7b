//! HTTP route definitions.

mod health;
mod sync;

use crate::config::Config;
use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes(config: &Config) -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(sync::routes(config.max_body_bytes))
}
