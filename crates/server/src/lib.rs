pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod schedule;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use photobackup_core::Backup;

use crate::config::AppConfig;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub backup: Backup,
    pub upload_token: Option<Arc<str>>,
    pub max_frame_bytes: usize,
}

impl AppState {
    pub fn new(backup: Backup, config: &AppConfig) -> Self {
        Self {
            backup,
            upload_token: config.upload_token().map(Arc::from),
            max_frame_bytes: config.upload.max_frame_bytes,
        }
    }
}

pub fn router(state: AppState) -> Router {
    // Mutations need the bearer token when one is configured. `/upload`
    // checks it itself through the WebSocket subprotocol.
    let mutating = Router::new()
        .route("/photo/update", post(routes::update_photo))
        .route("/photo/delete", post(routes::delete_photo))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    Router::new()
        .route("/upload", get(ws::upload))
        .route("/photo/exists", post(routes::photo_exists))
        .route("/photo/checksum", get(routes::checksum_exists))
        .route("/photo/list", get(routes::list_photos))
        .merge(mutating)
        .with_state(state)
}
