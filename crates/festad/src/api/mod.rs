//! HTTP surface: routing and shared application context.
//!
//! Route paths and response bodies follow the original upload/album
//! contract exactly; see handlers for the per-route behavior.

mod error;
mod handlers;

pub use error::ApiError;

use crate::config::Config;
use crate::engine::FaceSource;
use crate::store::GuestRoster;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

/// Shared application context passed to all handlers.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub roster: Arc<RwLock<GuestRoster>>,
    /// Embedding provider; the engine handle in production, fakes in tests.
    pub source: Arc<dyn FaceSource>,
}

/// Build the application router.
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/", get(handlers::home))
        .route("/upload_selfie", post(handlers::upload_selfie))
        .route("/upload_event", post(handlers::upload_event))
        .route("/match_faces", get(handlers::match_faces))
        .route("/view_album/:guest_name", get(handlers::view_album))
        .route("/matched_photos/:guest/:filename", get(handlers::matched_photo))
        .layer(TraceLayer::new_for_http())
        // Phone photos routinely exceed axum's 2 MiB default body cap;
        // uploads carry no size limit.
        .layer(DefaultBodyLimit::disable())
        .with_state(ctx)
}
