//! HTTP transport (spec §6). Route table grounded on the original
//! `server/server.go` (plus the properties routes the distillation added),
//! axum wiring (State/Router/IntoResponse shape) grounded on the teacher's
//! `server/dashboard_api.rs`.

mod handlers;
mod multipart;

use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::queue_manager::QueueManager;

pub fn router(manager: Arc<QueueManager>) -> Router {
    Router::new()
        .route("/v1/queues/", post(handlers::enqueue_root).get(handlers::dequeue_root))
        .route("/v1/queues/{*queue}", post(handlers::enqueue).get(handlers::dequeue))
        .route("/v1/messages/{id}", delete(handlers::ack))
        .route("/v1/properties/", get(handlers::get_properties_root).put(handlers::set_properties_root))
        .route("/v1/properties/{*queue}", get(handlers::get_properties).put(handlers::set_properties))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}
