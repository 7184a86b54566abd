mod frame;
mod health;
mod metrics;
mod ws;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};
use serde::Serialize;

pub use frame::upload_frame;
pub use health::status;
pub use metrics::metrics_handler;
pub use ws::ws_handler;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/api/frame", post(upload_frame))
        .route("/api/status", get(status))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .route("/", get(ws_handler))
}

/// `{status: "error", message}` body shared by both transports.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub message: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
        }
    }
}
