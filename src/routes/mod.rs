mod detect;
mod home;
mod metrics;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(home::home))
        .route("/detect", post(detect::detect))
        .route("/metrics", get(metrics::metrics_handler))
}
