//! v1 API route table.

use axum::routing::get;
use axum::Router;

use super::handlers::{self, ApiState};

/// Build the v1 API router. Paths are absolute so `/v1/` and `/v1` both
/// resolve without relying on nest trailing-slash rules.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        // Read API
        .route("/v1/", get(handlers::latest_reading))
        .route("/v1", get(handlers::latest_reading))
        .route("/v1/status", get(handlers::station_status))
        .route("/v1/stream", get(handlers::reading_stream))
        // Log control
        .route(
            "/v1/log",
            get(handlers::log_status)
                .post(handlers::start_logging)
                .delete(handlers::stop_logging),
        )
        .with_state(state)
}
