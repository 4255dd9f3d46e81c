//! Uptime endpoint.
//!
//! `GET /` answers with the worker's version and uptime, a small enough
//! information leak. Axum answers `HEAD /` from the same route without a
//! body, which is what liveness probes use.

use axum::extract::State;
use axum::http::StatusCode;

use super::AppState;
use crate::runner::format_duration;
use crate::worker::JobSink;

pub async fn uptime_handler<Q: JobSink>(State(app_state): State<AppState<Q>>) -> (StatusCode, String) {
    let uptime = app_state.started().elapsed();
    // Whole seconds are plenty here.
    let uptime = std::time::Duration::from_secs(uptime.as_secs());
    (
        StatusCode::OK,
        format!(
            "up {} ({} {})\n",
            format_duration(uptime),
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
    )
}
