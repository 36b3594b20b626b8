//! GET /event/{service}/{key}: run a job now and answer with its logs.

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;

/// Plain-text body: task logs on 200, the failure reason on 500.
///
/// The wait is cancelled on shutdown, or when the client goes away and axum
/// drops this future.
pub async fn event_handler(
    State(state): State<Arc<AppState>>,
    Path((service, key)): Path<(String, String)>,
) -> (StatusCode, String) {
    info!(service = %service, "event trigger received");
    let cancel = state.shutdown.child_token();

    match state.trigger.trigger(&service, &key, &cancel).await {
        Ok(logs) => (StatusCode::OK, logs),
        Err(e) => {
            warn!(service = %service, error = %e, "event trigger failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
