//! Read-only status endpoint.
//!
//! Exposes a point-in-time snapshot of the stats registry for operational
//! monitoring. Reads only; the registry is never reset.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use tokio_util::sync::CancellationToken;
use tracing::info;

use herd_engine::{StatsRegistry, StatsSnapshot};

use crate::error::AppError;

pub fn router(stats: Arc<StatsRegistry>) -> Router {
    Router::new()
        .route("/stats", get(stats_handler))
        .with_state(stats)
}

async fn stats_handler(State(stats): State<Arc<StatsRegistry>>) -> Json<StatsSnapshot> {
    Json(stats.snapshot())
}

/// Serve until `cancel` fires.
pub async fn serve(
    listen: SocketAddr,
    stats: Arc<StatsRegistry>,
    cancel: CancellationToken,
) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(addr = %listen, "status endpoint listening");
    axum::serve(listener, router(stats))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn router_serves_a_snapshot() {
        use tower::ServiceExt;

        let stats = Arc::new(StatsRegistry::new());
        stats.record_attempt();
        stats.record_success(80);

        let response = router(stats)
            .oneshot(
                axum::http::Request::builder()
                    .uri("/stats")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["downloads_total"], 1);
        assert_eq!(json["downloads_succeeded"], 1);
        assert_eq!(json["online_sessions"], 0);
    }
}
