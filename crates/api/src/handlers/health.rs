use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::warn;

use crate::routes::AppState;

/// 健康检查：调度器任务可达时返回连接与活动概况，否则返回 503
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.scheduler.snapshot().await {
        Ok(snapshot) => {
            let active = snapshot.campaigns.iter().filter(|c| !c.finished).count();
            let busy = snapshot
                .slaves
                .iter()
                .filter(|s| s.current_task.is_some())
                .count();
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "frozen": snapshot.frozen,
                    "slaves": snapshot.slaves.len(),
                    "busySlaves": busy,
                    "activeCampaigns": active,
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            warn!("健康检查失败，调度器不可达: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "error": e.to_string()
                })),
            )
        }
    }
}
