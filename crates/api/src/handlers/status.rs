use axum::{
    extract::{Path, State},
    response::IntoResponse,
};

use crate::{error::ApiResult, response::success, routes::AppState};

/// 调度器状态：已连接的Slave与活动进度
pub async fn get_status(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let snapshot = state.scheduler.snapshot().await?;
    Ok(success(snapshot))
}

/// 活动迄今为止的全部结果
pub async fn get_campaign_results(
    State(state): State<AppState>,
    Path(campaign): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let results = state.scheduler.results(campaign).await?;
    Ok(success(results))
}
