use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use tracing::debug;

use testfarm_core::models::{CoverageReport, TaskId};

use crate::{error::ApiResult, response::accepted, routes::AppState};

/// 接收Slave提交的覆盖率数据
///
/// `campaign` 可以是活动标识或顺序编号。
pub async fn submit_coverage(
    State(state): State<AppState>,
    Path((campaign, task_id)): Path<(String, TaskId)>,
    Json(report): Json<CoverageReport>,
) -> ApiResult<impl IntoResponse> {
    debug!(
        "收到活动 {} 任务 {} 的覆盖率数据，{} 个文件",
        campaign,
        task_id,
        report.files.len()
    );
    state
        .scheduler
        .submit_coverage(campaign, task_id, report)
        .await?;
    Ok(accepted("覆盖率数据已接收"))
}
