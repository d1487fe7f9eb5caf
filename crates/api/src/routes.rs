use axum::{
    routing::{get, post},
    Router,
};

use testfarm_dispatcher::SchedulerHandle;

use crate::handlers::{
    coverage::submit_coverage,
    health::health_check,
    slave::slave_socket,
    status::{get_campaign_results, get_status},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub scheduler: SchedulerHandle,
}

/// 创建路由；框架自身的端点都在 `/__testfarm__` 前缀下
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/__testfarm__/slave", get(slave_socket))
        .route(
            "/__testfarm__/coverage/{campaign}/{task_id}",
            post(submit_coverage),
        )
        .route("/__testfarm__/status", get(get_status))
        .route(
            "/__testfarm__/campaigns/{campaign}/results",
            get(get_campaign_results),
        )
        .with_state(state)
}
