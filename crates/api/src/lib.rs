//! # Testfarm API
//!
//! 基于Axum的HTTP / WebSocket 服务：
//!
//! - `GET /__testfarm__/slave` - Slave WebSocket 连接
//! - `POST /__testfarm__/coverage/{campaign}/{task_id}` - 提交覆盖率数据
//! - `GET /__testfarm__/status` - 调度器状态
//! - `GET /__testfarm__/campaigns/{campaign}/results` - 活动结果
//! - `GET /health` - 健康检查

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use tower::ServiceBuilder;

use testfarm_core::config::ServerConfig;
use testfarm_dispatcher::SchedulerHandle;

use middleware::{cors_layer, request_logging, trace_layer};
use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(scheduler: SchedulerHandle, server_config: &ServerConfig) -> Router {
    let router = create_routes(AppState { scheduler }).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if server_config.cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    }
}
