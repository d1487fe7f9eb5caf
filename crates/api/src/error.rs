use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use testfarm_core::SchedulerError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebSocket错误: {0}")]
    WebSocket(#[from] axum::Error),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ApiError::Scheduler(SchedulerError::CampaignNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "CAMPAIGN_NOT_FOUND")
            }
            ApiError::Scheduler(SchedulerError::TaskNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "TASK_NOT_FOUND")
            }
            ApiError::Scheduler(SchedulerError::SlaveNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "SLAVE_NOT_FOUND")
            }
            ApiError::Scheduler(SchedulerError::SlaveRejected(_)) => {
                (StatusCode::FORBIDDEN, "SLAVE_REJECTED")
            }
            ApiError::Scheduler(SchedulerError::SchedulerStopped) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SCHEDULER_STOPPED")
            }
            ApiError::Scheduler(_) | ApiError::Internal(_) | ApiError::WebSocket(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
            ApiError::Serialization(_) => (StatusCode::BAD_REQUEST, "SERIALIZATION_ERROR"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_mapping() {
        let error = ApiError::Scheduler(SchedulerError::CampaignNotFound {
            id: "42".to_string(),
        });
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);

        let error = ApiError::Scheduler(SchedulerError::TaskNotFound {
            campaign_id: "42".to_string(),
            task_id: 3,
        });
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_stopped_scheduler_is_unavailable() {
        let error: ApiError = SchedulerError::SchedulerStopped.into();
        assert_eq!(
            error.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_bad_request() {
        let error = ApiError::BadRequest("缺少握手".to_string());
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let api_error: ApiError = json_error.into();
        assert!(matches!(api_error, ApiError::Serialization(_)));
        assert_eq!(api_error.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
