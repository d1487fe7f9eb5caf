use axum::{
    extract::Request,
    http::{Method, StatusCode},
    middleware::Next,
    response::Response,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

/// 请求所属的端点类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    SlaveSocket,
    Coverage,
    Framework,
    Other,
}

impl Endpoint {
    pub fn classify(path: &str) -> Self {
        match path.strip_prefix("/__testfarm__/") {
            Some("slave") => Endpoint::SlaveSocket,
            Some(rest) if rest.starts_with("coverage/") => Endpoint::Coverage,
            Some(_) => Endpoint::Framework,
            None => Endpoint::Other,
        }
    }
}

/// 按端点类别记录请求
///
/// Slave连接升级记为 info；覆盖率提交失败会导致活动无法结束，记为 warn。
pub async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let endpoint = Endpoint::classify(&path);
    let start = std::time::Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed = start.elapsed();

    match endpoint {
        Endpoint::SlaveSocket if status == StatusCode::SWITCHING_PROTOCOLS => {
            info!(%path, "Slave WebSocket 连接已升级");
        }
        Endpoint::Coverage if !status.is_success() => {
            warn!(%method, %path, %status, ?elapsed, "覆盖率数据提交被拒绝");
        }
        _ => {
            debug!(?endpoint, %method, %path, %status, ?elapsed, "完成请求处理");
        }
    }

    response
}

pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

pub fn trace_layer(
) -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>>
{
    TraceLayer::new_for_http()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_endpoints() {
        assert_eq!(Endpoint::classify("/__testfarm__/slave"), Endpoint::SlaveSocket);
        assert_eq!(
            Endpoint::classify("/__testfarm__/coverage/12/0"),
            Endpoint::Coverage
        );
        assert_eq!(
            Endpoint::classify("/__testfarm__/status"),
            Endpoint::Framework
        );
        assert_eq!(Endpoint::classify("/health"), Endpoint::Other);
        assert_eq!(Endpoint::classify("/__testfarm__slave"), Endpoint::Other);
    }
}
