use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tracing::{error, info, warn};

use testfarm_api::create_app;
use testfarm_core::{models::CampaignOutcome, AppConfig};
use testfarm_dispatcher::{create_test_type, CampaignHandle, ConsoleReporter, Scheduler};

use crate::shutdown::ShutdownReason;

/// 等待各后台组件退出的最长时间
const COMPONENT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// 应用程序主结构
///
/// 启动调度器与 HTTP / WebSocket 服务，创建配置中描述的测试活动，
/// 并等待活动结束或收到关闭信号。
pub struct Application {
    config: AppConfig,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 运行应用；返回活动结果，活动未结束就被关闭时返回 `None`
    pub async fn run(
        &self,
        mut shutdown_rx: broadcast::Receiver<ShutdownReason>,
    ) -> Result<Option<CampaignOutcome>> {
        info!(
            "调度器配置: 任务超时 {:?}，最多重启 {} 次，冻结: {}",
            self.config.scheduler.task_timeout(),
            self.config.scheduler.max_task_restarts,
            self.config.scheduler.frozen
        );
        let (scheduler, scheduler_join) = Scheduler::spawn(self.config.scheduler.clone());

        let app = create_app(scheduler.clone(), &self.config.server);
        let listener = TcpListener::bind(&self.config.server.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.server.bind_address))?;
        info!(
            "等待浏览器连接: ws://{}/__testfarm__/slave",
            self.config.server.bind_address
        );

        let (stop_server_tx, stop_server_rx) = oneshot::channel::<()>();
        let server_handle = tokio::spawn(async move {
            let server = axum::serve(listener, app.into_make_service()).with_graceful_shutdown(
                async move {
                    let _ = stop_server_rx.await;
                },
            );
            if let Err(e) = server.await {
                error!("HTTP服务运行失败: {}", e);
            }
        });

        let test_type = create_test_type(&self.config.campaign)?;
        let CampaignHandle {
            id,
            events,
            mut outcome,
            ..
        } = scheduler
            .add_campaign(self.config.campaign.clone(), test_type, None)
            .await
            .context("创建测试活动失败")?;
        info!("测试活动 {} 已创建", id);
        let reporter = ConsoleReporter::new(id.clone()).spawn(events);

        let result = tokio::select! {
            finished = outcome.wait_for(Option::is_some) => match finished {
                Ok(value) => *value,
                Err(_) => {
                    warn!("测试活动 {} 在结束前被释放", id);
                    None
                }
            },
            reason = shutdown_rx.recv() => {
                match reason {
                    Ok(reason) => info!("收到关闭信号({})，停止测试活动 {}", reason, id),
                    Err(_) => info!("关闭通道已关闭，停止测试活动 {}", id),
                }
                None
            }
        };

        if let Err(e) = scheduler.shutdown().await {
            warn!("停止调度器失败: {}", e);
        }
        match tokio::time::timeout(COMPONENT_STOP_TIMEOUT, scheduler_join).await {
            Ok(Ok(Ok(()))) => info!("调度器已停止"),
            Ok(Ok(Err(e))) => error!("调度器异常退出: {}", e),
            Ok(Err(e)) => error!("调度器任务失败: {}", e),
            Err(_) => warn!("等待调度器停止超时"),
        }
        if tokio::time::timeout(COMPONENT_STOP_TIMEOUT, reporter)
            .await
            .is_err()
        {
            warn!("等待报告器结束超时");
        }

        let _ = stop_server_tx.send(());
        if tokio::time::timeout(COMPONENT_STOP_TIMEOUT, server_handle)
            .await
            .is_err()
        {
            warn!("等待HTTP服务停止超时");
        }

        Ok(result)
    }
}

/// 替换绑定地址中的端口
pub fn with_port(bind_address: &str, port: u16) -> String {
    match bind_address.rsplit_once(':') {
        Some((host, _)) => format!("{host}:{port}"),
        None => format!("{bind_address}:{port}"),
    }
}

/// 活动结果对应的进程退出码
pub fn exit_code(outcome: Option<CampaignOutcome>) -> u8 {
    match outcome {
        Some(CampaignOutcome::Finished) => 0,
        Some(CampaignOutcome::Failed) => 1,
        None => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testfarm_core::models::TestNode;

    #[test]
    fn test_with_port() {
        assert_eq!(with_port("0.0.0.0:7777", 8080), "0.0.0.0:8080");
        assert_eq!(with_port("[::1]:7777", 9000), "[::1]:9000");
        assert_eq!(with_port("localhost", 80), "localhost:80");
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(exit_code(Some(CampaignOutcome::Finished)), 0);
        assert_eq!(exit_code(Some(CampaignOutcome::Failed)), 1);
        assert_eq!(exit_code(None), 2);
    }

    #[tokio::test]
    async fn test_empty_campaign_finishes_without_slaves() {
        let mut config = AppConfig::default();
        config.server.bind_address = "127.0.0.1:0".to_string();
        let app = Application::new(config);

        let (_shutdown_tx, shutdown_rx) = broadcast::channel::<ShutdownReason>(1);
        let outcome = app.run(shutdown_rx).await.unwrap();
        assert_eq!(outcome, Some(CampaignOutcome::Finished));
    }

    #[tokio::test]
    async fn test_shutdown_before_campaign_finishes() {
        let mut config = AppConfig::default();
        config.server.bind_address = "127.0.0.1:0".to_string();
        config.campaign.tests = vec![TestNode::leaf("a", "/a.html")];
        let app = Application::new(config);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let run = tokio::spawn(async move { app.run(shutdown_rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(ShutdownReason::Requested).unwrap();

        let outcome = run.await.unwrap().unwrap();
        assert_eq!(outcome, None);
    }
}
