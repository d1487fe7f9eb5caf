use std::fmt;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// 触发关闭的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    /// 由程序内部主动触发
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => write!(f, "Ctrl+C"),
            ShutdownReason::Terminate => write!(f, "SIGTERM"),
            ShutdownReason::Requested => write!(f, "requested"),
        }
    }
}

/// 优雅关闭管理器
///
/// 所有订阅者共享同一个广播通道；关闭只会触发一次，关闭之后的订阅者
/// 会立即收到最初的关闭原因。
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<ShutdownReason>>>>,
    reason: Arc<RwLock<Option<ShutdownReason>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);

        Self {
            shutdown_tx: Arc::new(RwLock::new(Some(shutdown_tx))),
            reason: Arc::new(RwLock::new(None)),
        }
    }

    /// 订阅关闭信号
    pub async fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        if let Some(tx) = self.shutdown_tx.read().await.as_ref() {
            return tx.subscribe();
        }

        let reason = self.reason().await.unwrap_or(ShutdownReason::Requested);
        let (tx, rx) = broadcast::channel(1);
        let _ = tx.send(reason);
        rx
    }

    /// 触发关闭，重复调用无效果
    pub async fn shutdown(&self, reason: ShutdownReason) {
        let mut current = self.reason.write().await;
        if let Some(previous) = *current {
            debug!("已因 {} 触发过关闭，忽略 {}", previous, reason);
            return;
        }
        *current = Some(reason);

        if let Some(tx) = self.shutdown_tx.write().await.take() {
            debug!("发送关闭信号给 {} 个订阅者", tx.receiver_count());
            let _ = tx.send(reason);
        }

        info!("关闭信号已发送: {}", reason);
    }

    pub async fn is_shutdown(&self) -> bool {
        self.reason.read().await.is_some()
    }

    pub async fn reason(&self) -> Option<ShutdownReason> {
        *self.reason.read().await
    }

    /// 等待进程信号并触发关闭
    pub async fn listen_for_signals(&self) -> ShutdownReason {
        let reason = wait_for_signal().await;
        self.shutdown(reason).await;
        reason
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_signal() -> ShutdownReason {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("安装Ctrl+C信号处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("安装SIGTERM信号处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => ShutdownReason::Interrupt,
        _ = terminate => ShutdownReason::Terminate,
    }
}
