use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("测试活动未找到: {id}")]
    CampaignNotFound { id: String },

    #[error("任务未找到: 活动 {campaign_id} 中的任务 {task_id}")]
    TaskNotFound { campaign_id: String, task_id: usize },

    #[error("Slave未找到: {id}")]
    SlaveNotFound { id: u64 },

    #[error("Slave连接被拒绝: {0}")]
    SlaveRejected(String),

    #[error("测试枚举失败: {0}")]
    TestEnumeration(String),

    #[error("代码覆盖率插桩失败: {0}")]
    Instrumentation(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("调度器已停止")]
    SchedulerStopped,

    #[error("违反调度不变量: {0}")]
    InvariantViolation(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 是否为致命错误（调度器必须停止）
    pub fn is_fatal(&self) -> bool {
        matches!(self, SchedulerError::InvariantViolation(_))
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(error: serde_json::Error) -> Self {
        SchedulerError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for SchedulerError {
    fn from(error: std::io::Error) -> Self {
        SchedulerError::TestEnumeration(error.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
