use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 调度核心的可调参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 单个任务的超时时间（毫秒）
    pub task_timeout_ms: u64,
    /// 任务最大重启次数
    pub max_task_restarts: u32,
    /// 任务出错（包括超时和断开连接）时是否重启
    pub task_restart_on_failure: bool,
    /// 冻结模式：只提供服务，不分发任务
    pub frozen: bool,
    /// 使用可预测的顺序编号作为活动标识
    pub predictable_urls: bool,
    /// 活动结果流的广播缓冲区大小
    pub event_buffer_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            task_timeout_ms: 5 * 60 * 1000, // 5分钟
            max_task_restarts: 5,
            task_restart_on_failure: false,
            frozen: false,
            predictable_urls: false,
            event_buffer_size: 1024,
        }
    }
}

impl SchedulerConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.task_timeout_ms == 0 {
            return Err(anyhow::anyhow!("任务超时时间必须大于0"));
        }

        if self.event_buffer_size == 0 {
            return Err(anyhow::anyhow!("事件缓冲区大小必须大于0"));
        }

        Ok(())
    }
}
