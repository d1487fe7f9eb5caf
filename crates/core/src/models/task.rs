use serde::{Deserialize, Serialize};

use crate::{SchedulerError, SchedulerResult};

/// 任务在活动内的编号（扁平任务列表中的下标）
pub type TaskId = usize;

/// Slave连接编号，同时用作显示序号
pub type SlaveId = u64;

/// 任务执行状态
///
/// 任务在任一时刻只能处于以下状态之一：排队中、已分配、终止（完成或忽略）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "slave", rename_all = "camelCase")]
pub enum TaskState {
    Queued,
    Assigned(SlaveId),
    Finished,
    Ignored,
}

/// 可调度的测试任务
///
/// 任务在活动初始化时由测试树展开生成，之后不会被销毁，只会被标记为完成。
/// 重启时任务会重新进入所属浏览器需求的队列。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub url: String,
    /// 所属浏览器需求在活动中的下标
    pub requirement: usize,
    pub restarts: u32,
    pub state: TaskState,
}

impl Task {
    pub fn new(id: TaskId, name: String, url: String, requirement: usize) -> Self {
        Self {
            id,
            name,
            url,
            requirement,
            restarts: 0,
            state: TaskState::Queued,
        }
    }

    pub fn assigned_slave(&self) -> Option<SlaveId> {
        match self.state {
            TaskState::Assigned(slave) => Some(slave),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, TaskState::Finished | TaskState::Ignored)
    }

    /// 将排队中的任务标记为已分配
    pub fn mark_assigned(&mut self, slave: SlaveId) -> SchedulerResult<()> {
        match self.state {
            TaskState::Queued => {
                self.state = TaskState::Assigned(slave);
                Ok(())
            }
            other => Err(SchedulerError::InvariantViolation(format!(
                "任务 {} 无法分配给 Slave {}，当前状态: {:?}",
                self.id, slave, other
            ))),
        }
    }

    /// 重启任务：重启计数加一并回到排队状态
    pub fn mark_restarted(&mut self) -> SchedulerResult<()> {
        match self.state {
            TaskState::Assigned(_) => {
                self.restarts += 1;
                self.state = TaskState::Queued;
                Ok(())
            }
            other => Err(SchedulerError::InvariantViolation(format!(
                "任务 {} 无法重启，当前状态: {:?}",
                self.id, other
            ))),
        }
    }

    pub fn mark_finished(&mut self) -> SchedulerResult<()> {
        match self.state {
            TaskState::Assigned(_) => {
                self.state = TaskState::Finished;
                Ok(())
            }
            other => Err(SchedulerError::InvariantViolation(format!(
                "任务 {} 无法结束，当前状态: {:?}",
                self.id, other
            ))),
        }
    }

    pub fn mark_ignored(&mut self) {
        self.state = TaskState::Ignored;
    }
}
