use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, TestNode};

/// 活动最终结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CampaignOutcome {
    /// 所有任务均通过（或错误被配置忽略）
    Finished,
    /// 存在失败或错误
    Failed,
}

/// 活动事件类型，用于按类型订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    TasksList,
    TaskStarted,
    TestStarted,
    TestFinished,
    Error,
    Log,
    Coverage,
    TaskFinished,
    TaskIgnored,
    CampaignFinished,
}

/// 活动事件内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EventPayload {
    TasksList {
        tasks: Vec<TestNode>,
    },
    #[serde(rename_all = "camelCase")]
    TaskStarted {
        task_id: TaskId,
        slave: String,
        restarts: u32,
    },
    #[serde(rename_all = "camelCase")]
    TestStarted {
        task_id: TaskId,
        test_id: String,
        name: String,
        parent_test_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TestFinished {
        task_id: TaskId,
        test_id: String,
        asserts: u32,
        duration_ms: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        task_id: Option<TaskId>,
        test_id: Option<String>,
        message: String,
        failure: bool,
        stack: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Log {
        task_id: Option<TaskId>,
        level: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Coverage {
        task_id: TaskId,
    },
    #[serde(rename_all = "camelCase")]
    TaskFinished {
        task_id: TaskId,
        restart_planned: bool,
    },
    #[serde(rename_all = "camelCase")]
    TaskIgnored {
        task_id: TaskId,
    },
    CampaignFinished {
        outcome: CampaignOutcome,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::TasksList { .. } => EventKind::TasksList,
            EventPayload::TaskStarted { .. } => EventKind::TaskStarted,
            EventPayload::TestStarted { .. } => EventKind::TestStarted,
            EventPayload::TestFinished { .. } => EventKind::TestFinished,
            EventPayload::Error { .. } => EventKind::Error,
            EventPayload::Log { .. } => EventKind::Log,
            EventPayload::Coverage { .. } => EventKind::Coverage,
            EventPayload::TaskFinished { .. } => EventKind::TaskFinished,
            EventPayload::TaskIgnored { .. } => EventKind::TaskIgnored,
            EventPayload::CampaignFinished { .. } => EventKind::CampaignFinished,
        }
    }

    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            EventPayload::TaskStarted { task_id, .. }
            | EventPayload::TestStarted { task_id, .. }
            | EventPayload::TestFinished { task_id, .. }
            | EventPayload::Coverage { task_id }
            | EventPayload::TaskFinished { task_id, .. }
            | EventPayload::TaskIgnored { task_id } => Some(*task_id),
            EventPayload::Error { task_id, .. } | EventPayload::Log { task_id, .. } => *task_id,
            EventPayload::TasksList { .. } | EventPayload::CampaignFinished { .. } => None,
        }
    }
}

/// 活动结果流中的一条事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignEvent {
    /// 服务端时间，未设置时由活动在接收事件时补上
    pub time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl CampaignEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            time: None,
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

impl From<EventPayload> for CampaignEvent {
    fn from(payload: EventPayload) -> Self {
        Self::new(payload)
    }
}
