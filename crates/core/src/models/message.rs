use serde::{Deserialize, Serialize};

use super::{SlaveId, TaskId};

/// Slave连接建立时发送的握手信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaveHandshake {
    pub user_agent: String,
    /// 调用方预先分配的 Slave ID（例如由本地浏览器启动器分配）
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub paused: bool,
    /// 以下字段覆盖从 user agent 中解析出的值
    #[serde(default)]
    pub browser_name: Option<String>,
    #[serde(default)]
    pub browser_version: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    /// IE 的文档模式（强制渲染模式）
    #[serde(default)]
    pub document_mode: Option<u32>,
}

/// Slave上报的测试进度事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum WorkerEvent {
    #[serde(rename_all = "camelCase")]
    TestStarted {
        test_id: String,
        name: String,
        #[serde(default)]
        parent_test_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TestFinished {
        test_id: String,
        #[serde(default)]
        asserts: u32,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default)]
        test_id: Option<String>,
        message: String,
        /// 断言失败（true）或运行错误（false）
        #[serde(default)]
        failure: bool,
        #[serde(default)]
        stack: Vec<String>,
    },
    Log {
        #[serde(default = "default_log_level")]
        level: String,
        message: String,
    },
    /// Slave即将通过HTTP提交一份覆盖率数据
    Coverage,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Slave发往调度器的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    #[serde(rename_all = "camelCase")]
    TestUpdate {
        #[serde(default)]
        task_execution_id: Option<u64>,
        event: WorkerEvent,
    },
    #[serde(rename_all = "camelCase")]
    TaskFinished {
        #[serde(default)]
        task_execution_id: Option<u64>,
    },
    PauseChanged { paused: bool },
    #[serde(rename_all = "camelCase")]
    Log {
        #[serde(default)]
        task_execution_id: Option<u64>,
        #[serde(default = "default_log_level")]
        level: String,
        message: String,
    },
}

impl WorkerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn message_type_str(&self) -> &'static str {
        match self {
            WorkerMessage::TestUpdate { .. } => "testUpdate",
            WorkerMessage::TaskFinished { .. } => "taskFinished",
            WorkerMessage::PauseChanged { .. } => "pauseChanged",
            WorkerMessage::Log { .. } => "log",
        }
    }
}

/// 下发任务时附带的活动进度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub remaining_tasks: usize,
    pub total_tasks: usize,
}

/// 调度器发往Slave的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SlaveCommand {
    #[serde(rename_all = "camelCase")]
    SlaveExecute {
        url: String,
        name: String,
        task_id: TaskId,
        task_execution_id: u64,
        campaign_id: String,
        stats: ExecutionStats,
    },
    SlaveStop,
    Dispose,
}

impl SlaveCommand {
    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// 对外展示的Slave信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaveSummary {
    pub id: SlaveId,
    pub external_id: Option<String>,
    pub display_name: String,
    pub paused: bool,
    pub available: bool,
    pub current_task: Option<TaskId>,
    pub current_campaign: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_worker_messages() {
        let msg = WorkerMessage::parse(
            r#"{"type":"testUpdate","taskExecutionId":3,"event":{"event":"testStarted","testId":"t1","name":"MyTest"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            WorkerMessage::TestUpdate {
                task_execution_id: Some(3),
                event: WorkerEvent::TestStarted {
                    test_id: "t1".to_string(),
                    name: "MyTest".to_string(),
                    parent_test_id: None,
                },
            }
        );

        let msg = WorkerMessage::parse(r#"{"type":"taskFinished","taskExecutionId":4}"#).unwrap();
        assert_eq!(
            msg,
            WorkerMessage::TaskFinished {
                task_execution_id: Some(4)
            }
        );

        let msg = WorkerMessage::parse(r#"{"type":"pauseChanged","paused":true}"#).unwrap();
        assert_eq!(msg.message_type_str(), "pauseChanged");

        let msg = WorkerMessage::parse(
            r#"{"type":"testUpdate","taskExecutionId":1,"event":{"event":"coverage"}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            WorkerMessage::TestUpdate {
                event: WorkerEvent::Coverage,
                ..
            }
        ));

        assert!(WorkerMessage::parse(r#"{"type":"unknown"}"#).is_err());
    }

    #[test]
    fn test_slave_execute_wire_format() {
        let command = SlaveCommand::SlaveExecute {
            url: "/test.html".to_string(),
            name: "test".to_string(),
            task_id: 2,
            task_execution_id: 9,
            campaign_id: "c1".to_string(),
            stats: ExecutionStats {
                remaining_tasks: 1,
                total_tasks: 3,
            },
        };
        let json: serde_json::Value = serde_json::from_str(&command.serialize().unwrap()).unwrap();
        assert_eq!(json["type"], "slaveExecute");
        assert_eq!(json["taskExecutionId"], 9);
        assert_eq!(json["campaignId"], "c1");
        assert_eq!(json["stats"]["remainingTasks"], 1);

        assert_eq!(SlaveCommand::Dispose.serialize().unwrap(), r#"{"type":"dispose"}"#);
    }
}
