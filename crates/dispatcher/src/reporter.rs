use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use testfarm_core::models::{CampaignEvent, CampaignOutcome, EventPayload};

/// 控制台报告器
///
/// 订阅活动结果流并通过 tracing 输出进度，直到活动结束或结果通道关闭。
pub struct ConsoleReporter {
    campaign_id: String,
    finished_tasks: usize,
    total_tasks: usize,
}

impl ConsoleReporter {
    pub fn new(campaign_id: impl Into<String>) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            finished_tasks: 0,
            total_tasks: 0,
        }
    }

    /// 在后台任务中消费结果流，返回活动结果（通道提前关闭时为 `None`）
    pub fn spawn(
        mut self,
        mut events: broadcast::Receiver<CampaignEvent>,
    ) -> JoinHandle<Option<CampaignOutcome>> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Some(outcome) = self.report(&event) {
                            return Some(outcome);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("活动 {} 的报告器落后，跳过 {} 条结果", self.campaign_id, skipped);
                    }
                    Err(RecvError::Closed) => {
                        debug!("活动 {} 的结果通道已关闭", self.campaign_id);
                        return None;
                    }
                }
            }
        })
    }

    /// 输出一条结果，活动结束时返回结果
    pub fn report(&mut self, event: &CampaignEvent) -> Option<CampaignOutcome> {
        match &event.payload {
            EventPayload::TasksList { tasks } => {
                self.total_tasks = tasks.iter().map(|node| node.leaf_count()).sum();
                info!("活动 {} 共 {} 个任务", self.campaign_id, self.total_tasks);
            }
            EventPayload::TaskStarted {
                task_id,
                slave,
                restarts,
            } => {
                if *restarts > 0 {
                    info!("任务 {} 在 {} 上重新执行（第 {} 次重启）", task_id, slave, restarts);
                } else {
                    debug!("任务 {} 在 {} 上开始执行", task_id, slave);
                }
            }
            EventPayload::TestStarted { task_id, name, .. } => {
                debug!("任务 {} 开始测试: {}", task_id, name);
            }
            EventPayload::TestFinished {
                task_id,
                test_id,
                asserts,
                ..
            } => {
                debug!("任务 {} 测试 {} 完成，断言 {} 个", task_id, test_id, asserts);
            }
            EventPayload::Error {
                task_id,
                message,
                failure,
                ..
            } => {
                let kind = if *failure { "失败" } else { "错误" };
                match task_id {
                    Some(task_id) => error!("任务 {} {}: {}", task_id, kind, message),
                    None => error!("活动 {} {}: {}", self.campaign_id, kind, message),
                }
            }
            EventPayload::Log {
                task_id,
                level,
                message,
            } => {
                debug!("任务 {:?} 日志 [{}]: {}", task_id, level, message);
            }
            EventPayload::Coverage { task_id } => {
                debug!("任务 {} 将提交覆盖率数据", task_id);
            }
            EventPayload::TaskFinished {
                task_id,
                restart_planned,
            } => {
                if *restart_planned {
                    warn!("任务 {} 执行失败，将重启", task_id);
                } else {
                    self.finished_tasks += 1;
                    info!(
                        "任务 {} 完成 ({}/{})",
                        task_id, self.finished_tasks, self.total_tasks
                    );
                }
            }
            EventPayload::TaskIgnored { task_id } => {
                self.finished_tasks += 1;
                info!("任务 {} 已忽略", task_id);
            }
            EventPayload::CampaignFinished { outcome } => {
                match outcome {
                    CampaignOutcome::Finished => info!("活动 {} 执行成功", self.campaign_id),
                    CampaignOutcome::Failed => error!("活动 {} 执行失败", self.campaign_id),
                }
                return Some(*outcome);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testfarm_core::models::TestNode;

    #[tokio::test]
    async fn test_reporter_returns_outcome() {
        let (tx, rx) = broadcast::channel(16);
        let reporter = ConsoleReporter::new("c1").spawn(rx);

        tx.send(CampaignEvent::new(EventPayload::TasksList {
            tasks: vec![TestNode::leaf("a", "/a.html")],
        }))
        .unwrap();
        tx.send(CampaignEvent::new(EventPayload::TaskFinished {
            task_id: 0,
            restart_planned: false,
        }))
        .unwrap();
        tx.send(CampaignEvent::new(EventPayload::CampaignFinished {
            outcome: CampaignOutcome::Failed,
        }))
        .unwrap();

        assert_eq!(reporter.await.unwrap(), Some(CampaignOutcome::Failed));
    }

    #[tokio::test]
    async fn test_reporter_stops_when_channel_closes() {
        let (tx, rx) = broadcast::channel::<CampaignEvent>(4);
        let reporter = ConsoleReporter::new("c1").spawn(rx);
        drop(tx);
        assert_eq!(reporter.await.unwrap(), None);
    }
}
