use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use testfarm_core::{
    models::{
        CapabilityDescriptor, EventPayload, SlaveCommand, SlaveId, SlaveSummary, TaskId,
        WorkerEvent,
    },
    SchedulerConfig, SchedulerError, SchedulerResult,
};

use crate::campaign::Campaign;
use crate::scheduler::SchedulerCommand;

/// Slave连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveStatus {
    /// 等待握手
    Handshaking,
    /// 空闲或正在执行任务
    Connected,
    Disconnected,
}

/// 任务结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Completed,
    Timeout,
    Disconnected,
}

impl FinishReason {
    fn error_message(&self) -> Option<&'static str> {
        match self {
            FinishReason::Completed => None,
            FinishReason::Timeout => Some("Task timeout"),
            FinishReason::Disconnected => Some("Browser disconnected"),
        }
    }
}

/// 浏览器需求引用：（活动标识，需求下标）
pub type RequirementRef = (String, usize);

/// 正在执行的任务
///
/// 当前任务与所属活动总是一起出现或一起消失。
#[derive(Debug)]
struct CurrentTask {
    campaign_id: String,
    task_id: TaskId,
    execution_id: u64,
    had_error: bool,
    timer: AbortHandle,
}

/// 已连接的浏览器
pub struct Slave {
    id: SlaveId,
    external_id: Option<String>,
    descriptor: CapabilityDescriptor,
    display_name: String,
    paused: bool,
    status: SlaveStatus,
    current: Option<CurrentTask>,
    execution_counter: u64,
    matching: Vec<RequirementRef>,
    available_since: u64,
    outbound: mpsc::UnboundedSender<SlaveCommand>,
}

impl Slave {
    pub fn new(
        id: SlaveId,
        external_id: Option<String>,
        descriptor: CapabilityDescriptor,
        paused: bool,
        outbound: mpsc::UnboundedSender<SlaveCommand>,
    ) -> Self {
        let display_name = format!("{} #{}", descriptor.display_name(), id);
        Self {
            id,
            external_id,
            descriptor,
            display_name,
            paused,
            status: SlaveStatus::Handshaking,
            current: None,
            execution_counter: 0,
            matching: Vec::new(),
            available_since: 0,
            outbound,
        }
    }

    pub fn id(&self) -> SlaveId {
        self.id
    }

    pub fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn status(&self) -> SlaveStatus {
        self.status
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// 握手完成，开始接受任务
    pub fn mark_connected(&mut self, available_since: u64) {
        self.status = SlaveStatus::Connected;
        self.available_since = available_since;
    }

    /// 可以接受新任务：已连接、未暂停且当前没有任务
    pub fn is_available(&self) -> bool {
        self.status == SlaveStatus::Connected && !self.paused && self.current.is_none()
    }

    /// 最近一次变为空闲的序号，越大越新
    pub fn available_since(&self) -> u64 {
        self.available_since
    }

    pub fn set_available_since(&mut self, available_since: u64) {
        self.available_since = available_since;
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            info!(
                "Slave {} {}",
                self.display_name,
                if paused { "已暂停" } else { "已恢复" }
            );
        }
        self.paused = paused;
    }

    pub fn matching_requirements(&self) -> &[RequirementRef] {
        &self.matching
    }

    pub fn set_matching_requirements(&mut self, matching: Vec<RequirementRef>) {
        self.matching = matching;
    }

    pub fn current_campaign_id(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.campaign_id.as_str())
    }

    pub fn current_task_id(&self) -> Option<TaskId> {
        self.current.as_ref().map(|c| c.task_id)
    }

    pub fn current_execution_id(&self) -> Option<u64> {
        self.current.as_ref().map(|c| c.execution_id)
    }

    /// 执行编号是否对应当前任务
    pub fn is_current_execution(&self, execution_id: Option<u64>) -> bool {
        match (&self.current, execution_id) {
            (Some(current), Some(execution_id)) => current.execution_id == execution_id,
            _ => false,
        }
    }

    /// 向浏览器发送消息；连接已关闭时只记录日志，断开事件会随后到达
    pub fn send(&self, command: SlaveCommand) {
        if self.outbound.send(command).is_err() {
            debug!("Slave {} 的连接已关闭，消息未发送", self.display_name);
        }
    }

    /// 分配任务
    ///
    /// 分配一个新的执行编号，发布 taskStarted，向浏览器下发 slaveExecute，
    /// 并启动超时计时器。超时后计时器向调度器投递 [`SchedulerCommand::TaskTimeout`]。
    pub fn assign_task(
        &mut self,
        campaign: &mut Campaign,
        task_id: TaskId,
        timeout: Duration,
        scheduler: mpsc::WeakUnboundedSender<SchedulerCommand>,
    ) -> SchedulerResult<()> {
        if !self.is_available() {
            return Err(SchedulerError::InvariantViolation(format!(
                "Slave {} 不可用，无法分配任务 {}",
                self.display_name, task_id
            )));
        }

        let task = campaign.start_task(task_id, self.id, &self.display_name)?;
        self.execution_counter += 1;
        let execution_id = self.execution_counter;

        self.send(SlaveCommand::SlaveExecute {
            url: task.url.clone(),
            name: task.name.clone(),
            task_id,
            task_execution_id: execution_id,
            campaign_id: campaign.id().to_string(),
            stats: campaign.execution_stats(),
        });

        let slave_id = self.id;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(scheduler) = scheduler.upgrade() {
                let _ = scheduler.send(SchedulerCommand::TaskTimeout {
                    slave_id,
                    execution_id,
                });
            }
        })
        .abort_handle();

        debug!(
            "任务 {} ({}) 已分配给 Slave {}，执行编号 {}",
            task_id, task.name, self.display_name, execution_id
        );

        self.current = Some(CurrentTask {
            campaign_id: campaign.id().to_string(),
            task_id,
            execution_id,
            had_error: false,
            timer,
        });
        Ok(())
    }

    /// 处理当前任务的进度事件
    ///
    /// 执行编号不匹配的事件来自已结束的执行，直接丢弃。返回事件是否被接受。
    pub fn on_progress(
        &mut self,
        campaign: &mut Campaign,
        execution_id: Option<u64>,
        event: WorkerEvent,
    ) -> SchedulerResult<bool> {
        if !self.is_current_execution(execution_id) {
            warn!(
                "Slave {} 上报了过期的进度事件，执行编号 {:?}，当前 {:?}",
                self.display_name,
                execution_id,
                self.current_execution_id()
            );
            return Ok(false);
        }
        let Some(current) = self.current.as_mut() else {
            return Ok(false);
        };
        let task_id = current.task_id;

        let payload = match event {
            WorkerEvent::TestStarted {
                test_id,
                name,
                parent_test_id,
            } => EventPayload::TestStarted {
                task_id,
                test_id,
                name,
                parent_test_id,
            },
            WorkerEvent::TestFinished {
                test_id,
                asserts,
                duration_ms,
            } => EventPayload::TestFinished {
                task_id,
                test_id,
                asserts,
                duration_ms,
            },
            WorkerEvent::Error {
                test_id,
                message,
                failure,
                stack,
            } => {
                current.had_error = true;
                EventPayload::Error {
                    task_id: Some(task_id),
                    test_id,
                    message,
                    failure,
                    stack,
                }
            }
            WorkerEvent::Log { level, message } => EventPayload::Log {
                task_id: Some(task_id),
                level,
                message,
            },
            WorkerEvent::Coverage => EventPayload::Coverage { task_id },
        };

        campaign.add_result(payload)?;
        Ok(true)
    }

    /// 浏览器报告当前任务执行完毕
    pub fn on_task_finished(
        &mut self,
        campaign: &mut Campaign,
        execution_id: Option<u64>,
        config: &SchedulerConfig,
    ) -> SchedulerResult<bool> {
        if !self.is_current_execution(execution_id) {
            warn!(
                "Slave {} 报告了过期的任务结束，执行编号 {:?}，当前 {:?}",
                self.display_name,
                execution_id,
                self.current_execution_id()
            );
            return Ok(false);
        }
        self.finish_current_task(campaign, FinishReason::Completed, config)?;
        Ok(true)
    }

    /// 超时计时器触发
    ///
    /// 计时器属于已结束的执行时不做任何处理。超时的任务会通知浏览器停止执行。
    pub fn on_timeout(
        &mut self,
        campaign: &mut Campaign,
        execution_id: u64,
        config: &SchedulerConfig,
    ) -> SchedulerResult<bool> {
        if !self.is_current_execution(Some(execution_id)) {
            debug!(
                "Slave {} 的过期计时器触发，执行编号 {}",
                self.display_name, execution_id
            );
            return Ok(false);
        }
        warn!(
            "Slave {} 执行任务 {:?} 超时",
            self.display_name,
            self.current_task_id()
        );
        self.send(SlaveCommand::SlaveStop);
        self.finish_current_task(campaign, FinishReason::Timeout, config)?;
        Ok(true)
    }

    /// 连接断开；正在执行的任务按断开处理
    pub fn on_disconnect(
        &mut self,
        campaign: Option<&mut Campaign>,
        config: &SchedulerConfig,
    ) -> SchedulerResult<()> {
        match campaign {
            Some(campaign) => {
                self.finish_current_task(campaign, FinishReason::Disconnected, config)?
            }
            None => self.abandon_current_task(),
        }
        self.status = SlaveStatus::Disconnected;
        Ok(())
    }

    /// 结束当前任务
    ///
    /// 取消计时器，必要时发布错误，发布 taskFinished，然后根据重启策略将任务
    /// 重新排队或标记为完成。
    pub fn finish_current_task(
        &mut self,
        campaign: &mut Campaign,
        reason: FinishReason,
        config: &SchedulerConfig,
    ) -> SchedulerResult<()> {
        let Some(current) = self.current.take() else {
            return Ok(());
        };
        current.timer.abort();
        let task_id = current.task_id;

        if let Some(message) = reason.error_message() {
            campaign.add_result(EventPayload::Error {
                task_id: Some(task_id),
                test_id: None,
                message: message.to_string(),
                failure: false,
                stack: Vec::new(),
            })?;
        }

        let failed = current.had_error || reason != FinishReason::Completed;
        let restarts = campaign.task_restarts(task_id)?;
        let restart_planned =
            failed && config.task_restart_on_failure && restarts < config.max_task_restarts;

        campaign.add_result(EventPayload::TaskFinished {
            task_id,
            restart_planned,
        })?;

        if restart_planned {
            info!(
                "任务 {} 将重启（第 {} 次），原因: {:?}",
                task_id,
                restarts + 1,
                reason
            );
            campaign.requeue_task(task_id)
        } else {
            campaign.finish_task(task_id)
        }
    }

    /// 所属活动已不存在时丢弃当前任务
    pub fn abandon_current_task(&mut self) {
        if let Some(current) = self.current.take() {
            current.timer.abort();
            warn!(
                "Slave {} 的任务 {} 所属活动 {} 已不存在",
                self.display_name, current.task_id, current.campaign_id
            );
        }
    }

    pub fn summary(&self) -> SlaveSummary {
        SlaveSummary {
            id: self.id,
            external_id: self.external_id.clone(),
            display_name: self.display_name.clone(),
            paused: self.paused,
            available: self.is_available(),
            current_task: self.current_task_id(),
            current_campaign: self.current_campaign_id().map(str::to_string),
        }
    }
}

impl Drop for Slave {
    fn drop(&mut self) {
        if let Some(current) = self.current.take() {
            current.timer.abort();
        }
    }
}
