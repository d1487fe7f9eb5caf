use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use testfarm_core::{
    capabilities,
    models::{
        CampaignEvent, CampaignOutcome, CoverageReport, EventKind, EventPayload, SlaveCommand,
        SlaveHandshake, SlaveId, SlaveSummary, TaskId, TestNode, WorkerMessage,
    },
    CampaignConfig, Instrumenter, SchedulerConfig, SchedulerError, SchedulerResult, TestType,
};

use crate::campaign::{Campaign, CampaignSummary};
use crate::slave::{RequirementRef, Slave};

/// 调度器邮箱中的命令
///
/// 所有调度状态只在调度器任务内部修改，每条命令都会被完整处理之后才处理下一条。
pub enum SchedulerCommand {
    ConnectSlave {
        handshake: SlaveHandshake,
        outbound: mpsc::UnboundedSender<SlaveCommand>,
        reply: oneshot::Sender<SchedulerResult<SlaveId>>,
    },
    SlaveMessage {
        slave_id: SlaveId,
        message: WorkerMessage,
    },
    DisconnectSlave {
        slave_id: SlaveId,
    },
    TaskTimeout {
        slave_id: SlaveId,
        execution_id: u64,
    },
    ExpectSlave {
        external_id: String,
        notify: oneshot::Sender<SlaveId>,
    },
    AddCampaign {
        config: CampaignConfig,
        test_type: Arc<dyn TestType>,
        instrumenter: Option<Arc<dyn Instrumenter>>,
        reply: oneshot::Sender<SchedulerResult<CampaignHandle>>,
    },
    CampaignInitialized {
        campaign_id: String,
        result: SchedulerResult<Vec<TestNode>>,
    },
    CheckFinished {
        campaign_id: String,
    },
    SubmitCoverage {
        campaign: String,
        task_id: TaskId,
        report: CoverageReport,
        reply: oneshot::Sender<SchedulerResult<()>>,
    },
    Subscribe {
        campaign: String,
        kind: Option<EventKind>,
        reply: oneshot::Sender<SchedulerResult<broadcast::Receiver<CampaignEvent>>>,
    },
    Results {
        campaign: String,
        reply: oneshot::Sender<SchedulerResult<Vec<CampaignEvent>>>,
    },
    Snapshot {
        reply: oneshot::Sender<SchedulerSnapshot>,
    },
    SetFrozen {
        frozen: bool,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// 新建活动的句柄
#[derive(Debug)]
pub struct CampaignHandle {
    pub id: String,
    pub number: u64,
    /// 活动全部结果；只包含订阅之后产生的结果
    pub events: broadcast::Receiver<CampaignEvent>,
    pub outcome: watch::Receiver<Option<CampaignOutcome>>,
}

impl CampaignHandle {
    /// 等待活动结束；活动在结束前被释放时返回 `None`
    pub async fn wait_outcome(&mut self) -> Option<CampaignOutcome> {
        let outcome = self.outcome.wait_for(Option::is_some).await.ok()?;
        *outcome
    }
}

/// 调度器状态快照
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSnapshot {
    pub frozen: bool,
    pub slaves: Vec<SlaveSummary>,
    pub campaigns: Vec<CampaignSummary>,
}

/// 调度器
///
/// 持有所有Slave和活动，根据浏览器需求将排队的任务分配给空闲的Slave。
pub struct Scheduler {
    config: SchedulerConfig,
    frozen: bool,
    slaves: BTreeMap<SlaveId, Slave>,
    campaigns: Vec<Campaign>,
    expected_slaves: HashMap<String, oneshot::Sender<SlaveId>>,
    next_slave_id: SlaveId,
    next_campaign_number: u64,
    availability_counter: u64,
    mailbox: mpsc::WeakUnboundedSender<SchedulerCommand>,
}

impl Scheduler {
    /// 启动调度器任务
    ///
    /// 所有 [`SchedulerHandle`] 被释放或收到关闭命令后任务结束。违反调度不变量时
    /// 任务以错误结束。
    pub fn spawn(config: SchedulerConfig) -> (SchedulerHandle, JoinHandle<SchedulerResult<()>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler {
            frozen: config.frozen,
            config,
            slaves: BTreeMap::new(),
            campaigns: Vec::new(),
            expected_slaves: HashMap::new(),
            next_slave_id: 1,
            next_campaign_number: 1,
            availability_counter: 0,
            mailbox: tx.downgrade(),
        };
        let join = tokio::spawn(scheduler.run(rx));
        (SchedulerHandle { tx }, join)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SchedulerCommand>) -> SchedulerResult<()> {
        info!(
            "调度器已启动，任务超时 {}ms，最大重启次数 {}，失败重启: {}{}",
            self.config.task_timeout_ms,
            self.config.max_task_restarts,
            self.config.task_restart_on_failure,
            if self.frozen { "，冻结模式" } else { "" }
        );

        while let Some(command) = rx.recv().await {
            match self.handle_command(command) {
                Ok(true) => {}
                Ok(false) => {
                    info!("调度器已停止");
                    return Ok(());
                }
                Err(e) if e.is_fatal() => {
                    error!("调度器遇到致命错误，停止运行: {}", e);
                    self.dispose_all();
                    return Err(e);
                }
                Err(e) => warn!("处理调度命令失败: {}", e),
            }
            self.post_deferred_checks();
        }

        debug!("所有调度器句柄已释放");
        self.dispose_all();
        Ok(())
    }

    /// 处理一条命令，返回是否继续运行
    fn handle_command(&mut self, command: SchedulerCommand) -> SchedulerResult<bool> {
        match command {
            SchedulerCommand::ConnectSlave {
                handshake,
                outbound,
                reply,
            } => {
                let result = self.connect_slave(handshake, outbound);
                let fatal = match &result {
                    Err(e) if e.is_fatal() => Some(e.to_string()),
                    _ => None,
                };
                let _ = reply.send(result);
                if let Some(message) = fatal {
                    return Err(SchedulerError::InvariantViolation(message));
                }
            }
            SchedulerCommand::SlaveMessage { slave_id, message } => {
                self.handle_slave_message(slave_id, message)?;
            }
            SchedulerCommand::DisconnectSlave { slave_id } => self.disconnect_slave(slave_id)?,
            SchedulerCommand::TaskTimeout {
                slave_id,
                execution_id,
            } => self.task_timeout(slave_id, execution_id)?,
            SchedulerCommand::ExpectSlave {
                external_id,
                notify,
            } => {
                debug!("等待外部标识为 {} 的Slave连接", external_id);
                self.expected_slaves.insert(external_id, notify);
            }
            SchedulerCommand::AddCampaign {
                config,
                test_type,
                instrumenter,
                reply,
            } => {
                let handle = self.add_campaign(config, test_type, instrumenter);
                let _ = reply.send(handle);
                self.assign_tasks()?;
            }
            SchedulerCommand::CampaignInitialized {
                campaign_id,
                result,
            } => self.campaign_initialized(&campaign_id, result)?,
            SchedulerCommand::CheckFinished { campaign_id } => {
                self.check_finished(&campaign_id)?
            }
            SchedulerCommand::SubmitCoverage {
                campaign,
                task_id,
                report,
                reply,
            } => {
                let result = self
                    .find_campaign_mut(&campaign)
                    .and_then(|c| c.add_coverage_result(task_id, &report));
                let _ = reply.send(result);
            }
            SchedulerCommand::Subscribe {
                campaign,
                kind,
                reply,
            } => {
                let result = self.find_campaign_mut(&campaign).and_then(|c| match kind {
                    Some(kind) => c.subscribe_kind(kind),
                    None => c.subscribe(),
                });
                let _ = reply.send(result);
            }
            SchedulerCommand::Results { campaign, reply } => {
                let result = self
                    .find_campaign_mut(&campaign)
                    .map(|c| c.results().to_vec());
                let _ = reply.send(result);
            }
            SchedulerCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SchedulerCommand::SetFrozen { frozen } => {
                info!("调度器冻结模式: {}", frozen);
                self.frozen = frozen;
                self.assign_tasks()?;
            }
            SchedulerCommand::Shutdown { reply } => {
                info!("调度器正在关闭");
                self.dispose_all();
                let _ = reply.send(());
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn next_availability(&mut self) -> u64 {
        self.availability_counter += 1;
        self.availability_counter
    }

    /// 注册完成握手的Slave
    ///
    /// 声明了外部标识的Slave必须有对应的等待者，否则会被通知释放并拒绝。
    fn connect_slave(
        &mut self,
        handshake: SlaveHandshake,
        outbound: mpsc::UnboundedSender<SlaveCommand>,
    ) -> SchedulerResult<SlaveId> {
        let notify = match &handshake.id {
            Some(external_id) => match self.expected_slaves.remove(external_id) {
                Some(notify) if !notify.is_closed() => Some(notify),
                _ => {
                    warn!("拒绝未预期的Slave连接，外部标识: {}", external_id);
                    let _ = outbound.send(SlaveCommand::Dispose);
                    return Err(SchedulerError::SlaveRejected(format!(
                        "没有等待外部标识 {external_id} 的注册者"
                    )));
                }
            },
            None => None,
        };

        let descriptor = capabilities::detect(&handshake);
        let slave_id = self.next_slave_id;
        self.next_slave_id += 1;

        let mut slave = Slave::new(
            slave_id,
            handshake.id.clone(),
            descriptor,
            handshake.paused,
            outbound,
        );
        let available_since = self.next_availability();
        slave.mark_connected(available_since);
        let matching = self.compute_matching(&slave);
        slave.set_matching_requirements(matching);

        info!(
            "Slave {} 已连接，匹配 {} 个浏览器需求{}",
            slave.display_name(),
            slave.matching_requirements().len(),
            if slave.is_paused() { "（已暂停）" } else { "" }
        );
        self.slaves.insert(slave_id, slave);

        if let Some(notify) = notify {
            let _ = notify.send(slave_id);
        }

        self.assign_tasks()?;
        Ok(slave_id)
    }

    /// 计算Slave在所有未结束活动中匹配的浏览器需求
    fn compute_matching(&mut self, slave: &Slave) -> Vec<RequirementRef> {
        let mut matching = Vec::new();
        for campaign in self.campaigns.iter_mut() {
            for requirement in campaign.match_requirements(slave.descriptor()) {
                matching.push((campaign.id().to_string(), requirement));
            }
        }
        matching
    }

    fn recompute_all_matching(&mut self) {
        let ids: Vec<SlaveId> = self.slaves.keys().copied().collect();
        for id in ids {
            let Some(mut slave) = self.slaves.remove(&id) else {
                continue;
            };
            let matching = self.compute_matching(&slave);
            slave.set_matching_requirements(matching);
            self.slaves.insert(id, slave);
        }
    }

    fn handle_slave_message(
        &mut self,
        slave_id: SlaveId,
        message: WorkerMessage,
    ) -> SchedulerResult<()> {
        let message_type = message.message_type_str();
        let Some(slave) = self.slaves.get_mut(&slave_id) else {
            warn!("收到未知Slave {} 的 {} 消息", slave_id, message_type);
            return Ok(());
        };

        match message {
            WorkerMessage::PauseChanged { paused } => {
                slave.set_paused(paused);
                if !paused {
                    let available_since = self.next_availability();
                    if let Some(slave) = self.slaves.get_mut(&slave_id) {
                        slave.set_available_since(available_since);
                    }
                }
                self.assign_tasks()
            }
            WorkerMessage::Log {
                task_execution_id,
                level,
                message,
            } => {
                if slave.is_current_execution(task_execution_id) {
                    let task_id = slave.current_task_id();
                    let campaign_id = slave.current_campaign_id().map(str::to_string);
                    if let Some(campaign) = campaign_id
                        .as_deref()
                        .and_then(|id| self.campaigns.iter_mut().find(|c| c.id() == id))
                    {
                        campaign.add_result(EventPayload::Log {
                            task_id,
                            level,
                            message,
                        })?;
                    }
                } else {
                    debug!("Slave {} 日志 [{}]: {}", slave.display_name(), level, message);
                }
                Ok(())
            }
            WorkerMessage::TestUpdate {
                task_execution_id,
                event,
            } => {
                let Some(campaign_id) = slave.current_campaign_id() else {
                    warn!(
                        "Slave {} 在没有任务时上报了进度事件，执行编号 {:?}",
                        slave.display_name(),
                        task_execution_id
                    );
                    return Ok(());
                };
                match self.campaigns.iter_mut().find(|c| c.id() == campaign_id) {
                    Some(campaign) => {
                        slave.on_progress(campaign, task_execution_id, event)?;
                    }
                    None => slave.abandon_current_task(),
                }
                Ok(())
            }
            WorkerMessage::TaskFinished { task_execution_id } => {
                let Some(campaign_id) = slave.current_campaign_id() else {
                    warn!(
                        "Slave {} 在没有任务时报告了任务结束，执行编号 {:?}",
                        slave.display_name(),
                        task_execution_id
                    );
                    return Ok(());
                };
                let finished = match self.campaigns.iter_mut().find(|c| c.id() == campaign_id) {
                    Some(campaign) => {
                        slave.on_task_finished(campaign, task_execution_id, &self.config)?
                    }
                    None => {
                        slave.abandon_current_task();
                        true
                    }
                };
                if finished {
                    self.slave_became_available(slave_id);
                    self.assign_tasks()?;
                }
                Ok(())
            }
        }
    }

    fn slave_became_available(&mut self, slave_id: SlaveId) {
        let available_since = self.next_availability();
        if let Some(slave) = self.slaves.get_mut(&slave_id) {
            slave.set_available_since(available_since);
        }
    }

    fn task_timeout(&mut self, slave_id: SlaveId, execution_id: u64) -> SchedulerResult<()> {
        let Some(slave) = self.slaves.get_mut(&slave_id) else {
            debug!("已断开的Slave {} 的计时器触发", slave_id);
            return Ok(());
        };
        let Some(campaign_id) = slave.current_campaign_id() else {
            return Ok(());
        };
        let Some(campaign) = self.campaigns.iter_mut().find(|c| c.id() == campaign_id) else {
            slave.abandon_current_task();
            return Ok(());
        };

        if slave.on_timeout(campaign, execution_id, &self.config)? {
            self.slave_became_available(slave_id);
            self.assign_tasks()?;
        }
        Ok(())
    }

    fn disconnect_slave(&mut self, slave_id: SlaveId) -> SchedulerResult<()> {
        let Some(mut slave) = self.slaves.remove(&slave_id) else {
            debug!("Slave {} 已不存在，忽略断开事件", slave_id);
            return Ok(());
        };

        let campaign = match slave.current_campaign_id() {
            Some(campaign_id) => self.campaigns.iter_mut().find(|c| c.id() == campaign_id),
            None => None,
        };
        slave.on_disconnect(campaign, &self.config)?;
        info!("Slave {} 已断开", slave.display_name());

        self.assign_tasks()
    }

    fn add_campaign(
        &mut self,
        config: CampaignConfig,
        test_type: Arc<dyn TestType>,
        instrumenter: Option<Arc<dyn Instrumenter>>,
    ) -> SchedulerResult<CampaignHandle> {
        let number = self.next_campaign_number;
        self.next_campaign_number += 1;
        let id = if self.config.predictable_urls {
            number.to_string()
        } else {
            let suffix: u32 = rand::rng().random_range(0..10_000);
            format!("{}{:04}", Utc::now().timestamp_millis(), suffix)
        };

        let campaign = Campaign::new(
            id.clone(),
            number,
            config,
            test_type,
            instrumenter,
            self.config.event_buffer_size,
        );
        let handle = CampaignHandle {
            id: id.clone(),
            number,
            events: campaign.subscribe()?,
            outcome: campaign.outcome_receiver(),
        };

        let init = campaign.init_future();
        let mailbox = self.mailbox.clone();
        let campaign_id = id.clone();
        tokio::spawn(async move {
            let result = init.await;
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(SchedulerCommand::CampaignInitialized {
                    campaign_id,
                    result,
                });
            }
        });

        info!("活动 {} (#{}) 已创建", id, number);
        self.campaigns.push(campaign);
        self.recompute_all_matching();
        Ok(handle)
    }

    fn campaign_initialized(
        &mut self,
        campaign_id: &str,
        result: SchedulerResult<Vec<TestNode>>,
    ) -> SchedulerResult<()> {
        let has_slaves = !self.slaves.is_empty();
        let campaign = self.find_campaign_mut(campaign_id)?;
        match result {
            Ok(tree) => {
                campaign.complete_init(tree)?;
                let unmatched = campaign.unmatched_requirements();
                if !unmatched.is_empty() && has_slaves {
                    warn!(
                        "活动 {} 的浏览器需求暂无匹配的Slave: {}",
                        campaign_id,
                        unmatched.join(", ")
                    );
                }
            }
            Err(e) => campaign.fail_init(e)?,
        }
        self.assign_tasks()
    }

    fn check_finished(&mut self, campaign_id: &str) -> SchedulerResult<()> {
        let Some(campaign) = self.campaigns.iter_mut().find(|c| c.id() == campaign_id) else {
            return Ok(());
        };
        if campaign.check_finished()?.is_some() {
            campaign.dispose();
            self.recompute_all_matching();
        }
        Ok(())
    }

    /// 将空闲的Slave与排队的任务配对
    ///
    /// 冻结模式下不分配任何任务。最近变为空闲的Slave优先。
    fn assign_tasks(&mut self) -> SchedulerResult<()> {
        if self.frozen {
            return Ok(());
        }

        for campaign in self.campaigns.iter_mut().filter(|c| !c.is_finished()) {
            campaign.request_check();
        }

        let mut available: Vec<(u64, SlaveId)> = self
            .slaves
            .values()
            .filter(|slave| slave.is_available())
            .map(|slave| (slave.available_since(), slave.id()))
            .collect();
        available.sort_unstable_by(|a, b| b.cmp(a));

        for (_, slave_id) in available {
            let Some(slave) = self.slaves.get_mut(&slave_id) else {
                continue;
            };
            for (campaign_id, requirement) in slave.matching_requirements().to_vec() {
                let Some(campaign) = self.campaigns.iter_mut().find(|c| c.id() == campaign_id)
                else {
                    continue;
                };
                if let Some(task_id) = campaign.next_task(requirement)? {
                    slave.assign_task(
                        campaign,
                        task_id,
                        self.config.task_timeout(),
                        self.mailbox.clone(),
                    )?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// 为请求了检查的活动投递延迟的结束检查
    fn post_deferred_checks(&mut self) {
        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };
        for campaign in self.campaigns.iter_mut() {
            if campaign.take_check_request() && !campaign.is_finished() {
                let _ = mailbox.send(SchedulerCommand::CheckFinished {
                    campaign_id: campaign.id().to_string(),
                });
            }
        }
    }

    fn find_campaign_mut(&mut self, key: &str) -> SchedulerResult<&mut Campaign> {
        self.campaigns
            .iter_mut()
            .find(|c| c.is_identified_by(key))
            .ok_or_else(|| SchedulerError::CampaignNotFound {
                id: key.to_string(),
            })
    }

    fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            frozen: self.frozen,
            slaves: self.slaves.values().map(Slave::summary).collect(),
            campaigns: self.campaigns.iter().map(Campaign::summary).collect(),
        }
    }

    /// 释放所有活动与Slave
    fn dispose_all(&mut self) {
        for campaign in self.campaigns.iter_mut() {
            if !campaign.is_finished() {
                warn!("活动 {} 未结束即被释放", campaign.id());
            }
            campaign.dispose();
        }
        for (_, mut slave) in std::mem::take(&mut self.slaves) {
            slave.abandon_current_task();
            slave.send(SlaveCommand::Dispose);
        }
        self.expected_slaves.clear();
    }
}

/// 调度器句柄
///
/// 可以自由克隆，所有方法都只是向调度器邮箱投递命令。
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
}

impl SchedulerHandle {
    fn send(&self, command: SchedulerCommand) -> SchedulerResult<()> {
        self.tx
            .send(command)
            .map_err(|_| SchedulerError::SchedulerStopped)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
    ) -> SchedulerResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        rx.await.map_err(|_| SchedulerError::SchedulerStopped)
    }

    /// 注册完成握手的Slave，`outbound` 用于向浏览器发送消息
    pub async fn connect_slave(
        &self,
        handshake: SlaveHandshake,
        outbound: mpsc::UnboundedSender<SlaveCommand>,
    ) -> SchedulerResult<SlaveId> {
        self.request(|reply| SchedulerCommand::ConnectSlave {
            handshake,
            outbound,
            reply,
        })
        .await?
    }

    pub fn slave_message(&self, slave_id: SlaveId, message: WorkerMessage) -> SchedulerResult<()> {
        self.send(SchedulerCommand::SlaveMessage { slave_id, message })
    }

    pub fn disconnect_slave(&self, slave_id: SlaveId) -> SchedulerResult<()> {
        self.send(SchedulerCommand::DisconnectSlave { slave_id })
    }

    /// 登记一个预期的外部Slave，连接成功后返回其编号
    pub fn expect_slave(
        &self,
        external_id: impl Into<String>,
    ) -> SchedulerResult<oneshot::Receiver<SlaveId>> {
        let (notify, rx) = oneshot::channel();
        self.send(SchedulerCommand::ExpectSlave {
            external_id: external_id.into(),
            notify,
        })?;
        Ok(rx)
    }

    /// 创建活动；测试枚举在后台进行，完成后开始分配任务
    pub async fn add_campaign(
        &self,
        config: CampaignConfig,
        test_type: Arc<dyn TestType>,
        instrumenter: Option<Arc<dyn Instrumenter>>,
    ) -> SchedulerResult<CampaignHandle> {
        self.request(|reply| SchedulerCommand::AddCampaign {
            config,
            test_type,
            instrumenter,
            reply,
        })
        .await?
    }

    /// 提交覆盖率数据，`campaign` 可以是活动标识或顺序编号
    pub async fn submit_coverage(
        &self,
        campaign: impl Into<String>,
        task_id: TaskId,
        report: CoverageReport,
    ) -> SchedulerResult<()> {
        let campaign = campaign.into();
        self.request(|reply| SchedulerCommand::SubmitCoverage {
            campaign,
            task_id,
            report,
            reply,
        })
        .await?
    }

    /// 订阅活动结果，`kind` 为空时订阅全部结果
    pub async fn subscribe(
        &self,
        campaign: impl Into<String>,
        kind: Option<EventKind>,
    ) -> SchedulerResult<broadcast::Receiver<CampaignEvent>> {
        let campaign = campaign.into();
        self.request(|reply| SchedulerCommand::Subscribe {
            campaign,
            kind,
            reply,
        })
        .await?
    }

    pub async fn results(&self, campaign: impl Into<String>) -> SchedulerResult<Vec<CampaignEvent>> {
        let campaign = campaign.into();
        self.request(|reply| SchedulerCommand::Results { campaign, reply })
            .await?
    }

    pub async fn snapshot(&self) -> SchedulerResult<SchedulerSnapshot> {
        self.request(|reply| SchedulerCommand::Snapshot { reply })
            .await
    }

    pub fn set_frozen(&self, frozen: bool) -> SchedulerResult<()> {
        self.send(SchedulerCommand::SetFrozen { frozen })
    }

    pub async fn shutdown(&self) -> SchedulerResult<()> {
        self.request(|reply| SchedulerCommand::Shutdown { reply })
            .await
    }
}
