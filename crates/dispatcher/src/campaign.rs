use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::{self, BoxFuture};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use testfarm_core::{
    models::{
        BrowserFilter, CampaignEvent, CampaignOutcome, CapabilityDescriptor, CoverageReport,
        EventKind, EventPayload, ExecutionStats, SlaveId, Task, TaskId, TaskState, TestNode,
    },
    CampaignConfig, Instrumenter, SchedulerError, SchedulerResult, TestType,
};

use crate::browser_queue::BrowserQueue;

/// 活动统计
///
/// 单次执行产生的测试、断言与错误数只在任务最终完成时计入，
/// 计划重启的执行所产生的数据会被丢弃。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStats {
    pub tasks_finished: usize,
    pub tasks_ignored: usize,
    pub tests: usize,
    pub asserts: u64,
    pub failures: usize,
    pub errors: usize,
    pub restarts: usize,
}

impl CampaignStats {
    fn commit(&mut self, attempt: AttemptStats) {
        self.tests += attempt.tests;
        self.asserts += attempt.asserts;
        self.failures += attempt.failures;
        self.errors += attempt.errors;
    }

    /// 根据统计结果和忽略策略计算活动结果
    pub fn outcome(&self, ignore_errors: bool, ignore_failures: bool) -> CampaignOutcome {
        if (self.errors > 0 && !ignore_errors) || (self.failures > 0 && !ignore_failures) {
            CampaignOutcome::Failed
        } else {
            CampaignOutcome::Finished
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AttemptStats {
    tests: usize,
    asserts: u64,
    failures: usize,
    errors: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserQueueSummary {
    pub label: String,
    pub queued: usize,
    pub ever_matched: bool,
}

/// 活动状态快照
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSummary {
    pub id: String,
    pub number: u64,
    pub initialized: bool,
    pub finished: bool,
    pub total_tasks: usize,
    pub remaining_tasks: usize,
    pub remaining_coverage_results: i64,
    pub stats: CampaignStats,
    pub outcome: Option<CampaignOutcome>,
    pub browsers: Vec<BrowserQueueSummary>,
}

/// 测试活动
///
/// 活动拥有自己的任务列表、浏览器需求队列和结果流。所有结果都必须经过
/// [`Campaign::add_result`]，计数器只在这里更新，保证统计与结果流一致。
pub struct Campaign {
    id: String,
    number: u64,
    config: CampaignConfig,
    test_type: Arc<dyn TestType>,
    instrumenter: Option<Arc<dyn Instrumenter>>,
    tasks: Vec<Task>,
    tree: Vec<TestNode>,
    browsers: Vec<BrowserQueue>,
    remaining_tasks: usize,
    /// 覆盖率通知与覆盖率数据的差值；数据可能先于通知到达，此时为负
    remaining_coverage_results: i64,
    initialized: bool,
    finished: bool,
    check_requested: bool,
    stats: CampaignStats,
    attempts: HashMap<TaskId, AttemptStats>,
    coverage: CoverageReport,
    results: Vec<CampaignEvent>,
    events: Option<broadcast::Sender<CampaignEvent>>,
    kind_channels: HashMap<EventKind, broadcast::Sender<CampaignEvent>>,
    outcome: watch::Sender<Option<CampaignOutcome>>,
    event_buffer_size: usize,
}

impl Campaign {
    pub fn new(
        id: String,
        number: u64,
        config: CampaignConfig,
        test_type: Arc<dyn TestType>,
        instrumenter: Option<Arc<dyn Instrumenter>>,
        event_buffer_size: usize,
    ) -> Self {
        let filters = if config.browsers.is_empty() {
            vec![BrowserFilter::any()]
        } else {
            config.browsers.clone()
        };
        let browsers = filters.into_iter().map(BrowserQueue::new).collect();
        let (events, _) = broadcast::channel(event_buffer_size);
        let (outcome, _) = watch::channel(None);

        Self {
            id,
            number,
            config,
            test_type,
            instrumenter,
            tasks: Vec::new(),
            tree: Vec::new(),
            browsers,
            remaining_tasks: 0,
            remaining_coverage_results: 0,
            initialized: false,
            finished: false,
            check_requested: false,
            stats: CampaignStats::default(),
            attempts: HashMap::new(),
            coverage: CoverageReport::default(),
            results: Vec::new(),
            events: Some(events),
            kind_channels: HashMap::new(),
            outcome,
            event_buffer_size,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    /// 按活动标识或顺序编号匹配
    pub fn is_identified_by(&self, key: &str) -> bool {
        self.id == key || self.number.to_string() == key
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn tree(&self) -> &[TestNode] {
        &self.tree
    }

    pub fn browsers(&self) -> &[BrowserQueue] {
        &self.browsers
    }

    pub fn remaining_tasks(&self) -> usize {
        self.remaining_tasks
    }

    pub fn remaining_coverage_results(&self) -> i64 {
        self.remaining_coverage_results
    }

    pub fn stats(&self) -> CampaignStats {
        self.stats
    }

    pub fn coverage(&self) -> &CoverageReport {
        &self.coverage
    }

    /// 迄今为止产生的全部结果
    pub fn results(&self) -> &[CampaignEvent] {
        &self.results
    }

    /// 订阅全部结果；订阅之前产生的结果不会重放
    pub fn subscribe(&self) -> SchedulerResult<broadcast::Receiver<CampaignEvent>> {
        self.events
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| SchedulerError::CampaignNotFound {
                id: self.id.clone(),
            })
    }

    /// 订阅某一类结果
    pub fn subscribe_kind(
        &mut self,
        kind: EventKind,
    ) -> SchedulerResult<broadcast::Receiver<CampaignEvent>> {
        if self.events.is_none() {
            return Err(SchedulerError::CampaignNotFound {
                id: self.id.clone(),
            });
        }
        let buffer = self.event_buffer_size;
        Ok(self
            .kind_channels
            .entry(kind)
            .or_insert_with(|| broadcast::channel(buffer).0)
            .subscribe())
    }

    pub fn outcome_receiver(&self) -> watch::Receiver<Option<CampaignOutcome>> {
        self.outcome.subscribe()
    }

    /// 构造初始化所需的异步工作：测试枚举，以及启用覆盖率时的插桩
    pub fn init_future(&self) -> BoxFuture<'static, SchedulerResult<Vec<TestNode>>> {
        let test_type = Arc::clone(&self.test_type);
        let instrumenter = if self.config.coverage.enabled {
            self.instrumenter.clone()
        } else {
            None
        };
        let campaign_id = self.id.clone();

        Box::pin(async move {
            debug!(
                "活动 {} 开始枚举测试，测试类型: {}",
                campaign_id,
                test_type.name()
            );
            match instrumenter {
                Some(instrumenter) => {
                    let (tree, instrumented) =
                        future::try_join(test_type.enumerate(), instrumenter.instrument()).await?;
                    debug!("活动 {} 插桩完成，共 {} 个文件", campaign_id, instrumented);
                    Ok(tree)
                }
                None => test_type.enumerate().await,
            }
        })
    }

    /// 用枚举得到的测试树完成初始化
    ///
    /// 每个测试叶子节点与每个浏览器需求组合生成一个任务。存在多个浏览器需求时，
    /// 对外发布的测试树按需求分组。
    pub fn complete_init(&mut self, tree: Vec<TestNode>) -> SchedulerResult<()> {
        if self.initialized {
            return Err(SchedulerError::InvariantViolation(format!(
                "活动 {} 重复初始化",
                self.id
            )));
        }

        let grouped = self.browsers.len() > 1;
        let mut roots = Vec::new();
        let mut ignored = Vec::new();

        for (requirement, queue) in self.browsers.iter_mut().enumerate() {
            let mut nodes = tree.clone();
            let label = grouped.then(|| queue.label().to_string());
            for node in nodes.iter_mut() {
                expand_node(
                    node,
                    requirement,
                    label.as_deref(),
                    &mut self.tasks,
                    queue,
                    &mut ignored,
                );
            }
            match label {
                Some(label) => roots.push(TestNode::group(label, nodes)),
                None => roots.extend(nodes),
            }
        }

        self.tree = roots;
        self.remaining_tasks = self.tasks.len();
        self.initialized = true;

        info!(
            "活动 {} 初始化完成: {} 个任务, {} 个浏览器需求",
            self.id,
            self.tasks.len(),
            self.browsers.len()
        );

        self.add_result(EventPayload::TasksList {
            tasks: self.tree.clone(),
        })?;
        for task_id in ignored {
            self.add_result(EventPayload::TaskIgnored { task_id })?;
        }
        self.check_requested = true;
        Ok(())
    }

    /// 初始化失败时以一条活动级错误结束活动
    pub fn fail_init(&mut self, cause: SchedulerError) -> SchedulerResult<()> {
        error!("活动 {} 初始化失败: {}", self.id, cause);
        self.initialized = true;
        self.add_result(EventPayload::Error {
            task_id: None,
            test_id: None,
            message: cause.to_string(),
            failure: false,
            stack: Vec::new(),
        })
    }

    /// 记录结果并通知订阅者
    ///
    /// 这是更新剩余任务数与剩余覆盖率结果数的唯一入口。
    pub fn add_result(&mut self, event: impl Into<CampaignEvent>) -> SchedulerResult<()> {
        let mut event = event.into();
        if event.time.is_none() {
            event.time = Some(Utc::now());
        }

        match &event.payload {
            EventPayload::Coverage { task_id } => {
                if !self.config.coverage.enabled {
                    warn!(
                        "活动 {} 未启用覆盖率，忽略任务 {} 的覆盖率通知",
                        self.id, task_id
                    );
                    return Ok(());
                }
                self.remaining_coverage_results += 1;
            }
            EventPayload::TaskFinished {
                task_id,
                restart_planned: true,
            } => {
                self.attempts.remove(task_id);
                self.stats.restarts += 1;
            }
            EventPayload::TaskFinished {
                task_id,
                restart_planned: false,
            } => {
                self.decrement_remaining(*task_id)?;
                let attempt = self.attempts.remove(task_id).unwrap_or_default();
                self.stats.commit(attempt);
                self.stats.tasks_finished += 1;
            }
            EventPayload::TaskIgnored { task_id } => {
                self.decrement_remaining(*task_id)?;
                self.stats.tasks_ignored += 1;
            }
            EventPayload::TestStarted { task_id, .. } => {
                self.attempts.entry(*task_id).or_default().tests += 1;
            }
            EventPayload::TestFinished {
                task_id, asserts, ..
            } => {
                self.attempts.entry(*task_id).or_default().asserts += u64::from(*asserts);
            }
            EventPayload::Error {
                task_id, failure, ..
            } => {
                let (failures, errors) = match task_id {
                    Some(task_id) => {
                        let attempt = self.attempts.entry(*task_id).or_default();
                        (&mut attempt.failures, &mut attempt.errors)
                    }
                    None => (&mut self.stats.failures, &mut self.stats.errors),
                };
                if *failure {
                    *failures += 1;
                } else {
                    *errors += 1;
                }
            }
            _ => {}
        }

        self.check_requested = true;
        self.publish(event);
        Ok(())
    }

    fn decrement_remaining(&mut self, task_id: TaskId) -> SchedulerResult<()> {
        self.remaining_tasks = self.remaining_tasks.checked_sub(1).ok_or_else(|| {
            SchedulerError::InvariantViolation(format!(
                "活动 {} 的剩余任务数在任务 {} 结束时已为0",
                self.id, task_id
            ))
        })?;
        Ok(())
    }

    fn publish(&mut self, event: CampaignEvent) {
        if let Some(sender) = self.kind_channels.get(&event.kind()) {
            let _ = sender.send(event.clone());
        }
        if let Some(sender) = &self.events {
            let _ = sender.send(event.clone());
        }
        self.results.push(event);
    }

    /// 请求在下一轮调度时检查活动是否结束
    pub fn request_check(&mut self) {
        self.check_requested = true;
    }

    pub fn take_check_request(&mut self) -> bool {
        std::mem::take(&mut self.check_requested)
    }

    /// 检查活动是否结束，结束时发布 campaignFinished 并返回结果
    ///
    /// 活动只会结束一次，之后的调用直接返回 `None`。
    pub fn check_finished(&mut self) -> SchedulerResult<Option<CampaignOutcome>> {
        self.check_requested = false;
        if !self.initialized
            || self.finished
            || self.remaining_tasks > 0
            || self.remaining_coverage_results != 0
        {
            return Ok(None);
        }

        if let Some(task) = self.tasks.iter().find(|task| !task.is_terminal()) {
            return Err(SchedulerError::InvariantViolation(format!(
                "活动 {} 剩余任务数为0，但任务 {} 仍处于 {:?}",
                self.id, task.id, task.state
            )));
        }

        self.finished = true;
        let outcome = self
            .stats
            .outcome(self.config.ignore_errors, self.config.ignore_failures);
        self.add_result(EventPayload::CampaignFinished { outcome })?;
        self.check_requested = false;
        self.outcome.send_replace(Some(outcome));

        let (covered, total) = self.coverage.line_totals();
        info!(
            "活动 {} 结束: {:?}, 完成 {} 个任务, 忽略 {}, 失败 {}, 错误 {}, 重启 {}",
            self.id,
            outcome,
            self.stats.tasks_finished,
            self.stats.tasks_ignored,
            self.stats.failures,
            self.stats.errors,
            self.stats.restarts
        );
        if total > 0 {
            info!("活动 {} 覆盖率: {}/{} 行", self.id, covered, total);
        }

        Ok(Some(outcome))
    }

    /// 合并一份覆盖率数据
    pub fn add_coverage_result(
        &mut self,
        task_id: TaskId,
        report: &CoverageReport,
    ) -> SchedulerResult<()> {
        if task_id >= self.tasks.len() {
            return Err(SchedulerError::TaskNotFound {
                campaign_id: self.id.clone(),
                task_id,
            });
        }
        if self.finished {
            warn!("活动 {} 已结束，丢弃任务 {} 的覆盖率数据", self.id, task_id);
            return Ok(());
        }
        if !self.config.coverage.enabled {
            warn!("活动 {} 未启用覆盖率，丢弃任务 {} 的覆盖率数据", self.id, task_id);
            return Ok(());
        }

        self.remaining_coverage_results -= 1;
        if self.remaining_coverage_results < 0 {
            debug!("活动 {} 任务 {} 的覆盖率数据先于通知到达", self.id, task_id);
        }
        self.coverage.merge(report);
        self.check_requested = true;
        Ok(())
    }

    /// 计算该活动中与能力描述匹配的浏览器需求
    pub fn match_requirements(&mut self, descriptor: &CapabilityDescriptor) -> Vec<usize> {
        if self.finished {
            return Vec::new();
        }
        self.browsers
            .iter_mut()
            .enumerate()
            .filter_map(|(index, queue)| {
                queue.matches(descriptor).then(|| {
                    queue.mark_matched();
                    index
                })
            })
            .collect()
    }

    /// 从指定浏览器需求队列取出下一个任务
    pub fn next_task(&mut self, requirement: usize) -> SchedulerResult<Option<TaskId>> {
        if !self.initialized || self.finished {
            return Ok(None);
        }
        let Some(queue) = self.browsers.get_mut(requirement) else {
            return Ok(None);
        };
        let Some(task_id) = queue.dequeue() else {
            return Ok(None);
        };

        let task = self.task(task_id)?;
        if task.state != TaskState::Queued {
            return Err(SchedulerError::InvariantViolation(format!(
                "活动 {} 队列中的任务 {} 状态为 {:?}",
                self.id, task_id, task.state
            )));
        }
        Ok(Some(task_id))
    }

    pub fn task(&self, task_id: TaskId) -> SchedulerResult<&Task> {
        self.tasks
            .get(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                campaign_id: self.id.clone(),
                task_id,
            })
    }

    fn task_mut(&mut self, task_id: TaskId) -> SchedulerResult<&mut Task> {
        let campaign_id = &self.id;
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                campaign_id: campaign_id.clone(),
                task_id,
            })
    }

    /// 将任务分配给Slave并发布 taskStarted
    pub fn start_task(
        &mut self,
        task_id: TaskId,
        slave_id: SlaveId,
        slave_name: &str,
    ) -> SchedulerResult<Task> {
        let task = self.task_mut(task_id)?;
        task.mark_assigned(slave_id)?;
        let task = task.clone();
        self.add_result(EventPayload::TaskStarted {
            task_id,
            slave: slave_name.to_string(),
            restarts: task.restarts,
        })?;
        Ok(task)
    }

    /// 任务重新排队，放回所属浏览器需求队列尾部
    pub fn requeue_task(&mut self, task_id: TaskId) -> SchedulerResult<()> {
        let task = self.task_mut(task_id)?;
        task.mark_restarted()?;
        let requirement = task.requirement;
        match self.browsers.get_mut(requirement) {
            Some(queue) => {
                queue.enqueue(task_id);
                Ok(())
            }
            None => Err(SchedulerError::InvariantViolation(format!(
                "任务 {} 所属的浏览器需求 {} 不存在",
                task_id, requirement
            ))),
        }
    }

    pub fn finish_task(&mut self, task_id: TaskId) -> SchedulerResult<()> {
        self.task_mut(task_id)?.mark_finished()
    }

    pub fn task_restarts(&self, task_id: TaskId) -> SchedulerResult<u32> {
        Ok(self.task(task_id)?.restarts)
    }

    pub fn execution_stats(&self) -> ExecutionStats {
        ExecutionStats {
            remaining_tasks: self.remaining_tasks,
            total_tasks: self.tasks.len(),
        }
    }

    /// 曾有任务排队但从未被任何Slave匹配的浏览器需求
    pub fn unmatched_requirements(&self) -> Vec<&str> {
        self.browsers
            .iter()
            .filter(|queue| !queue.ever_matched() && !queue.is_empty())
            .map(BrowserQueue::label)
            .collect()
    }

    pub fn summary(&self) -> CampaignSummary {
        CampaignSummary {
            id: self.id.clone(),
            number: self.number,
            initialized: self.initialized,
            finished: self.finished,
            total_tasks: self.tasks.len(),
            remaining_tasks: self.remaining_tasks,
            remaining_coverage_results: self.remaining_coverage_results,
            stats: self.stats,
            outcome: *self.outcome.borrow(),
            browsers: self
                .browsers
                .iter()
                .map(|queue| BrowserQueueSummary {
                    label: queue.label().to_string(),
                    queued: queue.len(),
                    ever_matched: queue.ever_matched(),
                })
                .collect(),
        }
    }

    /// 释放结果通道，订阅者随后会收到通道关闭
    pub fn dispose(&mut self) {
        self.kind_channels.clear();
        if self.events.take().is_some() {
            debug!("活动 {} 已释放", self.id);
        }
    }
}

fn expand_node(
    node: &mut TestNode,
    requirement: usize,
    label: Option<&str>,
    tasks: &mut Vec<Task>,
    queue: &mut BrowserQueue,
    ignored: &mut Vec<TaskId>,
) {
    if !node.is_leaf() {
        for child in node.children.iter_mut() {
            expand_node(child, requirement, label, tasks, queue, ignored);
        }
        return;
    }

    let Some(url) = node.url.clone() else {
        warn!("测试 {} 没有URL，已跳过", node.name);
        return;
    };

    let task_id = tasks.len();
    let name = match label {
        Some(label) => format!("{} ({})", node.name, label),
        None => node.name.clone(),
    };
    let mut task = Task::new(task_id, name, url, requirement);
    if node.ignored {
        task.mark_ignored();
        ignored.push(task_id);
    } else {
        queue.enqueue(task_id);
    }
    tasks.push(task);
    node.task_id = Some(task_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedTests;

    #[async_trait]
    impl TestType for FixedTests {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn enumerate(&self) -> SchedulerResult<Vec<TestNode>> {
            Ok(Vec::new())
        }
    }

    fn campaign(config: CampaignConfig) -> Campaign {
        Campaign::new(
            "c1".to_string(),
            1,
            config,
            Arc::new(FixedTests),
            None,
            64,
        )
    }

    fn sample_tree() -> Vec<TestNode> {
        let mut skipped = TestNode::leaf("skipped", "/skipped.html");
        skipped.ignored = true;
        vec![TestNode::group(
            "suite",
            vec![
                TestNode::leaf("a", "/a.html"),
                TestNode::leaf("b", "/b.html"),
                skipped,
            ],
        )]
    }

    #[test]
    fn test_expansion_single_requirement() {
        let mut campaign = campaign(CampaignConfig::default());
        campaign.complete_init(sample_tree()).unwrap();

        assert_eq!(campaign.tasks().len(), 3);
        assert_eq!(campaign.remaining_tasks(), 2);
        assert_eq!(campaign.tree().len(), 1);
        assert_eq!(campaign.tree()[0].children[0].task_id, Some(0));
        assert_eq!(campaign.tasks()[2].state, TaskState::Ignored);
        assert_eq!(campaign.browsers()[0].len(), 2);

        let kinds: Vec<EventKind> = campaign.results().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![EventKind::TasksList, EventKind::TaskIgnored]);
    }

    #[test]
    fn test_expansion_groups_per_requirement() {
        let config = CampaignConfig {
            browsers: vec![
                BrowserFilter {
                    browser_name: Some("Firefox".to_string()),
                    ..Default::default()
                },
                BrowserFilter {
                    browser_name: Some("Chrome".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let mut campaign = campaign(config);
        campaign.complete_init(sample_tree()).unwrap();

        assert_eq!(campaign.tasks().len(), 6);
        assert_eq!(campaign.remaining_tasks(), 4);
        assert_eq!(campaign.tree().len(), 2);
        assert_eq!(campaign.tree()[0].name, "Firefox");
        assert_eq!(campaign.tree()[1].name, "Chrome");
        assert_eq!(campaign.tasks()[3].requirement, 1);
        assert_eq!(campaign.tasks()[3].name, "a (Chrome)");
    }

    #[test]
    fn test_empty_campaign_finishes_once() {
        let mut campaign = campaign(CampaignConfig::default());
        let mut outcome = campaign.outcome_receiver();
        campaign.complete_init(Vec::new()).unwrap();

        assert_eq!(
            campaign.check_finished().unwrap(),
            Some(CampaignOutcome::Finished)
        );
        assert_eq!(campaign.check_finished().unwrap(), None);
        assert_eq!(*outcome.borrow_and_update(), Some(CampaignOutcome::Finished));

        let finished = campaign
            .results()
            .iter()
            .filter(|e| e.kind() == EventKind::CampaignFinished)
            .count();
        assert_eq!(finished, 1);
    }

    #[test]
    fn test_not_finished_before_init() {
        let mut campaign = campaign(CampaignConfig::default());
        assert_eq!(campaign.check_finished().unwrap(), None);
        assert!(!campaign.is_finished());
    }

    #[test]
    fn test_restarted_attempt_errors_are_discarded() {
        let mut campaign = campaign(CampaignConfig::default());
        campaign
            .complete_init(vec![TestNode::leaf("a", "/a.html")])
            .unwrap();

        let task_id = campaign.next_task(0).unwrap().unwrap();
        campaign.start_task(task_id, 1, "Firefox").unwrap();
        campaign
            .add_result(EventPayload::Error {
                task_id: Some(task_id),
                test_id: None,
                message: "boom".to_string(),
                failure: false,
                stack: Vec::new(),
            })
            .unwrap();
        campaign
            .add_result(EventPayload::TaskFinished {
                task_id,
                restart_planned: true,
            })
            .unwrap();
        campaign.requeue_task(task_id).unwrap();
        assert_eq!(campaign.remaining_tasks(), 1);
        assert_eq!(campaign.task_restarts(task_id).unwrap(), 1);

        let task_id = campaign.next_task(0).unwrap().unwrap();
        campaign.start_task(task_id, 1, "Firefox").unwrap();
        campaign
            .add_result(EventPayload::TaskFinished {
                task_id,
                restart_planned: false,
            })
            .unwrap();
        campaign.finish_task(task_id).unwrap();

        assert_eq!(campaign.stats().errors, 0);
        assert_eq!(campaign.stats().restarts, 1);
        assert_eq!(
            campaign.check_finished().unwrap(),
            Some(CampaignOutcome::Finished)
        );
    }

    #[test]
    fn test_failures_respect_ignore_policy() {
        let config = CampaignConfig {
            ignore_failures: true,
            ..Default::default()
        };
        let mut campaign = campaign(config);
        campaign
            .complete_init(vec![TestNode::leaf("a", "/a.html")])
            .unwrap();
        let task_id = campaign.next_task(0).unwrap().unwrap();
        campaign.start_task(task_id, 1, "Firefox").unwrap();
        campaign
            .add_result(EventPayload::Error {
                task_id: Some(task_id),
                test_id: Some("t1".to_string()),
                message: "expected 1 got 2".to_string(),
                failure: true,
                stack: Vec::new(),
            })
            .unwrap();
        campaign
            .add_result(EventPayload::TaskFinished {
                task_id,
                restart_planned: false,
            })
            .unwrap();
        campaign.finish_task(task_id).unwrap();

        assert_eq!(campaign.stats().failures, 1);
        assert_eq!(
            campaign.check_finished().unwrap(),
            Some(CampaignOutcome::Finished)
        );
    }

    #[test]
    fn test_coverage_blocks_completion_until_submitted() {
        let mut config = CampaignConfig::default();
        config.coverage.enabled = true;
        let mut campaign = campaign(config);
        campaign
            .complete_init(vec![TestNode::leaf("a", "/a.html")])
            .unwrap();
        let task_id = campaign.next_task(0).unwrap().unwrap();
        campaign.start_task(task_id, 1, "Firefox").unwrap();
        campaign
            .add_result(EventPayload::Coverage { task_id })
            .unwrap();
        campaign
            .add_result(EventPayload::TaskFinished {
                task_id,
                restart_planned: false,
            })
            .unwrap();
        campaign.finish_task(task_id).unwrap();

        assert_eq!(campaign.remaining_coverage_results(), 1);
        assert_eq!(campaign.check_finished().unwrap(), None);

        campaign
            .add_coverage_result(task_id, &CoverageReport::default())
            .unwrap();
        assert_eq!(campaign.remaining_coverage_results(), 0);
        assert!(campaign.take_check_request());
        assert_eq!(
            campaign.check_finished().unwrap(),
            Some(CampaignOutcome::Finished)
        );
    }

    #[test]
    fn test_coverage_data_before_notice_nets_to_zero() {
        let mut config = CampaignConfig::default();
        config.coverage.enabled = true;
        let mut campaign = campaign(config);
        campaign
            .complete_init(vec![TestNode::leaf("a", "/a.html")])
            .unwrap();
        let task_id = campaign.next_task(0).unwrap().unwrap();
        campaign.start_task(task_id, 1, "Firefox").unwrap();

        campaign
            .add_coverage_result(task_id, &CoverageReport::default())
            .unwrap();
        assert_eq!(campaign.remaining_coverage_results(), -1);
        campaign
            .add_result(EventPayload::Coverage { task_id })
            .unwrap();
        campaign
            .add_result(EventPayload::TaskFinished {
                task_id,
                restart_planned: false,
            })
            .unwrap();
        campaign.finish_task(task_id).unwrap();

        assert_eq!(campaign.remaining_coverage_results(), 0);
        assert_eq!(
            campaign.check_finished().unwrap(),
            Some(CampaignOutcome::Finished)
        );
    }

    #[test]
    fn test_coverage_data_ignored_when_disabled() {
        let mut campaign = campaign(CampaignConfig::default());
        campaign
            .complete_init(vec![TestNode::leaf("a", "/a.html")])
            .unwrap();
        campaign
            .add_coverage_result(0, &CoverageReport::default())
            .unwrap();
        assert_eq!(campaign.remaining_coverage_results(), 0);
    }

    #[test]
    fn test_coverage_notice_ignored_when_disabled() {
        let mut campaign = campaign(CampaignConfig::default());
        campaign
            .complete_init(vec![TestNode::leaf("a", "/a.html")])
            .unwrap();
        campaign
            .add_result(EventPayload::Coverage { task_id: 0 })
            .unwrap();
        assert_eq!(campaign.remaining_coverage_results(), 0);
    }

    #[test]
    fn test_coverage_for_unknown_task_is_rejected() {
        let mut campaign = campaign(CampaignConfig::default());
        campaign.complete_init(Vec::new()).unwrap();
        let result = campaign.add_coverage_result(7, &CoverageReport::default());
        assert!(matches!(
            result,
            Err(SchedulerError::TaskNotFound { task_id: 7, .. })
        ));
    }

    #[test]
    fn test_failed_init_finishes_campaign_as_failed() {
        let mut campaign = campaign(CampaignConfig::default());
        campaign
            .fail_init(SchedulerError::TestEnumeration("no such dir".to_string()))
            .unwrap();
        assert_eq!(
            campaign.check_finished().unwrap(),
            Some(CampaignOutcome::Failed)
        );
    }

    #[test]
    fn test_kind_subscription_only_receives_kind() {
        let mut campaign = campaign(CampaignConfig::default());
        let mut finished = campaign.subscribe_kind(EventKind::CampaignFinished).unwrap();
        let mut all = campaign.subscribe().unwrap();
        campaign.complete_init(Vec::new()).unwrap();
        campaign.check_finished().unwrap();

        assert_eq!(all.try_recv().unwrap().kind(), EventKind::TasksList);
        assert_eq!(finished.try_recv().unwrap().kind(), EventKind::CampaignFinished);
        assert!(finished.try_recv().is_err());

        campaign.dispose();
        assert!(campaign.subscribe().is_err());
    }
}
