use std::collections::VecDeque;

use testfarm_core::models::{BrowserFilter, CapabilityDescriptor, TaskId};

/// 浏览器需求及其待执行任务队列
///
/// 每个活动为配置中的每个浏览器需求维护一个队列，队列中只存放处于排队状态的任务编号。
#[derive(Debug, Clone)]
pub struct BrowserQueue {
    filter: BrowserFilter,
    label: String,
    queue: VecDeque<TaskId>,
    ever_matched: bool,
}

impl BrowserQueue {
    pub fn new(filter: BrowserFilter) -> Self {
        let label = filter.label();
        Self {
            filter,
            label,
            queue: VecDeque::new(),
            ever_matched: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn filter(&self) -> &BrowserFilter {
        &self.filter
    }

    /// 检查Slave的能力描述是否满足该需求
    pub fn matches(&self, descriptor: &CapabilityDescriptor) -> bool {
        self.filter.matches(descriptor)
    }

    /// 记录曾有Slave匹配过该需求
    pub fn mark_matched(&mut self) {
        self.ever_matched = true;
    }

    pub fn ever_matched(&self) -> bool {
        self.ever_matched
    }

    pub fn enqueue(&mut self, task_id: TaskId) {
        self.queue.push_back(task_id);
    }

    pub fn dequeue(&mut self) -> Option<TaskId> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = BrowserQueue::new(BrowserFilter::any());
        queue.enqueue(3);
        queue.enqueue(1);
        queue.enqueue(2);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue(), Some(3));
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_label_and_matching() {
        let mut queue = BrowserQueue::new(BrowserFilter {
            browser_name: Some("Firefox".to_string()),
            ..Default::default()
        });
        assert_eq!(queue.label(), "Firefox");
        assert!(!queue.ever_matched());

        let firefox = CapabilityDescriptor {
            browser_name: "Firefox".to_string(),
            ..Default::default()
        };
        assert!(queue.matches(&firefox));
        queue.mark_matched();
        assert!(queue.ever_matched());
    }
}
