//! 调度核心
//!
//! 调度器以单个 tokio 任务运行，独占所有Slave与活动状态；外部通过
//! [`SchedulerHandle`] 投递命令。

pub mod browser_queue;
pub mod campaign;
pub mod reporter;
pub mod scheduler;
pub mod slave;
pub mod test_types;

pub use campaign::{Campaign, CampaignStats, CampaignSummary};
pub use reporter::ConsoleReporter;
pub use scheduler::{CampaignHandle, Scheduler, SchedulerHandle, SchedulerSnapshot};
pub use test_types::{create_test_type, FileTestType, StaticTestType};
