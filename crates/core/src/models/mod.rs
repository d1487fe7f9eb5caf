pub mod browser;
pub mod coverage;
pub mod event;
pub mod message;
pub mod task;
pub mod test_tree;

pub use browser::{BrowserFilter, CapabilityDescriptor};
pub use coverage::{CoverageReport, FileCoverage};
pub use event::{CampaignEvent, CampaignOutcome, EventKind, EventPayload};
pub use message::{
    ExecutionStats, SlaveCommand, SlaveHandshake, SlaveSummary, WorkerEvent, WorkerMessage,
};
pub use task::{SlaveId, Task, TaskId, TaskState};
pub use test_tree::TestNode;
