pub mod capabilities;
pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::{AppConfig, CampaignConfig, CoverageConfig, SchedulerConfig};
pub use errors::*;
pub use traits::{Instrumenter, TestType};
