pub mod api_observability;
pub mod app_config;
pub mod campaign;
pub mod scheduler;

pub use api_observability::{ObservabilityConfig, ServerConfig};
pub use app_config::AppConfig;
pub use campaign::{CampaignConfig, CoverageConfig};
pub use scheduler::SchedulerConfig;
