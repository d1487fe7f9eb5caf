use crate::config::models::{AppConfig, CampaignConfig, SchedulerConfig};

#[test]
fn test_default_config_is_valid() {
    assert!(AppConfig::default().validate().is_ok());
}

#[test]
fn test_zero_timeout_rejected() {
    let config = SchedulerConfig {
        task_timeout_ms: 0,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_unknown_test_type_rejected() {
    let config = CampaignConfig {
        test_type: "jar".to_string(),
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_files_test_type_requires_root_dir() {
    let mut config = CampaignConfig {
        test_type: "files".to_string(),
        ..Default::default()
    };
    assert!(config.validate().is_err());

    config.root_dir = Some("tests".to_string());
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_log_format_rejected() {
    let mut config = AppConfig::default();
    config.observability.log_format = "xml".to_string();
    assert!(config.validate().is_err());
}
