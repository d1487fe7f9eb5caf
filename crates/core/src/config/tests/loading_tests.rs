use crate::config::models::AppConfig;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[server]
bind_address = "127.0.0.1:9000"

[scheduler]
task_timeout_ms = 500
max_task_restarts = 1
task_restart_on_failure = true

[campaign]
test_type = "static"

[[campaign.tests]]
name = "first"
url = "/first.html"

[[campaign.tests]]
name = "second"
url = "/second.html"

[[campaign.browsers]]
browser_name = "Firefox"
major_version = 39
"#
    )
    .unwrap();

    let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();

    assert_eq!(config.server.bind_address, "127.0.0.1:9000");
    assert_eq!(config.scheduler.task_timeout_ms, 500);
    assert_eq!(config.scheduler.max_task_restarts, 1);
    assert!(config.scheduler.task_restart_on_failure);
    assert!(!config.scheduler.frozen);
    assert_eq!(config.campaign.tests.len(), 2);
    assert_eq!(config.campaign.browsers.len(), 1);
    assert_eq!(config.campaign.browsers[0].major_version, Some(39));
    // 未配置的部分使用默认值
    assert_eq!(config.observability.log_level, "info");
}

#[test]
fn test_load_missing_file_fails() {
    let result = AppConfig::load(Some("/nonexistent/testfarm.toml"));
    assert!(result.is_err());
}

#[test]
fn test_toml_roundtrip_keeps_tunables() {
    let mut config = AppConfig::default();
    config.scheduler.frozen = true;
    config.scheduler.predictable_urls = true;

    let text = config.to_toml().unwrap();
    let parsed = AppConfig::from_toml(&text).unwrap();

    assert!(parsed.scheduler.frozen);
    assert!(parsed.scheduler.predictable_urls);
    assert_eq!(parsed.scheduler.task_timeout_ms, 300_000);
}
