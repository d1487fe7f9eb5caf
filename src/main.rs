use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use testfarm::app::{exit_code, with_port, Application};
use testfarm::shutdown::ShutdownManager;
use testfarm_core::AppConfig;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // 解析命令行参数
    let matches = Command::new("testfarm")
        .version("1.0.0")
        .about("分布式浏览器测试调度系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时依次尝试 config/testfarm.toml 与 testfarm.toml"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("覆盖配置中的监听端口")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("frozen")
                .long("frozen")
                .help("冻结模式：接受浏览器连接但不分配任务")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");

    // 加载配置，命令行参数优先
    let mut config = AppConfig::load(config_path.map(String::as_str)).with_context(|| {
        format!(
            "加载配置失败: {}",
            config_path.map(String::as_str).unwrap_or("<默认>")
        )
    })?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.server.bind_address = with_port(&config.server.bind_address, *port);
    }
    if matches.get_flag("frozen") {
        config.scheduler.frozen = true;
    }

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;

    info!("启动分布式浏览器测试调度系统");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let app = Application::new(config);
    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;
    let mut app_handle = tokio::spawn(async move { app.run(shutdown_rx).await });

    let result = tokio::select! {
        result = &mut app_handle => result,
        reason = shutdown_manager.listen_for_signals() => {
            info!("收到{}信号，开始优雅关闭...", reason);
            match tokio::time::timeout(Duration::from_secs(30), &mut app_handle).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("应用关闭超时，强制退出");
                    app_handle.abort();
                    return Ok(ExitCode::from(exit_code(None)));
                }
            }
        }
    };

    let outcome = match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            error!("应用运行失败: {e:#}");
            return Err(e);
        }
        Err(e) => {
            error!("应用任务异常: {e}");
            return Err(e.into());
        }
    };

    match outcome {
        Some(outcome) => info!("测试活动结束: {:?}", outcome),
        None => warn!("测试活动未完成"),
    }
    Ok(ExitCode::from(exit_code(outcome)))
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}
