//! 规则引擎命令行入口

use anyhow::{Context, Result};
use clap::Parser;
use rule_engine::cli::{Cli, CommandRunner};
use rule_engine::{EngineConfig, RuleEngine};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    init_tracing(&config);
    debug!(?config, "配置已加载");

    let runner = CommandRunner::new(RuleEngine::with_config(config));
    let output = runner.run(cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

/// 初始化日志：优先使用环境变量 RUST_LOG，否则使用配置的级别；日志写到 stderr
fn init_tracing(config: &EngineConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    if config.json_logs() {
        builder.json().init();
    } else {
        builder.init();
    }
}
