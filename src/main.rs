//! walkthrough - 教程校验引擎
//!
//! 入口：初始化日志、加载配置与教程、选择 Oracle 后端与执行器，运行并把 JSON 报告打印到 stdout。
//!
//! 用法：`walkthrough <tutorial.json|tutorial.toml> [--config <path>] [--simulate]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use walkthrough::config::{load_config, AppConfig, ExecutorMode};
use walkthrough::core::{RunSettings, ShutdownManager, TutorialRunner};
use walkthrough::execution::{CommandRunner, ShellRunner, SimulatedRunner};
use walkthrough::llm::{create_deepseek_client, OpenAiClient};
use walkthrough::oracle::{LlmOracle, Oracle, Pricing, StubOracle};
use walkthrough::tutorial::load_tutorial;

struct Args {
    tutorial: PathBuf,
    config: Option<PathBuf>,
    simulate: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut tutorial = None;
    let mut config = None;
    let mut simulate = false;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config = Some(PathBuf::from(args.next().context("--config requires a path")?));
            }
            "--simulate" => simulate = true,
            _ if tutorial.is_none() => tutorial = Some(PathBuf::from(arg)),
            other => bail!("unexpected argument '{}'", other),
        }
    }
    let tutorial = tutorial.context(
        "usage: walkthrough <tutorial.json|tutorial.toml> [--config <path>] [--simulate]",
    )?;
    Ok(Args {
        tutorial,
        config,
        simulate,
    })
}

/// 根据配置与环境变量选择 Oracle 后端（DeepSeek / OpenAI 兼容 / Stub）
fn create_oracle(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Oracle>> {
    let pricing = Pricing::from(&cfg.oracle.pricing);
    let timeout = Duration::from_secs(cfg.oracle.timeout_secs);
    match cfg.oracle.provider.to_lowercase().as_str() {
        "stub" => {
            tracing::warn!("Using stub oracle: every instruction is treated as non-actionable");
            Ok(Arc::new(StubOracle::new()))
        }
        "deepseek" => {
            let key = std::env::var("DEEPSEEK_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .context("DEEPSEEK_API_KEY is not set")?;
            let client = create_deepseek_client(
                cfg.oracle.model.as_deref(),
                cfg.oracle.base_url.as_deref(),
                &key,
            );
            tracing::info!("Using DeepSeek oracle");
            Ok(Arc::new(
                LlmOracle::new(Arc::new(client), pricing).with_timeout_hint(timeout),
            ))
        }
        "openai" => {
            let key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;
            let model = cfg
                .oracle
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string());
            tracing::info!("Using OpenAI oracle ({})", model);
            let client = OpenAiClient::new(cfg.oracle.base_url.as_deref(), &model, Some(&key));
            Ok(Arc::new(
                LlmOracle::new(Arc::new(client), pricing).with_timeout_hint(timeout),
            ))
        }
        other => bail!("unknown oracle provider '{}'", other),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    walkthrough::observability::init();

    let args = parse_args()?;
    let mut cfg = load_config(args.config).context("Failed to load config")?;
    if args.simulate {
        cfg.executor.mode = ExecutorMode::Simulate;
    }

    let tutorial = load_tutorial(&args.tutorial)
        .with_context(|| format!("Failed to load tutorial {}", args.tutorial.display()))?;

    let oracle = create_oracle(&cfg)?;
    let runner: Arc<dyn CommandRunner> = match cfg.executor.mode {
        ExecutorMode::Shell => Arc::new(ShellRunner::new()),
        ExecutorMode::Simulate => Arc::new(SimulatedRunner::new()),
    };

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    if let Some(secs) = cfg.engine.deadline_secs {
        shutdown.cancel_after(Duration::from_secs(secs));
    }

    let engine = TutorialRunner::new(oracle, runner, RunSettings::from_config(&cfg));
    let report = engine.run(&tutorial, shutdown.token()).await;
    if let Some(reason) = shutdown.reason() {
        tracing::warn!(?reason, "run was cancelled");
    }

    println!("{}", report.to_json().context("Failed to serialize report")?);
    if !report.outcome.is_passed() {
        std::process::exit(1);
    }
    Ok(())
}
