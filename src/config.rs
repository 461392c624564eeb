//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WALKTHROUGH__*` 覆盖（双下划线表示嵌套，如 `WALKTHROUGH__ENGINE__MAX_STEPS=50`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::oracle::{GatewaySettings, Pricing, RetryPolicy};

/// 应用配置根
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub oracle: OracleSection,
    pub executor: ExecutorSection,
}

/// 规划方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PlanningMode {
    /// 全部规划完成后再执行；规划时只看到静态元数据
    #[default]
    PhaseSeparated,
    /// 每节执行前才规划，使用实时上下文
    Interleaved,
}

/// 章节最终失败后的运行策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    #[default]
    Abort,
    /// 继续执行后续 independent 章节，跳过依赖章节
    Continue,
}

/// [engine] 段：核心引擎消费的全部策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// 整个教程的指令数上限
    pub max_steps: usize,
    /// 置信度低于阈值时直接失败
    pub strict_validation: bool,
    pub allow_error_recovery: bool,
    pub context_compression: bool,
    /// 压缩后保留的最近命令条数
    pub context_horizon: usize,
    pub validation_threshold: f64,
    /// 单次运行 Oracle 费用上限（美元）
    pub cost_ceiling: Option<f64>,
    /// 每个失败动作的恢复尝试次数
    pub max_recovery_attempts: u32,
    pub failure_policy: FailurePolicy,
    pub planning_mode: PlanningMode,
    /// 整次运行的时限（秒），到期取消
    pub deadline_secs: Option<u64>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_steps: 100,
            strict_validation: false,
            allow_error_recovery: true,
            context_compression: true,
            context_horizon: 20,
            validation_threshold: 0.7,
            cost_ceiling: None,
            max_recovery_attempts: 3,
            failure_policy: FailurePolicy::Abort,
            planning_mode: PlanningMode::PhaseSeparated,
            deadline_secs: None,
        }
    }
}

impl EngineSection {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.validation_threshold) {
            return Err(format!(
                "validation_threshold must be within [0,1], got {}",
                self.validation_threshold
            ));
        }
        if self.max_steps == 0 {
            return Err("max_steps must be positive".to_string());
        }
        if let Some(ceiling) = self.cost_ceiling {
            if ceiling.is_nan() || ceiling < 0.0 {
                return Err(format!("cost_ceiling must be non-negative, got {}", ceiling));
            }
        }
        Ok(())
    }
}

/// [oracle] 段：后端选择、超时与重试、计价
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleSection {
    /// 后端：openai / deepseek / stub
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 尚无历史调用时的单次费用预估（美元）
    pub estimated_call_cost: f64,
    pub pricing: PricingSection,
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: None,
            base_url: None,
            timeout_secs: 60,
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
            estimated_call_cost: 0.01,
            pricing: PricingSection::default(),
        }
    }
}

/// [oracle.pricing] 段：每 1k token 美元价格
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricingSection {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl Default for PricingSection {
    fn default() -> Self {
        Self {
            prompt_per_1k: 0.00027,
            completion_per_1k: 0.0011,
        }
    }
}

impl From<&PricingSection> for Pricing {
    fn from(p: &PricingSection) -> Self {
        Pricing {
            prompt_per_1k: p.prompt_per_1k,
            completion_per_1k: p.completion_per_1k,
        }
    }
}

/// 动作执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorMode {
    #[default]
    Shell,
    /// 只记录命令，不产生副作用
    Simulate,
}

/// [executor] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    pub mode: ExecutorMode,
    /// 单条命令超时（秒）
    pub timeout_secs: u64,
    /// 初始工作目录，未设置时用当前目录
    pub working_dir: Option<PathBuf>,
    /// 报告中保留的输出字符数
    pub max_output_chars: usize,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            mode: ExecutorMode::Shell,
            timeout_secs: 120,
            working_dir: None,
            max_output_chars: 4000,
        }
    }
}

impl AppConfig {
    /// 由 engine + oracle 段组装网关设置
    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            timeout: Duration::from_secs(self.oracle.timeout_secs),
            retry: RetryPolicy {
                max_retries: self.oracle.max_retries,
                initial_backoff: Duration::from_millis(self.oracle.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.oracle.max_backoff_ms),
            },
            cost_ceiling: self.engine.cost_ceiling,
            estimated_call_cost: self.oracle.estimated_call_cost,
        }
    }
}

/// 从 config 目录加载配置，环境变量 WALKTHROUGH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WALKTHROUGH__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WALKTHROUGH")
            .separator("__")
            .try_parsing(true),
    );

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.engine.validate().map_err(config::ConfigError::Message)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.max_steps, 100);
        assert_eq!(cfg.engine.validation_threshold, 0.7);
        assert!(cfg.engine.allow_error_recovery);
        assert_eq!(cfg.engine.planning_mode, PlanningMode::PhaseSeparated);
        assert_eq!(cfg.executor.mode, ExecutorMode::Shell);
        assert!(cfg.engine.validate().is_ok());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let engine = EngineSection {
            validation_threshold: 1.5,
            ..EngineSection::default()
        };
        assert!(engine.validate().is_err());
    }

    #[test]
    fn test_load_from_file_with_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("walkthrough.toml");
        std::fs::write(
            &path,
            r#"
[engine]
max_steps = 5
strict_validation = true
planning_mode = "interleaved"
failure_policy = "continue"
cost_ceiling = 0.5

[oracle]
provider = "stub"
max_retries = 1

[executor]
mode = "simulate"
"#,
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.engine.max_steps, 5);
        assert!(cfg.engine.strict_validation);
        assert_eq!(cfg.engine.validation_threshold, 0.7);
        assert_eq!(cfg.engine.planning_mode, PlanningMode::Interleaved);
        assert_eq!(cfg.engine.failure_policy, FailurePolicy::Continue);
        assert_eq!(cfg.oracle.provider, "stub");
        assert_eq!(cfg.oracle.timeout_secs, 60);
        assert_eq!(cfg.executor.mode, ExecutorMode::Simulate);

        let gw = cfg.gateway_settings();
        assert_eq!(gw.retry.max_retries, 1);
        assert_eq!(gw.cost_ceiling, Some(0.5));
    }
}
