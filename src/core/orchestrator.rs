//! 运行编排器：一次教程运行的主控流程
//!
//! 负责：建立运行级 OracleGateway 与 TutorialContext，按规划模式生成计划，逐节执行，
//! 按失败策略决定中止还是继续，最后组装 RunReport。多个运行可并发，共享同一个 Oracle。

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{AppConfig, EngineSection, FailurePolicy, PlanningMode};
use crate::context::{ContextEvent, TutorialContext};
use crate::core::EngineError;
use crate::execution::{CommandRunner, ExecutionEngine, ExecutionSettings};
use crate::oracle::{GatewaySettings, Oracle, OracleGateway};
use crate::plan::{InstructionInterpreter, PlanBuilder, PlanStep};
use crate::report::{FailureRecord, RunOutcome, RunReport, StepReport, StepStatus};
use crate::tutorial::{Section, Tutorial};

/// 单次运行所需的全部设置
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub engine: EngineSection,
    pub gateway: GatewaySettings,
    pub execution: ExecutionSettings,
    /// 运行开始时的工作目录
    pub working_dir: PathBuf,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl RunSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let working_dir = cfg
            .executor
            .working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            engine: cfg.engine.clone(),
            gateway: cfg.gateway_settings(),
            execution: ExecutionSettings::from_config(cfg),
            working_dir,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }
}

/// 教程运行器：持有共享 Oracle 与命令执行器，每次 run 拥有独立上下文
pub struct TutorialRunner {
    oracle: Arc<dyn Oracle>,
    engine: ExecutionEngine,
    settings: RunSettings,
}

impl TutorialRunner {
    pub fn new(oracle: Arc<dyn Oracle>, runner: Arc<dyn CommandRunner>, settings: RunSettings) -> Self {
        Self {
            oracle,
            engine: ExecutionEngine::new(runner, settings.execution.clone()),
            settings,
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// 运行一份教程；总是返回报告，失败体现在 outcome 与各步状态中
    pub async fn run(&self, tutorial: &Tutorial, cancel: CancellationToken) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let engine_cfg = &self.settings.engine;
        let gateway = OracleGateway::new(self.oracle.clone(), self.settings.gateway.clone(), cancel)
            .with_context_horizon(
                engine_cfg
                    .context_compression
                    .then_some(engine_cfg.context_horizon),
            );

        let sections = tutorial.ordered_sections();
        let mut ctx = TutorialContext::new(self.settings.working_dir.clone(), sections.len());
        let mut steps: Vec<StepReport> = sections
            .iter()
            .map(|s| StepReport::empty(s.number, s.title.clone(), StepStatus::NotRun))
            .collect();

        tracing::info!(
            %run_id,
            tutorial = %tutorial.title,
            sections = sections.len(),
            mode = ?self.settings.engine.planning_mode,
            simulated = self.engine.is_simulated(),
            "run started"
        );

        let result = self
            .drive(tutorial, &sections, &gateway, &mut ctx, &mut steps)
            .await;
        let outcome = match &result {
            Ok(()) => RunOutcome::Passed,
            Err(err) => RunOutcome::from_error(err),
        };
        let usage = gateway.run_usage();

        match &result {
            Ok(()) => tracing::info!(
                %run_id,
                steps = ctx.current_step,
                commands = ctx.executed_commands.len(),
                cost_usd = usage.cost_usd,
                "run passed"
            ),
            Err(err) => tracing::warn!(
                %run_id,
                kind = ?err.kind(),
                error = %err,
                step = ctx.current_step,
                "run failed"
            ),
        }

        RunReport {
            run_id,
            tutorial: tutorial.title.clone(),
            oracle: gateway.capabilities().name,
            planning_mode: self.settings.engine.planning_mode,
            started_at,
            finished_at: Utc::now(),
            outcome,
            steps,
            executed_actions: ctx.executed_commands.len(),
            context: ctx,
            usage,
        }
    }

    /// 并发运行多份教程（共享 Oracle，各自独立上下文；取消 token 派生自同一父 token）
    pub async fn run_all(&self, tutorials: &[Tutorial], cancel: CancellationToken) -> Vec<RunReport> {
        let runs = tutorials
            .iter()
            .map(|tutorial| self.run(tutorial, cancel.child_token()));
        join_all(runs).await
    }

    async fn drive(
        &self,
        tutorial: &Tutorial,
        sections: &[&Section],
        gateway: &OracleGateway,
        ctx: &mut TutorialContext,
        steps: &mut [StepReport],
    ) -> Result<(), EngineError> {
        let engine_cfg = &self.settings.engine;
        engine_cfg.validate().map_err(EngineError::ConfigError)?;
        tutorial
            .validate()
            .map_err(|e| EngineError::ConfigError(format!("invalid tutorial: {}", e)))?;

        let builder = PlanBuilder::new(
            InstructionInterpreter::new(gateway, engine_cfg),
            engine_cfg.max_steps,
        );

        // 分阶段：执行前生成整份计划；交错：只预检上限，逐节规划
        let plan = match engine_cfg.planning_mode {
            PlanningMode::PhaseSeparated => {
                let base = ctx.snapshot().with_tutorial(tutorial.title.clone());
                Some(builder.build_plan(tutorial, &base).await?)
            }
            PlanningMode::Interleaved => {
                builder.check_limits(tutorial)?;
                None
            }
        };

        let policy = engine_cfg.failure_policy;
        let mut first_failure: Option<EngineError> = None;

        for (i, section) in sections.iter().enumerate() {
            if gateway.cancel_token().is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            if first_failure.is_some() && !section.independent {
                tracing::info!(section = section.number, "skipping dependent section");
                steps[i].status = StepStatus::Skipped;
                ctx.record(ContextEvent::StepAdvanced { to: i + 1 })?;
                continue;
            }

            let planned;
            let step: &PlanStep = match &plan {
                Some(plan) => &plan.steps[i],
                None => {
                    let snapshot = ctx.snapshot().with_tutorial(tutorial.title.clone());
                    match builder.plan_section(section, &snapshot).await {
                        Ok(step) => {
                            planned = step;
                            &planned
                        }
                        Err(err) => {
                            steps[i].status = StepStatus::Failed;
                            steps[i].failure = Some(FailureRecord::from(&err));
                            return Err(err);
                        }
                    }
                }
            };

            let downstream_dependent = sections
                .get(i + 1)
                .map_or(false, |next| policy == FailurePolicy::Abort || !next.independent);
            let execution = self
                .engine
                .execute_step(step, ctx, gateway, downstream_dependent)
                .await;
            steps[i] = execution.report;

            match execution.failure {
                None => {}
                Some(err) if err.is_step_scoped() && policy == FailurePolicy::Continue => {
                    tracing::warn!(section = section.number, "section failed, continuing with independent sections");
                    first_failure.get_or_insert(err);
                }
                Some(err) => return Err(err),
            }
            ctx.record(ContextEvent::StepAdvanced { to: i + 1 })?;
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::SimulatedRunner;
    use crate::oracle::{ActionSpec, OracleError, ParsedResult, StubOracle};
    use crate::tutorial::RawInstruction;

    fn settings() -> RunSettings {
        RunSettings::default().with_working_dir("/work")
    }

    fn echo(text: &str) -> ParsedResult {
        ParsedResult::new(text, 0.9).action(ActionSpec::new(format!("echo {}", text)))
    }

    #[tokio::test]
    async fn test_failed_planning_leaves_steps_not_run() {
        let stub = Arc::new(
            StubOracle::new().with_parse("two", ParsedResult::new("two", 0.9).action(ActionSpec::new(" "))),
        );
        let runner = TutorialRunner::new(stub, Arc::new(SimulatedRunner::new()), settings());
        let tutorial = Tutorial::new("t")
            .section(Section::new(1, "a").instruction(RawInstruction::new("one")))
            .section(Section::new(2, "b").instruction(RawInstruction::new("two")));

        let report = runner.run(&tutorial, CancellationToken::new()).await;
        assert_eq!(
            report.outcome.failure_kind(),
            Some(crate::core::FailureKind::InterpretationFailed)
        );
        assert!(report.steps.iter().all(|s| s.status == StepStatus::NotRun));
        assert_eq!(report.context.current_step, 0);
        assert_eq!(report.executed_actions, 0);
    }

    #[tokio::test]
    async fn test_duplicate_section_numbers_rejected() {
        let stub = Arc::new(StubOracle::new());
        let runner = TutorialRunner::new(stub.clone(), Arc::new(SimulatedRunner::new()), settings());
        let tutorial = Tutorial::new("t")
            .section(Section::new(1, "a"))
            .section(Section::new(1, "b"));
        let report = runner.run(&tutorial, CancellationToken::new()).await;
        assert!(!report.outcome.is_passed());
        assert_eq!(stub.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_engine_settings_rejected_before_oracle_calls() {
        let stub = Arc::new(StubOracle::new().with_parse("one", echo("one")));
        let tutorial = Tutorial::new("t")
            .section(Section::new(1, "a").instruction(RawInstruction::new("one")));

        let mut zero_steps = settings();
        zero_steps.engine.max_steps = 0;
        let mut nan_threshold = settings();
        nan_threshold.engine.validation_threshold = f64::NAN;

        for s in [zero_steps, nan_threshold] {
            let runner = TutorialRunner::new(stub.clone(), Arc::new(SimulatedRunner::new()), s);
            let report = runner.run(&tutorial, CancellationToken::new()).await;
            assert_eq!(
                report.outcome.failure_kind(),
                Some(crate::core::FailureKind::Config)
            );
            assert_eq!(report.steps[0].status, StepStatus::NotRun);
        }
        assert_eq!(stub.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_oracle_failure_is_fatal_even_when_continuing() {
        let stub = Arc::new(
            StubOracle::new()
                .with_parse("one", echo("one"))
                .with_parse_error("two", OracleError::MalformedResponse("garbage".into())),
        );
        let mut s = settings();
        s.engine.planning_mode = PlanningMode::Interleaved;
        s.engine.failure_policy = FailurePolicy::Continue;
        let runner = TutorialRunner::new(stub, Arc::new(SimulatedRunner::new()), s);
        let tutorial = Tutorial::new("t")
            .section(Section::new(1, "a").instruction(RawInstruction::new("one")))
            .section(Section::new(2, "b").independent().instruction(RawInstruction::new("two")));

        let report = runner.run(&tutorial, CancellationToken::new()).await;
        assert_eq!(
            report.outcome.failure_kind(),
            Some(crate::core::FailureKind::MalformedResponse)
        );
        assert_eq!(report.steps[0].status, StepStatus::Passed);
        assert_eq!(report.steps[1].status, StepStatus::Failed);
        assert_eq!(report.context.current_step, 1);
    }
}
