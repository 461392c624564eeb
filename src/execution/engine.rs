//! 执行与校验引擎
//!
//! 逐个执行计划中的动作：运行命令 -> 校验（动作规则 + 指令的可机检预期结果）-> 更新上下文。
//! 失败时按配置进入恢复循环；每次命令执行输出一条 JSON 审计日志。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::context::{ContextEvent, TutorialContext};
use crate::core::{ActionLifecycle, ActionState, EngineError, RecoveryEngine};
use crate::execution::{context_effects, CommandOutput, CommandRequest, CommandRunner};
use crate::execution::{ValidationResult, Validator};
use crate::oracle::{OracleGateway, Solution};
use crate::plan::{Action, PlanStep, PlannedInstruction, Validation, ValidationType};
use crate::report::{
    ActionRecord, FailureRecord, InstructionReport, OutputRecord, RecoveryAttempt, StepReport,
    StepStatus,
};

/// 执行期设置
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub command_timeout: Duration,
    pub max_output_chars: usize,
    pub allow_error_recovery: bool,
    pub max_recovery_attempts: u32,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(120),
            max_output_chars: 4000,
            allow_error_recovery: true,
            max_recovery_attempts: 3,
        }
    }
}

impl ExecutionSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            command_timeout: Duration::from_secs(cfg.executor.timeout_secs),
            max_output_chars: cfg.executor.max_output_chars,
            allow_error_recovery: cfg.engine.allow_error_recovery,
            max_recovery_attempts: cfg.engine.max_recovery_attempts,
        }
    }
}

/// 一条校验规则及其来源
#[derive(Debug, Clone, Copy)]
struct Rule<'a> {
    source: &'a str,
    validation: &'a Validation,
}

/// 单次命令执行 + 校验的结果
struct Attempt {
    output: Option<CommandOutput>,
    validations: Vec<ValidationResult>,
    failure: Option<EngineError>,
}

/// 一个章节的执行结果；failure 为 None 表示全部动作通过
#[derive(Debug)]
pub struct StepExecution {
    pub report: StepReport,
    pub failure: Option<EngineError>,
}

pub struct ExecutionEngine {
    runner: Arc<dyn CommandRunner>,
    validator: Validator,
    recovery: RecoveryEngine,
    settings: ExecutionSettings,
}

impl ExecutionEngine {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: ExecutionSettings) -> Self {
        Self {
            runner,
            validator: Validator::new(),
            recovery: RecoveryEngine::new(settings.max_recovery_attempts),
            settings,
        }
    }

    pub fn is_simulated(&self) -> bool {
        self.runner.is_simulated()
    }

    /// 执行一个章节。`downstream_dependent` 表示后续章节依赖本节结果，
    /// 决定失败动作的终态是 Aborted 还是 Mismatched。
    pub async fn execute_step(
        &self,
        step: &PlanStep,
        ctx: &mut TutorialContext,
        gateway: &OracleGateway,
        downstream_dependent: bool,
    ) -> StepExecution {
        let mut report = StepReport::empty(step.section_number, step.title.clone(), StepStatus::Passed);

        for planned in &step.instructions {
            let (instruction, failure) = self
                .execute_instruction(planned, ctx, gateway, downstream_dependent)
                .await;
            report.instructions.push(instruction);
            if let Some(err) = failure {
                tracing::warn!(
                    section = step.section_number,
                    kind = ?err.kind(),
                    error = %err,
                    "step failed"
                );
                report.status = StepStatus::Failed;
                report.failure = Some(FailureRecord::from(&err));
                return StepExecution {
                    report,
                    failure: Some(err),
                };
            }
        }

        tracing::info!(section = step.section_number, "step validated");
        StepExecution {
            report,
            failure: None,
        }
    }

    async fn execute_instruction(
        &self,
        planned: &PlannedInstruction,
        ctx: &mut TutorialContext,
        gateway: &OracleGateway,
        downstream_dependent: bool,
    ) -> (InstructionReport, Option<EngineError>) {
        let mut report = InstructionReport {
            raw: planned.raw.clone(),
            parsed: planned.parsed.clone(),
            below_threshold: planned.below_threshold,
            actions: Vec::with_capacity(planned.parsed.actions.len()),
        };
        let outcomes: Vec<Rule<'_>> = planned
            .parsed
            .checked_outcomes()
            .map(|(o, v)| Rule {
                source: o.description.as_str(),
                validation: v,
            })
            .collect();

        let last = planned.parsed.actions.len().saturating_sub(1);
        for (index, action) in planned.parsed.actions.iter().enumerate() {
            let mut rules: Vec<Rule<'_>> = action
                .validation
                .as_ref()
                .map(|v| Rule {
                    source: "action",
                    validation: v,
                })
                .into_iter()
                .collect();
            // 预期结果针对指令的最后一个动作
            if index == last {
                rules.extend(outcomes.iter().copied());
            }

            let (record, failure) = self
                .execute_action(index, action, &rules, ctx, gateway, downstream_dependent)
                .await;
            report.actions.push(record);
            if failure.is_some() {
                return (report, failure);
            }
        }
        (report, None)
    }

    async fn execute_action(
        &self,
        index: usize,
        action: &Action,
        rules: &[Rule<'_>],
        ctx: &mut TutorialContext,
        gateway: &OracleGateway,
        downstream_dependent: bool,
    ) -> (ActionRecord, Option<EngineError>) {
        let mut lifecycle = ActionLifecycle::new();
        let mut record = ActionRecord {
            index,
            description: action.description.clone(),
            command: action.command.clone(),
            kind: action.kind,
            state: ActionState::Pending,
            history: Vec::new(),
            simulated: self.runner.is_simulated(),
            output: None,
            validations: Vec::new(),
            recovery: None,
            error: None,
        };

        if gateway.cancel_token().is_cancelled() {
            lifecycle.transition(ActionState::Aborted);
            return finish(record, lifecycle, Some(EngineError::Cancelled));
        }

        lifecycle.transition(ActionState::Executing);
        let attempt = self.run_command(&action.command, rules, ctx).await;
        self.absorb(&mut record, &attempt);

        let err = match attempt.failure {
            None => {
                let committed = commit(action, &action.command, ctx);
                let failure = committed.err();
                lifecycle.transition(if failure.is_some() {
                    ActionState::Aborted
                } else {
                    ActionState::Validated
                });
                return finish(record, lifecycle, failure);
            }
            Some(err) => err,
        };
        lifecycle.transition(failed_state(&err));

        let terminal = if downstream_dependent {
            ActionState::Aborted
        } else {
            ActionState::Mismatched
        };

        if !self.settings.allow_error_recovery {
            settle(&mut lifecycle, terminal);
            return finish(record, lifecycle, Some(err));
        }

        let failure_text = describe_failure(&action.command, &err, attempt.output.as_ref());
        let failure = self
            .recover(action, rules, ctx, gateway, &mut lifecycle, &mut record, err, failure_text)
            .await;
        match &failure {
            None => {}
            Some(EngineError::ExecutionError(_)) | Some(EngineError::Mismatched(_)) => {
                settle(&mut lifecycle, terminal)
            }
            // Oracle / 费用 / 取消
            Some(_) => lifecycle.transition(ActionState::Aborted),
        }
        finish(record, lifecycle, failure)
    }

    /// 恢复循环；返回 None 表示某个方案通过校验
    #[allow(clippy::too_many_arguments)]
    async fn recover(
        &self,
        action: &Action,
        rules: &[Rule<'_>],
        ctx: &mut TutorialContext,
        gateway: &OracleGateway,
        lifecycle: &mut ActionLifecycle,
        record: &mut ActionRecord,
        mut last_err: EngineError,
        mut failure_text: String,
    ) -> Option<EngineError> {
        let mut session = self.recovery.session();

        loop {
            lifecycle.transition(ActionState::Recovering);
            let solution = match session
                .next_solution(gateway, &failure_text, &ctx.snapshot())
                .await
            {
                Ok(Some(solution)) => solution,
                Ok(None) => break,
                Err(e) => {
                    record.recovery = Some(session.finish(false));
                    return Some(e);
                }
            };

            tracing::info!(
                command = %action.command,
                probability = solution.probability,
                commands = solution.commands.len(),
                "trying recovery solution"
            );
            lifecycle.transition(ActionState::Executing);
            let (attempt, failed_command) = self
                .run_solution(&solution, rules, ctx, gateway.cancel_token())
                .await;
            self.absorb(record, &attempt);

            let succeeded = attempt.failure.is_none();
            session.record_attempt(RecoveryAttempt {
                solution: solution.description.clone(),
                probability: solution.probability,
                commands: solution.commands.clone(),
                succeeded,
                error: attempt.failure.as_ref().map(|e| e.to_string()),
                validations: attempt.validations.clone(),
            });

            match attempt.failure {
                None => {
                    let effects = context_effects(action, ctx.working_dir());
                    let applied = apply(ctx, effects);
                    record.recovery = Some(session.finish(applied.is_ok()));
                    if let Err(e) = applied {
                        return Some(e);
                    }
                    lifecycle.transition(ActionState::Validated);
                    return None;
                }
                Some(err) if !err.is_step_scoped() => {
                    record.recovery = Some(session.finish(false));
                    return Some(err);
                }
                Some(err) => {
                    lifecycle.transition(failed_state(&err));
                    failure_text = describe_failure(&failed_command, &err, attempt.output.as_ref());
                    last_err = err;
                }
            }
        }

        tracing::warn!(command = %action.command, "recovery exhausted");
        record.recovery = Some(session.finish(false));
        Some(last_err)
    }

    /// 依次执行方案中的命令；只有最后一条按原动作规则校验，之前的只要求退出码 0
    async fn run_solution(
        &self,
        solution: &Solution,
        rules: &[Rule<'_>],
        ctx: &mut TutorialContext,
        cancel: &CancellationToken,
    ) -> (Attempt, String) {
        let mut attempt = Attempt {
            output: None,
            validations: Vec::new(),
            failure: Some(EngineError::ExecutionError(
                "solution has no commands".to_string(),
            )),
        };
        let mut current = String::new();
        let last = solution.commands.len().saturating_sub(1);
        for (i, command) in solution.commands.iter().enumerate() {
            current = command.clone();
            if cancel.is_cancelled() {
                attempt.failure = Some(EngineError::Cancelled);
                break;
            }
            let step_rules: &[Rule<'_>] = if i == last { rules } else { &[] };
            attempt = self.run_command(command, step_rules, ctx).await;
            if attempt.failure.is_some() {
                break;
            }
            // 修复命令成功即计入上下文；原动作的效果由 recover 在整体通过后补上
            if let Err(e) = ctx.record(ContextEvent::CommandExecuted(command.clone())) {
                attempt.failure = Some(e.into());
                break;
            }
        }
        (attempt, current)
    }

    async fn run_command(&self, command: &str, rules: &[Rule<'_>], ctx: &TutorialContext) -> Attempt {
        let request = CommandRequest {
            command,
            working_dir: ctx.working_dir(),
            env: &ctx.environment,
            timeout: self.settings.command_timeout,
        };
        let attempt = match self.runner.run(request).await {
            Err(e) => Attempt {
                output: None,
                validations: Vec::new(),
                failure: Some(EngineError::ExecutionError(format!("`{}`: {}", command, e))),
            },
            Ok(output) => {
                let validations: Vec<ValidationResult> = rules
                    .iter()
                    .map(|r| {
                        self.validator
                            .check(r.validation, r.source, &output, ctx.working_dir())
                    })
                    .collect();
                let checks_exit = rules
                    .iter()
                    .any(|r| r.validation.kind == ValidationType::ExitStatus);
                let failure = if !checks_exit && !output.success() {
                    Some(EngineError::ExecutionError(format!(
                        "`{}` exited with {}: {}",
                        command,
                        exit_label(output.exit_code),
                        output.stderr.trim()
                    )))
                } else {
                    let mismatches: Vec<&str> = validations
                        .iter()
                        .filter(|v| !v.is_matched())
                        .map(|v| v.explanation.as_str())
                        .collect();
                    (!mismatches.is_empty()).then(|| {
                        EngineError::Mismatched(format!("`{}`: {}", command, mismatches.join("; ")))
                    })
                };
                Attempt {
                    output: Some(output),
                    validations,
                    failure,
                }
            }
        };

        let outcome = match &attempt.failure {
            None => "validated",
            Some(EngineError::Mismatched(_)) => "mismatched",
            Some(_) => "execution-error",
        };
        let audit = serde_json::json!({
            "event": "action_audit",
            "command": preview(command),
            "ok": attempt.failure.is_none(),
            "outcome": outcome,
            "exit_code": attempt.output.as_ref().and_then(|o| o.exit_code),
            "duration_ms": attempt.output.as_ref().map(|o| o.duration_ms).unwrap_or(0),
            "simulated": self.runner.is_simulated(),
        });
        tracing::info!(audit = %audit.to_string(), "action");
        attempt
    }

    fn absorb(&self, record: &mut ActionRecord, attempt: &Attempt) {
        if let Some(output) = &attempt.output {
            record.output = Some(OutputRecord::from_output(output, self.settings.max_output_chars));
        }
        record.validations = attempt.validations.clone();
    }
}

/// 校验通过后写入上下文：命令本身 + 动作类型对应的效果
fn commit(action: &Action, command: &str, ctx: &mut TutorialContext) -> Result<(), EngineError> {
    let effects = context_effects(action, ctx.working_dir());
    ctx.record(ContextEvent::CommandExecuted(command.to_string()))?;
    apply(ctx, effects)
}

fn apply(ctx: &mut TutorialContext, events: Vec<ContextEvent>) -> Result<(), EngineError> {
    for event in events {
        ctx.record(event)?;
    }
    Ok(())
}

fn failed_state(err: &EngineError) -> ActionState {
    match err {
        EngineError::Mismatched(_) => ActionState::Mismatched,
        _ => ActionState::ExecutionError,
    }
}

fn settle(lifecycle: &mut ActionLifecycle, terminal: ActionState) {
    if lifecycle.state() != terminal {
        lifecycle.transition(terminal);
    }
}

fn finish(
    mut record: ActionRecord,
    lifecycle: ActionLifecycle,
    failure: Option<EngineError>,
) -> (ActionRecord, Option<EngineError>) {
    record.state = lifecycle.state();
    record.history = lifecycle.history().to_vec();
    record.error = failure.as_ref().map(|e| e.to_string());
    (record, failure)
}

fn exit_label(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

/// 交给 Oracle 诊断的失败描述
fn describe_failure(command: &str, err: &EngineError, output: Option<&CommandOutput>) -> String {
    let mut text = format!("Command: {}\nError: {}", command, err);
    if let Some(output) = output {
        text.push_str(&format!("\nExit status: {}", exit_label(output.exit_code)));
        if !output.stderr.trim().is_empty() {
            text.push_str(&format!("\nstderr: {}", preview(&output.stderr)));
        }
        if !output.stdout.trim().is_empty() {
            text.push_str(&format!("\nstdout: {}", preview(&output.stdout)));
        }
    }
    text
}

fn preview(s: &str) -> String {
    let s = s.trim();
    if s.chars().count() > 500 {
        format!("{}...", s.chars().take(500).collect::<String>())
    } else {
        s.to_string()
    }
}
