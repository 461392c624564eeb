//! 运行报告：每步的解析结果、校验结果、最终上下文与用量
//!
//! 报告总是反映实际到达的最终状态；终止性失败附带分类（FailureKind）。

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::PlanningMode;
use crate::context::TutorialContext;
use crate::core::{ActionState, EngineError, FailureKind};
use crate::execution::{CommandOutput, ValidationResult};
use crate::oracle::{ErrorInterpretation, UsageStats};
use crate::plan::{ActionKind, ParsedInstruction};
use crate::tutorial::RawInstruction;

/// 终止性失败
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&EngineError> for FailureRecord {
    fn from(err: &EngineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// 截断后的命令输出
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRecord {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl OutputRecord {
    pub fn from_output(output: &CommandOutput, max_chars: usize) -> Self {
        Self {
            exit_code: output.exit_code,
            stdout: truncate(&output.stdout, max_chars),
            stderr: truncate(&output.stderr, max_chars),
            duration_ms: output.duration_ms,
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 一次恢复尝试
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryAttempt {
    pub solution: String,
    pub probability: f64,
    pub commands: Vec<String>,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub validations: Vec<ValidationResult>,
}

/// 某个动作的恢复过程
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct RecoveryRecord {
    pub interpretations: Vec<ErrorInterpretation>,
    pub attempts: Vec<RecoveryAttempt>,
    pub recovered: bool,
}

impl RecoveryRecord {
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

/// 单个动作的执行记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRecord {
    pub index: usize,
    pub description: String,
    pub command: String,
    pub kind: ActionKind,
    pub state: ActionState,
    /// 状态迁移轨迹
    pub history: Vec<ActionState>,
    pub simulated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputRecord>,
    pub validations: Vec<ValidationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstructionReport {
    pub raw: RawInstruction,
    pub parsed: ParsedInstruction,
    pub below_threshold: bool,
    pub actions: Vec<ActionRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Passed,
    Failed,
    /// 依赖的前序章节失败
    Skipped,
    /// 运行在此之前终止
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub section_number: u32,
    pub title: String,
    pub status: StepStatus,
    pub instructions: Vec<InstructionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
}

impl StepReport {
    pub fn empty(section_number: u32, title: impl Into<String>, status: StepStatus) -> Self {
        Self {
            section_number,
            title: title.into(),
            status,
            instructions: Vec::new(),
            failure: None,
        }
    }

    pub fn action_records(&self) -> impl Iterator<Item = &ActionRecord> {
        self.instructions.iter().flat_map(|i| i.actions.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum RunOutcome {
    Passed,
    Failed { kind: FailureKind, message: String },
    Cancelled,
}

impl RunOutcome {
    pub fn from_error(err: &EngineError) -> Self {
        match err {
            EngineError::Cancelled => RunOutcome::Cancelled,
            other => RunOutcome::Failed {
                kind: other.kind(),
                message: other.to_string(),
            },
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, RunOutcome::Passed)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            RunOutcome::Failed { kind, .. } => Some(*kind),
            RunOutcome::Cancelled => Some(FailureKind::Cancelled),
            RunOutcome::Passed => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub tutorial: String,
    pub oracle: String,
    pub planning_mode: PlanningMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub steps: Vec<StepReport>,
    pub context: TutorialContext,
    pub usage: UsageStats,
    /// 成功执行的命令数（含恢复时成功的修复命令）
    pub executed_actions: usize,
}

impl RunReport {
    pub fn recovery_attempts(&self) -> usize {
        self.steps
            .iter()
            .flat_map(StepReport::action_records)
            .filter_map(|a| a.recovery.as_ref())
            .map(RecoveryRecord::attempt_count)
            .sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("你好世界", 2), "你好...");
        assert_eq!(truncate("abc", 5), "abc");
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = RunOutcome::from_error(&EngineError::TooManySteps { count: 5, max: 2 });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "too-many-steps");
        assert_eq!(
            RunOutcome::from_error(&EngineError::Cancelled),
            RunOutcome::Cancelled
        );
    }
}
