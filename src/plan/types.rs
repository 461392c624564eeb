//! 计划数据结构：ParsedInstruction / Action / Validation / ExecutionPlan
//!
//! 规划阶段创建后不可变；执行结果记录在 report 中，而不是回写到 Action 上。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::tutorial::RawInstruction;

/// 动作分类标签；决定执行成功后对上下文的副作用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Command,
    CreateFile,
    CreateDirectory,
    SetEnv,
    ChangeDirectory,
    Check,
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "" | "command" | "run" | "shell" => Ok(ActionKind::Command),
            "create-file" | "file" | "write-file" => Ok(ActionKind::CreateFile),
            "create-directory" | "directory" | "mkdir" => Ok(ActionKind::CreateDirectory),
            "set-env" | "env" | "export" => Ok(ActionKind::SetEnv),
            "change-directory" | "cd" => Ok(ActionKind::ChangeDirectory),
            "check" | "verify" | "inspect" => Ok(ActionKind::Check),
            other => Err(format!("unknown action kind '{}'", other)),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Command => "command",
            ActionKind::CreateFile => "create-file",
            ActionKind::CreateDirectory => "create-directory",
            ActionKind::SetEnv => "set-env",
            ActionKind::ChangeDirectory => "change-directory",
            ActionKind::Check => "check",
        };
        write!(f, "{}", s)
    }
}

/// 校验类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationType {
    /// 退出码等于期望值（默认 0）
    ExitStatus,
    /// stdout 去首尾空白后与期望值完全相同
    Exact,
    /// stdout 匹配正则
    Pattern,
    /// stdout 或 stderr 包含期望子串
    Contains,
    /// 期望路径（相对工作目录）存在
    FileExists,
}

impl FromStr for ValidationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "exit-status" | "exit-code" | "status" => Ok(ValidationType::ExitStatus),
            "exact" | "exact-match" | "equals" => Ok(ValidationType::Exact),
            "pattern" | "regex" | "pattern-match" => Ok(ValidationType::Pattern),
            "contains" | "substring" => Ok(ValidationType::Contains),
            "file-exists" | "path-exists" | "exists" => Ok(ValidationType::FileExists),
            other => Err(format!("unknown validation type '{}'", other)),
        }
    }
}

impl fmt::Display for ValidationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationType::ExitStatus => "exit-status",
            ValidationType::Exact => "exact",
            ValidationType::Pattern => "pattern",
            ValidationType::Contains => "contains",
            ValidationType::FileExists => "file-exists",
        };
        write!(f, "{}", s)
    }
}

/// 校验规则：类型 + 期望值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    #[serde(rename = "type")]
    pub kind: ValidationType,
    pub expected: String,
}

impl Validation {
    pub fn new(kind: ValidationType, expected: impl Into<String>) -> Self {
        Self {
            kind,
            expected: expected.into(),
        }
    }

    pub fn exit_status(code: i32) -> Self {
        Self::new(ValidationType::ExitStatus, code.to_string())
    }
}

/// 由指令派生出的一个可执行单元
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub description: String,
    pub command: String,
    pub kind: ActionKind,
    /// 副作用目标（文件路径、目录、NAME=value 等），缺省时从命令推断
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,
}

impl Action {
    pub fn command(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            description: command.clone(),
            command,
            kind: ActionKind::Command,
            target: None,
            validation: None,
        }
    }

    pub fn with_kind(mut self, kind: ActionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = Some(validation);
        self
    }
}

/// 预期结果：描述 + 可选的可机检规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedOutcome {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,
}

/// 解析后的指令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedInstruction {
    pub intent: String,
    pub confidence: f64,
    pub actions: Vec<Action>,
    pub prerequisites: Vec<String>,
    pub expected_outcomes: Vec<ExpectedOutcome>,
    /// Oracle 推理过程（审计用）
    pub reasoning: String,
}

impl ParsedInstruction {
    /// 可机检的预期结果
    pub fn checked_outcomes(&self) -> impl Iterator<Item = (&ExpectedOutcome, &Validation)> {
        self.expected_outcomes
            .iter()
            .filter_map(|o| o.validation.as_ref().map(|v| (o, v)))
    }
}

/// 计划中的一条指令：原文 + 解析结果 + 是否低于置信度阈值（非严格模式下仅记录）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedInstruction {
    pub raw: RawInstruction,
    pub parsed: ParsedInstruction,
    pub below_threshold: bool,
}

/// 计划中的一步（对应一个章节）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub section_number: u32,
    pub title: String,
    pub independent: bool,
    pub instructions: Vec<PlannedInstruction>,
}

impl PlanStep {
    pub fn action_count(&self) -> usize {
        self.instructions.iter().map(|i| i.parsed.actions.len()).sum()
    }
}

/// 执行计划：按章节编号升序
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecutionPlan {
    pub steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn action_count(&self) -> usize {
        self.steps.iter().map(PlanStep::action_count).sum()
    }
}
