//! Oracle 边界上的数据结构与错误
//!
//! ParsedResult 是 Oracle 的原始判断（标签仍是字符串），由 Interpreter 校验并转为 ParsedInstruction。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Oracle 调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),

    #[error("Oracle timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed oracle response: {0}")]
    MalformedResponse(String),

    /// 服务端明确拒绝（鉴权失败、参数非法等），重试结果不变
    #[error("Oracle rejected request: {0}")]
    Rejected(String),
}

impl OracleError {
    /// 只有传输类错误可退避重试
    pub fn is_transient(&self) -> bool {
        matches!(self, OracleError::Unavailable(_) | OracleError::Timeout(_))
    }
}

/// 单次 Oracle 调用的结果及该次调用本身产生的用量
///
/// 传输失败时 usage 为零；回复已计费但格式错误时 usage 仍然有效。
#[derive(Debug, Clone, PartialEq)]
pub struct Billed<T> {
    pub result: Result<T, OracleError>,
    pub usage: UsageStats,
}

impl<T> Billed<T> {
    pub fn new(result: Result<T, OracleError>, usage: UsageStats) -> Self {
        Self { result, usage }
    }

    /// 未产生计费的失败
    pub fn unbilled(err: OracleError) -> Self {
        Self {
            result: Err(err),
            usage: UsageStats::default(),
        }
    }
}

/// 校验规则（字符串标签）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub expected: String,
}

/// Oracle 给出的动作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(default)]
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationSpec>,
}

impl ActionSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            description: String::new(),
            command: command.into(),
            kind: String::new(),
            target: None,
            validation: None,
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn validate(mut self, kind: impl Into<String>, expected: impl Into<String>) -> Self {
        self.validation = Some(ValidationSpec {
            kind: kind.into(),
            expected: expected.into(),
        });
        self
    }
}

/// 预期结果：纯文本或带校验规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutcomeSpec {
    Text(String),
    Checked {
        description: String,
        #[serde(default)]
        validation: Option<ValidationSpec>,
    },
}

/// ParseInstruction 的返回
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResult {
    pub intent: String,
    pub confidence: f64,
    /// false 表示「无可执行步骤」（纯说明性文字）
    #[serde(default = "default_actionable")]
    pub actionable: bool,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub expected_outcomes: Vec<OutcomeSpec>,
    #[serde(default)]
    pub reasoning: String,
}

fn default_actionable() -> bool {
    true
}

impl ParsedResult {
    pub fn new(intent: impl Into<String>, confidence: f64) -> Self {
        Self {
            intent: intent.into(),
            confidence,
            actionable: true,
            actions: Vec::new(),
            prerequisites: Vec::new(),
            expected_outcomes: Vec::new(),
            reasoning: String::new(),
        }
    }

    /// 无可执行步骤的说明性指令
    pub fn not_actionable(intent: impl Into<String>) -> Self {
        Self {
            actionable: false,
            ..Self::new(intent, 1.0)
        }
    }

    pub fn action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    pub fn prerequisite(mut self, p: impl Into<String>) -> Self {
        self.prerequisites.push(p.into());
        self
    }

    pub fn outcome(mut self, outcome: OutcomeSpec) -> Self {
        self.expected_outcomes.push(outcome);
        self
    }

    pub fn reasoning(mut self, r: impl Into<String>) -> Self {
        self.reasoning = r.into();
        self
    }
}

/// 候选修复方案
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    #[serde(default)]
    pub description: String,
    pub probability: f64,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl Solution {
    pub fn new(probability: f64, commands: Vec<String>) -> Self {
        Self {
            description: String::new(),
            probability,
            commands,
        }
    }
}

/// InterpretError 的返回：分类、解释、按概率降序的方案
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInterpretation {
    pub category: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub solutions: Vec<Solution>,
}

impl ErrorInterpretation {
    pub fn new(category: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            explanation: explanation.into(),
            solutions: Vec::new(),
        }
    }

    pub fn solution(mut self, solution: Solution) -> Self {
        self.solutions.push(solution);
        self
    }

    /// 概率夹到 [0,1]（NaN 视为 0）并按降序稳定排序；丢弃没有命令的方案
    pub fn normalized(mut self) -> Self {
        for s in &mut self.solutions {
            s.probability = if s.probability.is_nan() {
                0.0
            } else {
                s.probability.clamp(0.0, 1.0)
            };
        }
        self.solutions.retain(|s| !s.commands.is_empty());
        self.solutions
            .sort_by(|a, b| b.probability.total_cmp(&a.probability));
        self
    }
}

/// 能力描述（每个实例静态不变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub name: String,
    pub version: String,
    pub quality_score: f64,
}

/// 累计用量
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
}
