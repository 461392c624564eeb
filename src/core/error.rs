//! 引擎错误类型与失败分类
//!
//! 规划期错误（TooManySteps / InterpretationFailed / LowConfidence）在花费任何执行副作用前终止；
//! 运行期错误（ExecutionError / Mismatched）先交给 RecoveryEngine；Oracle 传输错误有限次退避重试。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ContextError;
use crate::oracle::OracleError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("{0}")]
    Oracle(#[from] OracleError),

    #[error("Low confidence instruction (section {section}, #{instruction}): {confidence:.2} < {threshold:.2}")]
    LowConfidence {
        section: u32,
        instruction: usize,
        confidence: f64,
        threshold: f64,
    },

    #[error("Too many steps: {count} instructions exceed max_steps {max}")]
    TooManySteps { count: usize, max: usize },

    #[error("Interpretation failed (section {section}, #{instruction}): {reason}")]
    InterpretationFailed {
        section: u32,
        instruction: usize,
        reason: String,
    },

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Validation mismatch: {0}")]
    Mismatched(String),

    #[error("Cost ceiling exceeded: spent ${spent:.4} + projected ${projected:.4} > ${ceiling:.4}")]
    CostCeilingExceeded {
        spent: f64,
        projected: f64,
        ceiling: f64,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Context invariant violated: {0}")]
    Context(#[from] ContextError),

    #[error("Config error: {0}")]
    ConfigError(String),
}

/// 报告中标注的失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    OracleUnavailable,
    OracleTimeout,
    MalformedResponse,
    LowConfidenceInstruction,
    TooManySteps,
    InterpretationFailed,
    ExecutionError,
    Mismatched,
    CostCeilingExceeded,
    Cancelled,
    InvalidState,
    Config,
}

impl EngineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            EngineError::Oracle(OracleError::Unavailable(_) | OracleError::Rejected(_)) => {
                FailureKind::OracleUnavailable
            }
            EngineError::Oracle(OracleError::Timeout(_)) => FailureKind::OracleTimeout,
            EngineError::Oracle(OracleError::MalformedResponse(_)) => {
                FailureKind::MalformedResponse
            }
            EngineError::LowConfidence { .. } => FailureKind::LowConfidenceInstruction,
            EngineError::TooManySteps { .. } => FailureKind::TooManySteps,
            EngineError::InterpretationFailed { .. } => FailureKind::InterpretationFailed,
            EngineError::ExecutionError(_) => FailureKind::ExecutionError,
            EngineError::Mismatched(_) => FailureKind::Mismatched,
            EngineError::CostCeilingExceeded { .. } => FailureKind::CostCeilingExceeded,
            EngineError::Cancelled => FailureKind::Cancelled,
            EngineError::Context(_) => FailureKind::InvalidState,
            EngineError::ConfigError(_) => FailureKind::Config,
        }
    }

    /// 仅影响当前章节的运行期失败；其余错误终止整个运行
    pub fn is_step_scoped(&self) -> bool {
        matches!(
            self,
            EngineError::ExecutionError(_) | EngineError::Mismatched(_)
        )
    }
}
