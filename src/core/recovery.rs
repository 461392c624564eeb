//! 错误恢复引擎
//!
//! 动作失败后向 Oracle 请求诊断，按概率降序逐个给出修复方案；方案用完而预算未尽时，
//! 带着最新错误再次请求诊断。每个失败动作最多尝试 max_attempts 个方案。

use std::collections::VecDeque;

use crate::context::ContextSnapshot;
use crate::core::EngineError;
use crate::oracle::{OracleGateway, Solution};
use crate::report::{RecoveryAttempt, RecoveryRecord};

/// 恢复策略：每个失败动作的尝试预算
#[derive(Debug, Clone, Copy)]
pub struct RecoveryEngine {
    max_attempts: u32,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl RecoveryEngine {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// 为一个失败动作开启恢复会话
    pub fn session(&self) -> RecoverySession {
        RecoverySession {
            remaining: self.max_attempts,
            pending: VecDeque::new(),
            record: RecoveryRecord::default(),
        }
    }
}

/// 单个失败动作的恢复过程
#[derive(Debug)]
pub struct RecoverySession {
    remaining: u32,
    pending: VecDeque<Solution>,
    record: RecoveryRecord,
}

impl RecoverySession {
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// 下一个待尝试的方案；预算耗尽或 Oracle 给不出方案时返回 None
    pub async fn next_solution(
        &mut self,
        gateway: &OracleGateway,
        latest_error: &str,
        snapshot: &ContextSnapshot,
    ) -> Result<Option<Solution>, EngineError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        if self.pending.is_empty() {
            let interpretation = gateway
                .interpret_error(latest_error, snapshot)
                .await?
                .normalized();
            tracing::info!(
                category = %interpretation.category,
                solutions = interpretation.solutions.len(),
                "error interpreted"
            );
            self.pending.extend(interpretation.solutions.iter().cloned());
            self.record.interpretations.push(interpretation);
        }
        let next = self.pending.pop_front();
        if next.is_some() {
            self.remaining -= 1;
        }
        Ok(next)
    }

    pub fn record_attempt(&mut self, attempt: RecoveryAttempt) {
        self.record.attempts.push(attempt);
    }

    pub fn finish(mut self, recovered: bool) -> RecoveryRecord {
        self.record.recovered = recovered;
        self.record
    }
}
