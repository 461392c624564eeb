//! Oracle 网关：单次运行内所有 Oracle 调用的唯一入口
//!
//! - 每次调用施加超时（tokio::time::timeout）
//! - Unavailable / Timeout 按指数退避有限次重试；MalformedResponse / Rejected 不重试
//! - 调用前检查费用上限：已花费 + 预计单次费用 > 上限 即拒绝，避免超支
//! - 调用前与退避等待中响应取消信号
//! - 开启上下文压缩时，发给 Oracle 的快照统一在此截断
//! - 运行级用量只累加本网关发起的调用各自返回的用量（Oracle 实例可能被多个运行共享）

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::context::ContextSnapshot;
use crate::core::EngineError;
use crate::oracle::{
    Billed, Capabilities, ErrorInterpretation, Oracle, OracleError, ParsedResult, UsageStats,
    UsageTracker,
};
use crate::tutorial::RawInstruction;

/// 传输错误的重试策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// 第 attempt 次重试前的等待（attempt 从 1 开始）
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// 单次运行费用上限（美元）
    pub cost_ceiling: Option<f64>,
    /// 尚无历史调用时的单次费用预估
    pub estimated_call_cost: f64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            cost_ceiling: None,
            estimated_call_cost: 0.01,
        }
    }
}

pub struct OracleGateway {
    oracle: Arc<dyn Oracle>,
    settings: GatewaySettings,
    cancel: CancellationToken,
    context_horizon: Option<usize>,
    run_usage: UsageTracker,
}

impl OracleGateway {
    pub fn new(oracle: Arc<dyn Oracle>, settings: GatewaySettings, cancel: CancellationToken) -> Self {
        Self {
            oracle,
            settings,
            cancel,
            context_horizon: None,
            run_usage: UsageTracker::new(),
        }
    }

    /// 设置后，快照只保留最近 horizon 条命令再交给 Oracle
    pub fn with_context_horizon(mut self, horizon: Option<usize>) -> Self {
        self.context_horizon = horizon;
        self
    }

    /// 本次运行产生的用量
    pub fn run_usage(&self) -> UsageStats {
        self.run_usage.snapshot()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.oracle.capabilities()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn parse_instruction(
        &self,
        instruction: &RawInstruction,
        context: &ContextSnapshot,
    ) -> Result<ParsedResult, EngineError> {
        let context = self.prepare(context);
        self.call("parse_instruction", || {
            self.oracle.parse_instruction(instruction, &context)
        })
        .await
    }

    pub async fn interpret_error(
        &self,
        error_text: &str,
        context: &ContextSnapshot,
    ) -> Result<ErrorInterpretation, EngineError> {
        let context = self.prepare(context);
        self.call("interpret_error", || {
            self.oracle.interpret_error(error_text, &context)
        })
        .await
    }

    fn prepare<'c>(&self, context: &'c ContextSnapshot) -> Cow<'c, ContextSnapshot> {
        match self.context_horizon {
            Some(horizon) if context.recent_commands.len() > horizon => {
                Cow::Owned(context.clone().compress(horizon))
            }
            _ => Cow::Borrowed(context),
        }
    }

    /// 预计单次费用：本运行均值 > Oracle 实例均值 > 配置预估
    fn check_budget(&self) -> Result<(), EngineError> {
        let Some(ceiling) = self.settings.cost_ceiling else {
            return Ok(());
        };
        let run = self.run_usage.snapshot();
        let spent = run.cost_usd;
        let projected = run
            .average_call_cost()
            .or_else(|| self.oracle.usage_stats().average_call_cost())
            .unwrap_or(self.settings.estimated_call_cost);
        if spent + projected > ceiling + f64::EPSILON {
            tracing::warn!(spent, projected, ceiling, "oracle cost ceiling reached");
            return Err(EngineError::CostCeilingExceeded {
                spent,
                projected,
                ceiling,
            });
        }
        Ok(())
    }

    async fn call<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Billed<T>>,
    {
        let retry = self.settings.retry;
        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            self.check_budget()?;

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
                r = tokio::time::timeout(self.settings.timeout, f()) => r,
            };

            let err = match result {
                Ok(billed) => {
                    self.run_usage.absorb(&billed.usage);
                    match billed.result {
                        Ok(value) => return Ok(value),
                        Err(e) => e,
                    }
                }
                Err(_) => OracleError::Timeout(self.settings.timeout),
            };

            if !err.is_transient() || attempt >= retry.max_retries {
                tracing::warn!(op, attempt, error = %err, "oracle call failed");
                return Err(err.into());
            }

            attempt += 1;
            let delay = retry.backoff(attempt);
            tracing::warn!(
                op,
                error = %err,
                "oracle call failed, retry {}/{} after {:?}",
                attempt,
                retry.max_retries,
                delay
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TutorialContext;
    use crate::llm::{LlmError, MockLlmClient};
    use crate::oracle::{LlmOracle, Pricing, StubOracle};
    use crate::core::FailureKind;

    fn fast_settings() -> GatewaySettings {
        GatewaySettings {
            timeout: Duration::from_millis(20),
            retry: RetryPolicy {
                max_retries: 2,
                initial_backoff: Duration::ZERO,
                max_backoff: Duration::ZERO,
            },
            cost_ceiling: None,
            estimated_call_cost: 0.0,
        }
    }

    fn snapshot() -> ContextSnapshot {
        TutorialContext::new("/", 1).snapshot()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_timeout_retried_then_surfaced() {
        let stub = Arc::new(StubOracle::new().with_latency(Duration::from_millis(200)));
        let gateway = OracleGateway::new(stub.clone(), fast_settings(), CancellationToken::new());
        let err = gateway
            .parse_instruction(&RawInstruction::new("x"), &snapshot())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::OracleTimeout);
        assert_eq!(stub.parse_calls(), 3);
        assert_eq!(gateway.run_usage().requests, 0);
    }

    #[tokio::test]
    async fn test_malformed_not_retried() {
        let llm = MockLlmClient::new().with_fallback("not json at all");
        let oracle = Arc::new(LlmOracle::new(Arc::new(llm), Pricing::default()));
        let gateway = OracleGateway::new(oracle, fast_settings(), CancellationToken::new());
        let err = gateway
            .parse_instruction(&RawInstruction::new("x"), &snapshot())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::MalformedResponse);
        assert_eq!(gateway.run_usage().requests, 1);
    }

    #[tokio::test]
    async fn test_transient_error_recovers_on_retry() {
        let llm = MockLlmClient::new()
            .with_error(LlmError::Network("connection reset".into()))
            .with_reply(r#"{"intent": "ok", "confidence": 1.0, "actionable": false}"#);
        let oracle = Arc::new(LlmOracle::new(Arc::new(llm), Pricing::default()));
        let gateway = OracleGateway::new(oracle, fast_settings(), CancellationToken::new());
        let parsed = gateway
            .parse_instruction(&RawInstruction::new("x"), &snapshot())
            .await
            .unwrap();
        assert_eq!(parsed.intent, "ok");
    }

    #[tokio::test]
    async fn test_rejected_request_not_retried() {
        let llm = MockLlmClient::new()
            .with_error(LlmError::ApiError("invalid api key".into()))
            .with_reply(r#"{"intent": "ok", "confidence": 1.0, "actionable": false}"#);
        let oracle = Arc::new(LlmOracle::new(Arc::new(llm), Pricing::default()));
        let gateway = OracleGateway::new(oracle, fast_settings(), CancellationToken::new());
        let instr = RawInstruction::new("x");
        let err = gateway
            .parse_instruction(&instr, &snapshot())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Oracle(OracleError::Rejected(_))));
        assert_eq!(err.kind(), FailureKind::OracleUnavailable);
        assert_eq!(gateway.run_usage().requests, 0);
        // 排队的成功回复没有被重试消耗
        let parsed = gateway.parse_instruction(&instr, &snapshot()).await.unwrap();
        assert_eq!(parsed.intent, "ok");
    }

    #[tokio::test]
    async fn test_run_usage_ignores_other_gateways() {
        let stub = Arc::new(StubOracle::new().with_cost(10, 10, 0.01));
        let a = OracleGateway::new(stub.clone(), fast_settings(), CancellationToken::new());
        let b = OracleGateway::new(stub.clone(), fast_settings(), CancellationToken::new());
        let instr = RawInstruction::new("x");
        let snap = snapshot();
        let (ra, rb) = tokio::join!(
            a.parse_instruction(&instr, &snap),
            b.interpret_error("boom", &snap)
        );
        ra.unwrap();
        rb.unwrap();
        a.parse_instruction(&instr, &snap).await.unwrap();
        assert_eq!(a.run_usage().requests, 2);
        assert_eq!(b.run_usage().requests, 1);
        assert!((b.run_usage().cost_usd - 0.01).abs() < 1e-9);
        assert_eq!(stub.usage_stats().requests, 3);
    }

    #[tokio::test]
    async fn test_compressed_context_for_both_operations() {
        let llm = Arc::new(
            MockLlmClient::new()
                .with_reply(r#"{"intent": "ok", "confidence": 1.0, "actionable": false}"#)
                .with_reply(r#"{"category": "x", "solutions": []}"#),
        );
        let oracle = Arc::new(LlmOracle::new(llm.clone(), Pricing::default()));
        let gateway = OracleGateway::new(oracle, fast_settings(), CancellationToken::new())
            .with_context_horizon(Some(2));
        let mut snap = snapshot();
        snap.recent_commands = (0..5).map(|i| format!("echo {}", i)).collect();

        gateway
            .parse_instruction(&RawInstruction::new("x"), &snap)
            .await
            .unwrap();
        let prompt = llm.last_prompt().unwrap();
        assert!(prompt.contains("3 earlier commands omitted"));
        assert!(!prompt.contains("echo 0"));

        gateway.interpret_error("boom", &snap).await.unwrap();
        let prompt = llm.last_prompt().unwrap();
        assert!(prompt.contains("3 earlier commands omitted"));
        assert!(!prompt.contains("echo 0"));
        assert!(prompt.contains("echo 4"));
    }

    #[tokio::test]
    async fn test_cost_ceiling_checked_before_call() {
        let stub = Arc::new(StubOracle::new().with_cost(10, 10, 0.01));
        let settings = GatewaySettings {
            cost_ceiling: Some(0.025),
            estimated_call_cost: 0.01,
            ..fast_settings()
        };
        let gateway = OracleGateway::new(stub.clone(), settings, CancellationToken::new());
        let instr = RawInstruction::new("x");
        gateway.parse_instruction(&instr, &snapshot()).await.unwrap();
        gateway.parse_instruction(&instr, &snapshot()).await.unwrap();
        let err = gateway
            .parse_instruction(&instr, &snapshot())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::CostCeilingExceeded);
        assert_eq!(stub.parse_calls(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let stub = Arc::new(StubOracle::new());
        let token = CancellationToken::new();
        token.cancel();
        let gateway = OracleGateway::new(stub.clone(), fast_settings(), token);
        let err = gateway
            .interpret_error("boom", &snapshot())
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::Cancelled);
        assert_eq!(stub.total_calls(), 0);
    }
}
