//! 确定性 Stub Oracle（测试与回放用，无需 API）
//!
//! 指令按全文匹配预置 ParsedResult；错误按子串匹配预置 ErrorInterpretation。
//! 相同输入永远得到相同输出；每次成功调用计固定 token 与费用。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::context::ContextSnapshot;
use crate::oracle::{
    Billed, Capabilities, ErrorInterpretation, Oracle, OracleError, ParsedResult, UsageStats,
    UsageTracker,
};
use crate::tutorial::RawInstruction;

pub struct StubOracle {
    parses: HashMap<String, Result<ParsedResult, OracleError>>,
    interpretations: Vec<(String, ErrorInterpretation)>,
    interpret_failure: Option<OracleError>,
    fail_all: Option<OracleError>,
    latency: Option<Duration>,
    tokens_per_call: (u64, u64),
    cost_per_call: f64,
    usage: UsageTracker,
    parse_calls: AtomicUsize,
    interpret_calls: AtomicUsize,
}

impl Default for StubOracle {
    fn default() -> Self {
        Self {
            parses: HashMap::new(),
            interpretations: Vec::new(),
            interpret_failure: None,
            fail_all: None,
            latency: None,
            tokens_per_call: (200, 100),
            cost_per_call: 0.001,
            usage: UsageTracker::new(),
            parse_calls: AtomicUsize::new(0),
            interpret_calls: AtomicUsize::new(0),
        }
    }
}

impl StubOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为某条指令原文预置解析结果
    pub fn with_parse(mut self, instruction: impl Into<String>, result: ParsedResult) -> Self {
        self.parses.insert(instruction.into(), Ok(result));
        self
    }

    /// 为某条指令原文预置失败
    pub fn with_parse_error(mut self, instruction: impl Into<String>, err: OracleError) -> Self {
        self.parses.insert(instruction.into(), Err(err));
        self
    }

    /// 错误文本包含 `needle` 时返回该诊断（按注册顺序匹配）
    pub fn with_interpretation(
        mut self,
        needle: impl Into<String>,
        interpretation: ErrorInterpretation,
    ) -> Self {
        self.interpretations.push((needle.into(), interpretation));
        self
    }

    /// 所有 interpret_error 调用都失败（parse 不受影响）
    pub fn with_interpret_error(mut self, err: OracleError) -> Self {
        self.interpret_failure = Some(err);
        self
    }

    /// 所有调用都失败
    pub fn failing(mut self, err: OracleError) -> Self {
        self.fail_all = Some(err);
        self
    }

    /// 模拟服务延迟
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_cost(mut self, prompt_tokens: u64, completion_tokens: u64, cost_usd: f64) -> Self {
        self.tokens_per_call = (prompt_tokens, completion_tokens);
        self.cost_per_call = cost_usd;
        self
    }

    pub fn parse_calls(&self) -> usize {
        self.parse_calls.load(Ordering::SeqCst)
    }

    pub fn interpret_calls(&self) -> usize {
        self.interpret_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.parse_calls() + self.interpret_calls()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn bill(&self) -> UsageStats {
        let (prompt, completion) = self.tokens_per_call;
        let usage = UsageStats::single_call(prompt, completion, self.cost_per_call);
        self.usage.absorb(&usage);
        usage
    }
}

#[async_trait]
impl Oracle for StubOracle {
    async fn parse_instruction(
        &self,
        instruction: &RawInstruction,
        _context: &ContextSnapshot,
    ) -> Billed<ParsedResult> {
        self.parse_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if let Some(err) = &self.fail_all {
            return Billed::unbilled(err.clone());
        }
        let result = match self.parses.get(&instruction.text) {
            Some(Err(err)) => return Billed::unbilled(err.clone()),
            Some(Ok(scripted)) => scripted.clone(),
            None => ParsedResult::not_actionable(instruction.text.clone())
                .reasoning("no scripted response"),
        };
        Billed::new(Ok(result), self.bill())
    }

    async fn interpret_error(
        &self,
        error_text: &str,
        _context: &ContextSnapshot,
    ) -> Billed<ErrorInterpretation> {
        self.interpret_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if let Some(err) = self.fail_all.as_ref().or(self.interpret_failure.as_ref()) {
            return Billed::unbilled(err.clone());
        }
        let interpretation = self
            .interpretations
            .iter()
            .find(|(needle, _)| error_text.contains(needle.as_str()))
            .map(|(_, i)| i.clone())
            .unwrap_or_else(|| ErrorInterpretation::new("unknown", "no scripted diagnosis"));
        Billed::new(Ok(interpretation.normalized()), self.bill())
    }

    fn usage_stats(&self) -> UsageStats {
        self.usage.snapshot()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            name: "stub".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            quality_score: 1.0,
        }
    }
}
