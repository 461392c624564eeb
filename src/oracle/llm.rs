//! 基于 LlmClient 的 Oracle 实现
//!
//! 拼 system prompt + 上下文片段 + 指令，要求模型只输出 JSON；
//! 从回复中提取 JSON（```json ... ``` 或首尾花括号），缺少 intent / confidence 即 MalformedResponse。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::context::ContextSnapshot;
use crate::llm::{LlmClient, LlmError, Message};
use crate::oracle::{
    ActionSpec, Billed, Capabilities, ErrorInterpretation, Oracle, OracleError, OutcomeSpec, ParsedResult,
    Solution, UsageStats, UsageTracker,
};
use crate::tutorial::RawInstruction;

const PARSE_SYSTEM_PROMPT: &str = r#"You translate one step of a technical tutorial into shell actions.
Reply with exactly one JSON object and nothing else:
{"intent": "<one line summary>",
 "confidence": <0.0-1.0>,
 "actionable": <true|false>,
 "actions": [{"description": "...", "command": "...",
              "kind": "command|create-file|create-directory|set-env|change-directory|check",
              "target": "<path or NAME=value, optional>",
              "validation": {"type": "exit-status|exact|pattern|contains|file-exists", "expected": "..."}}],
 "prerequisites": ["..."],
 "expected_outcomes": ["<text>" or {"description": "...", "validation": {...}}],
 "reasoning": "..."}
Set "actionable" to false with an empty action list when the step is purely explanatory."#;

const ERROR_SYSTEM_PROMPT: &str = r#"You diagnose a failed tutorial step and propose fixes.
Reply with exactly one JSON object and nothing else:
{"category": "<short tag>",
 "explanation": "...",
 "solutions": [{"description": "...", "probability": <0.0-1.0>, "commands": ["..."]}]}
Order solutions from most to least likely."#;

/// 按 1k token 计价（美元）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pricing {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl Pricing {
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.prompt_per_1k
            + (completion_tokens as f64 / 1000.0) * self.completion_per_1k
    }
}

/// 从 LLM 回复中提取 JSON 片段
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 模型输出的宽松形式：字段缺失时由 into_parsed 判定是否合法
#[derive(Debug, Deserialize)]
struct ParseReply {
    intent: Option<String>,
    confidence: Option<f64>,
    #[serde(default)]
    actionable: Option<bool>,
    #[serde(default)]
    actions: Vec<ActionSpec>,
    #[serde(default)]
    prerequisites: Vec<String>,
    #[serde(default)]
    expected_outcomes: Vec<OutcomeSpec>,
    #[serde(default)]
    reasoning: String,
}

impl ParseReply {
    fn into_parsed(self) -> Result<ParsedResult, OracleError> {
        let intent = self
            .intent
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| OracleError::MalformedResponse("missing intent".to_string()))?;
        let confidence = self
            .confidence
            .ok_or_else(|| OracleError::MalformedResponse("missing confidence".to_string()))?;
        let actionable = self.actionable.unwrap_or(!self.actions.is_empty());
        if actionable && self.actions.is_empty() {
            return Err(OracleError::MalformedResponse(
                "actionable step without actions".to_string(),
            ));
        }
        Ok(ParsedResult {
            intent,
            confidence,
            actionable,
            actions: self.actions,
            prerequisites: self.prerequisites,
            expected_outcomes: self.expected_outcomes,
            reasoning: self.reasoning,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ErrorReply {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    solutions: Vec<Solution>,
}

/// 超时与可重试的传输错误归为瞬时故障；鉴权、参数等错误直接拒绝
fn map_llm_error(err: LlmError, timeout_hint: std::time::Duration) -> OracleError {
    match err {
        LlmError::Timeout => OracleError::Timeout(timeout_hint),
        other if other.is_transient() => OracleError::Unavailable(other.to_string()),
        other => OracleError::Rejected(other.to_string()),
    }
}

fn reply_json(reply: &str) -> Result<&str, OracleError> {
    extract_json(reply).ok_or_else(|| {
        OracleError::MalformedResponse(format!("no JSON object in reply: {}", reply.trim()))
    })
}

fn decode_parse(reply: &str) -> Result<ParsedResult, OracleError> {
    let json = reply_json(reply)?;
    let parsed: ParseReply = serde_json::from_str(json)
        .map_err(|e| OracleError::MalformedResponse(format!("{}: {}", e, json)))?;
    parsed.into_parsed()
}

fn decode_interpretation(reply: &str) -> Result<ErrorInterpretation, OracleError> {
    let json = reply_json(reply)?;
    let parsed: ErrorReply = serde_json::from_str(json)
        .map_err(|e| OracleError::MalformedResponse(format!("{}: {}", e, json)))?;
    Ok(ErrorInterpretation {
        category: parsed.category.unwrap_or_else(|| "unknown".to_string()),
        explanation: parsed.explanation,
        solutions: parsed.solutions,
    }
    .normalized())
}

/// LLM 驱动的 Oracle
pub struct LlmOracle {
    llm: Arc<dyn LlmClient>,
    pricing: Pricing,
    usage: UsageTracker,
    quality_score: f64,
    /// 传输层报告超时时的提示值（实际超时由调用方施加）
    timeout_hint: std::time::Duration,
}

impl LlmOracle {
    pub fn new(llm: Arc<dyn LlmClient>, pricing: Pricing) -> Self {
        Self {
            llm,
            pricing,
            usage: UsageTracker::new(),
            quality_score: 0.8,
            timeout_hint: std::time::Duration::from_secs(60),
        }
    }

    pub fn with_quality_score(mut self, score: f64) -> Self {
        self.quality_score = score.clamp(0.0, 1.0);
        self
    }

    pub fn with_timeout_hint(mut self, timeout: std::time::Duration) -> Self {
        self.timeout_hint = timeout;
        self
    }

    /// 调用 LLM 并解码；成功的传输即计费，无论回复能否解析
    async fn ask<T>(
        &self,
        system: &str,
        user: String,
        decode: fn(&str) -> Result<T, OracleError>,
    ) -> Billed<T> {
        let messages = vec![Message::system(system.to_string()), Message::user(user)];
        let completion = match self.llm.complete(&messages).await {
            Ok(c) => c,
            Err(e) => return Billed::unbilled(map_llm_error(e, self.timeout_hint)),
        };
        let cost = self
            .pricing
            .cost(completion.prompt_tokens, completion.completion_tokens);
        let usage =
            UsageStats::single_call(completion.prompt_tokens, completion.completion_tokens, cost);
        self.usage.absorb(&usage);
        tracing::debug!(
            tokens = completion.total_tokens(),
            cost_usd = cost,
            "oracle completion"
        );
        Billed::new(decode(&completion.content), usage)
    }
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn parse_instruction(
        &self,
        instruction: &RawInstruction,
        context: &ContextSnapshot,
    ) -> Billed<ParsedResult> {
        let mut prompt = context.to_prompt_section();
        if let Some(tag) = &instruction.context_tag {
            prompt.push_str(&format!("## Step role\n{}\n\n", tag));
        }
        prompt.push_str(&format!("## Instruction\n{}\n", instruction.text));
        self.ask(PARSE_SYSTEM_PROMPT, prompt, decode_parse).await
    }

    async fn interpret_error(
        &self,
        error_text: &str,
        context: &ContextSnapshot,
    ) -> Billed<ErrorInterpretation> {
        let prompt = format!(
            "{}## Failure\n{}\n",
            context.to_prompt_section(),
            error_text
        );
        self.ask(ERROR_SYSTEM_PROMPT, prompt, decode_interpretation)
            .await
    }

    fn usage_stats(&self) -> UsageStats {
        self.usage.snapshot()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            name: self.llm.model_name().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            quality_score: self.quality_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TutorialContext;
    use crate::llm::MockLlmClient;

    fn snapshot() -> ContextSnapshot {
        TutorialContext::new("/work", 3).snapshot().with_tutorial("Demo")
    }

    #[test]
    fn test_extract_json_fenced_and_bare() {
        assert_eq!(
            extract_json("here:\n```json\n{\"a\":1}\n```"),
            Some("{\"a\":1}")
        );
        assert_eq!(extract_json("x {\"a\":1} y"), Some("{\"a\":1}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[tokio::test]
    async fn test_parse_instruction_from_reply() {
        let llm = MockLlmClient::new().with_tokens(1000, 500).with_reply(
            r#"```json
{"intent": "create dir", "confidence": 0.92,
 "actions": [{"command": "mkdir /tmp/x", "kind": "create-directory",
              "validation": {"type": "exit-status", "expected": "0"}}],
 "expected_outcomes": ["directory exists"]}
```"#,
        );
        let llm = Arc::new(llm);
        let oracle = LlmOracle::new(
            llm.clone(),
            Pricing {
                prompt_per_1k: 0.001,
                completion_per_1k: 0.002,
            },
        );
        let billed = oracle
            .parse_instruction(
                &RawInstruction::new("Create directory /tmp/x").with_tag("setup"),
                &snapshot(),
            )
            .await;
        assert_eq!(billed.usage.requests, 1);
        let parsed = billed.result.unwrap();
        assert_eq!(parsed.intent, "create dir");
        assert!(parsed.actionable);
        assert_eq!(parsed.actions.len(), 1);

        let prompt = llm.last_prompt().unwrap();
        assert!(prompt.contains("## Instruction\nCreate directory /tmp/x"));
        assert!(prompt.contains("## Step role\nsetup"));

        let usage = oracle.usage_stats();
        assert_eq!(usage.requests, 1);
        assert_eq!(usage.total_tokens, 1500);
        assert!((usage.cost_usd - 0.002).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_confidence_is_malformed_but_billed() {
        let llm = MockLlmClient::new().with_reply(r#"{"intent": "x", "actions": []}"#);
        let oracle = LlmOracle::new(Arc::new(llm), Pricing::default());
        let billed = oracle
            .parse_instruction(&RawInstruction::new("x"), &snapshot())
            .await;
        assert!(matches!(billed.result, Err(OracleError::MalformedResponse(_))));
        assert_eq!(billed.usage.requests, 1);
        assert_eq!(oracle.usage_stats().requests, 1);
    }

    #[tokio::test]
    async fn test_transport_timeout_maps_to_oracle_timeout() {
        let llm = MockLlmClient::new().with_error(LlmError::Timeout);
        let oracle = LlmOracle::new(Arc::new(llm), Pricing::default());
        let billed = oracle
            .parse_instruction(&RawInstruction::new("x"), &snapshot())
            .await;
        assert!(matches!(billed.result, Err(OracleError::Timeout(_))));
        assert_eq!(billed.usage.requests, 0);
        assert_eq!(oracle.usage_stats().requests, 0);
    }

    #[tokio::test]
    async fn test_api_error_maps_to_rejected() {
        let llm = MockLlmClient::new()
            .with_error(LlmError::ApiError("invalid api key".into()))
            .with_error(LlmError::RateLimited { retry_after_ms: 10 });
        let oracle = LlmOracle::new(Arc::new(llm), Pricing::default());
        let first = oracle
            .parse_instruction(&RawInstruction::new("x"), &snapshot())
            .await;
        assert!(matches!(first.result, Err(OracleError::Rejected(_))));
        let second = oracle
            .parse_instruction(&RawInstruction::new("x"), &snapshot())
            .await;
        assert!(matches!(second.result, Err(OracleError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_interpret_error_sorts_solutions() {
        let llm = MockLlmClient::new().with_reply(
            r#"{"category": "exists", "solutions": [
                {"probability": 0.3, "commands": ["rm -r /tmp/x"]},
                {"probability": 0.9, "commands": ["mkdir -p /tmp/x"]}]}"#,
        );
        let oracle = LlmOracle::new(Arc::new(llm), Pricing::default());
        let interp = oracle
            .interpret_error("mkdir: File exists", &snapshot())
            .await
            .result
            .unwrap();
        assert_eq!(interp.solutions[0].commands, vec!["mkdir -p /tmp/x".to_string()]);
    }
}
