//! Instruction Interpreter：原始指令 + 上下文快照 -> ParsedInstruction
//!
//! 委托 Oracle 解析，再把字符串标签校验为强类型；置信度门控：
//! 严格模式下低于阈值直接失败（LowConfidence），否则仅标记 below_threshold。

use regex::Regex;

use crate::config::EngineSection;
use crate::context::ContextSnapshot;
use crate::core::EngineError;
use crate::oracle::{OracleGateway, OutcomeSpec, ParsedResult, ValidationSpec};
use crate::plan::{
    Action, ActionKind, ExpectedOutcome, ParsedInstruction, PlannedInstruction, Validation,
    ValidationType,
};
use crate::tutorial::RawInstruction;

pub struct InstructionInterpreter<'a> {
    gateway: &'a OracleGateway,
    config: &'a EngineSection,
}

impl<'a> InstructionInterpreter<'a> {
    pub fn new(gateway: &'a OracleGateway, config: &'a EngineSection) -> Self {
        Self { gateway, config }
    }

    /// 解析第 `section` 节的第 `index` 条指令
    pub async fn interpret(
        &self,
        section: u32,
        index: usize,
        instruction: &RawInstruction,
        snapshot: &ContextSnapshot,
    ) -> Result<PlannedInstruction, EngineError> {
        let result = self.gateway.parse_instruction(instruction, snapshot).await?;
        let parsed = to_parsed_instruction(result).map_err(|reason| {
            EngineError::InterpretationFailed {
                section,
                instruction: index,
                reason,
            }
        })?;

        let threshold = self.config.validation_threshold;
        let below_threshold = parsed.confidence < threshold;
        if below_threshold {
            if self.config.strict_validation {
                return Err(EngineError::LowConfidence {
                    section,
                    instruction: index,
                    confidence: parsed.confidence,
                    threshold,
                });
            }
            tracing::warn!(
                section,
                instruction = index,
                confidence = parsed.confidence,
                threshold,
                "low confidence instruction accepted (non-strict)"
            );
        }

        tracing::debug!(
            section,
            instruction = index,
            intent = %parsed.intent,
            actions = parsed.actions.len(),
            "instruction interpreted"
        );

        Ok(PlannedInstruction {
            raw: instruction.clone(),
            parsed,
            below_threshold,
        })
    }
}

fn to_validation(spec: &ValidationSpec) -> Result<Validation, String> {
    let kind: ValidationType = spec.kind.parse()?;
    let expected = spec.expected.trim().to_string();
    match kind {
        ValidationType::ExitStatus => {
            let expected = if expected.is_empty() { "0".to_string() } else { expected };
            expected
                .parse::<i32>()
                .map_err(|_| format!("exit-status expects an integer, got '{}'", expected))?;
            Ok(Validation::new(kind, expected))
        }
        ValidationType::Pattern => {
            Regex::new(&expected).map_err(|e| format!("invalid pattern '{}': {}", expected, e))?;
            Ok(Validation::new(kind, expected))
        }
        ValidationType::FileExists if expected.is_empty() => {
            Err("file-exists requires a path".to_string())
        }
        _ => Ok(Validation::new(kind, spec.expected.clone())),
    }
}

/// 将 Oracle 的原始判断校验为 ParsedInstruction
pub fn to_parsed_instruction(result: ParsedResult) -> Result<ParsedInstruction, String> {
    if result.intent.trim().is_empty() {
        return Err("empty intent".to_string());
    }
    if !result.confidence.is_finite() || !(0.0..=1.0).contains(&result.confidence) {
        return Err(format!("confidence {} outside [0,1]", result.confidence));
    }
    if result.actionable && result.actions.is_empty() {
        return Err("actionable step without actions".to_string());
    }

    let mut actions = Vec::new();
    if result.actionable {
        for spec in &result.actions {
            let command = spec.command.trim();
            if command.is_empty() {
                return Err("action with empty command".to_string());
            }
            let kind: ActionKind = spec.kind.parse()?;
            let validation = spec.validation.as_ref().map(to_validation).transpose()?;
            actions.push(Action {
                description: if spec.description.is_empty() {
                    command.to_string()
                } else {
                    spec.description.clone()
                },
                command: command.to_string(),
                kind,
                target: spec.target.clone().filter(|t| !t.trim().is_empty()),
                validation,
            });
        }
    }

    let expected_outcomes = result
        .expected_outcomes
        .iter()
        .map(|o| match o {
            OutcomeSpec::Text(text) => Ok(ExpectedOutcome {
                description: text.clone(),
                validation: None,
            }),
            OutcomeSpec::Checked {
                description,
                validation,
            } => Ok(ExpectedOutcome {
                description: description.clone(),
                validation: validation.as_ref().map(to_validation).transpose()?,
            }),
        })
        .collect::<Result<Vec<_>, String>>()?;

    Ok(ParsedInstruction {
        intent: result.intent,
        confidence: result.confidence,
        actions,
        prerequisites: result.prerequisites,
        expected_outcomes,
        reasoning: result.reasoning,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::context::TutorialContext;
    use crate::core::FailureKind;
    use crate::oracle::{ActionSpec, GatewaySettings, StubOracle};

    const TEXT: &str = "Create directory /tmp/x";

    fn stub_with_confidence(confidence: f64) -> Arc<StubOracle> {
        Arc::new(StubOracle::new().with_parse(
            TEXT,
            ParsedResult::new("create dir", confidence)
                .action(ActionSpec::new("mkdir /tmp/x").validate("exit-status", "0")),
        ))
    }

    fn strict() -> EngineSection {
        EngineSection {
            strict_validation: true,
            validation_threshold: 0.7,
            ..EngineSection::default()
        }
    }

    async fn interpret(
        oracle: Arc<StubOracle>,
        config: &EngineSection,
    ) -> Result<PlannedInstruction, EngineError> {
        let gateway =
            OracleGateway::new(oracle, GatewaySettings::default(), CancellationToken::new());
        let interpreter = InstructionInterpreter::new(&gateway, config);
        let snapshot = TutorialContext::new("/", 1).snapshot();
        interpreter
            .interpret(1, 0, &RawInstruction::new(TEXT), &snapshot)
            .await
    }

    #[tokio::test]
    async fn test_confidence_equal_to_threshold_accepted() {
        let planned = interpret(stub_with_confidence(0.7), &strict()).await.unwrap();
        assert!(!planned.below_threshold);
        assert_eq!(planned.parsed.actions[0].command, "mkdir /tmp/x");
    }

    #[tokio::test]
    async fn test_below_threshold_rejected_when_strict() {
        let err = interpret(stub_with_confidence(0.69), &strict())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::LowConfidenceInstruction);
    }

    #[tokio::test]
    async fn test_below_threshold_recorded_when_lenient() {
        let config = EngineSection {
            strict_validation: false,
            ..strict()
        };
        let planned = interpret(stub_with_confidence(0.4), &config).await.unwrap();
        assert!(planned.below_threshold);
    }

    #[tokio::test]
    async fn test_reinterpretation_is_idempotent() {
        let oracle = stub_with_confidence(0.9);
        let config = EngineSection::default();
        let a = interpret(oracle.clone(), &config).await.unwrap();
        let b = interpret(oracle, &config).await.unwrap();
        assert_eq!(a.parsed.confidence, b.parsed.confidence);
        assert_eq!(a.parsed.actions, b.parsed.actions);
    }

    #[test]
    fn test_unknown_validation_type_rejected() {
        let result = ParsedResult::new("x", 0.9)
            .action(ActionSpec::new("ls").validate("vibes", "good"));
        assert!(to_parsed_instruction(result)
            .unwrap_err()
            .contains("unknown validation type"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result =
            ParsedResult::new("x", 0.9).action(ActionSpec::new("ls").validate("pattern", "(["));
        assert!(to_parsed_instruction(result).is_err());
    }

    #[test]
    fn test_confidence_out_of_range_rejected() {
        let result = ParsedResult::new("x", 1.2).action(ActionSpec::new("ls"));
        assert!(to_parsed_instruction(result).is_err());
    }

    #[test]
    fn test_not_actionable_has_no_actions() {
        let parsed = to_parsed_instruction(ParsedResult::not_actionable("read the intro")).unwrap();
        assert!(parsed.actions.is_empty());
    }

    #[test]
    fn test_exit_status_defaults_to_zero() {
        let result =
            ParsedResult::new("x", 0.9).action(ActionSpec::new("ls").validate("exit-status", ""));
        let parsed = to_parsed_instruction(result).unwrap();
        assert_eq!(parsed.actions[0].validation, Some(Validation::exit_status(0)));
    }
}
