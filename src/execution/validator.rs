//! 结果校验：把命令输出与期望规则比较
//!
//! 规则类型：exit-status / exact / pattern / contains / file-exists。
//! 模拟执行没有真实输出，除 exit-status 外的规则记为通过并注明未评估。

use std::path::Path;

use regex::Regex;
use serde::Serialize;

use crate::execution::CommandOutput;
use crate::plan::{Validation, ValidationType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationStatus {
    Matched,
    Mismatched,
    /// 规则本身无法评估（如非法正则）
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    pub rule: ValidationType,
    /// 规则来源：动作自身或某个 expected outcome 的描述
    pub source: String,
    pub expected: String,
    pub actual: String,
    pub explanation: String,
}

impl ValidationResult {
    pub fn is_matched(&self) -> bool {
        self.status == ValidationStatus::Matched
    }
}

/// 无状态校验器
#[derive(Debug, Default, Clone, Copy)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    pub fn check(
        &self,
        validation: &Validation,
        source: &str,
        output: &CommandOutput,
        working_dir: &Path,
    ) -> ValidationResult {
        let expected = validation.expected.trim();
        let result = |status, actual: String, explanation: String| ValidationResult {
            status,
            rule: validation.kind,
            source: source.to_string(),
            expected: expected.to_string(),
            actual,
            explanation,
        };

        if output.simulated && validation.kind != ValidationType::ExitStatus {
            return result(
                ValidationStatus::Matched,
                String::new(),
                "not evaluated in simulation".to_string(),
            );
        }

        match validation.kind {
            ValidationType::ExitStatus => {
                let actual = output
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "terminated by signal".to_string());
                match expected.parse::<i32>() {
                    Ok(code) if output.exit_code == Some(code) => {
                        result(ValidationStatus::Matched, actual, "exit status matches".into())
                    }
                    Ok(code) => result(
                        ValidationStatus::Mismatched,
                        actual.clone(),
                        format!("expected exit status {}, got {}", code, actual),
                    ),
                    Err(_) => result(
                        ValidationStatus::Error,
                        actual,
                        format!("'{}' is not an exit status", expected),
                    ),
                }
            }
            ValidationType::Exact => {
                let actual = output.stdout.trim().to_string();
                if actual == expected {
                    result(ValidationStatus::Matched, actual, "output matches".into())
                } else {
                    result(
                        ValidationStatus::Mismatched,
                        actual,
                        "output differs from expected".into(),
                    )
                }
            }
            ValidationType::Pattern => match Regex::new(expected) {
                Ok(re) if re.is_match(&output.stdout) => result(
                    ValidationStatus::Matched,
                    preview(&output.stdout),
                    "output matches pattern".into(),
                ),
                Ok(_) => result(
                    ValidationStatus::Mismatched,
                    preview(&output.stdout),
                    format!("output does not match /{}/", expected),
                ),
                Err(e) => result(
                    ValidationStatus::Error,
                    String::new(),
                    format!("invalid pattern: {}", e),
                ),
            },
            ValidationType::Contains => {
                if output.stdout.contains(expected) || output.stderr.contains(expected) {
                    result(
                        ValidationStatus::Matched,
                        preview(&output.stdout),
                        "output contains expected text".into(),
                    )
                } else {
                    result(
                        ValidationStatus::Mismatched,
                        preview(&output.stdout),
                        format!("output does not contain '{}'", expected),
                    )
                }
            }
            ValidationType::FileExists => {
                let path = working_dir.join(expected);
                let exists = path.exists();
                let actual = path.display().to_string();
                if exists {
                    result(ValidationStatus::Matched, actual, "path exists".into())
                } else {
                    result(ValidationStatus::Mismatched, actual, "path does not exist".into())
                }
            }
        }
    }
}

fn preview(s: &str) -> String {
    let s = s.trim();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}
