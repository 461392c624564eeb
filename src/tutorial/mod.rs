//! 教程输入模型：Tutorial / Section / RawInstruction
//!
//! 加载后不可变；章节编号在同一教程内唯一且单调递增。
//! `load_tutorial` 只负责读取 JSON / TOML 结构化文件（Markdown 解析不在本 crate 范围内）。

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 单条原始指令：自由文本 + 可选的上下文标签（如 "prerequisite-check"）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInstruction {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_tag: Option<String>,
}

impl RawInstruction {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context_tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.context_tag = Some(tag.into());
        self
    }
}

/// 教程章节
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub number: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructions: Vec<RawInstruction>,
    /// 不依赖前序章节的副作用；failure_policy = continue 时，前序失败后仍会执行
    #[serde(default)]
    pub independent: bool,
}

impl Section {
    pub fn new(number: u32, title: impl Into<String>) -> Self {
        Self {
            number,
            title: title.into(),
            description: String::new(),
            instructions: Vec::new(),
            independent: false,
        }
    }

    pub fn instruction(mut self, instruction: RawInstruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    pub fn independent(mut self) -> Self {
        self.independent = true;
        self
    }
}

/// 待校验的教程文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tutorial {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl Tutorial {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            sections: Vec::new(),
        }
    }

    pub fn section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    /// 全部章节的指令总数（用于 max_steps 检查）
    pub fn instruction_count(&self) -> usize {
        self.sections.iter().map(|s| s.instructions.len()).sum()
    }

    /// 按章节编号升序返回章节引用
    pub fn ordered_sections(&self) -> Vec<&Section> {
        let mut sections: Vec<&Section> = self.sections.iter().collect();
        sections.sort_by_key(|s| s.number);
        sections
    }

    /// 章节编号必须唯一
    pub fn validate(&self) -> Result<(), TutorialLoadError> {
        let mut numbers: Vec<u32> = self.sections.iter().map(|s| s.number).collect();
        numbers.sort_unstable();
        if let Some(w) = numbers.windows(2).find(|w| w[0] == w[1]) {
            return Err(TutorialLoadError::DuplicateSection(w[0]));
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum TutorialLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Duplicate section number: {0}")]
    DuplicateSection(u32),
}

/// 从 .json / .toml 文件加载教程（按扩展名判断格式，默认 JSON）
pub fn load_tutorial(path: impl AsRef<Path>) -> Result<Tutorial, TutorialLoadError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)?;
    let tutorial: Tutorial = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&raw)?,
        _ => serde_json::from_str(&raw)?,
    };
    tutorial.validate()?;
    Ok(tutorial)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_sections_sorted_by_number() {
        let tutorial = Tutorial::new("t")
            .section(Section::new(3, "c"))
            .section(Section::new(1, "a"))
            .section(Section::new(2, "b"));
        let numbers: Vec<u32> = tutorial.ordered_sections().iter().map(|s| s.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_duplicate_section_rejected() {
        let tutorial = Tutorial::new("t")
            .section(Section::new(1, "a"))
            .section(Section::new(1, "b"));
        assert!(matches!(
            tutorial.validate(),
            Err(TutorialLoadError::DuplicateSection(1))
        ));
    }

    #[test]
    fn test_load_toml_tutorial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.toml");
        std::fs::write(
            &path,
            r#"
title = "Hello"

[[sections]]
number = 1
title = "Setup"

[[sections.instructions]]
text = "Create directory /tmp/x"
context_tag = "setup"
"#,
        )
        .unwrap();
        let tutorial = load_tutorial(&path).unwrap();
        assert_eq!(tutorial.instruction_count(), 1);
        assert_eq!(
            tutorial.sections[0].instructions[0].context_tag.as_deref(),
            Some("setup")
        );
    }

    #[test]
    fn test_demo_tutorial_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/hello-rust.toml");
        let tutorial = load_tutorial(&path).unwrap();
        assert_eq!(tutorial.sections.len(), 3);
        assert_eq!(tutorial.instruction_count(), 4);
        assert!(tutorial.sections[2].independent);
    }
}
