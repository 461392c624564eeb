//! 动作成功后对上下文的影响推断
//!
//! 优先使用动作的 target；没有时从命令本身推断（重定向目标或最后一个非选项参数）。
//! 相对路径按执行时的工作目录解析。

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::context::ContextEvent;
use crate::plan::{Action, ActionKind};

static EXPORT_RE: OnceLock<Regex> = OnceLock::new();

fn export_re() -> &'static Regex {
    EXPORT_RE.get_or_init(|| {
        Regex::new(r#"(?:^|[;&|]\s*)export\s+([A-Za-z_][A-Za-z0-9_]*)=("[^"]*"|'[^']*'|\S*)"#)
            .unwrap()
    })
}

fn strip_quotes(s: &str) -> String {
    s.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string()
}

/// 描述符复制（`&1`）与设备文件不算文件目标
fn is_file_target(token: &str) -> bool {
    !token.is_empty() && !token.starts_with('&') && !token.starts_with("/dev/")
}

/// 最后一个写入真实文件的重定向目标（`>`、`>>`、`&>`）
fn redirect_target(command: &str) -> Option<String> {
    command
        .match_indices('>')
        .filter_map(|(idx, _)| {
            let rest = &command[idx + 1..];
            // `>>` 的第一个字符
            if rest.starts_with('>') {
                return None;
            }
            rest.split_whitespace().next()
        })
        .map(strip_quotes)
        .filter(|t| is_file_target(t))
        .last()
}

/// 从命令推断操作对象
pub fn infer_target(command: &str) -> Option<String> {
    if let Some(target) = redirect_target(command) {
        return Some(target);
    }
    command
        .split_whitespace()
        .skip(1)
        .filter(|t| !t.starts_with('-') && !t.contains('>'))
        .map(strip_quotes)
        .filter(|t| is_file_target(t))
        .last()
}

fn resolve(path: &str, working_dir: &Path) -> String {
    let p = Path::new(path);
    if p.is_absolute() {
        path.to_string()
    } else {
        working_dir.join(p).display().to_string()
    }
}

fn env_assignments(action: &Action) -> Vec<(String, String)> {
    if let Some((name, value)) = action.target.as_deref().and_then(|t| t.split_once('=')) {
        return vec![(name.trim().to_string(), strip_quotes(value))];
    }
    export_re()
        .captures_iter(&action.command)
        .map(|c| (c[1].to_string(), strip_quotes(&c[2])))
        .collect()
}

/// 动作校验通过后应记录的上下文事件（不含 CommandExecuted）
pub fn context_effects(action: &Action, working_dir: &Path) -> Vec<ContextEvent> {
    let target = || {
        action
            .target
            .clone()
            .or_else(|| infer_target(&action.command))
    };
    match action.kind {
        ActionKind::CreateFile => target()
            .map(|t| vec![ContextEvent::FileCreated(resolve(&t, working_dir))])
            .unwrap_or_default(),
        ActionKind::CreateDirectory => target()
            .map(|t| vec![ContextEvent::DirectoryCreated(resolve(&t, working_dir))])
            .unwrap_or_default(),
        ActionKind::ChangeDirectory => target()
            .map(|t| vec![ContextEvent::WorkingDirChanged(PathBuf::from(t))])
            .unwrap_or_default(),
        ActionKind::SetEnv => env_assignments(action)
            .into_iter()
            .map(|(name, value)| ContextEvent::EnvironmentSet { name, value })
            .collect(),
        ActionKind::Command | ActionKind::Check => Vec::new(),
    }
}
