//! 上下文累加器：单次运行内的可变状态
//!
//! TutorialContext 由编排器独占；Oracle / Interpreter 只拿到 snapshot() 生成的只读副本。
//! 所有修改走 record(ContextEvent)，步骤推进只能逐节 +1，乱序推进视为编程错误。

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 可记录到上下文的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextEvent {
    CommandExecuted(String),
    FileCreated(String),
    /// 目录与文件分开记录
    DirectoryCreated(String),
    EnvironmentSet { name: String, value: String },
    WorkingDirChanged(PathBuf),
    /// 推进到第 `to` 步（必须恰好等于 current_step + 1）
    StepAdvanced { to: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Out-of-order step advance: current {current}, requested {requested}")]
    OutOfOrderAdvance { current: usize, requested: usize },

    #[error("Step advance beyond total: requested {requested}, total {total}")]
    BeyondTotal { requested: usize, total: usize },
}

/// 单次运行的上下文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TutorialContext {
    pub working_dir: PathBuf,
    pub current_step: usize,
    pub total_steps: usize,
    pub created_files: BTreeSet<String>,
    pub created_directories: BTreeSet<String>,
    pub executed_commands: Vec<String>,
    pub environment: BTreeMap<String, String>,
}

impl TutorialContext {
    pub fn new(working_dir: impl Into<PathBuf>, total_steps: usize) -> Self {
        Self {
            working_dir: working_dir.into(),
            current_step: 0,
            total_steps,
            created_files: BTreeSet::new(),
            created_directories: BTreeSet::new(),
            executed_commands: Vec::new(),
            environment: BTreeMap::new(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// 应用一个事件；只有执行引擎会调用
    pub(crate) fn record(&mut self, event: ContextEvent) -> Result<(), ContextError> {
        match event {
            ContextEvent::CommandExecuted(cmd) => self.executed_commands.push(cmd),
            ContextEvent::FileCreated(path) => {
                self.created_files.insert(path);
            }
            ContextEvent::DirectoryCreated(path) => {
                self.created_directories.insert(path);
            }
            ContextEvent::EnvironmentSet { name, value } => {
                self.environment.insert(name, value);
            }
            ContextEvent::WorkingDirChanged(dir) => {
                self.working_dir = if dir.is_absolute() {
                    dir
                } else {
                    self.working_dir.join(dir)
                };
            }
            ContextEvent::StepAdvanced { to } => {
                if to != self.current_step + 1 {
                    return Err(ContextError::OutOfOrderAdvance {
                        current: self.current_step,
                        requested: to,
                    });
                }
                if to > self.total_steps {
                    return Err(ContextError::BeyondTotal {
                        requested: to,
                        total: self.total_steps,
                    });
                }
                self.current_step = to;
            }
        }
        Ok(())
    }

    /// 只读副本（Oracle 看不到进行中的修改）
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            tutorial: None,
            working_dir: self.working_dir.clone(),
            current_step: self.current_step,
            total_steps: self.total_steps,
            created_files: self.created_files.iter().cloned().collect(),
            created_directories: self.created_directories.iter().cloned().collect(),
            recent_commands: self.executed_commands.clone(),
            omitted_commands: 0,
            environment: self.environment.clone(),
        }
    }
}

/// 传给 Oracle 的只读上下文副本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub tutorial: Option<String>,
    pub working_dir: PathBuf,
    pub current_step: usize,
    pub total_steps: usize,
    pub created_files: Vec<String>,
    pub created_directories: Vec<String>,
    pub recent_commands: Vec<String>,
    /// 压缩时丢弃的较早命令数
    pub omitted_commands: usize,
    pub environment: BTreeMap<String, String>,
}

impl ContextSnapshot {
    pub fn with_tutorial(mut self, title: impl Into<String>) -> Self {
        self.tutorial = Some(title.into());
        self
    }

    /// 覆盖步骤索引（分阶段规划时只携带静态元数据与章节位置）
    pub fn at_step(mut self, step: usize) -> Self {
        self.current_step = step.min(self.total_steps);
        self
    }

    /// 超过 horizon 时只保留最近 horizon 条命令，文件与目录全部保留
    pub fn compress(mut self, horizon: usize) -> Self {
        let len = self.recent_commands.len();
        if len > horizon {
            let dropped = len - horizon;
            self.recent_commands.drain(..dropped);
            self.omitted_commands += dropped;
        }
        self
    }

    /// 渲染为 Prompt 片段
    pub fn to_prompt_section(&self) -> String {
        let mut s = String::new();
        if let Some(title) = &self.tutorial {
            s.push_str(&format!("## Tutorial\n{}\n\n", title));
        }
        s.push_str(&format!(
            "## Progress\nStep {} of {}\nWorking directory: {}\n\n",
            self.current_step,
            self.total_steps,
            self.working_dir.display()
        ));
        if !self.created_files.is_empty() {
            s.push_str("## Files created\n");
            for f in &self.created_files {
                s.push_str(&format!("- {}\n", f));
            }
            s.push('\n');
        }
        if !self.created_directories.is_empty() {
            s.push_str("## Directories created\n");
            for d in &self.created_directories {
                s.push_str(&format!("- {}\n", d));
            }
            s.push('\n');
        }
        if !self.environment.is_empty() {
            s.push_str("## Environment\n");
            for (k, v) in &self.environment {
                s.push_str(&format!("- {}={}\n", k, v));
            }
            s.push('\n');
        }
        if !self.recent_commands.is_empty() {
            s.push_str("## Commands executed\n");
            if self.omitted_commands > 0 {
                s.push_str(&format!("({} earlier commands omitted)\n", self.omitted_commands));
            }
            for c in &self.recent_commands {
                s.push_str(&format!("- {}\n", c));
            }
            s.push('\n');
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_advance_one_at_a_time() {
        let mut ctx = TutorialContext::new("/tmp", 2);
        ctx.record(ContextEvent::StepAdvanced { to: 1 }).unwrap();
        assert_eq!(ctx.current_step, 1);
        assert_eq!(
            ctx.record(ContextEvent::StepAdvanced { to: 3 }),
            Err(ContextError::OutOfOrderAdvance {
                current: 1,
                requested: 3
            })
        );
        ctx.record(ContextEvent::StepAdvanced { to: 2 }).unwrap();
        assert!(matches!(
            ctx.record(ContextEvent::StepAdvanced { to: 3 }),
            Err(ContextError::BeyondTotal { .. })
        ));
        assert_eq!(ctx.current_step, 2);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut ctx = TutorialContext::new("/tmp", 1);
        let snap = ctx.snapshot();
        ctx.record(ContextEvent::CommandExecuted("ls".into())).unwrap();
        assert!(snap.recent_commands.is_empty());
        assert_eq!(ctx.executed_commands, vec!["ls".to_string()]);
    }

    #[test]
    fn test_compress_keeps_recent_commands_and_all_files() {
        let mut ctx = TutorialContext::new("/tmp", 1);
        for i in 0..5 {
            ctx.record(ContextEvent::CommandExecuted(format!("echo {}", i)))
                .unwrap();
            ctx.record(ContextEvent::FileCreated(format!("f{}", i)))
                .unwrap();
        }
        let snap = ctx.snapshot().compress(2);
        assert_eq!(snap.recent_commands, vec!["echo 3", "echo 4"]);
        assert_eq!(snap.omitted_commands, 3);
        assert_eq!(snap.created_files.len(), 5);
        assert!(snap.to_prompt_section().contains("3 earlier commands omitted"));
    }

    #[test]
    fn test_relative_working_dir_change() {
        let mut ctx = TutorialContext::new("/srv", 1);
        ctx.record(ContextEvent::WorkingDirChanged(PathBuf::from("app")))
            .unwrap();
        assert_eq!(ctx.working_dir(), Path::new("/srv/app"));
        ctx.record(ContextEvent::WorkingDirChanged(PathBuf::from("/opt")))
            .unwrap();
        assert_eq!(ctx.working_dir(), Path::new("/opt"));
    }
}
