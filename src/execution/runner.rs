//! 命令执行器：真实 Shell 与模拟执行
//!
//! ShellRunner 通过 sh -c / cmd /C 执行，工作目录与环境变量取自上下文，带超时；
//! 明显破坏系统的子串一律拒绝。SimulatedRunner 只记录命令，不产生副作用。

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;

/// 无论教程怎么写都不执行的子串
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "mkfs",
    "dd if=/dev/zero of=/dev/",
    "> /dev/sd",
    "chmod -r 777 /",
    ":(){ :|:& };:", // fork bomb
];

/// 一次命令执行的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    /// 被信号终止时为 None
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub simulated: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn simulated_ok() -> Self {
        Self {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            simulated: true,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    #[error("Empty command")]
    Empty,

    #[error("Forbidden pattern: {0}")]
    Forbidden(String),

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to spawn command: {0}")]
    Spawn(String),
}

/// 一次执行请求：命令 + 上下文提供的工作目录与环境
#[derive(Debug, Clone, Copy)]
pub struct CommandRequest<'a> {
    pub command: &'a str,
    pub working_dir: &'a Path,
    pub env: &'a BTreeMap<String, String>,
    pub timeout: Duration,
}

/// 命令执行能力
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, request: CommandRequest<'_>) -> Result<CommandOutput, RunnerError>;

    /// 模拟模式下校验器跳过依赖真实输出的规则
    fn is_simulated(&self) -> bool {
        false
    }
}

fn check_forbidden(command: &str) -> Result<(), RunnerError> {
    if command.trim().is_empty() {
        return Err(RunnerError::Empty);
    }
    let lower = command.to_lowercase();
    for forbidden in FORBIDDEN_SUBSTR {
        if lower.contains(forbidden) {
            return Err(RunnerError::Forbidden((*forbidden).to_string()));
        }
    }
    Ok(())
}

/// 真实 Shell 执行
#[derive(Debug, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, request: CommandRequest<'_>) -> Result<CommandOutput, RunnerError> {
        let command = request.command.trim();
        check_forbidden(command)?;

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(request.working_dir)
            .envs(request.env)
            .kill_on_drop(true);

        let start = Instant::now();
        let output = tokio::time::timeout(request.timeout, cmd.output())
            .await
            .map_err(|_| RunnerError::Timeout(request.timeout))?
            .map_err(|e| RunnerError::Spawn(e.to_string()))?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            simulated: false,
        })
    }
}

/// 模拟执行：记录命令并返回成功；可为特定命令预设结果（测试用）
#[derive(Debug, Default)]
pub struct SimulatedRunner {
    scripted: HashMap<String, CommandOutput>,
    executed: Mutex<Vec<String>>,
}

impl SimulatedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为完全匹配的命令预设退出码与输出
    pub fn with_outcome(
        mut self,
        command: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        self.scripted.insert(
            command.into(),
            CommandOutput {
                exit_code: Some(exit_code),
                stdout: stdout.into(),
                stderr: stderr.into(),
                duration_ms: 0,
                simulated: true,
            },
        );
        self
    }

    /// 按顺序返回所有收到的命令
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for SimulatedRunner {
    async fn run(&self, request: CommandRequest<'_>) -> Result<CommandOutput, RunnerError> {
        let command = request.command.trim();
        check_forbidden(command)?;
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(command.to_string());
        }
        tracing::debug!(command = %command, "simulated command");
        Ok(self
            .scripted
            .get(command)
            .cloned()
            .unwrap_or_else(CommandOutput::simulated_ok))
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(
        command: &'a str,
        dir: &'a Path,
        env: &'a BTreeMap<String, String>,
    ) -> CommandRequest<'a> {
        CommandRequest {
            command,
            working_dir: dir,
            env,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_forbidden_patterns() {
        assert!(matches!(
            check_forbidden("sudo rm -rf / --no-preserve-root"),
            Err(RunnerError::Forbidden(_))
        ));
        assert_eq!(check_forbidden("   "), Err(RunnerError::Empty));
        assert!(check_forbidden("rm -rf build").is_ok());
    }

    #[tokio::test]
    async fn test_simulated_records_and_scripts() {
        let runner = SimulatedRunner::new().with_outcome("false", 1, "", "boom");
        let env = BTreeMap::new();
        let dir = Path::new("/");
        let ok = runner.run(request("echo hi", dir, &env)).await.unwrap();
        assert!(ok.success());
        assert!(ok.simulated);
        let failed = runner.run(request("false", dir, &env)).await.unwrap();
        assert_eq!(failed.exit_code, Some(1));
        assert_eq!(runner.executed(), vec!["echo hi", "false"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_uses_working_dir_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = BTreeMap::new();
        env.insert("GREETING".to_string(), "hello".to_string());
        let out = ShellRunner::new()
            .run(request("echo $GREETING; pwd", dir.path(), &env))
            .await
            .unwrap();
        assert!(out.success());
        assert!(out.stdout.starts_with("hello"));
        let canonical = dir.path().canonicalize().unwrap();
        assert!(out.stdout.contains(canonical.file_name().unwrap().to_str().unwrap()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_timeout() {
        let env = BTreeMap::new();
        let req = CommandRequest {
            command: "sleep 5",
            working_dir: Path::new("/"),
            env: &env,
            timeout: Duration::from_millis(100),
        };
        let err = ShellRunner::new().run(req).await.unwrap_err();
        assert!(matches!(err, RunnerError::Timeout(_)));
    }
}
