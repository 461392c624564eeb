//! 运行取消：Ctrl+C / SIGTERM / 运行时限
//!
//! 三种来源都落到同一个 CancellationToken；运行在下一个挂起点停止，
//! 上下文保持最后一致状态，已执行的动作不回滚。只记录第一个触发原因。

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// 取消原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 超过 engine.deadline_secs
    Deadline,
}

#[derive(Debug, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: OnceLock<ShutdownReason>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 传给 TutorialRunner 的运行 token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.reason.set(reason).is_ok() {
            tracing::info!(?reason, "cancelling run");
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }

    /// 运行时限：到期后取消；运行先结束则随 token 一起退出
    pub fn cancel_after(self: &Arc<Self>, limit: Duration) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = manager.token.cancelled() => {}
                _ = tokio::time::sleep(limit) => manager.shutdown(ShutdownReason::Deadline),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!manager.is_shutdown());
        manager.shutdown(ShutdownReason::UserInitiated);
        manager.shutdown(ShutdownReason::Signal);
        assert!(token.is_cancelled());
        assert_eq!(manager.reason(), Some(ShutdownReason::UserInitiated));
    }

    #[tokio::test]
    async fn test_deadline_cancels_token() {
        let manager = Arc::new(ShutdownManager::new());
        manager.cancel_after(Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(5), manager.token().cancelled())
            .await
            .unwrap();
        assert_eq!(manager.reason(), Some(ShutdownReason::Deadline));
    }
}
