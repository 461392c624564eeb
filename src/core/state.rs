//! 动作状态机：Pending -> Executing -> Validated / Mismatched / ExecutionError
//!
//! 失败后可进入 Recovering，再次 Executing；恢复耗尽或被关闭时落到终态 Mismatched / Aborted。
//! 取消或 Oracle 故障可从任何非终态直接 Aborted。

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionState {
    Pending,
    Executing,
    Validated,
    Mismatched,
    ExecutionError,
    Recovering,
    Aborted,
}

impl ActionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionState::Validated | ActionState::Mismatched | ActionState::Aborted
        )
    }

    /// 合法迁移表
    pub fn can_transition_to(self, next: ActionState) -> bool {
        use ActionState::*;
        match (self, next) {
            (_, Aborted) => self != Validated && self != Aborted,
            (Pending, Executing) => true,
            (Executing, Validated | Mismatched | ExecutionError) => true,
            (Mismatched | ExecutionError, Recovering) => true,
            (Recovering, Executing) => true,
            // 恢复耗尽
            (Recovering | ExecutionError, Mismatched) => true,
            _ => false,
        }
    }
}

/// 单个动作的状态与迁移轨迹
#[derive(Clone, Debug)]
pub struct ActionLifecycle {
    state: ActionState,
    history: Vec<ActionState>,
}

impl Default for ActionLifecycle {
    fn default() -> Self {
        Self {
            state: ActionState::Pending,
            history: vec![ActionState::Pending],
        }
    }
}

impl ActionLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ActionState {
        self.state
    }

    pub fn history(&self) -> &[ActionState] {
        &self.history
    }

    /// 迁移；非法迁移属于编程错误，记录后忽略
    pub fn transition(&mut self, next: ActionState) {
        if !self.state.can_transition_to(next) {
            debug_assert!(false, "illegal transition {:?} -> {:?}", self.state, next);
            tracing::error!(from = ?self.state, to = ?next, "illegal action state transition");
            return;
        }
        self.state = next;
        self.history.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut lc = ActionLifecycle::new();
        lc.transition(ActionState::Executing);
        lc.transition(ActionState::Validated);
        assert_eq!(lc.state(), ActionState::Validated);
        assert!(lc.state().is_terminal());
        assert_eq!(
            lc.history(),
            &[
                ActionState::Pending,
                ActionState::Executing,
                ActionState::Validated
            ]
        );
    }

    #[test]
    fn test_recovery_path() {
        let mut lc = ActionLifecycle::new();
        for next in [
            ActionState::Executing,
            ActionState::ExecutionError,
            ActionState::Recovering,
            ActionState::Executing,
            ActionState::Validated,
        ] {
            lc.transition(next);
        }
        assert_eq!(lc.history().len(), 6);
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!ActionState::Pending.can_transition_to(ActionState::Validated));
        assert!(!ActionState::Validated.can_transition_to(ActionState::Aborted));
        assert!(!ActionState::Validated.can_transition_to(ActionState::Executing));
        assert!(ActionState::Recovering.can_transition_to(ActionState::Aborted));
        assert!(!ActionState::ExecutionError.is_terminal());
    }
}
