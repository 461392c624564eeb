//! 核心编排层：错误分类、动作状态机、错误恢复、关闭信号、运行编排

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod shutdown;
pub mod state;

pub use error::{EngineError, FailureKind};
pub use orchestrator::{RunSettings, TutorialRunner};
pub use recovery::{RecoveryEngine, RecoverySession};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{ActionLifecycle, ActionState};
