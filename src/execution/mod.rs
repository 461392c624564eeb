//! 执行层：命令执行器、结果校验、上下文效果推断、执行引擎

pub mod effects;
pub mod engine;
pub mod runner;
pub mod validator;

pub use effects::{context_effects, infer_target};
pub use engine::{ExecutionEngine, ExecutionSettings, StepExecution};
pub use runner::{
    CommandOutput, CommandRequest, CommandRunner, RunnerError, ShellRunner, SimulatedRunner,
};
pub use validator::{ValidationResult, ValidationStatus, Validator};
