//! 规划层：计划数据结构、Instruction Interpreter、Plan Builder

pub mod builder;
pub mod interpreter;
pub mod types;

pub use builder::PlanBuilder;
pub use interpreter::{to_parsed_instruction, InstructionInterpreter};
pub use types::{
    Action, ActionKind, ExecutionPlan, ExpectedOutcome, ParsedInstruction, PlanStep,
    PlannedInstruction, Validation, ValidationType,
};
