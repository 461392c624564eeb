//! walkthrough - 教程校验引擎
//!
//! 把自然语言教程逐步解析为可执行计划，执行（或模拟）每一步并校验结果，判断文档与现实是否一致。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **context**: 单次运行的上下文累加器与只读快照
//! - **core**: 错误分类、动作状态机、错误恢复、关闭信号、运行编排
//! - **execution**: 命令执行器（Shell / 模拟）、结果校验、执行引擎
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: tracing 日志初始化
//! - **oracle**: 推理 Oracle 能力接口、实现、用量统计与调用网关
//! - **plan**: 计划结构、Instruction Interpreter、Plan Builder
//! - **report**: 运行报告
//! - **tutorial**: 教程数据模型与加载

pub mod config;
pub mod context;
pub mod core;
pub mod execution;
pub mod llm;
pub mod observability;
pub mod oracle;
pub mod plan;
pub mod report;
pub mod tutorial;

pub use crate::core::{EngineError, FailureKind, TutorialRunner};
pub use report::RunReport;
