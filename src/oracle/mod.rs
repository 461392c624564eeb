//! 推理 Oracle：能力接口、实现（LLM / Stub）、用量统计与调用网关

pub mod gateway;
pub mod llm;
pub mod stub;
pub mod traits;
pub mod types;
pub mod usage;

pub use gateway::{GatewaySettings, OracleGateway, RetryPolicy};
pub use llm::{extract_json, LlmOracle, Pricing};
pub use stub::StubOracle;
pub use traits::Oracle;
pub use types::{
    ActionSpec, Billed, Capabilities, ErrorInterpretation, OracleError, OutcomeSpec, ParsedResult,
    Solution, UsageStats, ValidationSpec,
};
pub use usage::UsageTracker;
