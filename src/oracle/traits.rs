//! 推理 Oracle 能力接口
//!
//! 解析指令 / 解释错误 / 报告用量 / 报告能力；真实服务、确定性 Stub、其它厂商均实现此 trait，调用方无感知。

use async_trait::async_trait;

use crate::context::ContextSnapshot;
use crate::oracle::{Billed, Capabilities, ErrorInterpretation, ParsedResult, UsageStats};
use crate::tutorial::RawInstruction;

#[async_trait]
pub trait Oracle: Send + Sync {
    /// 将一条指令解析为意图、动作与置信度；返回值携带本次调用的用量
    async fn parse_instruction(
        &self,
        instruction: &RawInstruction,
        context: &ContextSnapshot,
    ) -> Billed<ParsedResult>;

    /// 诊断失败并给出候选修复方案
    async fn interpret_error(
        &self,
        error_text: &str,
        context: &ContextSnapshot,
    ) -> Billed<ErrorInterpretation>;

    /// 实例累计用量快照（无副作用）
    fn usage_stats(&self) -> UsageStats;

    fn capabilities(&self) -> Capabilities;
}
