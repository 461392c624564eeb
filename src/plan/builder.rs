//! Plan Builder：遍历章节与指令，调用 Interpreter 组装 ExecutionPlan
//!
//! 章节按编号升序、指令按文档顺序；max_steps 在任何 Oracle 调用前检查，绝不为必然被拒的计划花钱。

use crate::context::ContextSnapshot;
use crate::core::EngineError;
use crate::plan::{ExecutionPlan, InstructionInterpreter, PlanStep};
use crate::tutorial::{Section, Tutorial};

pub struct PlanBuilder<'a> {
    interpreter: InstructionInterpreter<'a>,
    max_steps: usize,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(interpreter: InstructionInterpreter<'a>, max_steps: usize) -> Self {
        Self {
            interpreter,
            max_steps,
        }
    }

    /// 指令总数上限检查（不产生任何 Oracle 调用）
    pub fn check_limits(&self, tutorial: &Tutorial) -> Result<(), EngineError> {
        let count = tutorial.instruction_count();
        if count > self.max_steps {
            tracing::warn!(count, max = self.max_steps, "tutorial exceeds max_steps");
            return Err(EngineError::TooManySteps {
                count,
                max: self.max_steps,
            });
        }
        Ok(())
    }

    /// 分阶段规划：整份计划在执行前生成，每节只看到 base 快照 + 章节位置
    pub async fn build_plan(
        &self,
        tutorial: &Tutorial,
        base: &ContextSnapshot,
    ) -> Result<ExecutionPlan, EngineError> {
        self.check_limits(tutorial)?;

        let mut plan = ExecutionPlan::default();
        for (index, section) in tutorial.ordered_sections().into_iter().enumerate() {
            let snapshot = base.clone().at_step(index);
            plan.steps.push(self.plan_section(section, &snapshot).await?);
        }
        tracing::info!(
            steps = plan.len(),
            actions = plan.action_count(),
            "execution plan built"
        );
        Ok(plan)
    }

    /// 规划单个章节（交错模式下由编排器在执行前调用）
    pub async fn plan_section(
        &self,
        section: &Section,
        snapshot: &ContextSnapshot,
    ) -> Result<PlanStep, EngineError> {
        let mut instructions = Vec::with_capacity(section.instructions.len());
        for (index, raw) in section.instructions.iter().enumerate() {
            let planned = self
                .interpreter
                .interpret(section.number, index, raw, snapshot)
                .await?;
            instructions.push(planned);
        }
        Ok(PlanStep {
            section_number: section.number,
            title: section.title.clone(),
            independent: section.independent,
            instructions,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::EngineSection;
    use crate::context::TutorialContext;
    use crate::core::FailureKind;
    use crate::oracle::{ActionSpec, GatewaySettings, OracleGateway, ParsedResult, StubOracle};
    use crate::tutorial::RawInstruction;

    fn tutorial(instructions_per_section: &[usize]) -> Tutorial {
        let mut t = Tutorial::new("demo");
        // 逆序插入，验证按编号排序
        for (i, n) in instructions_per_section.iter().enumerate().rev() {
            let mut s = Section::new(i as u32 + 1, format!("s{}", i + 1));
            for j in 0..*n {
                s = s.instruction(RawInstruction::new(format!("step {}.{}", i + 1, j)));
            }
            t = t.section(s);
        }
        t
    }

    #[tokio::test]
    async fn test_too_many_steps_makes_no_oracle_calls() {
        let stub = Arc::new(StubOracle::new());
        let gateway =
            OracleGateway::new(stub.clone(), GatewaySettings::default(), CancellationToken::new());
        let config = EngineSection {
            max_steps: 3,
            ..EngineSection::default()
        };
        let builder = PlanBuilder::new(InstructionInterpreter::new(&gateway, &config), 3);
        let base = TutorialContext::new("/", 2).snapshot();
        let err = builder
            .build_plan(&tutorial(&[2, 2]), &base)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::TooManySteps);
        assert_eq!(stub.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_plan_follows_section_order() {
        let stub = Arc::new(
            StubOracle::new()
                .with_parse(
                    "step 1.0",
                    ParsedResult::new("a", 0.9).action(ActionSpec::new("echo a")),
                )
                .with_parse(
                    "step 2.0",
                    ParsedResult::new("b", 0.9).action(ActionSpec::new("echo b")),
                ),
        );
        let gateway =
            OracleGateway::new(stub.clone(), GatewaySettings::default(), CancellationToken::new());
        let config = EngineSection::default();
        let builder = PlanBuilder::new(InstructionInterpreter::new(&gateway, &config), 10);
        let base = TutorialContext::new("/", 2).snapshot();
        let plan = builder.build_plan(&tutorial(&[1, 2]), &base).await.unwrap();

        let numbers: Vec<u32> = plan.steps.iter().map(|s| s.section_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(plan.steps[1].instructions.len(), 2);
        assert_eq!(plan.action_count(), 2);
        assert_eq!(stub.parse_calls(), 3);
        assert_eq!(gateway.run_usage().requests, 3);
    }
}
