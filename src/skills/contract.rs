//! Contract analysis skill.
//!
//! Reads hauler service agreements and surfaces the terms that matter when
//! renegotiating: term length, auto-renewal window, rate escalators, and
//! termination notice.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::error::{Error, LlmError, SkillError};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, extract_json_object};
use crate::skills::{Progress, Skill, SkillContext, SkillResult};
use crate::store::Contract;

const SYSTEM_PROMPT: &str = "You are an analyst reviewing commercial waste hauler service \
agreements. Respond with a single JSON object and nothing else. Fields: \
term_months (integer or null), auto_renews (boolean or null), \
renewal_notice_days (integer or null), rate_escalator_percent (number or null), \
termination_notice_days (integer or null), red_flags (array of strings). \
Use null for terms the contract does not state.";

/// Terms pulled out of one contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractTerms {
    pub term_months: Option<u32>,
    pub auto_renews: Option<bool>,
    pub renewal_notice_days: Option<u32>,
    pub rate_escalator_percent: Option<f64>,
    pub termination_notice_days: Option<u32>,
    #[serde(default)]
    pub red_flags: Vec<String>,
}

pub struct ContractAnalyzerSkill {
    llm: Arc<dyn LlmProvider>,
}

impl ContractAnalyzerSkill {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    async fn analyze_one(&self, contract: &Contract) -> Result<ContractTerms, Error> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Analyze this service agreement with {}:\n\n{}",
                contract.hauler, contract.raw_text
            )),
        ]);

        let response = self.llm.complete(request).await?;
        let json_str = extract_json_object(&response.content);
        let terms: ContractTerms =
            serde_json::from_str(&json_str).map_err(|e| SkillError::MalformedOutput {
                skill: self.name().to_string(),
                reason: format!("contract {}: {e}", contract.id),
            })?;
        Ok(terms)
    }
}

#[async_trait]
impl Skill for ContractAnalyzerSkill {
    fn name(&self) -> &str {
        "contract-analyzer"
    }

    fn description(&self) -> &str {
        "Surfaces renewal, escalator, and termination terms from hauler contracts"
    }

    async fn execute(
        &self,
        context: &SkillContext,
        progress: &Progress,
    ) -> Result<SkillResult, Error> {
        if context.contracts.is_empty() {
            return Ok(SkillResult::fail("no contracts uploaded for this project"));
        }

        let total = context.contracts.len();
        let mut analyses = Vec::with_capacity(total);

        for (i, contract) in context.contracts.iter().enumerate() {
            progress.report(
                (i * 100 / total) as u8,
                Some(&format!("Analyzing contract {} of {total}", i + 1)),
            );

            match self.analyze_one(contract).await {
                Ok(terms) => analyses.push(json!({
                    "contract_id": contract.id,
                    "hauler": contract.hauler,
                    "terms": terms,
                })),
                Err(e @ Error::Llm(LlmError::AuthFailed { .. }))
                | Err(e @ Error::Llm(LlmError::RequestFailed { .. })) => return Err(e),
                Err(e) => {
                    warn!(contract_id = %contract.id, "Contract analysis failed: {e}");
                }
            }
        }

        progress.report(100, Some("Contract review complete"));

        if analyses.is_empty() {
            return Ok(SkillResult::fail(format!(
                "all {total} contract analyses failed"
            )));
        }

        Ok(SkillResult::ok(json!({ "contracts": analyses })))
    }
}
