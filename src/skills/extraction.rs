//! Invoice extraction skill.
//!
//! Turns raw invoice text into structured line items via the LLM and writes
//! the result back onto each invoice row.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{Error, LlmError, SkillError};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, extract_json_object};
use crate::skills::{Progress, Skill, SkillContext, SkillResult};
use crate::store::{Database, Invoice};

const SYSTEM_PROMPT: &str = "You are an analyst extracting structured data from commercial \
waste hauler invoices. Respond with a single JSON object and nothing else. Fields: \
hauler (string), period (string, YYYY-MM), total_amount (string decimal), \
contamination_charges (string decimal), bulk_charges (string decimal), \
line_items (array of {description, amount}). Use \"0\" for charges that do not appear.";

/// Structured fields pulled out of one invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedInvoice {
    pub hauler: String,
    pub period: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub contamination_charges: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub bulk_charges: Decimal,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
}

pub struct BatchExtractorSkill {
    llm: Arc<dyn LlmProvider>,
    db: Arc<dyn Database>,
}

impl BatchExtractorSkill {
    pub fn new(llm: Arc<dyn LlmProvider>, db: Arc<dyn Database>) -> Self {
        Self { llm, db }
    }

    async fn extract_one(&self, invoice: &Invoice) -> Result<ExtractedInvoice, Error> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Extract this invoice (billing period hint: {}):\n\n{}",
                invoice.period, invoice.raw_text
            )),
        ]);

        let response = self.llm.complete(request).await?;
        let json_str = extract_json_object(&response.content);
        let extracted: ExtractedInvoice =
            serde_json::from_str(&json_str).map_err(|e| SkillError::MalformedOutput {
                skill: self.name().to_string(),
                reason: format!("invoice {}: {e}", invoice.id),
            })?;
        Ok(extracted)
    }
}

#[async_trait]
impl Skill for BatchExtractorSkill {
    fn name(&self) -> &str {
        "batch-extractor"
    }

    fn description(&self) -> &str {
        "Extracts structured charges from raw invoice text"
    }

    async fn execute(
        &self,
        context: &SkillContext,
        progress: &Progress,
    ) -> Result<SkillResult, Error> {
        let pending: Vec<&Invoice> = context
            .invoices
            .iter()
            .filter(|inv| inv.extracted.is_none())
            .collect();

        if context.invoices.is_empty() {
            return Ok(SkillResult::fail("no invoices uploaded for this project"));
        }
        if pending.is_empty() {
            debug!(project_id = %context.project_id, "All invoices already extracted");
            return Ok(SkillResult::ok(json!({
                "extracted": 0,
                "already_extracted": context.invoices.len(),
            })));
        }

        let total = pending.len();
        let mut extracted_count = 0usize;
        let mut failures: Vec<String> = Vec::new();

        for (i, invoice) in pending.iter().enumerate() {
            progress.report(
                (i * 100 / total) as u8,
                Some(&format!("Extracting invoice {} of {total}", i + 1)),
            );

            match self.extract_one(invoice).await {
                Ok(extracted) => {
                    let value = serde_json::to_value(&extracted)
                        .map_err(crate::error::LlmError::Json)
                        .map_err(Error::from)?;
                    self.db.update_invoice_extracted(invoice.id, &value).await?;
                    extracted_count += 1;
                }
                // Auth and transport faults are not per-invoice problems;
                // they fail the whole job.
                Err(e @ Error::Llm(LlmError::AuthFailed { .. }))
                | Err(e @ Error::Llm(LlmError::RequestFailed { .. })) => return Err(e),
                Err(e) => {
                    warn!(invoice_id = %invoice.id, "Invoice extraction failed: {e}");
                    failures.push(format!("{}: {e}", invoice.id));
                }
            }
        }

        progress.report(100, Some("Extraction complete"));

        if extracted_count == 0 {
            return Ok(SkillResult::fail(format!(
                "all {total} invoice extractions failed: {}",
                failures.join("; ")
            )));
        }

        Ok(SkillResult::ok(json!({
            "extracted": extracted_count,
            "failed": failures,
            "already_extracted": context.invoices.len() - total,
        })))
    }
}
