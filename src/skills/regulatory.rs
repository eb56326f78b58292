//! Regulatory research skill.
//!
//! Looks up municipal waste and recycling ordinances for the property's city,
//! summarizes them with the LLM, and caches the findings per project so
//! repeat analyses skip the search.
//!
//! Compliance determination needs per-property service data the system does
//! not collect, so `compliance_status` is always reported as "unknown".

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{Error, SkillError};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, extract_json_object};
use crate::search::{SearchProvider, SearchQuery};
use crate::skills::{Progress, Skill, SkillContext, SkillResult};
use crate::store::Database;

const SYSTEM_PROMPT: &str = "You are an analyst summarizing municipal waste and recycling \
ordinances for a commercial property owner. Respond with a single JSON object and nothing \
else. Fields: ordinances (array of {title, summary, source_url}), \
recycling_required (boolean or null), organics_diversion_required (boolean or null), \
notes (string). Only cite the provided sources.";

pub struct RegulatoryResearchSkill {
    llm: Arc<dyn LlmProvider>,
    search: Arc<dyn SearchProvider>,
    db: Arc<dyn Database>,
    cache_days: u32,
}

impl RegulatoryResearchSkill {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        search: Arc<dyn SearchProvider>,
        db: Arc<dyn Database>,
        cache_days: u32,
    ) -> Self {
        Self {
            llm,
            search,
            db,
            cache_days,
        }
    }
}

#[async_trait]
impl Skill for RegulatoryResearchSkill {
    fn name(&self) -> &str {
        "regulatory-research"
    }

    fn description(&self) -> &str {
        "Researches municipal waste ordinances for the property's jurisdiction"
    }

    async fn execute(
        &self,
        context: &SkillContext,
        progress: &Progress,
    ) -> Result<SkillResult, Error> {
        if let Some(cached) = self
            .db
            .get_cached_research(context.project_id, self.cache_days)
            .await?
        {
            debug!(project_id = %context.project_id, "Using cached regulatory research");
            progress.report(100, Some("Regulatory research (cached)"));
            return Ok(SkillResult::ok(cached.findings));
        }

        let project = &context.project;
        progress.report(10, Some("Searching municipal ordinances"));

        let query = SearchQuery::new(format!(
            "{} {} commercial waste recycling ordinance",
            project.city, project.state
        ))
        .with_domains(vec![".gov".to_string()]);

        let hits = self.search.search(&query).await?;
        if hits.is_empty() {
            info!(
                city = %project.city,
                state = %project.state,
                "No ordinance sources found"
            );
            return Ok(SkillResult::fail(format!(
                "no ordinances found for {}, {}",
                project.city, project.state
            )));
        }

        progress.report(50, Some("Summarizing ordinances"));

        let sources_block = hits
            .iter()
            .map(|h| format!("URL: {}\nTitle: {}\nExcerpt: {}", h.url, h.title, h.snippet))
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = CompletionRequest::new(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Jurisdiction: {}, {}\nProperty type: {}\n\nSources:\n\n{sources_block}",
                project.city, project.state, project.property_type
            )),
        ]);

        let response = self.llm.complete(request).await?;
        let json_str = extract_json_object(&response.content);
        let mut findings: serde_json::Value =
            serde_json::from_str(&json_str).map_err(|e| SkillError::MalformedOutput {
                skill: self.name().to_string(),
                reason: e.to_string(),
            })?;
        if !findings.is_object() {
            return Err(SkillError::MalformedOutput {
                skill: self.name().to_string(),
                reason: "findings are not a JSON object".to_string(),
            }
            .into());
        }

        // Determination requires service-level data we do not hold.
        findings["compliance_status"] = json!("unknown");

        progress.report(90, Some("Caching findings"));
        if let Err(e) = self
            .db
            .put_cached_research(context.project_id, &findings)
            .await
        {
            warn!(project_id = %context.project_id, "Failed to cache research: {e}");
        }

        progress.report(100, Some("Regulatory research complete"));
        let sources = hits.into_iter().map(|h| h.url).collect();
        Ok(SkillResult::ok(findings).with_sources(sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use crate::error::LlmError;
    use crate::llm::CompletionResponse;
    use crate::search::SearchHit;
    use crate::skills::test_support::sample_context;
    use crate::store::LibSqlBackend;

    struct MockLlm {
        reply: String,
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.reply.clone(),
                input_tokens: 0,
                output_tokens: 0,
            })
        }
    }

    struct MockSearch {
        hits: Vec<SearchHit>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl MockSearch {
        fn with_hits(hits: Vec<SearchHit>) -> Self {
            Self {
                hits,
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SearchProvider for MockSearch {
        async fn search(&self, _query: &SearchQuery) -> Result<Vec<SearchHit>, SearchError> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(self.hits.clone())
        }
    }

    fn city_hit() -> SearchHit {
        SearchHit {
            url: "https://austintexas.gov/waste-ordinance".into(),
            title: "Universal Recycling Ordinance".into(),
            snippet: "Commercial properties must provide recycling...".into(),
        }
    }

    async fn db_for(context: &crate::skills::SkillContext) -> Arc<dyn Database> {
        let backend = LibSqlBackend::new_memory().await.unwrap();
        let mut project = context.project.clone();
        project.id = context.project_id;
        backend.insert_project(&project).await.unwrap();
        Arc::new(backend)
    }

    #[tokio::test]
    async fn compliance_status_is_always_unknown() {
        let reply = r#"{"ordinances": [{"title": "URO", "summary": "recycling required",
                        "source_url": "https://austintexas.gov/waste-ordinance"}],
                        "recycling_required": true, "organics_diversion_required": null,
                        "notes": "", "compliance_status": "compliant"}"#;
        let context = sample_context();
        let db = db_for(&context).await;

        let skill = RegulatoryResearchSkill::new(
            Arc::new(MockLlm {
                reply: reply.into(),
            }),
            Arc::new(MockSearch::with_hits(vec![city_hit()])),
            db,
            90,
        );
        let result = skill.execute(&context, &Progress::noop()).await.unwrap();

        assert!(result.success);
        // Even when the model claims a determination, it is overwritten.
        assert_eq!(result.data["compliance_status"], "unknown");
        assert_eq!(
            result.sources,
            vec!["https://austintexas.gov/waste-ordinance"]
        );
    }

    #[tokio::test]
    async fn no_search_hits_is_recoverable() {
        let context = sample_context();
        let db = db_for(&context).await;
        let skill = RegulatoryResearchSkill::new(
            Arc::new(MockLlm { reply: "{}".into() }),
            Arc::new(MockSearch::with_hits(Vec::new())),
            db,
            90,
        );
        let result = skill.execute(&context, &Progress::noop()).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("no ordinances found"));
    }

    #[tokio::test]
    async fn second_run_hits_the_cache() {
        let reply = r#"{"ordinances": [], "recycling_required": null,
                        "organics_diversion_required": null, "notes": "nothing found"}"#;
        let context = sample_context();
        let db = db_for(&context).await;
        let search = Arc::new(MockSearch::with_hits(vec![city_hit()]));

        let skill = RegulatoryResearchSkill::new(
            Arc::new(MockLlm {
                reply: reply.into(),
            }),
            search.clone(),
            db,
            90,
        );

        skill.execute(&context, &Progress::noop()).await.unwrap();
        let second = skill.execute(&context, &Progress::noop()).await.unwrap();

        assert!(second.success);
        assert_eq!(second.data["compliance_status"], "unknown");
        assert_eq!(search.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
