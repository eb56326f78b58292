//! Skills — the analysis units jobs are routed to.
//!
//! A skill receives a fully assembled `SkillContext` and a `Progress` handle,
//! does its work (LLM calls, web search, pure computation), and returns a
//! `SkillResult`. A `SkillResult` with `success: false` is a recoverable
//! outcome and still completes the job; a returned `Err` fails it.

pub mod analytics;
pub mod contract;
pub mod extraction;
pub mod regulatory;

pub use analytics::{CostOptimizerSkill, WastewiseAnalyticsSkill};
pub use contract::ContractAnalyzerSkill;
pub use extraction::BatchExtractorSkill;
pub use regulatory::RegulatoryResearchSkill;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Error;
use crate::store::{Contract, HaulLog, Invoice, Project};

// ── Skill contract ──────────────────────────────────────────────────

/// Everything a skill gets to see about the project it runs against.
#[derive(Debug, Clone)]
pub struct SkillContext {
    pub project_id: Uuid,
    pub user_id: String,
    pub project: Project,
    pub invoices: Vec<Invoice>,
    pub haul_logs: Vec<HaulLog>,
    pub contracts: Vec<Contract>,
}

/// Outcome of a skill run.
#[derive(Debug, Clone, Serialize)]
pub struct SkillResult {
    pub success: bool,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SkillResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            confidence: None,
            sources: Vec::new(),
            error: None,
        }
    }

    /// Recoverable failure: the job still completes, with this result as its
    /// payload.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            confidence: None,
            sources: Vec::new(),
            error: Some(reason.into()),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }
}

/// An analysis unit.
#[async_trait]
pub trait Skill: Send + Sync {
    /// Registry key. Kebab-case, stable across releases.
    fn name(&self) -> &str;

    /// One-line summary for logs.
    fn description(&self) -> &str;

    async fn execute(
        &self,
        context: &SkillContext,
        progress: &Progress,
    ) -> Result<SkillResult, Error>;
}

// ── Progress reporting ──────────────────────────────────────────────

type ProgressSink = Arc<dyn Fn(u8, Option<&str>) + Send + Sync>;

/// Monotone progress reporter handed to skills.
///
/// Reports that would move progress backwards are dropped, so callers can
/// report phase-local estimates without coordinating.
pub struct Progress {
    sink: ProgressSink,
    high_water: AtomicU8,
}

impl Progress {
    pub fn new(sink: ProgressSink) -> Self {
        Self {
            sink,
            high_water: AtomicU8::new(0),
        }
    }

    /// Reporter that discards all updates.
    pub fn noop() -> Self {
        Self::new(Arc::new(|_, _| {}))
    }

    /// Report progress as a percentage with an optional step label. Values
    /// are clamped to 100 and never move backwards.
    pub fn report(&self, percent: u8, step: Option<&str>) {
        let percent = percent.min(100);
        let prev = self.high_water.fetch_max(percent, Ordering::SeqCst);
        if percent >= prev {
            (self.sink)(percent, step);
        }
    }

    /// Last value reported.
    pub fn current(&self) -> u8 {
        self.high_water.load(Ordering::SeqCst)
    }

    /// Clone of the underlying sink, for wrapping reporters.
    pub(crate) fn sink_handle(&self) -> ProgressSink {
        self.sink.clone()
    }
}

// ── Registry ────────────────────────────────────────────────────────

/// Immutable lookup table from skill name to skill.
///
/// Built once at startup with every skill the router can target; handed to
/// the executor explicitly rather than reached through a global.
pub struct SkillRegistry {
    skills: HashMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self {
            skills: HashMap::new(),
        }
    }

    /// Register a skill under its own name. Last registration wins on
    /// duplicate names.
    pub fn register(mut self, skill: Arc<dyn Skill>) -> Self {
        self.skills.insert(skill.name().to_string(), skill);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.skills.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn count(&self) -> usize {
        self.skills.len()
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Skill that returns a canned result.
    pub struct StaticSkill {
        pub skill_name: &'static str,
        pub result: SkillResult,
    }

    #[async_trait]
    impl Skill for StaticSkill {
        fn name(&self) -> &str {
            self.skill_name
        }

        fn description(&self) -> &str {
            "static result for tests"
        }

        async fn execute(
            &self,
            _context: &SkillContext,
            _progress: &Progress,
        ) -> Result<SkillResult, Error> {
            Ok(self.result.clone())
        }
    }

    pub fn sample_context() -> SkillContext {
        let project_id = Uuid::new_v4();
        SkillContext {
            project_id,
            user_id: "user-1".to_string(),
            project: Project {
                id: project_id,
                user_id: "user-1".to_string(),
                property_name: "Woodland Court".to_string(),
                units: 200,
                city: "Austin".to_string(),
                state: "TX".to_string(),
                property_type: "multifamily".to_string(),
                equipment_type: "compactor".to_string(),
                status: "active".to_string(),
            },
            invoices: Vec::new(),
            haul_logs: Vec::new(),
            contracts: Vec::new(),
        }
    }
}
