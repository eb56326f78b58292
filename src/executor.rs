//! Job execution: route, resolve identity, assemble context, run the skill.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{DatabaseError, Result, SkillError};
use crate::identity::IdentityResolver;
use crate::router;
use crate::skills::{Progress, SkillContext, SkillRegistry, SkillResult};
use crate::store::Database;

/// Routes a job to its skill and runs it against a fully loaded project
/// context.
///
/// Holds its registry and database explicitly; construction happens once in
/// main and everything downstream receives this by `Arc`.
pub struct Executor {
    registry: Arc<SkillRegistry>,
    db: Arc<dyn Database>,
}

impl Executor {
    pub fn new(registry: Arc<SkillRegistry>, db: Arc<dyn Database>) -> Self {
        Self { registry, db }
    }

    /// Run one job's worth of work.
    ///
    /// Fails fast on an unknown job type or missing skill before touching
    /// project data. The returned `SkillResult` may still carry
    /// `success: false`; that is the skill's recoverable outcome, not an
    /// execution error.
    #[instrument(skip(self, identity, progress))]
    pub async fn execute(
        &self,
        project_id: Uuid,
        job_type: &str,
        identity: &dyn IdentityResolver,
        progress: Progress,
    ) -> Result<SkillResult> {
        let skill_name = router::map_job_type_to_skill(job_type)?;
        let skill = self
            .registry
            .get(skill_name)
            .ok_or_else(|| SkillError::NotFound {
                name: skill_name.to_string(),
            })?;

        let user_id = identity.resolve().await?;

        let project = self
            .db
            .get_project(project_id)
            .await?
            .ok_or(DatabaseError::NotFound {
                entity: "project",
                id: project_id.to_string(),
            })?;
        let invoices = self.db.list_invoices(project_id).await?;
        let haul_logs = self.db.list_haul_logs(project_id).await?;
        let contracts = self.db.list_contracts(project_id).await?;

        let context = SkillContext {
            project_id,
            user_id,
            project,
            invoices,
            haul_logs,
            contracts,
        };

        let started = Instant::now();
        let result = skill.execute(&context, &progress).await?;
        info!(
            skill = skill_name,
            job_type,
            project_id = %project_id,
            success = result.success,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Skill finished"
        );
        Ok(result)
    }

    /// Serialize a skill result into the job's stored payload.
    pub fn result_payload(result: &SkillResult) -> Result<Value> {
        serde_json::to_value(result)
            .map_err(|e| DatabaseError::Serialization(e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::identity::ExplicitIdentity;
    use crate::skills::test_support::StaticSkill;
    use crate::store::{LibSqlBackend, Project};
    use serde_json::json;

    async fn setup(registry: SkillRegistry) -> (Executor, Uuid) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let project_id = Uuid::new_v4();
        db.insert_project(&Project {
            id: project_id,
            user_id: "user-1".into(),
            property_name: "Woodland Court".into(),
            units: 200,
            city: "Austin".into(),
            state: "TX".into(),
            property_type: "multifamily".into(),
            equipment_type: "compactor".into(),
            status: "active".into(),
        })
        .await
        .unwrap();
        (Executor::new(Arc::new(registry), db), project_id)
    }

    #[tokio::test]
    async fn routes_and_runs_the_skill() {
        let registry = SkillRegistry::new().register(Arc::new(StaticSkill {
            skill_name: "wastewise-analytics",
            result: crate::skills::SkillResult::ok(json!({"report": true})),
        }));
        let (executor, project_id) = setup(registry).await;

        let result = executor
            .execute(
                project_id,
                "complete_analysis",
                &ExplicitIdentity("user-1".into()),
                Progress::noop(),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.data["report"], true);
    }

    #[tokio::test]
    async fn invalid_job_type_fails_before_data_access() {
        let (executor, project_id) = setup(SkillRegistry::new()).await;
        let err = executor
            .execute(
                project_id,
                "compactor-optimization",
                &ExplicitIdentity("user-1".into()),
                Progress::noop(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Router(_)));
        assert!(err.is_caller_error());
    }

    #[tokio::test]
    async fn missing_skill_is_reported() {
        // Valid job type, but nothing registered under its skill name.
        let (executor, project_id) = setup(SkillRegistry::new()).await;
        let err = executor
            .execute(
                project_id,
                "invoice_extraction",
                &ExplicitIdentity("user-1".into()),
                Progress::noop(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Skill(SkillError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn missing_project_is_not_found() {
        let registry = SkillRegistry::new().register(Arc::new(StaticSkill {
            skill_name: "wastewise-analytics",
            result: crate::skills::SkillResult::ok(json!({})),
        }));
        let (executor, _) = setup(registry).await;

        let err = executor
            .execute(
                Uuid::new_v4(),
                "complete_analysis",
                &ExplicitIdentity("user-1".into()),
                Progress::noop(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Database(DatabaseError::NotFound { entity: "project", .. })
        ));
    }
}
