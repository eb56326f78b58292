//! End-to-end worker tests over an in-memory database: claim, execute,
//! persist, drain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;
use uuid::Uuid;

use wastewise::config::WorkerConfig;
use wastewise::error::{Error, SkillError};
use wastewise::executor::Executor;
use wastewise::skills::{Progress, Skill, SkillContext, SkillRegistry, SkillResult};
use wastewise::store::{Database, LibSqlBackend, NewJob, Project};
use wastewise::worker::{JobStatus, WorkerLoop};

struct SucceedingSkill;

#[async_trait]
impl Skill for SucceedingSkill {
    fn name(&self) -> &str {
        "wastewise-analytics"
    }

    fn description(&self) -> &str {
        "reports progress then succeeds"
    }

    async fn execute(
        &self,
        _context: &SkillContext,
        progress: &Progress,
    ) -> Result<SkillResult, Error> {
        progress.report(30, Some("Working"));
        progress.report(70, Some("Almost there"));
        Ok(SkillResult::ok(json!({"cost_per_door": "12.25"})))
    }
}

struct ErroringSkill;

#[async_trait]
impl Skill for ErroringSkill {
    fn name(&self) -> &str {
        "wastewise-analytics"
    }

    fn description(&self) -> &str {
        "always errors"
    }

    async fn execute(
        &self,
        _context: &SkillContext,
        _progress: &Progress,
    ) -> Result<SkillResult, Error> {
        Err(SkillError::Upstream {
            skill: self.name().to_string(),
            reason: "model endpoint unreachable".to_string(),
        }
        .into())
    }
}

struct RecoverableSkill;

#[async_trait]
impl Skill for RecoverableSkill {
    fn name(&self) -> &str {
        "wastewise-analytics"
    }

    fn description(&self) -> &str {
        "fails recoverably"
    }

    async fn execute(
        &self,
        _context: &SkillContext,
        _progress: &Progress,
    ) -> Result<SkillResult, Error> {
        Ok(SkillResult::fail("no invoices uploaded for this project"))
    }
}

async fn setup(skill: Arc<dyn Skill>) -> (Arc<dyn Database>, Arc<Executor>, Uuid) {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
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

    let registry = Arc::new(SkillRegistry::new().register(skill));
    let executor = Arc::new(Executor::new(registry, db.clone()));
    (db, executor, project_id)
}

fn test_config() -> WorkerConfig {
    WorkerConfig::test_defaults()
        .with_concurrency(2)
        .with_poll_interval(Duration::from_millis(10))
}

fn worker(db: Arc<dyn Database>, executor: Arc<Executor>) -> (WorkerLoop, watch::Sender<bool>) {
    let (tx, rx) = watch::channel(false);
    (WorkerLoop::new(db, executor, test_config(), rx), tx)
}

async fn wait_until_terminal(db: &Arc<dyn Database>, job_id: Uuid) -> wastewise::store::Job {
    for _ in 0..200 {
        let job = db.get_job(job_id).await.unwrap().unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached a terminal state");
}

#[tokio::test]
async fn job_completes_and_persists_result() {
    let (db, executor, project_id) = setup(Arc::new(SucceedingSkill)).await;
    let job_id = db
        .insert_job(&NewJob {
            project_id,
            user_id: "user-1".into(),
            job_type: "complete_analysis".into(),
        })
        .await
        .unwrap();

    let (mut worker, _tx) = worker(db.clone(), executor);
    assert_eq!(worker.poll_once().await, 1);

    let job = wait_until_terminal(&db, job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    let result = job.result.unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(result["data"]["cost_per_door"], "12.25");
    assert!(job.error.is_none());

    worker.drain().await;
}

#[tokio::test]
async fn skill_error_fails_the_job() {
    let (db, executor, project_id) = setup(Arc::new(ErroringSkill)).await;
    let job_id = db
        .insert_job(&NewJob {
            project_id,
            user_id: "user-1".into(),
            job_type: "complete_analysis".into(),
        })
        .await
        .unwrap();

    let (mut worker, _tx) = worker(db.clone(), executor);
    worker.poll_once().await;

    let job = wait_until_terminal(&db, job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("model endpoint unreachable"));
    assert!(job.result.is_none());

    worker.drain().await;
}

#[tokio::test]
async fn recoverable_failure_still_completes() {
    let (db, executor, project_id) = setup(Arc::new(RecoverableSkill)).await;
    let job_id = db
        .insert_job(&NewJob {
            project_id,
            user_id: "user-1".into(),
            job_type: "complete_analysis".into(),
        })
        .await
        .unwrap();

    let (mut worker, _tx) = worker(db.clone(), executor);
    worker.poll_once().await;

    let job = wait_until_terminal(&db, job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.unwrap();
    assert_eq!(result["success"], false);
    assert!(
        result["error"]
            .as_str()
            .unwrap()
            .contains("no invoices uploaded")
    );

    worker.drain().await;
}

#[tokio::test]
async fn invalid_job_type_fails_without_running_a_skill() {
    let (db, executor, project_id) = setup(Arc::new(SucceedingSkill)).await;
    let job_id = db
        .insert_job(&NewJob {
            project_id,
            user_id: "user-1".into(),
            job_type: "compactor-optimization".into(),
        })
        .await
        .unwrap();

    let (mut worker, _tx) = worker(db.clone(), executor);
    worker.poll_once().await;

    let job = wait_until_terminal(&db, job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("INVALID_JOB_TYPE"));

    worker.drain().await;
}

#[tokio::test]
async fn claims_respect_concurrency_limit() {
    let (db, executor, project_id) = setup(Arc::new(SucceedingSkill)).await;
    for _ in 0..5 {
        db.insert_job(&NewJob {
            project_id,
            user_id: "user-1".into(),
            job_type: "complete_analysis".into(),
        })
        .await
        .unwrap();
    }

    let (mut worker, _tx) = worker(db.clone(), executor);
    // Concurrency is 2; the first tick takes at most 2 jobs.
    let first = worker.poll_once().await;
    assert!(first <= 2);

    // Repeated ticks work through the backlog.
    for _ in 0..200 {
        worker.poll_once().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        if worker.in_flight() == 0 {
            let mut done = true;
            for job in db.claim_pending_jobs(10).await.unwrap() {
                // Anything still claimable means the backlog is not finished.
                done = false;
                db.fail_job(job.id, "test cleanup").await.unwrap();
            }
            if done {
                break;
            }
        }
    }

    worker.drain().await;
}

#[tokio::test]
async fn run_loop_drains_on_shutdown() {
    let (db, executor, project_id) = setup(Arc::new(SucceedingSkill)).await;
    let job_id = db
        .insert_job(&NewJob {
            project_id,
            user_id: "user-1".into(),
            job_type: "complete_analysis".into(),
        })
        .await
        .unwrap();

    let (worker, tx) = worker(db.clone(), executor);
    let handle = tokio::spawn(worker.run());

    let job = wait_until_terminal(&db, job_id).await;
    assert_eq!(job.status, JobStatus::Completed);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not shut down")
        .unwrap();
}
