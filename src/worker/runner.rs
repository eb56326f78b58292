//! Worker loop: claim pending jobs, run them, persist outcomes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::executor::Executor;
use crate::identity::ExplicitIdentity;
use crate::skills::Progress;
use crate::store::{Database, Job};
use crate::worker::state::JobStatus;

/// Delay before retrying a failed terminal write. One retry only; after that
/// the job is left in `processing` and the error is logged.
const TERMINAL_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Polls the job queue and runs claimed jobs concurrently, up to the
/// configured concurrency.
pub struct WorkerLoop {
    db: Arc<dyn Database>,
    executor: Arc<Executor>,
    config: WorkerConfig,
    jobs: JoinSet<()>,
    shutdown: watch::Receiver<bool>,
}

impl WorkerLoop {
    pub fn new(
        db: Arc<dyn Database>,
        executor: Arc<Executor>,
        config: WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            db,
            executor,
            config,
            jobs: JoinSet::new(),
            shutdown,
        }
    }

    /// Jobs currently running.
    pub fn in_flight(&self) -> usize {
        self.jobs.len()
    }

    /// One scheduling tick: reap finished tasks, then claim and spawn up to
    /// the free concurrency. Returns how many jobs were claimed.
    pub async fn poll_once(&mut self) -> usize {
        while self.jobs.try_join_next().is_some() {}

        let free = self.config.concurrency.saturating_sub(self.jobs.len());
        if free == 0 {
            return 0;
        }

        let claimed = match self.db.claim_pending_jobs(free).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Failed to claim jobs: {e}");
                return 0;
            }
        };

        let count = claimed.len();
        for job in claimed {
            let db = self.db.clone();
            let executor = self.executor.clone();
            self.jobs.spawn(async move {
                run_job(db, executor, job).await;
            });
        }
        count
    }

    /// Main loop: tick on the poll interval until shutdown is signalled,
    /// then drain.
    pub async fn run(mut self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            concurrency = self.config.concurrency,
            "Worker loop started"
        );
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let claimed = self.poll_once().await;
                    if claimed > 0 {
                        debug!(claimed, in_flight = self.jobs.len(), "Claimed jobs");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.drain().await;
    }

    /// Stop claiming and wait for in-flight jobs, up to the drain timeout.
    /// Jobs still running at expiry are aborted and stay `processing`.
    pub async fn drain(&mut self) {
        let in_flight = self.jobs.len();
        if in_flight == 0 {
            info!("Worker loop stopped, no jobs in flight");
            return;
        }

        info!(in_flight, "Draining worker loop");
        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.jobs.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    info!("Worker loop drained");
                    return;
                }
                Err(_) => {
                    warn!(
                        abandoned = self.jobs.len(),
                        "Drain timeout expired, aborting remaining jobs"
                    );
                    self.jobs.abort_all();
                    return;
                }
            }
        }
    }
}

/// Run one claimed job to a terminal state.
async fn run_job(db: Arc<dyn Database>, executor: Arc<Executor>, job: Job) {
    info!(job_id = %job.id, job_type = %job.job_type, "Job started");

    let progress = job_progress(db.clone(), &job);
    let identity = ExplicitIdentity(job.user_id.clone());

    match executor
        .execute(job.project_id, &job.job_type, &identity, progress)
        .await
    {
        Ok(result) => {
            let payload = match Executor::result_payload(&result) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(job_id = %job.id, "Result serialization failed: {e}");
                    write_terminal(&db, &job, TerminalWrite::Failed(&e.to_string())).await;
                    return;
                }
            };
            write_terminal(&db, &job, TerminalWrite::Completed(&payload)).await;
            info!(job_id = %job.id, success = result.success, "Job completed");
        }
        Err(e) => {
            warn!(job_id = %job.id, "Job failed: {e}");
            write_terminal(&db, &job, TerminalWrite::Failed(&e.to_string())).await;
        }
    }
}

enum TerminalWrite<'a> {
    Completed(&'a serde_json::Value),
    Failed(&'a str),
}

impl TerminalWrite<'_> {
    fn target_status(&self) -> JobStatus {
        match self {
            TerminalWrite::Completed(_) => JobStatus::Completed,
            TerminalWrite::Failed(_) => JobStatus::Failed,
        }
    }
}

/// Persist the job's terminal state. The write gets exactly one retry after
/// a short delay; if that also fails, the job stays `processing` and the
/// error is logged.
async fn write_terminal(db: &Arc<dyn Database>, job: &Job, write: TerminalWrite<'_>) {
    let target = write.target_status();
    if !job.status.can_transition_to(target) {
        error!(
            job_id = %job.id,
            from = %job.status,
            to = %target,
            "Refusing invalid terminal transition"
        );
        return;
    }

    let attempt = |()| async {
        match &write {
            TerminalWrite::Completed(payload) => db.complete_job(job.id, payload).await,
            TerminalWrite::Failed(message) => db.fail_job(job.id, message).await,
        }
    };

    if let Err(first) = attempt(()).await {
        warn!(job_id = %job.id, "Terminal write failed, retrying once: {first}");
        tokio::time::sleep(TERMINAL_RETRY_DELAY).await;
        if let Err(e) = attempt(()).await {
            error!(job_id = %job.id, "Terminal write failed after retry: {e}");
        }
    }
}

/// Progress reporter that writes through to the job row. Writes are
/// best-effort; a failed update is logged and dropped, never surfaced to the
/// running skill.
fn job_progress(db: Arc<dyn Database>, job: &Job) -> Progress {
    let job_id = job.id;
    Progress::new(Arc::new(move |percent, step| {
        let db = db.clone();
        let step = step.map(str::to_string);
        tokio::spawn(async move {
            if let Err(e) = db
                .update_job_progress(job_id, percent, step.as_deref())
                .await
            {
                warn!(job_id = %job_id, "Progress write failed: {e}");
            }
        });
    }))
}
