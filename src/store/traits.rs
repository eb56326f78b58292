//! `Database` trait — single async interface for all persistence.
//!
//! Row types for jobs, projects, invoices, haul logs, and contracts, plus
//! the regulatory-research cache. The jobs table is the single source of
//! truth for job status; all writes are last-write-wins per row keyed by
//! job id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::worker::state::JobStatus;

/// A queued analysis job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: String,
    /// Stored as submitted by the API layer; validated by the router at
    /// execution time, so a bad value fails its own job only.
    pub job_type: String,
    pub status: JobStatus,
    /// 0–100.
    pub progress: u8,
    pub current_step: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New job parameters (rows are normally created by the API layer; the
/// worker only ever mutates them).
#[derive(Debug, Clone)]
pub struct NewJob {
    pub project_id: Uuid,
    pub user_id: String,
    pub job_type: String,
}

/// A managed property.
#[derive(Debug, Clone)]
pub struct Project {
    pub id: Uuid,
    pub user_id: String,
    pub property_name: String,
    pub units: u32,
    pub city: String,
    pub state: String,
    pub property_type: String,
    /// `compactor` or `dumpster`; gates formula selection.
    pub equipment_type: String,
    pub status: String,
}

/// An uploaded waste-hauling invoice.
#[derive(Debug, Clone)]
pub struct Invoice {
    pub id: Uuid,
    pub project_id: Uuid,
    pub hauler: String,
    /// Billing period, e.g. "2026-07".
    pub period: String,
    /// Raw document text as uploaded; input to the batch extractor.
    pub raw_text: String,
    pub total_amount: Decimal,
    pub contamination_charges: Decimal,
    pub bulk_charges: Decimal,
    /// Structured fields produced by the batch extractor, if it has run.
    pub extracted: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// One recorded haul.
#[derive(Debug, Clone)]
pub struct HaulLog {
    pub id: Uuid,
    pub project_id: Uuid,
    pub haul_date: DateTime<Utc>,
    pub tons: Decimal,
}

/// An uploaded hauler contract.
#[derive(Debug, Clone)]
pub struct Contract {
    pub id: Uuid,
    pub project_id: Uuid,
    pub hauler: String,
    pub raw_text: String,
    pub extracted: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Cached regulatory research findings for a project.
#[derive(Debug, Clone)]
pub struct CachedResearch {
    pub project_id: Uuid,
    pub findings: serde_json::Value,
    pub researched_at: DateTime<Utc>,
}

/// Backend-agnostic database trait covering jobs, project data, and the
/// research cache.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Jobs ────────────────────────────────────────────────────────

    /// Insert a new pending job. Returns the generated id.
    async fn insert_job(&self, job: &NewJob) -> Result<Uuid, DatabaseError>;

    /// Get a job by id.
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError>;

    /// Atomically claim up to `limit` pending jobs, oldest first.
    ///
    /// Each claim is a single conditional update
    /// (`... WHERE id = ? AND status = 'pending'`); a row counts as claimed
    /// only when the update changed exactly one row, so two worker
    /// processes can never double-claim the same job.
    async fn claim_pending_jobs(&self, limit: usize) -> Result<Vec<Job>, DatabaseError>;

    /// Advisory progress write. Callers treat failures as best-effort.
    async fn update_job_progress(
        &self,
        id: Uuid,
        progress: u8,
        current_step: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Terminal write: `completed`, progress 100, result payload.
    async fn complete_job(
        &self,
        id: Uuid,
        result: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    /// Terminal write: `failed` with an error message.
    async fn fail_job(&self, id: Uuid, error: &str) -> Result<(), DatabaseError>;

    // ── Project data (read-only inputs to skills) ───────────────────

    async fn insert_project(&self, project: &Project) -> Result<(), DatabaseError>;

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, DatabaseError>;

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), DatabaseError>;

    /// Invoices for a project, oldest period first.
    async fn list_invoices(&self, project_id: Uuid) -> Result<Vec<Invoice>, DatabaseError>;

    /// Record extractor output on an invoice row.
    async fn update_invoice_extracted(
        &self,
        id: Uuid,
        extracted: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    async fn insert_haul_log(&self, log: &HaulLog) -> Result<(), DatabaseError>;

    async fn list_haul_logs(&self, project_id: Uuid) -> Result<Vec<HaulLog>, DatabaseError>;

    async fn insert_contract(&self, contract: &Contract) -> Result<(), DatabaseError>;

    async fn list_contracts(&self, project_id: Uuid) -> Result<Vec<Contract>, DatabaseError>;

    // ── Regulatory research cache ───────────────────────────────────

    /// Cached findings no older than `max_age_days`, if present.
    async fn get_cached_research(
        &self,
        project_id: Uuid,
        max_age_days: u32,
    ) -> Result<Option<CachedResearch>, DatabaseError>;

    /// Upsert findings for a project, stamping `researched_at` now.
    async fn put_cached_research(
        &self,
        project_id: Uuid,
        findings: &serde_json::Value,
    ) -> Result<(), DatabaseError>;
}
