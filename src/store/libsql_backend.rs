//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Money columns are stored as
//! decimal strings and parsed with `rust_decimal`; datetimes are RFC 3339.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    CachedResearch, Contract, Database, HaulLog, Invoice, Job, NewJob, Project,
};
use crate::worker::state::JobStatus;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to open libSQL database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 datetime string (our canonical write format).
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_decimal(s: &str) -> Decimal {
    s.parse().unwrap_or(Decimal::ZERO)
}

fn parse_optional_json(s: Option<String>) -> Option<serde_json::Value> {
    s.and_then(|raw| serde_json::from_str(&raw).ok())
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const JOB_COLUMNS: &str = "id, project_id, user_id, job_type, status, progress, current_step, result, error, created_at, updated_at";

const INVOICE_COLUMNS: &str = "id, project_id, hauler, period, raw_text, total_amount, contamination_charges, bulk_charges, extracted, created_at";

/// Map a libsql Row to a Job. Column order matches JOB_COLUMNS.
fn row_to_job(row: &libsql::Row) -> Result<Job, libsql::Error> {
    let id_str: String = row.get(0)?;
    let project_str: String = row.get(1)?;
    let status_str: String = row.get(4)?;
    let progress: i64 = row.get(5)?;
    let result_str: Option<String> = row.get(7).ok();
    let created_str: String = row.get(9)?;
    let updated_str: String = row.get(10)?;

    Ok(Job {
        id: parse_uuid(&id_str),
        project_id: parse_uuid(&project_str),
        user_id: row.get(2)?,
        job_type: row.get(3)?,
        status: JobStatus::parse(&status_str).unwrap_or(JobStatus::Pending),
        progress: progress.clamp(0, 100) as u8,
        current_step: row.get(6).ok(),
        result: parse_optional_json(result_str),
        error: row.get(8).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to an Invoice. Column order matches INVOICE_COLUMNS.
fn row_to_invoice(row: &libsql::Row) -> Result<Invoice, libsql::Error> {
    let id_str: String = row.get(0)?;
    let project_str: String = row.get(1)?;
    let total_str: String = row.get(5)?;
    let contamination_str: String = row.get(6)?;
    let bulk_str: String = row.get(7)?;
    let extracted_str: Option<String> = row.get(8).ok();
    let created_str: String = row.get(9)?;

    Ok(Invoice {
        id: parse_uuid(&id_str),
        project_id: parse_uuid(&project_str),
        hauler: row.get(2)?,
        period: row.get(3)?,
        raw_text: row.get(4)?,
        total_amount: parse_decimal(&total_str),
        contamination_charges: parse_decimal(&contamination_str),
        bulk_charges: parse_decimal(&bulk_str),
        extracted: parse_optional_json(extracted_str),
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Jobs ────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &NewJob) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO jobs (id, project_id, user_id, job_type, status, progress, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?5)",
                params![
                    id.to_string(),
                    job.project_id.to_string(),
                    job.user_id.clone(),
                    job.job_type.clone(),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_job: {e}")))?;

        debug!(job_id = %id, job_type = %job.job_type, "Job inserted");
        Ok(id)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let job = row_to_job(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_job row parse: {e}")))?;
                Ok(Some(job))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_job: {e}"))),
        }
    }

    async fn claim_pending_jobs(&self, limit: usize) -> Result<Vec<Job>, DatabaseError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut rows = self
            .conn()
            .query(
                "SELECT id FROM jobs WHERE status = 'pending' ORDER BY created_at ASC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim candidates: {e}")))?;

        let mut candidates = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id_str: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("claim candidate id: {e}")))?;
            candidates.push(id_str);
        }

        let mut claimed = Vec::new();
        for id_str in candidates {
            // Conditional update is the claim: one changed row wins, zero
            // means another worker got there first.
            let now = Utc::now().to_rfc3339();
            let changed = self
                .conn()
                .execute(
                    "UPDATE jobs SET status = 'processing', updated_at = ?2
                     WHERE id = ?1 AND status = 'pending'",
                    params![id_str.clone(), now],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("claim update: {e}")))?;

            if changed == 1
                && let Some(job) = self.get_job(parse_uuid(&id_str)).await?
            {
                claimed.push(job);
            }
        }

        Ok(claimed)
    }

    async fn update_job_progress(
        &self,
        id: Uuid,
        progress: u8,
        current_step: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        // Advisory writes only touch jobs still in flight; a late write racing
        // the terminal update must not regress a finished job.
        self.conn()
            .execute(
                "UPDATE jobs SET progress = ?2, current_step = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = 'processing'",
                params![
                    id.to_string(),
                    progress.min(100) as i64,
                    opt_text(current_step),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_job_progress: {e}")))?;
        Ok(())
    }

    async fn complete_job(
        &self,
        id: Uuid,
        result: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let result_str = serde_json::to_string(result)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE jobs SET status = 'completed', progress = 100, result = ?2, updated_at = ?3
                 WHERE id = ?1 AND status = 'processing'",
                params![id.to_string(), result_str, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_job: {e}")))?;

        debug!(job_id = %id, "Job completed");
        Ok(())
    }

    async fn fail_job(&self, id: Uuid, error: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE jobs SET status = 'failed', error = ?2, updated_at = ?3
                 WHERE id = ?1 AND status = 'processing'",
                params![id.to_string(), error, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("fail_job: {e}")))?;

        debug!(job_id = %id, "Job failed");
        Ok(())
    }

    // ── Project data ────────────────────────────────────────────────

    async fn insert_project(&self, project: &Project) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO projects (id, user_id, property_name, units, city, state, property_type, equipment_type, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    project.id.to_string(),
                    project.user_id.clone(),
                    project.property_name.clone(),
                    project.units as i64,
                    project.city.clone(),
                    project.state.clone(),
                    project.property_type.clone(),
                    project.equipment_type.clone(),
                    project.status.clone(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_project: {e}")))?;
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, user_id, property_name, units, city, state, property_type, equipment_type, status
                 FROM projects WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_project: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id_str: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get_project id: {e}")))?;
                let units: i64 = row.get(3).unwrap_or(0);
                Ok(Some(Project {
                    id: parse_uuid(&id_str),
                    user_id: row.get(1).unwrap_or_default(),
                    property_name: row.get(2).unwrap_or_default(),
                    units: units.max(0) as u32,
                    city: row.get(4).unwrap_or_default(),
                    state: row.get(5).unwrap_or_default(),
                    property_type: row.get(6).unwrap_or_default(),
                    equipment_type: row.get(7).unwrap_or_default(),
                    status: row.get(8).unwrap_or_default(),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_project: {e}"))),
        }
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), DatabaseError> {
        let extracted = invoice
            .extracted
            .as_ref()
            .map(|v| v.to_string());
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO invoices ({INVOICE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    invoice.id.to_string(),
                    invoice.project_id.to_string(),
                    invoice.hauler.clone(),
                    invoice.period.clone(),
                    invoice.raw_text.clone(),
                    invoice.total_amount.to_string(),
                    invoice.contamination_charges.to_string(),
                    invoice.bulk_charges.to_string(),
                    opt_text(extracted.as_deref()),
                    invoice.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_invoice: {e}")))?;
        Ok(())
    }

    async fn list_invoices(&self, project_id: Uuid) -> Result<Vec<Invoice>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {INVOICE_COLUMNS} FROM invoices WHERE project_id = ?1 ORDER BY period ASC"
                ),
                params![project_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_invoices: {e}")))?;

        let mut invoices = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_invoice(&row) {
                Ok(invoice) => invoices.push(invoice),
                Err(e) => {
                    tracing::warn!("Skipping invoice row: {e}");
                }
            }
        }
        Ok(invoices)
    }

    async fn update_invoice_extracted(
        &self,
        id: Uuid,
        extracted: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let extracted_str = serde_json::to_string(extracted)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                "UPDATE invoices SET extracted = ?2 WHERE id = ?1",
                params![id.to_string(), extracted_str],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_invoice_extracted: {e}")))?;
        Ok(())
    }

    async fn insert_haul_log(&self, log: &HaulLog) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO haul_logs (id, project_id, haul_date, tons) VALUES (?1, ?2, ?3, ?4)",
                params![
                    log.id.to_string(),
                    log.project_id.to_string(),
                    log.haul_date.to_rfc3339(),
                    log.tons.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_haul_log: {e}")))?;
        Ok(())
    }

    async fn list_haul_logs(&self, project_id: Uuid) -> Result<Vec<HaulLog>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, project_id, haul_date, tons FROM haul_logs
                 WHERE project_id = ?1 ORDER BY haul_date ASC",
                params![project_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_haul_logs: {e}")))?;

        let mut logs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id_str: String = row.get(0).unwrap_or_default();
            let project_str: String = row.get(1).unwrap_or_default();
            let date_str: String = row.get(2).unwrap_or_default();
            let tons_str: String = row.get(3).unwrap_or_default();
            logs.push(HaulLog {
                id: parse_uuid(&id_str),
                project_id: parse_uuid(&project_str),
                haul_date: parse_datetime(&date_str),
                tons: parse_decimal(&tons_str),
            });
        }
        Ok(logs)
    }

    async fn insert_contract(&self, contract: &Contract) -> Result<(), DatabaseError> {
        let extracted = contract.extracted.as_ref().map(|v| v.to_string());
        self.conn()
            .execute(
                "INSERT INTO contracts (id, project_id, hauler, raw_text, extracted, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    contract.id.to_string(),
                    contract.project_id.to_string(),
                    contract.hauler.clone(),
                    contract.raw_text.clone(),
                    opt_text(extracted.as_deref()),
                    contract.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_contract: {e}")))?;
        Ok(())
    }

    async fn list_contracts(&self, project_id: Uuid) -> Result<Vec<Contract>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, project_id, hauler, raw_text, extracted, created_at FROM contracts
                 WHERE project_id = ?1 ORDER BY created_at ASC",
                params![project_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_contracts: {e}")))?;

        let mut contracts = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id_str: String = row.get(0).unwrap_or_default();
            let project_str: String = row.get(1).unwrap_or_default();
            let extracted_str: Option<String> = row.get(4).ok();
            let created_str: String = row.get(5).unwrap_or_default();
            contracts.push(Contract {
                id: parse_uuid(&id_str),
                project_id: parse_uuid(&project_str),
                hauler: row.get(2).unwrap_or_default(),
                raw_text: row.get(3).unwrap_or_default(),
                extracted: parse_optional_json(extracted_str),
                created_at: parse_datetime(&created_str),
            });
        }
        Ok(contracts)
    }

    // ── Regulatory research cache ───────────────────────────────────

    async fn get_cached_research(
        &self,
        project_id: Uuid,
        max_age_days: u32,
    ) -> Result<Option<CachedResearch>, DatabaseError> {
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days as i64);
        let mut rows = self
            .conn()
            .query(
                "SELECT project_id, findings, researched_at FROM regulatory_research
                 WHERE project_id = ?1 AND researched_at > ?2",
                params![project_id.to_string(), cutoff.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_cached_research: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id_str: String = row.get(0).unwrap_or_default();
                let findings_str: String = row.get(1).unwrap_or_default();
                let researched_str: String = row.get(2).unwrap_or_default();
                let findings = serde_json::from_str(&findings_str)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
                Ok(Some(CachedResearch {
                    project_id: parse_uuid(&id_str),
                    findings,
                    researched_at: parse_datetime(&researched_str),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_cached_research: {e}"))),
        }
    }

    async fn put_cached_research(
        &self,
        project_id: Uuid,
        findings: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let findings_str = serde_json::to_string(findings)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO regulatory_research (project_id, findings, researched_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (project_id) DO UPDATE SET findings = ?2, researched_at = ?3",
                params![project_id.to_string(), findings_str, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("put_cached_research: {e}")))?;
        Ok(())
    }
}
