//! Job-type routing.
//!
//! Maps the `job_type` string carried by a queued job onto the skill that
//! handles it. The mapping is closed: any string outside the known set is
//! rejected up front with `INVALID_JOB_TYPE` rather than guessed at.

use std::fmt;
use std::str::FromStr;

use crate::error::RouterError;

/// The closed set of job types the worker accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    CompleteAnalysis,
    InvoiceExtraction,
    RegulatoryResearch,
    ReportGeneration,
}

impl JobType {
    /// All known job types, in routing-table order.
    pub const ALL: [JobType; 4] = [
        JobType::CompleteAnalysis,
        JobType::InvoiceExtraction,
        JobType::RegulatoryResearch,
        JobType::ReportGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::CompleteAnalysis => "complete_analysis",
            JobType::InvoiceExtraction => "invoice_extraction",
            JobType::RegulatoryResearch => "regulatory_research",
            JobType::ReportGeneration => "report_generation",
        }
    }

    /// Name of the skill that handles this job type.
    pub fn skill_name(&self) -> &'static str {
        match self {
            JobType::CompleteAnalysis => "wastewise-analytics",
            JobType::InvoiceExtraction => "batch-extractor",
            JobType::RegulatoryResearch => "regulatory-research",
            JobType::ReportGeneration => "wastewise-analytics",
        }
    }
}

impl FromStr for JobType {
    type Err = RouterError;

    /// Exact match only. Case variants, hyphenated spellings, and retired
    /// job types all fail.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complete_analysis" => Ok(JobType::CompleteAnalysis),
            "invoice_extraction" => Ok(JobType::InvoiceExtraction),
            "regulatory_research" => Ok(JobType::RegulatoryResearch),
            "report_generation" => Ok(JobType::ReportGeneration),
            other => Err(RouterError::InvalidJobType(other.to_string())),
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve a raw job-type string to the skill that should run it.
pub fn map_job_type_to_skill(job_type: &str) -> Result<&'static str, RouterError> {
    Ok(job_type.parse::<JobType>()?.skill_name())
}
