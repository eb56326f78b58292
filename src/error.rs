//! Error types for the WasteWise worker core.

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Router error: {0}")]
    Router(#[from] RouterError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Skill error: {0}")]
    Skill(#[from] SkillError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Formula error: {0}")]
    Formula(#[from] FormulaError),
}

impl Error {
    /// Whether this error indicates a caller bug (bad input, missing
    /// entity, no session) that must never be retried.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::Router(_)
                | Error::Identity(IdentityError::NoSession)
                | Error::Database(DatabaseError::NotFound { .. })
                | Error::Skill(SkillError::NotFound { .. })
                | Error::Formula(_)
        )
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable(s): {}", .0.join(", "))]
    MissingEnvVars(Vec<String>),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid command-line argument: {0}")]
    InvalidArg(String),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Job-type routing errors.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// INVALID_JOB_TYPE: the submitted value is not in the job-type enum.
    /// Strict match: no case folding, no separator normalization.
    #[error("INVALID_JOB_TYPE: '{0}' is not a recognized job type")]
    InvalidJobType(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Search provider errors.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid search response: {0}")]
    InvalidResponse(String),

    #[error("Search authentication failed")]
    AuthFailed,
}

/// Skill resolution and execution errors.
#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("Skill {name} not found in registry")]
    NotFound { name: String },

    #[error("Skill {skill} upstream failure: {reason}")]
    Upstream { skill: String, reason: String },

    #[error("Skill {skill} produced unparseable output: {reason}")]
    MalformedOutput { skill: String, reason: String },

    #[error("Skill {skill} failed for project {project_id}: {reason}")]
    Failed {
        skill: String,
        project_id: Uuid,
        reason: String,
    },
}

/// Acting-user resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// No authenticated session in a web-request context.
    #[error("No authenticated session")]
    NoSession,
}

/// Formula input-range errors.
#[derive(Debug, thiserror::Error)]
pub enum FormulaError {
    #[error("Invalid formula input: {field} {message}")]
    InvalidInput {
        field: &'static str,
        message: &'static str,
    },
}

impl FormulaError {
    pub fn non_positive(field: &'static str) -> Self {
        Self::InvalidInput {
            field,
            message: "must be greater than zero",
        }
    }

    pub fn negative(field: &'static str) -> Self {
        Self::InvalidInput {
            field,
            message: "must not be negative",
        }
    }
}

/// Result type alias for the worker core.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_job_type_message_carries_code() {
        let err = RouterError::InvalidJobType("Complete_Analysis".into());
        assert!(err.to_string().contains("INVALID_JOB_TYPE"));
        assert!(err.to_string().contains("Complete_Analysis"));
    }

    #[test]
    fn missing_env_vars_lists_all_names() {
        let err = ConfigError::MissingEnvVars(vec![
            "WASTEWISE_LLM_API_KEY".into(),
            "WASTEWISE_SEARCH_API_KEY".into(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("WASTEWISE_LLM_API_KEY"));
        assert!(msg.contains("WASTEWISE_SEARCH_API_KEY"));
    }

    #[test]
    fn caller_errors_are_not_retryable() {
        assert!(Error::from(RouterError::InvalidJobType("x".into())).is_caller_error());
        assert!(Error::from(IdentityError::NoSession).is_caller_error());
        assert!(
            Error::from(DatabaseError::NotFound {
                entity: "project",
                id: "abc".into()
            })
            .is_caller_error()
        );
        assert!(
            !Error::from(LlmError::AuthFailed {
                provider: "anthropic".into()
            })
            .is_caller_error()
        );
    }
}
