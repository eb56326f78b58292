//! Worker configuration.
//!
//! Everything is env-var driven (`WASTEWISE_*`), with `--poll-interval` and
//! `--concurrency` command-line overrides. `missing_required()` is the
//! pre-flight check: the worker refuses to start degraded and instead lists
//! every absent credential by name.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Environment variables that must be present for the worker to start.
pub const REQUIRED_ENV_VARS: &[&str] = &[
    "WASTEWISE_LLM_API_KEY",
    "WASTEWISE_SEARCH_API_KEY",
    "WASTEWISE_DB_PATH",
];

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_CONCURRENCY: usize = 3;
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 60;
const DEFAULT_LLM_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_LLM_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_SEARCH_BASE_URL: &str = "https://api.tavily.com";

/// LLM provider settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
}

/// Search provider settings.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub api_key: SecretString,
    pub base_url: String,
}

/// Full worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Poll interval between claim attempts.
    pub poll_interval: Duration,
    /// Maximum jobs in flight at once within this process.
    pub concurrency: usize,
    /// Grace period for in-flight jobs during shutdown.
    pub drain_timeout: Duration,
    /// Path to the local jobs database.
    pub db_path: String,
    pub llm: LlmSettings,
    pub search: SearchSettings,
    /// Validity window for cached regulatory research.
    pub research_cache_days: u32,
}

impl WorkerConfig {
    /// Build configuration from process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary lookup (injectable for tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let missing = missing_required(&lookup);
        if !missing.is_empty() {
            return Err(ConfigError::MissingEnvVars(missing));
        }

        let poll_interval_secs =
            parse_or_default(&lookup, "WASTEWISE_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        let concurrency =
            parse_or_default(&lookup, "WASTEWISE_CONCURRENCY", DEFAULT_CONCURRENCY)?;
        if concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WASTEWISE_CONCURRENCY".into(),
                message: "must be at least 1".into(),
            });
        }
        let drain_timeout_secs =
            parse_or_default(&lookup, "WASTEWISE_DRAIN_TIMEOUT_SECS", DEFAULT_DRAIN_TIMEOUT_SECS)?;
        let research_cache_days =
            parse_or_default(&lookup, "WASTEWISE_RESEARCH_CACHE_DAYS", 90u32)?;

        // Required vars are known present after the pre-flight above.
        let llm_api_key = lookup("WASTEWISE_LLM_API_KEY").unwrap_or_default();
        let search_api_key = lookup("WASTEWISE_SEARCH_API_KEY").unwrap_or_default();
        let db_path = lookup("WASTEWISE_DB_PATH").unwrap_or_default();

        Ok(Self {
            poll_interval: Duration::from_secs(poll_interval_secs),
            concurrency,
            drain_timeout: Duration::from_secs(drain_timeout_secs),
            db_path,
            llm: LlmSettings {
                api_key: SecretString::from(llm_api_key),
                model: lookup("WASTEWISE_LLM_MODEL")
                    .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
                base_url: lookup("WASTEWISE_LLM_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            },
            search: SearchSettings {
                api_key: SecretString::from(search_api_key),
                base_url: lookup("WASTEWISE_SEARCH_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_SEARCH_BASE_URL.to_string()),
            },
            research_cache_days,
        })
    }

    /// Configuration for tests: in-memory-friendly paths, dummy credentials,
    /// short timings.
    pub fn test_defaults() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            concurrency: DEFAULT_CONCURRENCY,
            drain_timeout: Duration::from_secs(5),
            db_path: ":memory:".to_string(),
            llm: LlmSettings {
                api_key: SecretString::from("test-key"),
                model: DEFAULT_LLM_MODEL.to_string(),
                base_url: DEFAULT_LLM_BASE_URL.to_string(),
            },
            search: SearchSettings {
                api_key: SecretString::from("test-key"),
                base_url: DEFAULT_SEARCH_BASE_URL.to_string(),
            },
            research_cache_days: 90,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Apply command-line flag overrides (`--poll-interval <secs>`,
    /// `--concurrency <n>`).
    pub fn apply_args<I>(mut self, args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--poll-interval" => {
                    let secs: u64 = next_flag_value(&mut iter, "--poll-interval")?;
                    self.poll_interval = Duration::from_secs(secs);
                }
                "--concurrency" => {
                    let n: usize = next_flag_value(&mut iter, "--concurrency")?;
                    if n == 0 {
                        return Err(ConfigError::InvalidArg(
                            "--concurrency must be at least 1".into(),
                        ));
                    }
                    self.concurrency = n;
                }
                other => {
                    return Err(ConfigError::InvalidArg(format!("unknown flag: {other}")));
                }
            }
        }
        Ok(self)
    }
}

/// Names of required variables absent from the given lookup.
pub fn missing_required(lookup: &impl Fn(&str) -> Option<String>) -> Vec<String> {
    REQUIRED_ENV_VARS
        .iter()
        .filter(|key| lookup(key).map(|v| v.trim().is_empty()).unwrap_or(true))
        .map(|key| key.to_string())
        .collect()
}

fn parse_or_default<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("could not parse '{raw}'"),
        }),
        None => Ok(default),
    }
}

fn next_flag_value<T: std::str::FromStr>(
    iter: &mut impl Iterator<Item = String>,
    flag: &str,
) -> Result<T, ConfigError> {
    let raw = iter
        .next()
        .ok_or_else(|| ConfigError::InvalidArg(format!("{flag} requires a value")))?;
    raw.parse()
        .map_err(|_| ConfigError::InvalidArg(format!("{flag}: could not parse '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn full_env() -> impl Fn(&str) -> Option<String> {
        env(&[
            ("WASTEWISE_LLM_API_KEY", "sk-test"),
            ("WASTEWISE_SEARCH_API_KEY", "tvly-test"),
            ("WASTEWISE_DB_PATH", "./data/wastewise.db"),
        ])
    }

    #[test]
    fn preflight_lists_every_missing_name() {
        let missing = missing_required(&env(&[("WASTEWISE_DB_PATH", "./db")]));
        assert_eq!(
            missing,
            vec![
                "WASTEWISE_LLM_API_KEY".to_string(),
                "WASTEWISE_SEARCH_API_KEY".to_string(),
            ]
        );
    }

    #[test]
    fn preflight_treats_blank_as_missing() {
        let missing = missing_required(&env(&[
            ("WASTEWISE_LLM_API_KEY", "  "),
            ("WASTEWISE_SEARCH_API_KEY", "k"),
            ("WASTEWISE_DB_PATH", "./db"),
        ]));
        assert_eq!(missing, vec!["WASTEWISE_LLM_API_KEY".to_string()]);
    }

    #[test]
    fn from_lookup_fails_fast_when_credentials_absent() {
        let err = WorkerConfig::from_lookup(env(&[])).unwrap_err();
        match err {
            ConfigError::MissingEnvVars(names) => assert_eq!(names.len(), 3),
            other => panic!("expected MissingEnvVars, got {other}"),
        }
    }

    #[test]
    fn defaults_applied() {
        let config = WorkerConfig::from_lookup(full_env()).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.research_cache_days, 90);
        assert_eq!(config.llm.base_url, "https://api.anthropic.com");
    }

    #[test]
    fn flags_override_env() {
        let config = WorkerConfig::from_lookup(full_env())
            .unwrap()
            .apply_args(vec![
                "--poll-interval".to_string(),
                "30".to_string(),
                "--concurrency".to_string(),
                "8".to_string(),
            ])
            .unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.concurrency, 8);
    }

    #[test]
    fn unknown_flag_rejected() {
        let err = WorkerConfig::from_lookup(full_env())
            .unwrap()
            .apply_args(vec!["--verbose".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("--verbose"));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let err = WorkerConfig::from_lookup(full_env())
            .unwrap()
            .apply_args(vec!["--concurrency".to_string(), "0".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }
}
