//! Engine configuration.
//!
//! Unique responsibility: gather the bearer token, API location and polling
//! timings in one value that is built once and never mutated.
//!
//! All configuration can be loaded from environment variables (a local `.env`
//! file is honoured), or built in code with [`EngineConfig::new`].

use std::{env, fmt};

use crate::hostman_error::{ReconcileError, Result};
use crate::hostman_json::Sensitive;
use crate::hostman_poller::{GoneCriterion, PollConfig, ReadinessStates};

/// Default Hostman API root.
pub const DEFAULT_API_URL: &str = "https://hostman.com/api/v1";

/// Default availability zone for floating IPs and clusters.
pub const DEFAULT_AVAILABILITY_ZONE: &str = "ams-1";

/// Cluster statuses treated as ready unless overridden.
pub const DEFAULT_K8S_READY_STATES: &str = "ready,running,started";

/// Cluster statuses treated as failed unless overridden.
pub const DEFAULT_K8S_FAILED_STATES: &str = "error,failed,deleted";

/// Configuration for the reconciliation engine.
#[derive(Clone)]
pub struct EngineConfig {
    /// Hostman API token.
    /// Env: `HOSTMAN_TOKEN` (required)
    pub token: Sensitive<String>,

    /// API root URL.
    /// Env: `HOSTMAN_API_URL` (default: "<https://hostman.com/api/v1>")
    pub api_url: String,

    /// HTTP request timeout in milliseconds.
    /// Env: `HOSTMAN_HTTP_TIMEOUT_MS` (default: 30000)
    pub timeout_ms: u64,

    /// User agent for HTTP requests.
    /// Env: `HOSTMAN_USER_AGENT` (default: "hostman-provision/<version>")
    pub user_agent: String,

    /// Wait for a new server's root password.
    /// Env: `HOSTMAN_SERVER_POLL_INTERVAL_MS` (5000), `HOSTMAN_SERVER_READY_TIMEOUT_MS` (1800000)
    pub server_ready: PollConfig,

    /// Wait for a new cluster to become ready.
    /// Env: `HOSTMAN_K8S_POLL_INTERVAL_MS` (10000), `HOSTMAN_K8S_READY_TIMEOUT_MS` (1800000)
    pub k8s_ready: PollConfig,

    /// Wait for a deleted cluster to disappear.
    /// Env: `HOSTMAN_K8S_POLL_INTERVAL_MS` (10000), `HOSTMAN_K8S_DELETE_TIMEOUT_MS` (900000)
    pub k8s_delete: PollConfig,

    /// Cluster status vocabulary.
    /// Env: `HOSTMAN_K8S_READY_STATES`, `HOSTMAN_K8S_FAILED_STATES` (comma-separated)
    pub k8s_states: ReadinessStates,

    /// How a deletion is confirmed.
    /// Env: `HOSTMAN_DELETE_GONE_ON` ("any-error" | "not-found", default: "any-error")
    pub gone_criterion: GoneCriterion,
}

impl EngineConfig {
    /// Configuration with defaults for everything but the token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Sensitive::new(token.into()),
            api_url: DEFAULT_API_URL.to_string(),
            timeout_ms: 30_000,
            user_agent: default_user_agent(),
            server_ready: PollConfig::from_millis(5_000, 1_800_000),
            k8s_ready: PollConfig::from_millis(10_000, 1_800_000),
            k8s_delete: PollConfig::from_millis(10_000, 900_000),
            k8s_states: states_from_csv(DEFAULT_K8S_READY_STATES, DEFAULT_K8S_FAILED_STATES),
            gone_criterion: GoneCriterion::AnyError,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// In local dev, this will also attempt to load `.env` from the current directory.
    /// If `.env` is missing, it does not fail.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let k8s_interval = parse_u64_env("HOSTMAN_K8S_POLL_INTERVAL_MS", 10_000)?;

        Ok(Self {
            token: Sensitive::new(must_env("HOSTMAN_TOKEN")?),
            api_url: env::var("HOSTMAN_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            timeout_ms: parse_u64_env("HOSTMAN_HTTP_TIMEOUT_MS", 30_000)?,
            user_agent: env::var("HOSTMAN_USER_AGENT").unwrap_or_else(|_| default_user_agent()),
            server_ready: PollConfig::from_millis(
                parse_u64_env("HOSTMAN_SERVER_POLL_INTERVAL_MS", 5_000)?,
                parse_u64_env("HOSTMAN_SERVER_READY_TIMEOUT_MS", 1_800_000)?,
            ),
            k8s_ready: PollConfig::from_millis(
                k8s_interval,
                parse_u64_env("HOSTMAN_K8S_READY_TIMEOUT_MS", 1_800_000)?,
            ),
            k8s_delete: PollConfig::from_millis(
                k8s_interval,
                parse_u64_env("HOSTMAN_K8S_DELETE_TIMEOUT_MS", 900_000)?,
            ),
            k8s_states: ReadinessStates {
                success: split_csv_env("HOSTMAN_K8S_READY_STATES", DEFAULT_K8S_READY_STATES),
                failure: split_csv_env("HOSTMAN_K8S_FAILED_STATES", DEFAULT_K8S_FAILED_STATES),
            },
            gone_criterion: parse_gone_env("HOSTMAN_DELETE_GONE_ON")?,
        })
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("token", &self.token)
            .field("api_url", &self.api_url)
            .field("timeout_ms", &self.timeout_ms)
            .field("server_ready", &self.server_ready)
            .field("k8s_ready", &self.k8s_ready)
            .field("k8s_delete", &self.k8s_delete)
            .field("k8s_states", &self.k8s_states)
            .field("gone_criterion", &self.gone_criterion)
            .finish_non_exhaustive()
    }
}

fn default_user_agent() -> String {
    format!("hostman-provision/{}", env!("CARGO_PKG_VERSION"))
}

fn states_from_csv(success: &str, failure: &str) -> ReadinessStates {
    ReadinessStates {
        success: split_csv(success),
        failure: split_csv(failure),
    }
}

#[inline]
fn must_env(key: &'static str) -> Result<String> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ReconcileError::MissingEnv(key))
}

#[inline]
fn parse_u64_env(key: &'static str, default: u64) -> Result<u64> {
    env::var(key).map_or_else(
        |_| Ok(default),
        |v| {
            v.parse::<u64>().map_err(|_| ReconcileError::InvalidEnv {
                key,
                value: v,
                reason: "expected an unsigned integer",
            })
        },
    )
}

fn parse_gone_env(key: &'static str) -> Result<GoneCriterion> {
    env::var(key).map_or(Ok(GoneCriterion::AnyError), |v| {
        match v.trim().to_lowercase().as_str() {
            "" | "any-error" => Ok(GoneCriterion::AnyError),
            "not-found" => Ok(GoneCriterion::NotFound),
            _ => Err(ReconcileError::InvalidEnv {
                key,
                value: v,
                reason: "expected \"any-error\" or \"not-found\"",
            }),
        }
    })
}

fn split_csv_env(key: &'static str, default: &str) -> Vec<String> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    split_csv(&raw)
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const VARS: [&str; 10] = [
        "HOSTMAN_TOKEN",
        "HOSTMAN_API_URL",
        "HOSTMAN_HTTP_TIMEOUT_MS",
        "HOSTMAN_SERVER_POLL_INTERVAL_MS",
        "HOSTMAN_SERVER_READY_TIMEOUT_MS",
        "HOSTMAN_K8S_POLL_INTERVAL_MS",
        "HOSTMAN_K8S_READY_TIMEOUT_MS",
        "HOSTMAN_K8S_READY_STATES",
        "HOSTMAN_K8S_FAILED_STATES",
        "HOSTMAN_DELETE_GONE_ON",
    ];

    fn unset_all() -> Vec<(&'static str, Option<&'static str>)> {
        VARS.iter().map(|k| (*k, None)).collect()
    }

    #[test]
    fn token_is_required() {
        temp_env::with_vars(unset_all(), || {
            assert!(matches!(
                EngineConfig::from_env(),
                Err(ReconcileError::MissingEnv("HOSTMAN_TOKEN"))
            ));
        });
    }

    #[test]
    fn defaults_apply_when_only_token_is_set() {
        let mut vars = unset_all();
        vars[0] = ("HOSTMAN_TOKEN", Some("tok"));
        temp_env::with_vars(vars, || {
            let cfg = EngineConfig::from_env().unwrap_or_else(|_| EngineConfig::new(""));
            assert_eq!(cfg.token.expose(), "tok");
            assert_eq!(cfg.api_url, DEFAULT_API_URL);
            assert_eq!(cfg.server_ready.interval, Duration::from_secs(5));
            assert_eq!(cfg.server_ready.timeout, Duration::from_secs(30 * 60));
            assert_eq!(cfg.k8s_delete.timeout, Duration::from_secs(15 * 60));
            assert_eq!(cfg.k8s_states.success, vec!["ready", "running", "started"]);
            assert_eq!(cfg.gone_criterion, GoneCriterion::AnyError);
        });
    }

    #[test]
    fn overrides_are_parsed() {
        temp_env::with_vars(
            [
                ("HOSTMAN_TOKEN", Some("tok")),
                ("HOSTMAN_K8S_POLL_INTERVAL_MS", Some("250")),
                ("HOSTMAN_K8S_READY_STATES", Some("active, ready")),
                ("HOSTMAN_DELETE_GONE_ON", Some("not-found")),
            ],
            || {
                let cfg = EngineConfig::from_env().unwrap_or_else(|_| EngineConfig::new(""));
                assert_eq!(cfg.k8s_ready.interval, Duration::from_millis(250));
                assert_eq!(cfg.k8s_delete.interval, Duration::from_millis(250));
                assert_eq!(cfg.k8s_states.success, vec!["active", "ready"]);
                assert_eq!(cfg.gone_criterion, GoneCriterion::NotFound);
            },
        );
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        temp_env::with_vars(
            [
                ("HOSTMAN_TOKEN", Some("tok")),
                ("HOSTMAN_HTTP_TIMEOUT_MS", Some("soon")),
            ],
            || {
                assert!(matches!(
                    EngineConfig::from_env(),
                    Err(ReconcileError::InvalidEnv { key: "HOSTMAN_HTTP_TIMEOUT_MS", .. })
                ));
            },
        );
    }

    #[test]
    fn debug_output_hides_the_token() {
        let cfg = EngineConfig::new("secret-token");
        assert!(!format!("{cfg:?}").contains("secret-token"));
    }
}
