//! Configuration management.
//!
//! Configuration can be set via environment variables:
//! - `PROBE_MAX_FANOUTS` - Optional. Search fan-out rounds per run. Defaults to `3`.
//! - `PROBE_MAX_VALIDATION_BATCHES` - Optional. Defaults to `5`.
//! - `PROBE_MAX_CANDIDATES` - Optional. Candidates examined per run. Defaults to `200`.
//! - `PROBE_MAX_REASONING_TOKENS` - Optional. Defaults to `100000`.
//! - `PROBE_MAX_DURATION_SECS` - Optional. Budget wall-clock cap. Defaults to `300`.
//! - `PROBE_MAX_TOOL_CALLS` - Optional. Defaults to `60`.
//! - `PROBE_TIMEOUT_SECS` - Optional. Overall run deadline. Defaults to `300`.
//! - `PROBE_RETRY_ATTEMPTS` - Optional. Retries per tool/backend call. Defaults to `2`.
//! - `PROBE_CALL_TIMEOUT_SECS` - Optional. Per-call timeout. Defaults to `30`.
//! - `PROBE_FALLBACK_ENABLED` - Optional. Fall back to the fixed pipeline on failure. Defaults to `true`.
//! - `PROBE_PARALLEL_CALLS` - Optional. Run fan-out sub-calls concurrently. Defaults to `true`.
//! - `PROBE_CACHE_RESULTS` - Optional. Per-run tool result cache. Defaults to `true`.
//! - `PROBE_TELEMETRY` - Optional. Per-phase metrics in run metadata. Defaults to `false`.
//! - `PROBE_MODE_STATS_PATH` - Optional. JSON file for learned mode statistics.
//! - `PROBE_COST_CEILING_USD` - Optional. Nominal per-run spend for router pressure. Defaults to `1.0`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::BudgetCaps;
use crate::retry::CallPolicy;
use crate::routing::RouterConfig;
use crate::session::SessionManagerConfig;
use crate::util::{parse_flag, parse_optional};

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Per-run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub caps: BudgetCaps,
    /// Overall run deadline, checked before every phase
    #[serde(with = "crate::util::duration_secs")]
    pub timeout: Duration,
    /// Retries per tool/backend call
    pub retry_attempts: u32,
    /// Upper bound on one tool/backend call
    #[serde(with = "crate::util::duration_secs")]
    pub call_timeout: Duration,
    pub fallback_enabled: bool,
    pub parallel_sub_calls: bool,
    pub caching_enabled: bool,
    pub telemetry_enabled: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            caps: BudgetCaps::default(),
            timeout: Duration::from_secs(300),
            retry_attempts: 2,
            call_timeout: Duration::from_secs(30),
            fallback_enabled: true,
            parallel_sub_calls: true,
            caching_enabled: true,
            telemetry_enabled: false,
        }
    }
}

impl RunConfig {
    /// Timeout and retry policy for tool and backend calls.
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy {
            retry_attempts: self.retry_attempts,
            call_timeout: self.call_timeout,
            ..CallPolicy::default()
        }
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Defaults for each run
    pub run: RunConfig,
    pub router: RouterConfig,
    pub sessions: SessionManagerConfig,
    /// Where learned mode statistics are persisted
    pub mode_stats_path: Option<PathBuf>,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if a set variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name);
        let mut config = Self::default();
        let run = &mut config.run;

        if let Some(v) = parse_var(&get, "PROBE_MAX_FANOUTS")? {
            run.caps.max_fanouts = v;
        }
        if let Some(v) = parse_var(&get, "PROBE_MAX_VALIDATION_BATCHES")? {
            run.caps.max_validation_batches = v;
        }
        if let Some(v) = parse_var(&get, "PROBE_MAX_CANDIDATES")? {
            run.caps.max_candidates = v;
        }
        if let Some(v) = parse_var(&get, "PROBE_MAX_REASONING_TOKENS")? {
            run.caps.max_reasoning_tokens = v;
        }
        if let Some(v) = parse_var(&get, "PROBE_MAX_DURATION_SECS")? {
            run.caps.max_duration = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(&get, "PROBE_MAX_TOOL_CALLS")? {
            run.caps.max_tool_calls = v;
        }
        if let Some(v) = parse_var(&get, "PROBE_TIMEOUT_SECS")? {
            run.timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(&get, "PROBE_RETRY_ATTEMPTS")? {
            run.retry_attempts = v;
        }
        if let Some(v) = parse_var::<u64, _>(&get, "PROBE_CALL_TIMEOUT_SECS")? {
            if v == 0 {
                return Err(ConfigError::InvalidValue(
                    "PROBE_CALL_TIMEOUT_SECS".to_string(),
                    "must be at least 1".to_string(),
                ));
            }
            run.call_timeout = Duration::from_secs(v);
        }

        run.fallback_enabled = flag(&get, "PROBE_FALLBACK_ENABLED", run.fallback_enabled);
        run.parallel_sub_calls = flag(&get, "PROBE_PARALLEL_CALLS", run.parallel_sub_calls);
        run.caching_enabled = flag(&get, "PROBE_CACHE_RESULTS", run.caching_enabled);
        run.telemetry_enabled = flag(&get, "PROBE_TELEMETRY", run.telemetry_enabled);

        if let Some(v) = parse_var::<f64, _>(&get, "PROBE_COST_CEILING_USD")? {
            if !(v > 0.0) {
                return Err(ConfigError::InvalidValue(
                    "PROBE_COST_CEILING_USD".to_string(),
                    "must be positive".to_string(),
                ));
            }
            config.router.cost_ceiling_usd = v;
        }
        config.mode_stats_path = get("PROBE_MODE_STATS_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Ok(config)
    }
}

fn parse_var<T, F>(get: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = get(name);
    parse_optional(raw.as_deref()).map_err(|e| ConfigError::InvalidValue(name.to_string(), e))
}

fn flag<F>(get: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    get(name).map(|v| parse_flag(&v)).unwrap_or(default)
}
