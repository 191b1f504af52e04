//! Environment variable and config file support for
//! [`SchedulerBuilder`](super::builder::SchedulerBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`worker_threads(4)`)
//! 2. **Environment variables**: values from `STREAMSCHED_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`SchedulerConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `STREAMSCHED_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `STREAMSCHED_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `STREAMSCHED_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `STREAMSCHED_GLOBAL_LOCK_MAX_WAIT_MS` | `u64` | `global_lock_max_wait` |
//! | `STREAMSCHED_MIN_SLEEP_MS` | `u64` | `min_sleep` |
//! | `STREAMSCHED_SELECT_TIMEOUT_MS` | `u64` | `select_timeout` |
//! | `STREAMSCHED_EVENT_THREAD` | `bool` | `event_thread` |

use crate::error::BuildError;
use crate::runtime::config::SchedulerConfig;
use std::time::Duration;

/// Environment variable name for worker thread count.
pub const ENV_WORKER_THREADS: &str = "STREAMSCHED_WORKER_THREADS";
/// Environment variable name for thread stack size.
pub const ENV_THREAD_STACK_SIZE: &str = "STREAMSCHED_THREAD_STACK_SIZE";
/// Environment variable name for thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "STREAMSCHED_THREAD_NAME_PREFIX";
/// Environment variable name for the global lock wait ceiling (milliseconds).
pub const ENV_GLOBAL_LOCK_MAX_WAIT_MS: &str = "STREAMSCHED_GLOBAL_LOCK_MAX_WAIT_MS";
/// Environment variable name for the sleep floor (milliseconds).
pub const ENV_MIN_SLEEP_MS: &str = "STREAMSCHED_MIN_SLEEP_MS";
/// Environment variable name for the multiplexer wait bound (milliseconds).
pub const ENV_SELECT_TIMEOUT_MS: &str = "STREAMSCHED_SELECT_TIMEOUT_MS";
/// Environment variable name for the readiness thread toggle.
pub const ENV_EVENT_THREAD: &str = "STREAMSCHED_EVENT_THREAD";

/// Apply environment variable overrides to a [`SchedulerConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut SchedulerConfig) -> Result<(), BuildError> {
    if let Some(val) = read_env(ENV_WORKER_THREADS) {
        config.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_STACK_SIZE) {
        config.thread_stack_size = parse_usize(ENV_THREAD_STACK_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_GLOBAL_LOCK_MAX_WAIT_MS) {
        config.global_lock_max_wait = parse_millis(ENV_GLOBAL_LOCK_MAX_WAIT_MS, &val)?;
    }
    if let Some(val) = read_env(ENV_MIN_SLEEP_MS) {
        config.min_sleep = parse_millis(ENV_MIN_SLEEP_MS, &val)?;
    }
    if let Some(val) = read_env(ENV_SELECT_TIMEOUT_MS) {
        config.select_timeout = parse_millis(ENV_SELECT_TIMEOUT_MS, &val)?;
    }
    if let Some(val) = read_env(ENV_EVENT_THREAD) {
        config.event_thread = parse_bool(ENV_EVENT_THREAD, &val)?;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, BuildError> {
    val.trim().parse::<usize>().map_err(|e| {
        BuildError::custom(format!(
            "invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"
        ))
    })
}

fn parse_millis(var_name: &str, val: &str) -> Result<Duration, BuildError> {
    val.trim().parse::<u64>().map(Duration::from_millis).map_err(|e| {
        BuildError::custom(format!(
            "invalid value for {var_name}: expected milliseconds, got {val:?} ({e})"
        ))
    })
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool, BuildError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(BuildError::custom(format!(
            "invalid value for {var_name}: expected bool (true/false/1/0/yes/no), got {val:?}"
        ))),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable scheduler configuration.
///
/// ```toml
/// [scheduler]
/// worker_threads = 4
/// thread_stack_size = 2097152
/// thread_name_prefix = "rtsp-worker"
/// global_lock_max_wait_ms = 5000
/// min_sleep_ms = 10
/// select_timeout_ms = 15000
/// event_thread = true
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerTomlConfig {
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerToml,
}

/// Scheduler section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerToml {
    /// Number of worker threads.
    pub worker_threads: Option<usize>,
    /// Stack size per worker thread in bytes.
    pub thread_stack_size: Option<usize>,
    /// Name prefix for worker threads.
    pub thread_name_prefix: Option<String>,
    /// Global lock wait ceiling in milliseconds.
    pub global_lock_max_wait_ms: Option<u64>,
    /// Sleep floor in milliseconds.
    pub min_sleep_ms: Option<u64>,
    /// Multiplexer wait bound in milliseconds.
    pub select_timeout_ms: Option<u64>,
    /// Start the readiness thread.
    pub event_thread: Option<bool>,
}

/// Apply a parsed TOML config to a [`SchedulerConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut SchedulerConfig, toml: &SchedulerTomlConfig) {
    let s = &toml.scheduler;
    if let Some(v) = s.worker_threads {
        config.worker_threads = v;
    }
    if let Some(v) = s.thread_stack_size {
        config.thread_stack_size = v;
    }
    if let Some(ref v) = s.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(v) = s.global_lock_max_wait_ms {
        config.global_lock_max_wait = Duration::from_millis(v);
    }
    if let Some(v) = s.min_sleep_ms {
        config.min_sleep = Duration::from_millis(v);
    }
    if let Some(v) = s.select_timeout_ms {
        config.select_timeout = Duration::from_millis(v);
    }
    if let Some(v) = s.event_thread {
        config.event_thread = v;
    }
}

/// Parse a TOML string into a [`SchedulerTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<SchedulerTomlConfig, BuildError> {
    toml::from_str(toml_str)
        .map_err(|e| BuildError::custom(format!("failed to parse TOML config: {e}")))
}

/// Read and parse a TOML file into a [`SchedulerTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<SchedulerTomlConfig, BuildError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        BuildError::custom(format!(
            "failed to read config file {}: {e}",
            path.display()
        ))
    })?;
    parse_toml_str(&content)
}
