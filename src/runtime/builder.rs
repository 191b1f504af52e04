//! Scheduler builder.
//!
//! Each builder method consumes `self` and returns an updated builder.
//! Values set here win over environment variables (opt in with
//! [`SchedulerBuilder::with_env_overrides`]), which win over a config file
//! (`config-file` feature), which wins over the defaults.

use crate::error::{Error, Result};
use crate::runtime::config::{SchedulerConfig, TaskPanicResponse};
use crate::runtime::env_config;
use crate::runtime::reactor::{Multiplexer, SelectMultiplexer};
use crate::runtime::Scheduler;
use crate::tracing_compat::info;
use std::time::Duration;

/// Values set programmatically; `None` defers to env, file, or default.
#[derive(Debug, Default, Clone)]
struct Overrides {
    worker_threads: Option<usize>,
    thread_stack_size: Option<usize>,
    thread_name_prefix: Option<String>,
    global_lock_max_wait: Option<Duration>,
    min_sleep: Option<Duration>,
    select_timeout: Option<Duration>,
    event_thread: Option<bool>,
    on_task_panic: Option<TaskPanicResponse>,
}

impl Overrides {
    fn apply(self, config: &mut SchedulerConfig) {
        if let Some(v) = self.worker_threads {
            config.worker_threads = v;
        }
        if let Some(v) = self.thread_stack_size {
            config.thread_stack_size = v;
        }
        if let Some(v) = self.thread_name_prefix {
            config.thread_name_prefix = v;
        }
        if let Some(v) = self.global_lock_max_wait {
            config.global_lock_max_wait = v;
        }
        if let Some(v) = self.min_sleep {
            config.min_sleep = v;
        }
        if let Some(v) = self.select_timeout {
            config.select_timeout = v;
        }
        if let Some(v) = self.event_thread {
            config.event_thread = v;
        }
        if let Some(v) = self.on_task_panic {
            config.on_task_panic = v;
        }
    }
}

/// Builder for a [`Scheduler`].
#[derive(Debug, Default)]
pub struct SchedulerBuilder {
    overrides: Overrides,
    env_overrides: bool,
    #[cfg(feature = "config-file")]
    config_file: Option<std::path::PathBuf>,
    multiplexer: Option<Box<dyn Multiplexer>>,
}

impl SchedulerBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads started by `build()`.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.overrides.worker_threads = Some(n);
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.overrides.thread_stack_size = Some(size);
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.overrides.thread_name_prefix = Some(prefix.into());
        self
    }

    /// Set the slice after which a blocked global lock acquisition warns.
    #[must_use]
    pub fn global_lock_max_wait(mut self, wait: Duration) -> Self {
        self.overrides.global_lock_max_wait = Some(wait);
        self
    }

    /// Set the floor applied to requested sleeps. Raising it is allowed;
    /// anything under 10 ms resolves to 10 ms.
    #[must_use]
    pub fn min_sleep(mut self, floor: Duration) -> Self {
        self.overrides.min_sleep = Some(floor);
        self
    }

    /// Set the bound on a single multiplexer wait.
    #[must_use]
    pub fn select_timeout(mut self, timeout: Duration) -> Self {
        self.overrides.select_timeout = Some(timeout);
        self
    }

    /// Start (default) or skip the event thread. Without it, drive readiness
    /// with [`Scheduler::poll_events`].
    #[must_use]
    pub fn event_thread(mut self, enabled: bool) -> Self {
        self.overrides.event_thread = Some(enabled);
        self
    }

    /// Set the policy for a panicking task.
    #[must_use]
    pub fn on_task_panic(mut self, response: TaskPanicResponse) -> Self {
        self.overrides.on_task_panic = Some(response);
        self
    }

    /// Use a custom readiness backend instead of `select(2)`.
    #[must_use]
    pub fn multiplexer(mut self, mux: Box<dyn Multiplexer>) -> Self {
        self.multiplexer = Some(mux);
        self
    }

    /// Apply `STREAMSCHED_*` environment variables at build time.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.env_overrides = true;
        self
    }

    /// Load a TOML config file at build time.
    #[cfg(feature = "config-file")]
    #[must_use]
    pub fn config_file(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Resolves the effective configuration without starting anything.
    pub fn resolve_config(&self) -> Result<SchedulerConfig> {
        let mut config = SchedulerConfig::default();
        #[cfg(feature = "config-file")]
        {
            if let Some(path) = &self.config_file {
                let file = env_config::parse_toml_file(path)?;
                env_config::apply_toml_config(&mut config, &file);
            }
        }
        if self.env_overrides {
            env_config::apply_env_overrides(&mut config)?;
        }
        self.overrides.clone().apply(&mut config);
        config.normalize();
        Ok(config)
    }

    /// Build the scheduler, start its workers and (unless disabled) its
    /// event thread.
    pub fn build(mut self) -> Result<Scheduler> {
        let config = self.resolve_config()?;
        let mux = match self.multiplexer.take() {
            Some(mux) => mux,
            None => Box::new(
                SelectMultiplexer::with_timeout(config.select_timeout).map_err(Error::from)?,
            ),
        };
        let workers = config.worker_threads;
        let event_thread = config.event_thread;
        info!(
            workers,
            event_thread,
            min_sleep_ms = config.min_sleep.as_millis() as u64,
            "building scheduler"
        );

        let scheduler = Scheduler::with_multiplexer(config, mux);
        let started = scheduler.add_workers(workers).and_then(|()| {
            if event_thread {
                scheduler.start_event_thread()
            } else {
                Ok(())
            }
        });
        if let Err(e) = started {
            scheduler.shutdown();
            return Err(e);
        }
        Ok(scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::env_config::{ENV_MIN_SLEEP_MS, ENV_WORKER_THREADS};

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn programmatic_beats_env() {
        init_test("programmatic_beats_env");
        let _guard = crate::test_utils::env_lock();
        std::env::set_var(ENV_WORKER_THREADS, "7");
        std::env::set_var(ENV_MIN_SLEEP_MS, "25");

        let config = SchedulerBuilder::new()
            .worker_threads(2)
            .with_env_overrides()
            .resolve_config()
            .expect("resolve");

        std::env::remove_var(ENV_WORKER_THREADS);
        std::env::remove_var(ENV_MIN_SLEEP_MS);

        crate::assert_with_log!(config.worker_threads == 2, "programmatic", 2, config.worker_threads);
        crate::assert_with_log!(
            config.min_sleep == Duration::from_millis(25),
            "env",
            Duration::from_millis(25),
            config.min_sleep
        );
        crate::test_complete!("programmatic_beats_env");
    }

    #[test]
    fn env_ignored_unless_requested() {
        init_test("env_ignored_unless_requested");
        let _guard = crate::test_utils::env_lock();
        std::env::set_var(ENV_WORKER_THREADS, "9");
        let config = SchedulerBuilder::new().resolve_config().expect("resolve");
        std::env::remove_var(ENV_WORKER_THREADS);
        crate::assert_with_log!(
            config.worker_threads == SchedulerConfig::default_worker_threads(),
            "default",
            SchedulerConfig::default_worker_threads(),
            config.worker_threads
        );
        crate::test_complete!("env_ignored_unless_requested");
    }

    #[test]
    fn bad_env_value_is_invalid_config() {
        init_test("bad_env_value_is_invalid_config");
        let _guard = crate::test_utils::env_lock();
        std::env::set_var(ENV_WORKER_THREADS, "many");
        let err = SchedulerBuilder::new()
            .with_env_overrides()
            .resolve_config()
            .expect_err("bad value");
        std::env::remove_var(ENV_WORKER_THREADS);
        crate::assert_with_log!(
            err.kind() == crate::ErrorKind::InvalidConfig,
            "kind",
            crate::ErrorKind::InvalidConfig,
            err.kind()
        );
        crate::test_complete!("bad_env_value_is_invalid_config");
    }

    #[test]
    fn min_sleep_cannot_drop_below_ten_ms() {
        init_test("min_sleep_cannot_drop_below_ten_ms");
        let low = SchedulerBuilder::new()
            .min_sleep(Duration::from_millis(1))
            .resolve_config()
            .expect("resolve");
        crate::assert_with_log!(
            low.min_sleep == Duration::from_millis(10),
            "raised to floor",
            Duration::from_millis(10),
            low.min_sleep
        );

        let high = SchedulerBuilder::new()
            .min_sleep(Duration::from_millis(30))
            .resolve_config()
            .expect("resolve");
        crate::assert_with_log!(
            high.min_sleep == Duration::from_millis(30),
            "raising kept",
            Duration::from_millis(30),
            high.min_sleep
        );
        crate::test_complete!("min_sleep_cannot_drop_below_ten_ms");
    }

    #[test]
    fn build_without_threads_then_shutdown() {
        init_test("build_without_threads_then_shutdown");
        let scheduler = SchedulerBuilder::new()
            .worker_threads(0)
            .event_thread(false)
            .build()
            .expect("build");
        crate::assert_with_log!(scheduler.worker_count() == 0, "no workers", 0, scheduler.worker_count());
        assert!(!scheduler.has_event_thread());
        scheduler.shutdown();
        assert!(scheduler.is_shut_down());
        crate::test_complete!("build_without_threads_then_shutdown");
    }
}
