//! Engine-level configuration (§6): the tunables the Poller, Executor, and
//! Stale-Lock Reaper read. Resolution from CLI flags / env vars / config
//! file into this struct is `taskforge-cli`'s job; this type only carries
//! the resolved values plus their compile-time defaults.

use std::time::Duration;

/// Alert sink configuration (§4.6).
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    pub channel: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            channel: None,
        }
    }
}

/// Base URLs for the built-in HTTP-backed handlers (§4.4 [SUPPLEMENT]).
#[derive(Debug, Clone)]
pub struct HandlerUrls {
    pub orders_service_url: String,
    pub payments_service_url: String,
}

impl Default for HandlerUrls {
    fn default() -> Self {
        Self {
            orders_service_url: "http://localhost:8081".to_string(),
            payments_service_url: "http://localhost:8082".to_string(),
        }
    }
}

/// The full set of tunables the scheduling engine reads (§6 configuration
/// surface table).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Poller tick interval (default 30s, enforced minimum 1s).
    pub poll_interval: Duration,
    /// Max tasks fetched per poll tick.
    pub batch_size: i64,
    /// Max concurrent executions per replica.
    pub executor_pool_size: usize,
    /// Fallback retry ceiling when a task has no per-task override.
    pub default_max_retries: i32,
    /// Fallback backoff base (hours) when a task has no per-task override.
    pub default_retry_delay_hours: i32,
    /// Per-task lock lease (§4.3 step 1).
    pub lock_duration_minutes: i32,
    /// When a processing lock counts as stale (§4.5).
    pub stale_task_threshold_minutes: i32,
    /// Stale-Lock Reaper tick interval.
    pub stale_check_interval: Duration,
    /// Graceful-shutdown drain window (§5).
    pub shutdown_grace: Duration,
    pub alert: AlertConfig,
    pub handler_urls: HandlerUrls,
    /// Terminal-task retention horizon (days) for the retention sweep.
    pub retention_days: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_size: 100,
            executor_pool_size: 20,
            default_max_retries: 5,
            default_retry_delay_hours: 24,
            lock_duration_minutes: 30,
            stale_task_threshold_minutes: 60,
            stale_check_interval: Duration::from_secs(5 * 60),
            shutdown_grace: Duration::from_secs(30),
            alert: AlertConfig::default(),
            handler_urls: HandlerUrls::default(),
            retention_days: 90,
        }
    }
}

impl EngineConfig {
    /// Clamp `poll_interval` to the documented minimum of 1s.
    pub fn normalized(mut self) -> Self {
        if self.poll_interval < Duration::from_secs(1) {
            self.poll_interval = Duration::from_secs(1);
        }
        self
    }
}
