//! Lookup pacing and retries
//!
//! Consecutive network lookups are spaced at least `1 / lookups_per_second`
//! apart (500 ms at the default of 2). Cache hits never wait. The retry
//! helper is used by the cache when fetch retries are configured; the
//! resolver itself never retries.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};
use crate::config::RateLimitConfig;

/// Spaces lookups a fixed interval apart. Clones share the same schedule.
#[derive(Debug, Clone)]
pub struct LookupPacer {
    interval: Duration,
    last_lookup: Arc<Mutex<Option<Instant>>>,
}

impl LookupPacer {
    /// Zero lookups per second disables pacing.
    pub fn new(lookups_per_second: u32) -> Self {
        let interval = if lookups_per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / lookups_per_second
        };

        Self {
            interval,
            last_lookup: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.lookups_per_second)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Wait until `interval` has passed since the previous lookup, then
    /// claim the slot. The first lookup goes out immediately.
    pub async fn wait_turn(&self) {
        if !self.is_enabled() {
            return;
        }

        let mut last = self.last_lookup.lock().await;
        if let Some(previous) = *last {
            let wait = (previous + self.interval).saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                debug!("Pacing next lookup by {:?}", wait);
                sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Retry helper with configurable backoff
#[derive(Debug, Clone)]
pub struct RetryHelper {
    config: RateLimitConfig,
}

impl RetryHelper {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Helper for the configured policy, or `None` when retries are off
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        (config.max_retries > 0).then(|| Self::new(config))
    }

    /// Run `operation`, retrying every error with backoff
    pub async fn with_retry<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Debug,
    {
        self.with_retry_if(operation, |_| true).await
    }

    /// Run `operation`, retrying only errors accepted by `should_retry`
    pub async fn with_retry_if<T, E, F, Fut, P>(&self, operation: F, should_retry: P) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Debug,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !should_retry(&e) {
                        return Err(e);
                    }
                    if attempt > self.config.max_retries {
                        warn!(
                            "All {} retry attempts exhausted, giving up",
                            self.config.max_retries
                        );
                        return Err(e);
                    }

                    let delay = self.config.calculate_backoff_delay(attempt);
                    debug!(
                        "Attempt {} failed ({:?}), retrying in {:?} with {:?} backoff",
                        attempt, e, delay, self.config.backoff_strategy
                    );

                    sleep(delay).await;
                }
            }
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}
