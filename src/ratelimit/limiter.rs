//! Core rate limiter implementation.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info, trace};

use super::handler::{self, LimitExceeded, LimitExceededHandler};
use super::window::{ResetTask, Window};
use crate::error::{GateError, Result};

/// Default time window when no specific window is configured.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Configuration for a rate limiter.
///
/// Built and validated through [`LimiterConfig::builder`].
#[derive(Clone)]
pub struct LimiterConfig {
    /// Maximum requests allowed per client in one window
    allowed_per_window: u64,
    /// Length of one window
    window: Duration,
    /// Called when a client is denied
    on_limit_exceeded: Option<Arc<dyn LimitExceededHandler>>,
}

impl LimiterConfig {
    /// Start building a configuration with the default one minute window.
    pub fn builder() -> LimiterConfigBuilder {
        LimiterConfigBuilder::default()
    }

    /// Maximum requests allowed per client in one window.
    pub fn allowed_per_window(&self) -> u64 {
        self.allowed_per_window
    }

    /// Length of one window.
    pub fn window(&self) -> Duration {
        self.window
    }
}

impl fmt::Debug for LimiterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterConfig")
            .field("allowed_per_window", &self.allowed_per_window)
            .field("window", &self.window)
            .field("on_limit_exceeded", &self.on_limit_exceeded.is_some())
            .finish()
    }
}

/// Builder for [`LimiterConfig`].
#[derive(Default)]
pub struct LimiterConfigBuilder {
    allowed_per_window: Option<u64>,
    window: Option<Duration>,
    on_limit_exceeded: Option<Arc<dyn LimitExceededHandler>>,
}

impl LimiterConfigBuilder {
    /// Set the number of requests each client may make per window.
    pub fn allowed_per_window(mut self, allowed: u64) -> Self {
        self.allowed_per_window = Some(allowed);
        self
    }

    /// Set the window length.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    /// Set the handler invoked on every denied check.
    pub fn on_limit_exceeded<H>(mut self, handler: H) -> Self
    where
        H: LimitExceededHandler + 'static,
    {
        self.on_limit_exceeded = Some(Arc::new(handler));
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<LimiterConfig> {
        let allowed_per_window = self.allowed_per_window.ok_or_else(|| {
            GateError::InvalidConfiguration("allowed_per_window must be set".to_string())
        })?;
        if allowed_per_window < 1 {
            return Err(GateError::InvalidConfiguration(
                "allowed_per_window must be at least 1".to_string(),
            ));
        }

        let window = self.window.unwrap_or(DEFAULT_WINDOW);
        if window.is_zero() {
            return Err(GateError::InvalidConfiguration(
                "window must be a positive duration".to_string(),
            ));
        }

        Ok(LimiterConfig {
            allowed_per_window,
            window,
            on_limit_exceeded: self.on_limit_exceeded,
        })
    }
}

/// Outcome of [`RateLimiter::guard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission<T> {
    /// The request was counted and the handler ran
    Admitted(T),
    /// The client is over its limit; the handler did not run
    Denied,
}

impl<T> Admission<T> {
    /// Whether the request was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

/// Per-client fixed-window rate limiter.
///
/// Counters live in memory for the current window only. A background task
/// clears them once per window, the first time one window after creation.
/// The limiter is thread-safe and can be shared across tasks behind an `Arc`.
pub struct RateLimiter {
    config: LimiterConfig,
    window: Arc<Window>,
    reset_task: ResetTask,
}

impl RateLimiter {
    /// Create a limiter and start its reset task on the current Tokio runtime.
    pub fn new(config: LimiterConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| GateError::NoRuntime)?;
        Ok(Self::with_runtime(config, &runtime))
    }

    /// Create a limiter whose reset task runs on the given runtime.
    pub fn with_runtime(config: LimiterConfig, runtime: &Handle) -> Self {
        let window = Arc::new(Window::new(config.window));
        let reset_task = ResetTask::spawn(runtime, Arc::clone(&window));

        info!(
            allowed_per_window = config.allowed_per_window,
            window = ?config.window,
            "Rate limiter started"
        );

        Self {
            config,
            window,
            reset_task,
        }
    }

    /// Check whether the client may make another request in this window.
    ///
    /// This never changes the client's count. On denial the configured
    /// limit-exceeded handler runs before `false` is returned.
    pub fn is_allowed(&self, client_id: &str) -> bool {
        if self.is_shut_down() {
            return true;
        }

        let count = self.window.current().count(client_id);
        let limit = self.config.allowed_per_window;

        trace!(client_id = %client_id, count = count, limit = limit, "Checking admission");

        if count < limit {
            return true;
        }

        debug!(
            client_id = %client_id,
            count = count,
            limit = limit,
            "Rate limit exceeded"
        );

        if let Some(ref on_limit_exceeded) = self.config.on_limit_exceeded {
            let event = LimitExceeded {
                client_id: client_id.to_string(),
                count,
                limit,
                retry_after: self.window.duration_until_reset(),
            };
            handler::notify(on_limit_exceeded.as_ref(), &event);
        }

        false
    }

    /// Count one processed request for the client in the current window.
    pub fn record_request(&self, client_id: &str) {
        if let Some(count) = self.window.record(client_id) {
            trace!(client_id = %client_id, count = count, "Recorded request");
        }
    }

    /// Run `handler` only if the client is admitted, counting the request
    /// before the handler starts.
    pub async fn guard<F, Fut, T>(&self, client_id: &str, handler: F) -> Admission<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.is_allowed(client_id) {
            return Admission::Denied;
        }

        self.record_request(client_id);
        Admission::Admitted(handler().await)
    }

    /// Get the current-window count for a client.
    pub fn count(&self, client_id: &str) -> u64 {
        self.window.current().count(client_id)
    }

    /// Get the number of requests the client has left in this window.
    pub fn remaining(&self, client_id: &str) -> u64 {
        self.config
            .allowed_per_window
            .saturating_sub(self.count(client_id))
    }

    /// Get the number of distinct clients seen in this window.
    pub fn tracked_clients(&self) -> usize {
        self.window.current().len()
    }

    /// Get the duration until the current window resets.
    pub fn duration_until_reset(&self) -> Duration {
        if self.is_shut_down() {
            return Duration::ZERO;
        }
        self.window.duration_until_reset()
    }

    /// Get the number of window resets performed so far.
    pub fn window_generation(&self) -> u64 {
        self.window.generation()
    }

    /// Get the limiter configuration.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Whether [`RateLimiter::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.window.is_closed()
    }

    /// Stop the reset task and drop all counters.
    ///
    /// Safe to call more than once. Afterwards every client is allowed and
    /// nothing is counted.
    pub fn shutdown(&self) {
        self.reset_task.stop();

        if self.window.close() {
            info!("Rate limiter shut down");
        }
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("tracked_clients", &self.tracked_clients())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
