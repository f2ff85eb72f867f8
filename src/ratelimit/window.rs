//! Current-window state and its periodic reset task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::counter::CounterTable;

/// The counter table for the current window.
///
/// Readers clone the table `Arc` under a short read lock and work on that
/// snapshot. A reset swaps a fresh table in under the write lock, so an
/// operation racing with a reset sees either the whole old table or the whole
/// new one. Increments run under the read lock so that closing the window
/// cannot interleave with them.
#[derive(Debug)]
pub struct Window {
    /// Length of one window
    duration: Duration,
    /// Counters for the current window, and whether the window is closed
    state: RwLock<WindowState>,
    /// When the current window started
    started_at: Mutex<Instant>,
    /// Number of resets performed so far
    generation: AtomicU64,
}

#[derive(Debug)]
struct WindowState {
    table: Arc<CounterTable>,
    closed: bool,
}

impl Window {
    /// Create a window state with an empty table.
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            state: RwLock::new(WindowState {
                table: Arc::new(CounterTable::new()),
                closed: false,
            }),
            started_at: Mutex::new(Instant::now()),
            generation: AtomicU64::new(0),
        }
    }

    /// Get the table for the current window.
    pub fn current(&self) -> Arc<CounterTable> {
        Arc::clone(&self.state.read().table)
    }

    /// Count one request for the client in the current window.
    ///
    /// Returns the new count, or `None` once the window has been closed.
    pub fn record(&self, client_id: &str) -> Option<u64> {
        let state = self.state.read();
        if state.closed {
            return None;
        }
        Some(state.table.increment(client_id))
    }

    /// Replace the current table with an empty one and start a new window.
    ///
    /// Returns the number of clients that were tracked in the finished window.
    pub fn reset(&self) -> usize {
        let previous = {
            let mut state = self.state.write();
            *self.started_at.lock() = Instant::now();
            std::mem::replace(&mut state.table, Arc::new(CounterTable::new()))
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        debug!(
            generation = generation,
            cleared_clients = previous.len(),
            "Window reset"
        );

        previous.len()
    }

    /// Drop all counters and refuse further increments.
    ///
    /// Returns `true` only for the call that closed the window.
    pub fn close(&self) -> bool {
        let mut state = self.state.write();
        let first = !state.closed;
        state.closed = true;
        state.table = Arc::new(CounterTable::new());
        first
    }

    /// Whether [`Window::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Length of one window.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Get the duration until the current window is due to reset.
    pub fn duration_until_reset(&self) -> Duration {
        let elapsed = self.started_at.lock().elapsed();
        self.duration.saturating_sub(elapsed)
    }

    /// Number of resets performed so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Background task that resets a [`Window`] once per window duration.
///
/// The table starts empty, so the first reset fires one window duration after
/// the task is spawned and then every window duration after that. The task
/// keeps running until [`ResetTask::stop`] is called or the handle is dropped.
#[derive(Debug)]
pub struct ResetTask {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ResetTask {
    /// Spawn the reset loop on the given runtime.
    pub fn spawn(runtime: &Handle, window: Arc<Window>) -> Self {
        let period = window.duration();
        let first_reset = Instant::now() + period;

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(first_reset, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                window.reset();
                trace!(next_reset_in = ?period, "Scheduled next window reset");
            }
        });

        Self {
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop the reset loop. Returns `true` only for the call that stopped it.
    pub fn stop(&self) -> bool {
        match self.handle.lock().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Whether the reset loop is still scheduled.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for ResetTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_swaps_in_empty_table() {
        let window = Window::new(Duration::from_secs(60));
        window.current().increment("a");
        window.current().increment("b");

        assert_eq!(window.reset(), 2);
        assert!(window.current().is_empty());
        assert_eq!(window.generation(), 1);
    }

    #[test]
    fn test_snapshot_taken_before_reset_keeps_old_counts() {
        let window = Window::new(Duration::from_secs(60));
        let before = window.current();
        before.increment("a");

        window.reset();

        assert_eq!(before.count("a"), 1);
        assert_eq!(window.current().count("a"), 0);
    }

    #[test]
    fn test_closed_window_refuses_increments() {
        let window = Window::new(Duration::from_secs(60));
        assert_eq!(window.record("a"), Some(1));

        assert!(window.close());
        assert!(!window.close());

        assert!(window.is_closed());
        assert_eq!(window.record("a"), None);
        assert!(window.current().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_until_reset_counts_down() {
        let window = Window::new(Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(20)).await;
        let remaining = window.duration_until_reset();
        assert!(remaining <= Duration::from_secs(40));
        assert!(remaining > Duration::from_secs(39));

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(window.duration_until_reset(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_task_repeats_every_window() {
        let window = Arc::new(Window::new(Duration::from_secs(10)));
        let task = ResetTask::spawn(&Handle::current(), Arc::clone(&window));

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(window.generation(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(window.generation(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(window.generation(), 2);

        assert!(task.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_halts_resets() {
        let window = Arc::new(Window::new(Duration::from_secs(10)));
        let task = ResetTask::spawn(&Handle::current(), Arc::clone(&window));
        tokio::time::sleep(Duration::from_millis(10_005)).await;
        assert_eq!(window.generation(), 1);

        assert!(task.is_running());
        assert!(task.stop());
        assert!(!task.stop());
        assert!(!task.is_running());

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(window.generation(), 1);
    }
}
