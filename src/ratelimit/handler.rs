//! Hooks invoked when a client is denied admission.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use tracing::warn;

/// Details of a denied admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitExceeded {
    /// The client that was denied
    pub client_id: String,
    /// The client's count in the current window
    pub count: u64,
    /// Requests allowed per window
    pub limit: u64,
    /// Time left until the current window resets
    pub retry_after: Duration,
}

/// Handler called synchronously whenever a client is denied.
///
/// Any `Fn(&LimitExceeded) + Send + Sync` closure implements this trait.
pub trait LimitExceededHandler: Send + Sync {
    /// Called once per denied admission check.
    fn on_limit_exceeded(&self, event: &LimitExceeded);
}

impl<F> LimitExceededHandler for F
where
    F: Fn(&LimitExceeded) + Send + Sync,
{
    fn on_limit_exceeded(&self, event: &LimitExceeded) {
        self(event)
    }
}

/// Run the handler, containing any panic it raises.
///
/// Returns `false` if the handler panicked.
pub(crate) fn notify(handler: &dyn LimitExceededHandler, event: &LimitExceeded) -> bool {
    match catch_unwind(AssertUnwindSafe(|| handler.on_limit_exceeded(event))) {
        Ok(()) => true,
        Err(_) => {
            warn!(
                client_id = %event.client_id,
                "Limit exceeded handler panicked"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn event(client_id: &str) -> LimitExceeded {
        LimitExceeded {
            client_id: client_id.to_string(),
            count: 3,
            limit: 3,
            retry_after: Duration::from_secs(12),
        }
    }

    #[test]
    fn test_closure_is_a_handler() {
        let seen = Mutex::new(Vec::new());
        let handler = |e: &LimitExceeded| seen.lock().unwrap().push(e.client_id.clone());

        assert!(notify(&handler, &event("1.2.3.4")));
        assert_eq!(*seen.lock().unwrap(), vec!["1.2.3.4".to_string()]);
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let handler = |_: &LimitExceeded| panic!("handler failure");

        assert!(!notify(&handler, &event("1.2.3.4")));
    }
}
