//! Rate limiting logic and state management.

mod counter;
mod handler;
mod limiter;
mod window;

pub use counter::CounterTable;
pub use handler::{LimitExceeded, LimitExceededHandler};
pub use limiter::{Admission, LimiterConfig, LimiterConfigBuilder, RateLimiter, DEFAULT_WINDOW};
pub use window::{ResetTask, Window};
