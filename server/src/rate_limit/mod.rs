pub mod headers;
mod limiter;
mod monitor;
mod profiles;

pub use limiter::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use monitor::{MonitorSnapshot, RateLimitEvent, RateLimitMonitor};
pub use profiles::RateLimitProfile;
