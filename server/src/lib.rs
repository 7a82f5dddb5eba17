#[macro_use]
mod macros;

pub mod alerts;
pub mod api_keys;
pub mod email_transport;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod progress;
pub mod queue;
pub mod rate_limit;
pub mod request_tracing;
pub mod runtime;
pub mod scheduler;
pub mod server_config;
pub mod shared_store;
pub mod structs;
pub mod workers;

#[cfg(test)]
pub mod testing;
#[cfg(test)]
mod tests;

pub type HttpClient = reqwest::Client;

pub use error::{AppError, AppResult};
pub use runtime::Runtime;
