mod index;
pub mod sanitizer;

pub use index::{LogEntry, LogIndex, LogLevel, LogQuery};

use crate::server_config::LoggingConfig;

/// Install the tracing subscriber the way the environment asks for it:
/// plain console by default, JSON when structured logging is on.
pub fn init_tracing(cfg: &LoggingConfig) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.level.to_lowercase()));

    if !cfg.console {
        let _ = tracing_subscriber::registry().with(filter).try_init();
        return;
    }

    if cfg.structured {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_ansi(false))
            .try_init();
    }
}
