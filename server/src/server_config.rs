use config::{Config, ConfigError};
use serde::Deserialize;

/// Flat view of the recognized environment variables. `config` lowercases
/// the variable names, so `REDIS_HOST` arrives as `redis_host`.
#[derive(Debug, Deserialize)]
struct EnvSettings {
    database_url: Option<String>,

    redis_host: Option<String>,
    redis_port: Option<u16>,
    redis_password: Option<String>,
    redis_db: Option<i64>,

    log_level: Option<String>,
    logging_structured: Option<bool>,
    logging_console: Option<bool>,

    import_concurrency: Option<usize>,
    email_concurrency: Option<usize>,
    max_queue_size: Option<usize>,
    queue_remove_on_complete: Option<usize>,
    queue_remove_on_fail: Option<usize>,
    stall_timeout_ms: Option<u64>,
    shutdown_grace_ms: Option<u64>,

    start_workers: Option<bool>,

    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    smtp_username: Option<String>,
    smtp_password: Option<String>,
    smtp_from_email: Option<String>,
    smtp_from_name: Option<String>,

    metrics_retention_hours: Option<u32>,
    alert_eval_interval_secs: Option<u64>,
    suspicious_request_threshold: Option<u64>,

    environment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}/{}", password, self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub structured: bool,
    pub console: bool,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub import_concurrency: usize,
    pub email_concurrency: usize,
    pub max_queue_size: usize,
    pub remove_on_complete: usize,
    pub remove_on_fail: usize,
    pub stall_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_email: String,
    pub from_name: String,
}

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub metrics_retention_hours: u32,
    pub alert_eval_interval_secs: u64,
    pub suspicious_request_threshold: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub redis: RedisConfig,
    pub logging: LoggingConfig,
    pub queue: QueueSettings,
    pub smtp: SmtpConfig,
    pub observability: ObservabilityConfig,
    pub start_workers: bool,
    pub environment: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let env: EnvSettings = Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()?;

        let environment = env.environment.unwrap_or_else(|| "development".to_string());
        let production = environment == "production";

        Ok(AppConfig {
            database_url: env
                .database_url
                .unwrap_or_else(|| "postgres://localhost:5432/mailspool".to_string()),
            redis: RedisConfig {
                host: env.redis_host.unwrap_or_else(|| "127.0.0.1".to_string()),
                port: env.redis_port.unwrap_or(6379),
                password: env.redis_password,
                db: env.redis_db.unwrap_or(0),
                connect_timeout_ms: 5_000,
                command_timeout_ms: 5_000,
            },
            logging: LoggingConfig {
                level: env.log_level.unwrap_or_else(|| "INFO".to_string()),
                structured: env.logging_structured.unwrap_or(false),
                console: env.logging_console.unwrap_or(true),
            },
            queue: QueueSettings {
                import_concurrency: env.import_concurrency.unwrap_or(2),
                email_concurrency: env.email_concurrency.unwrap_or(4),
                max_queue_size: env.max_queue_size.unwrap_or(10_000),
                remove_on_complete: env.queue_remove_on_complete.unwrap_or(500),
                remove_on_fail: env.queue_remove_on_fail.unwrap_or(1_000),
                stall_timeout_ms: env.stall_timeout_ms.unwrap_or(30_000),
                shutdown_grace_ms: env.shutdown_grace_ms.unwrap_or(30_000),
            },
            smtp: SmtpConfig {
                host: env.smtp_host.unwrap_or_else(|| "localhost".to_string()),
                port: env.smtp_port.unwrap_or(587),
                username: env.smtp_username,
                password: env.smtp_password,
                from_email: env
                    .smtp_from_email
                    .unwrap_or_else(|| "noreply@mailspool.io".to_string()),
                from_name: env.smtp_from_name.unwrap_or_else(|| "Mailspool".to_string()),
            },
            observability: ObservabilityConfig {
                metrics_retention_hours: env.metrics_retention_hours.unwrap_or(24),
                alert_eval_interval_secs: env.alert_eval_interval_secs.unwrap_or(60),
                suspicious_request_threshold: env.suspicious_request_threshold.unwrap_or(120),
            },
            start_workers: env.start_workers.unwrap_or(production),
            environment,
        })
    }

    /// Config used by unit tests: no external services, tiny queues.
    pub fn for_tests() -> Self {
        AppConfig {
            database_url: "postgres://localhost:5432/mailspool_test".to_string(),
            redis: RedisConfig {
                host: "127.0.0.1".to_string(),
                port: 6379,
                password: None,
                db: 0,
                connect_timeout_ms: 200,
                command_timeout_ms: 200,
            },
            logging: LoggingConfig {
                level: "DEBUG".to_string(),
                structured: false,
                console: false,
            },
            queue: QueueSettings {
                import_concurrency: 2,
                email_concurrency: 2,
                max_queue_size: 100,
                remove_on_complete: 50,
                remove_on_fail: 50,
                stall_timeout_ms: 500,
                shutdown_grace_ms: 1_000,
            },
            smtp: SmtpConfig {
                host: "localhost".to_string(),
                port: 2525,
                username: None,
                password: None,
                from_email: "test@mailspool.io".to_string(),
                from_name: "Mailspool Test".to_string(),
            },
            observability: ObservabilityConfig {
                metrics_retention_hours: 1,
                alert_eval_interval_secs: 1,
                suspicious_request_threshold: 10,
            },
            start_workers: false,
            environment: "test".to_string(),
        }
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "environment: {}, redis: {}:{}, log_level: {}, start_workers: {}",
            self.environment, self.redis.host, self.redis.port, self.logging.level, self.start_workers
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_carries_credentials_and_db() {
        let mut redis = AppConfig::for_tests().redis;
        assert_eq!(redis.url(), "redis://127.0.0.1:6379/0");

        redis.password = Some("hunter2".to_string());
        redis.db = 3;
        assert_eq!(redis.url(), "redis://:hunter2@127.0.0.1:6379/3");
    }

    #[test]
    fn test_profile_keeps_workers_off() {
        let config = AppConfig::for_tests();
        assert!(!config.start_workers);
        assert_eq!(config.environment, "test");
        assert!(config.queue.stall_timeout_ms < 5_000);
    }
}
