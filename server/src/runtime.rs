//! Process composition root. Components are constructed once here, in
//! dependency order, and handed around as cloneable handles; nothing in
//! the crate reaches for module-level state.

use std::sync::Arc;
use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tokio::task::JoinHandle;

use crate::alerts::{AlertManager, Notifier};
use crate::api_keys::{ApiKeyMaintenance, ApiKeyService};
use crate::email_transport::{EmailTransport, SmtpEmailTransport};
use crate::error::AppResult;
use crate::health::HealthChecker;
use crate::logging::LogIndex;
use crate::metrics::{MetricsCollector, SystemSampler};
use crate::model::api_key::ApiKeyCtrl;
use crate::model::import::ImportCtrl;
use crate::model::lead::LeadCtrl;
use crate::model::progress_record::ProgressCtrl;
use crate::model::send::{DeliveryCtrl, SendCtrl};
use crate::progress::ProgressTracker;
use crate::queue::{
    Queue, QueueConfig, QueueEngine, WorkerSupervisor, EMAIL_QUEUE, IMPORT_QUEUE,
};
use crate::rate_limit::{RateLimitMonitor, RateLimiter};
use crate::request_tracing::RequestTelemetry;
use crate::server_config::AppConfig;
use crate::shared_store::SharedStore;
use crate::workers::{
    EmailSendHandler, ImportHandler, ImportService, SendService, EMAIL_JOB_NAME, IMPORT_JOB_NAME,
};

const SYSTEM_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Runtime {
    pub config: AppConfig,
    pub store: SharedStore,
    pub conn: DatabaseConnection,
    pub metrics: MetricsCollector,
    pub rate_limiter: RateLimiter,
    pub rate_monitor: RateLimitMonitor,
    pub engine: QueueEngine,
    pub import_queue: Queue,
    pub email_queue: Queue,
    pub supervisor: WorkerSupervisor,
    pub progress: ProgressTracker,
    pub health: HealthChecker,
    pub alerts: AlertManager,
    pub api_keys: ApiKeyService,
    pub key_maintenance: ApiKeyMaintenance,
    pub log_index: LogIndex,
    /// State for the fronting router's `trace_request` middleware.
    pub telemetry: RequestTelemetry,
    pub import_service: ImportService,
    pub send_service: SendService,
    pub sampler: SystemSampler,
}

impl Runtime {
    /// Boot order follows the dependency graph: shared store, durable
    /// store, metrics, queue engine, progress tracker, workers, alert
    /// manager. Teardown happens in reverse through [`Runtime::shutdown`].
    pub async fn init(config: AppConfig) -> AppResult<Runtime> {
        let store = SharedStore::connect(&config.redis).await;

        let mut db_options = ConnectOptions::new(config.database_url.clone());
        db_options.sqlx_logging(false);
        let conn = Database::connect(db_options).await?;

        let metrics = MetricsCollector::new(
            store.clone(),
            config.observability.metrics_retention_hours,
        );
        let rate_limiter = RateLimiter::new(store.clone());
        let rate_monitor = RateLimitMonitor::new(
            metrics.clone(),
            config.observability.suspicious_request_threshold,
        );

        let engine = QueueEngine::new(store.clone());
        let import_queue = engine.register(
            IMPORT_QUEUE,
            QueueConfig {
                concurrency: config.queue.import_concurrency,
                max_queue_size: config.queue.max_queue_size,
                remove_on_complete: config.queue.remove_on_complete,
                remove_on_fail: config.queue.remove_on_fail,
                stall_timeout: Duration::from_millis(config.queue.stall_timeout_ms),
                ..QueueConfig::default()
            },
        );
        let email_queue = engine.register(
            EMAIL_QUEUE,
            QueueConfig {
                concurrency: config.queue.email_concurrency,
                max_queue_size: config.queue.max_queue_size,
                remove_on_complete: config.queue.remove_on_complete,
                remove_on_fail: config.queue.remove_on_fail,
                stall_timeout: Duration::from_millis(config.queue.stall_timeout_ms),
                ..QueueConfig::default()
            },
        );

        let progress = ProgressTracker::new(
            store.clone(),
            Arc::new(ProgressCtrl { conn: conn.clone() }),
        );

        let leads = Arc::new(LeadCtrl { conn: conn.clone() });
        let imports = Arc::new(ImportCtrl { conn: conn.clone() });
        let sends = Arc::new(SendCtrl { conn: conn.clone() });
        let deliveries = Arc::new(DeliveryCtrl { conn: conn.clone() });
        let transport: Arc<dyn EmailTransport> = Arc::new(SmtpEmailTransport::new(&config.smtp)?);

        import_queue.register_handler(
            IMPORT_JOB_NAME,
            Arc::new(ImportHandler::new(
                leads,
                imports.clone(),
                progress.clone(),
            )),
        );
        email_queue.register_handler(
            EMAIL_JOB_NAME,
            Arc::new(EmailSendHandler::new(
                sends.clone(),
                deliveries,
                progress.clone(),
                transport.clone(),
                metrics.clone(),
            )),
        );

        if config.start_workers {
            import_queue.process(config.queue.import_concurrency);
            email_queue.process(config.queue.email_concurrency);
            tracing::info!("Worker pools started");
        }

        let health = HealthChecker::new(store.clone(), Some(conn.clone()));
        let notifier = Notifier::new(
            reqwest::Client::new(),
            Some(transport),
            config.smtp.from_email.clone(),
            config.smtp.from_name.clone(),
        );
        let alerts = AlertManager::new(metrics.clone(), health.clone(), notifier);
        alerts.register_defaults();

        let api_keys = ApiKeyService::new(Arc::new(ApiKeyCtrl { conn: conn.clone() }));
        let key_maintenance = ApiKeyMaintenance::new(api_keys.clone(), store.clone());
        let log_index = LogIndex::new(store.clone());
        let telemetry = RequestTelemetry {
            metrics: metrics.clone(),
            logs: log_index.clone(),
        };

        let supervisor = WorkerSupervisor::new(
            engine.clone(),
            store.clone(),
            Duration::from_millis(config.queue.shutdown_grace_ms),
        );
        let import_service =
            ImportService::new(import_queue.clone(), progress.clone(), imports);
        let send_service = SendService::new(
            email_queue.clone(),
            progress.clone(),
            sends,
            metrics.clone(),
        );
        let sampler = SystemSampler::new(metrics.clone());

        Ok(Runtime {
            config,
            store,
            conn,
            metrics,
            rate_limiter,
            rate_monitor,
            engine,
            import_queue,
            email_queue,
            supervisor,
            progress,
            health,
            alerts,
            api_keys,
            key_maintenance,
            log_index,
            telemetry,
            import_service,
            send_service,
            sampler,
        })
    }

    /// Detached background loops: status mirror, control listener, system
    /// sampling and alert evaluation.
    pub fn start_background(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.supervisor.spawn_status_mirror(),
            self.supervisor.spawn_control_listener(),
            self.sampler.clone().spawn(SYSTEM_SAMPLE_INTERVAL),
            self.alerts.spawn_evaluator(Duration::from_secs(
                self.config.observability.alert_eval_interval_secs,
            )),
        ]
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
