use std::sync::atomic::{AtomicU32, Ordering::SeqCst};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use crate::error::AppError;
use crate::queue::{
    ControlAction, ControlMessage, JobContext, JobError, JobHandler, JobOptions, JobState,
    NewJob, QueueConfig, QueueEngine, WorkerSupervisor, CONTROL_CHANNEL,
};
use crate::shared_store::SharedStore;

use super::common::wait_until;

fn engine() -> QueueEngine {
    QueueEngine::new(SharedStore::in_memory())
}

fn fast_options() -> JobOptions {
    JobOptions {
        backoff_base: Duration::from_millis(10),
        ..JobOptions::default()
    }
}

struct RecordingHandler {
    order: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl JobHandler for RecordingHandler {
    async fn handle(&self, ctx: JobContext) -> Result<serde_json::Value, JobError> {
        let tag = ctx.payload["tag"].as_str().unwrap_or("").to_string();
        self.order.lock().unwrap().push(tag);
        Ok(json!({}))
    }
}

struct FlakyHandler {
    failures_left: AtomicU32,
}

#[async_trait::async_trait]
impl JobHandler for FlakyHandler {
    async fn handle(&self, _ctx: JobContext) -> Result<serde_json::Value, JobError> {
        let remaining = self.failures_left.load(SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, SeqCst);
            return Err(JobError::transient("simulated outage"));
        }
        Ok(json!({ "ok": true }))
    }
}

struct BlockingHandler;

#[async_trait::async_trait]
impl JobHandler for BlockingHandler {
    async fn handle(&self, ctx: JobContext) -> Result<serde_json::Value, JobError> {
        tokio::select! {
            _ = ctx.cancelled() => Err(JobError::cancelled()),
            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(json!({})),
        }
    }
}

#[tokio::test]
async fn priority_dispatch_is_lowest_first_fifo_within_ties() {
    let engine = engine();
    let queue = engine.register("prio", QueueConfig::default());
    queue.pause();

    let order = Arc::new(Mutex::new(Vec::new()));
    queue.register_handler("tagged", Arc::new(RecordingHandler {
        order: order.clone(),
    }));

    for (tag, priority) in [("a", 5), ("b", 1), ("c", 3), ("d", 1)] {
        queue
            .add(
                "tagged",
                json!({ "tag": tag }),
                Some(JobOptions {
                    priority,
                    ..JobOptions::default()
                }),
            )
            .unwrap();
    }

    queue.process(1);
    queue.resume();

    let q = queue.clone();
    wait_until("all four jobs to complete", move || {
        let q = q.clone();
        async move { q.stats().completed == 4 }
    })
    .await;

    assert_eq!(*order.lock().unwrap(), vec!["b", "d", "c", "a"]);
}

#[tokio::test]
async fn bulk_added_jobs_keep_insertion_order_within_a_priority() {
    let engine = engine();
    let queue = engine.register("bulk", QueueConfig::default());
    queue.pause();

    let order = Arc::new(Mutex::new(Vec::new()));
    queue.register_handler("tagged", Arc::new(RecordingHandler {
        order: order.clone(),
    }));

    let jobs = ["e", "f", "g"]
        .into_iter()
        .map(|tag| NewJob {
            name: "tagged".to_string(),
            payload: json!({ "tag": tag }),
            opts: JobOptions::default(),
        })
        .collect();
    queue.add_bulk(jobs).unwrap();

    queue.process(1);
    queue.resume();

    let q = queue.clone();
    wait_until("bulk jobs to complete", move || {
        let q = q.clone();
        async move { q.stats().completed == 3 }
    })
    .await;

    assert_eq!(*order.lock().unwrap(), vec!["e", "f", "g"]);
}

#[tokio::test]
async fn job_failing_twice_still_reaches_completed() {
    let engine = engine();
    let queue = engine.register("flaky", QueueConfig::default());
    queue.register_handler("work", Arc::new(FlakyHandler {
        failures_left: AtomicU32::new(2),
    }));
    queue.process(1);

    let job = queue
        .add("work", json!({}), Some(fast_options()))
        .unwrap();

    let q = queue.clone();
    wait_until("flaky job to complete", move || {
        let q = q.clone();
        async move { q.stats().completed == 1 }
    })
    .await;

    let finished = queue.get_job(&job.id).unwrap();
    assert_eq!(finished.state, JobState::Completed);
    assert_eq!(finished.attempts, 3);
    assert!(finished.last_error.is_some());
}

#[tokio::test]
async fn exhausted_attempts_end_in_failed() {
    let engine = engine();
    let queue = engine.register("doomed", QueueConfig::default());
    queue.register_handler("work", Arc::new(FlakyHandler {
        failures_left: AtomicU32::new(u32::MAX),
    }));
    queue.process(1);

    let job = queue
        .add(
            "work",
            json!({}),
            Some(JobOptions {
                attempts: 2,
                backoff_base: Duration::from_millis(10),
                ..JobOptions::default()
            }),
        )
        .unwrap();

    let q = queue.clone();
    wait_until("job to fail permanently", move || {
        let q = q.clone();
        async move { q.stats().failed == 1 }
    })
    .await;

    let finished = queue.get_job(&job.id).unwrap();
    assert_eq!(finished.state, JobState::Failed);
    assert_eq!(finished.attempts, 2);
    assert_eq!(finished.last_error.as_deref(), Some("simulated outage"));
}

struct PermanentFailureHandler;

#[async_trait::async_trait]
impl JobHandler for PermanentFailureHandler {
    async fn handle(&self, _ctx: JobContext) -> Result<serde_json::Value, JobError> {
        Err(JobError::permanent("credentials rejected"))
    }
}

#[tokio::test]
async fn permanent_errors_never_retry() {
    let engine = engine();
    let queue = engine.register("permanent", QueueConfig::default());
    queue.register_handler("work", Arc::new(PermanentFailureHandler));
    queue.process(1);

    let job = queue.add("work", json!({}), Some(fast_options())).unwrap();

    let q = queue.clone();
    wait_until("job to fail", move || {
        let q = q.clone();
        async move { q.stats().failed == 1 }
    })
    .await;

    assert_eq!(queue.get_job(&job.id).unwrap().attempts, 1);
}

#[tokio::test]
async fn delayed_jobs_wait_then_promote() {
    let engine = engine();
    let queue = engine.register("delayed", QueueConfig::default());
    let order = Arc::new(Mutex::new(Vec::new()));
    queue.register_handler("tagged", Arc::new(RecordingHandler {
        order: order.clone(),
    }));
    queue.process(1);

    queue
        .add(
            "tagged",
            json!({ "tag": "later" }),
            Some(JobOptions {
                delay: Duration::from_millis(150),
                ..JobOptions::default()
            }),
        )
        .unwrap();

    assert_eq!(queue.stats().delayed, 1);
    assert_eq!(queue.stats().completed, 0);

    let q = queue.clone();
    wait_until("delayed job to run", move || {
        let q = q.clone();
        async move { q.stats().completed == 1 }
    })
    .await;
}

#[tokio::test]
async fn backlog_cap_rejects_further_jobs() {
    let engine = engine();
    let queue = engine.register(
        "tiny",
        QueueConfig {
            max_queue_size: 2,
            ..QueueConfig::default()
        },
    );
    queue.pause();

    queue.add("work", json!({}), None).unwrap();
    queue.add("work", json!({}), None).unwrap();
    let rejected = queue.add("work", json!({}), None);
    assert!(matches!(rejected, Err(AppError::QueueFull(_))));
}

#[tokio::test]
async fn paused_queue_holds_jobs_until_resume() {
    let engine = engine();
    let queue = engine.register("held", QueueConfig::default());
    let order = Arc::new(Mutex::new(Vec::new()));
    queue.register_handler("tagged", Arc::new(RecordingHandler {
        order: order.clone(),
    }));
    queue.process(1);
    queue.pause();

    queue.add("tagged", json!({ "tag": "x" }), None).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(queue.stats().completed, 0);
    assert_eq!(queue.stats().waiting, 1);

    queue.resume();
    let q = queue.clone();
    wait_until("held job to run after resume", move || {
        let q = q.clone();
        async move { q.stats().completed == 1 }
    })
    .await;
}

struct StallOnFirstAttempt;

#[async_trait::async_trait]
impl JobHandler for StallOnFirstAttempt {
    async fn handle(&self, ctx: JobContext) -> Result<serde_json::Value, JobError> {
        if ctx.attempt == 1 {
            // never report progress; the stall checker reclaims us
            tokio::select! {
                _ = ctx.cancelled() => return Err(JobError::cancelled()),
                _ = tokio::time::sleep(Duration::from_secs(30)) => {}
            }
        }
        Ok(json!({ "attempt": ctx.attempt }))
    }
}

#[tokio::test]
async fn stalled_jobs_are_reclaimed_and_rerun() {
    let engine = engine();
    let queue = engine.register(
        "stall",
        QueueConfig {
            stall_timeout: Duration::from_millis(200),
            auto_renew_heartbeat: false,
            ..QueueConfig::default()
        },
    );
    queue.register_handler("work", Arc::new(StallOnFirstAttempt));
    queue.process(2);

    let job = queue.add("work", json!({}), None).unwrap();

    let q = queue.clone();
    wait_until("stalled job to be reclaimed and finish", move || {
        let q = q.clone();
        async move { q.stats().completed == 1 }
    })
    .await;

    let finished = queue.get_job(&job.id).unwrap();
    assert_eq!(finished.state, JobState::Completed);
    assert!(finished.attempts >= 2);
}

#[tokio::test]
async fn remove_matching_cancels_active_jobs() {
    let engine = engine();
    let queue = engine.register("cancelme", QueueConfig::default());
    queue.register_handler("work", Arc::new(BlockingHandler));
    queue.process(1);

    queue.add("work", json!({ "run": "x" }), None).unwrap();

    let q = queue.clone();
    wait_until("job to become active", move || {
        let q = q.clone();
        async move { q.active_count() == 1 }
    })
    .await;

    let removed = queue.remove_matching(|job| job.payload["run"] == "x");
    assert_eq!(removed, 1);

    let q = queue.clone();
    wait_until("active job to drain", move || {
        let q = q.clone();
        async move { q.active_count() == 0 }
    })
    .await;

    let stats = queue.stats();
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn clean_drops_old_terminal_jobs() {
    let engine = engine();
    let queue = engine.register("cleanable", QueueConfig::default());
    let order = Arc::new(Mutex::new(Vec::new()));
    queue.register_handler("tagged", Arc::new(RecordingHandler {
        order: order.clone(),
    }));
    queue.process(1);

    let job = queue.add("tagged", json!({ "tag": "old" }), None).unwrap();
    let q = queue.clone();
    wait_until("job to complete", move || {
        let q = q.clone();
        async move { q.stats().completed == 1 }
    })
    .await;

    let removed = queue.clean(Duration::ZERO, JobState::Completed);
    assert_eq!(removed, 1);
    assert!(queue.get_job(&job.id).is_none());
    assert_eq!(queue.stats().completed, 0);
}

#[tokio::test]
async fn retry_requeues_a_failed_job() {
    let engine = engine();
    let queue = engine.register("retryable", QueueConfig::default());
    queue.register_handler("work", Arc::new(FlakyHandler {
        // exactly one failure: the first run fails permanently (attempts=1),
        // the retried run succeeds
        failures_left: AtomicU32::new(1),
    }));
    queue.process(1);

    let job = queue
        .add(
            "work",
            json!({}),
            Some(JobOptions {
                attempts: 1,
                backoff_base: Duration::from_millis(10),
                ..JobOptions::default()
            }),
        )
        .unwrap();

    let q = queue.clone();
    wait_until("job to fail", move || {
        let q = q.clone();
        async move { q.stats().failed == 1 }
    })
    .await;

    queue.retry(&job.id).unwrap();

    let q = queue.clone();
    wait_until("retried job to complete", move || {
        let q = q.clone();
        async move { q.stats().completed == 1 }
    })
    .await;

    assert_eq!(queue.get_job(&job.id).unwrap().state, JobState::Completed);
}

#[tokio::test]
async fn control_channel_pauses_a_queue() {
    let store = SharedStore::in_memory();
    let engine = QueueEngine::new(store.clone());
    let queue = engine.register("ctl", QueueConfig::default());
    let supervisor = WorkerSupervisor::new(engine.clone(), store.clone(), Duration::from_secs(1));
    let _listener = supervisor.spawn_control_listener();

    // let the subscription task attach before publishing
    tokio::time::sleep(Duration::from_millis(50)).await;

    let message = ControlMessage {
        action: ControlAction::Pause,
        queue: "ctl".to_string(),
        grace_ms: None,
        state: None,
    };
    store
        .publish(CONTROL_CHANNEL, &serde_json::to_string(&message).unwrap())
        .await;

    let q = queue.clone();
    wait_until("queue to pause via control message", move || {
        let q = q.clone();
        async move { q.is_paused() }
    })
    .await;
}

#[tokio::test]
async fn supervisor_reports_queue_stats() {
    let store = SharedStore::in_memory();
    let engine = QueueEngine::new(store.clone());
    engine.register("one", QueueConfig::default());
    engine.register("two", QueueConfig::default());
    let supervisor = WorkerSupervisor::new(engine, store, Duration::from_secs(1));

    let status = supervisor.status();
    assert!(status.running);
    assert_eq!(status.queues.len(), 2);
    assert!(status.queues.contains_key("one"));
    assert!(status.queues.contains_key("two"));
}
