use std::cmp::Ordering;
use std::collections::{BinaryHeap, BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::shared_store::SharedStore;

use super::job::{
    HandlerMap, Job, JobContext, JobError, JobErrorKind, JobHandler, JobOptions, JobState, NewJob,
    ProgressFn,
};

const MAINTENANCE_TICK: Duration = Duration::from_millis(200);
const STATS_MIRROR_EVERY: u32 = 5;
const JOB_MIRROR_TTL_SECS: u64 = 3_600;

pub const CATCH_ALL_HANDLER: &str = "*";

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub max_queue_size: usize,
    pub remove_on_complete: usize,
    pub remove_on_fail: usize,
    pub stall_timeout: Duration,
    /// Renew heartbeats for running handlers automatically. Turn off only
    /// when handlers report progress themselves and silent runs should be
    /// reclaimed as stalled.
    pub auto_renew_heartbeat: bool,
    pub default_job_options: JobOptions,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_queue_size: 10_000,
            remove_on_complete: 500,
            remove_on_fail: 1_000,
            stall_timeout: Duration::from_secs(30),
            auto_renew_heartbeat: true,
            default_job_options: JobOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
    pub paused: bool,
}

#[derive(Debug)]
struct WaitingEntry {
    priority: i32,
    seq: u64,
    job_id: String,
}

impl PartialEq for WaitingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for WaitingEntry {}

impl Ord for WaitingEntry {
    // BinaryHeap pops the maximum, so invert: the smallest (priority, seq)
    // pair compares greatest. Lower priority value dispatches first, FIFO
    // within a tie.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for WaitingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct ActiveEntry {
    heartbeat: Instant,
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<String, Job>,
    waiting: BinaryHeap<WaitingEntry>,
    delayed: BTreeMap<(i64, u64), String>,
    active: HashMap<String, ActiveEntry>,
    completed: VecDeque<String>,
    failed: VecDeque<String>,
    paused: bool,
    next_seq: u64,
    generation: u64,
}

impl QueueState {
    fn backlog(&self) -> usize {
        self.waiting.len() + self.delayed.len() + self.active.len()
    }

    fn push_waiting(&mut self, job_id: String, priority: i32, seq: u64) {
        self.waiting.push(WaitingEntry {
            priority,
            seq,
            job_id,
        });
    }
}

/// A named queue: bounded backlog, bounded worker pool, priority + delay
/// dispatch, exponential retry and stall reclaim. Cheap to clone.
#[derive(Clone)]
pub struct Queue {
    pub name: String,
    config: QueueConfig,
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    handlers: Arc<RwLock<HandlerMap>>,
    store: SharedStore,
    shutdown: CancellationToken,
}

impl Queue {
    fn new(
        name: &str,
        config: QueueConfig,
        store: SharedStore,
        shutdown: CancellationToken,
    ) -> Self {
        let queue = Self {
            name: name.to_string(),
            config,
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            store,
            shutdown,
        };
        queue.spawn_maintenance();
        queue
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().expect("queue state poisoned")
    }

    pub fn register_handler(&self, job_name: &str, handler: Arc<dyn JobHandler>) {
        self.handlers
            .write()
            .expect("queue handlers poisoned")
            .insert(job_name.to_string(), handler);
    }

    pub fn add(
        &self,
        name: &str,
        payload: serde_json::Value,
        opts: Option<JobOptions>,
    ) -> AppResult<Job> {
        let jobs = self.add_bulk(vec![NewJob {
            name: name.to_string(),
            payload,
            opts: opts.unwrap_or_else(|| self.config.default_job_options.clone()),
        }])?;
        Ok(jobs.into_iter().next().expect("bulk add returned empty"))
    }

    /// Insertion order is preserved among equal priorities.
    pub fn add_bulk(&self, new_jobs: Vec<NewJob>) -> AppResult<Vec<Job>> {
        let mut added = Vec::with_capacity(new_jobs.len());
        {
            let mut state = self.lock();
            if state.backlog() + new_jobs.len() > self.config.max_queue_size {
                return Err(AppError::QueueFull(format!(
                    "queue '{}' is at capacity ({})",
                    self.name, self.config.max_queue_size
                )));
            }

            let now = Utc::now();
            for new_job in new_jobs {
                let seq = state.next_seq;
                state.next_seq += 1;

                let delay_until = (!new_job.opts.delay.is_zero()).then(|| {
                    now + chrono::Duration::from_std(new_job.opts.delay)
                        .unwrap_or_else(|_| chrono::Duration::zero())
                });

                let job = Job {
                    id: Uuid::new_v4().to_string(),
                    queue: self.name.clone(),
                    name: new_job.name,
                    payload: new_job.payload,
                    priority: new_job.opts.priority,
                    delay_until,
                    attempts: 0,
                    max_attempts: new_job.opts.attempts.max(1),
                    backoff_base_ms: new_job.opts.backoff_base.as_millis() as u64,
                    state: if delay_until.is_some() {
                        JobState::Delayed
                    } else {
                        JobState::Waiting
                    },
                    created_at: now,
                    started_at: None,
                    finished_at: None,
                    last_error: None,
                    result: None,
                    seq,
                };

                match job.delay_until {
                    Some(due) => {
                        state
                            .delayed
                            .insert((due.timestamp_millis(), seq), job.id.clone());
                    }
                    None => state.push_waiting(job.id.clone(), job.priority, seq),
                }
                state.jobs.insert(job.id.clone(), job.clone());
                added.push(job);
            }
        }

        for _ in 0..added.len() {
            self.notify.notify_one();
        }
        Ok(added)
    }

    /// Start the worker pool. Dispatch is keyed by job name, with `*` as
    /// the catch-all registration.
    pub fn process(&self, concurrency: usize) {
        for worker in 0..concurrency.max(1) {
            let queue = self.clone();
            tokio::spawn(async move {
                tracing::debug!("Worker {}/{} started", queue.name, worker);
                loop {
                    if queue.shutdown.is_cancelled() {
                        break;
                    }
                    match queue.take_next() {
                        Some((job, token, generation)) => {
                            queue.run_job(job, token, generation).await;
                        }
                        None => {
                            tokio::select! {
                                _ = queue.notify.notified() => {}
                                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                                _ = queue.shutdown.cancelled() => break,
                            }
                        }
                    }
                }
                tracing::debug!("Worker {}/{} stopped", queue.name, worker);
            });
        }
    }

    fn take_next(&self) -> Option<(Job, CancellationToken, u64)> {
        let mut state = self.lock();
        if state.paused {
            return None;
        }
        loop {
            let entry = state.waiting.pop()?;
            let runnable = match state.jobs.get(&entry.job_id) {
                Some(job) => job.state == JobState::Waiting,
                None => false,
            };
            if !runnable {
                continue;
            }

            state.generation += 1;
            let generation = state.generation;
            let token = CancellationToken::new();

            let job = state
                .jobs
                .get_mut(&entry.job_id)
                .expect("checked job exists");
            job.state = JobState::Active;
            job.started_at = Some(Utc::now());
            job.attempts += 1;
            let snapshot = job.clone();

            state.active.insert(
                entry.job_id.clone(),
                ActiveEntry {
                    heartbeat: Instant::now(),
                    generation,
                    token: token.clone(),
                },
            );
            return Some((snapshot, token, generation));
        }
    }

    async fn run_job(&self, job: Job, token: CancellationToken, generation: u64) {
        tracing::debug!(queue = %self.name, job_id = %job.id, attempt = job.attempts, "Job active");

        let handler = {
            let handlers = self.handlers.read().expect("queue handlers poisoned");
            handlers
                .get(&job.name)
                .or_else(|| handlers.get(CATCH_ALL_HANDLER))
                .cloned()
        };

        let outcome = match handler {
            None => Err(JobError::permanent(format!(
                "no handler registered for job '{}'",
                job.name
            ))),
            Some(handler) => {
                let ctx = self.job_context(&job, token.clone());
                let auto_renew = self
                    .config
                    .auto_renew_heartbeat
                    .then(|| self.spawn_heartbeat(job.id.clone()));

                let outcome = tokio::select! {
                    result = handler.handle(ctx) => result,
                    _ = token.cancelled() => Err(JobError::cancelled()),
                };

                if let Some(renewer) = auto_renew {
                    renewer.abort();
                }
                outcome
            }
        };

        self.finish(&job.id, generation, outcome).await;
    }

    fn job_context(&self, job: &Job, token: CancellationToken) -> JobContext {
        let state = self.state.clone();
        let job_id = job.id.clone();
        let progress: ProgressFn = Arc::new(move |pct, message, _data| {
            if let Ok(mut state) = state.lock() {
                if let Some(active) = state.active.get_mut(&job_id) {
                    active.heartbeat = Instant::now();
                }
            }
            tracing::trace!(job_id = %job_id, pct, "Job progress: {}", message);
        });

        JobContext {
            job_id: job.id.clone(),
            queue: self.name.clone(),
            name: job.name.clone(),
            payload: job.payload.clone(),
            attempt: job.attempts,
            cancel: token,
            progress,
        }
    }

    fn spawn_heartbeat(&self, job_id: String) -> tokio::task::JoinHandle<()> {
        let state = self.state.clone();
        let period = self.config.stall_timeout / 3;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(50)));
            loop {
                ticker.tick().await;
                let Ok(mut state) = state.lock() else { break };
                match state.active.get_mut(&job_id) {
                    Some(active) => active.heartbeat = Instant::now(),
                    None => break,
                }
            }
        })
    }

    async fn finish(
        &self,
        job_id: &str,
        generation: u64,
        outcome: Result<serde_json::Value, JobError>,
    ) {
        let mirror = {
            let mut state = self.lock();
            match state.active.get(job_id) {
                // reclaimed by the stall checker or removed; this run no
                // longer owns the job
                Some(active) if active.generation != generation => return,
                None => return,
                Some(_) => {}
            }
            state.active.remove(job_id);

            let Some(job) = state.jobs.get_mut(job_id) else {
                return;
            };

            match outcome {
                Ok(result) => {
                    job.state = JobState::Completed;
                    job.finished_at = Some(Utc::now());
                    job.result = Some(result);
                    let snapshot = job.clone();
                    state.completed.push_back(job_id.to_string());
                    while state.completed.len() > self.config.remove_on_complete {
                        if let Some(evicted) = state.completed.pop_front() {
                            state.jobs.remove(&evicted);
                        }
                    }
                    tracing::debug!(queue = %self.name, job_id, "Job completed");
                    Some(snapshot)
                }
                Err(error) if error.kind == JobErrorKind::Cancelled => {
                    tracing::debug!(queue = %self.name, job_id, "Job cancelled");
                    state.jobs.remove(job_id);
                    None
                }
                Err(error) => {
                    job.last_error = Some(error.message.clone());
                    let retry =
                        error.kind == JobErrorKind::Transient && job.attempts < job.max_attempts;
                    if retry {
                        let delay = job.backoff_delay();
                        let due = Utc::now()
                            + chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::zero());
                        job.state = JobState::Delayed;
                        job.delay_until = Some(due);
                        let key = (due.timestamp_millis(), job.seq);
                        let id = job.id.clone();
                        tracing::warn!(
                            queue = %self.name,
                            job_id,
                            attempt = job.attempts,
                            delay_ms = delay.as_millis() as u64,
                            "Job failed, retrying: {}",
                            error.message
                        );
                        state.delayed.insert(key, id);
                        None
                    } else {
                        job.state = JobState::Failed;
                        job.finished_at = Some(Utc::now());
                        let snapshot = job.clone();
                        let attempts = job.attempts;
                        state.failed.push_back(job_id.to_string());
                        while state.failed.len() > self.config.remove_on_fail {
                            if let Some(evicted) = state.failed.pop_front() {
                                state.jobs.remove(&evicted);
                            }
                        }
                        tracing::error!(
                            queue = %self.name,
                            job_id,
                            attempts,
                            "Job failed permanently: {}",
                            error.message
                        );
                        Some(snapshot)
                    }
                }
            }
        };

        if let Some(job) = mirror {
            self.mirror_job(&job).await;
        }
    }

    async fn mirror_job(&self, job: &Job) {
        if let Ok(payload) = serde_json::to_string(job) {
            self.store
                .setex(
                    &format!("queue:{}:job:{}", self.name, job.id),
                    &payload,
                    JOB_MIRROR_TTL_SECS,
                )
                .await;
        }
    }

    async fn mirror_stats(&self) {
        let stats = self.stats();
        if let Ok(payload) = serde_json::to_string(&stats) {
            self.store
                .setex(&format!("queue:{}:stats", self.name), &payload, 120)
                .await;
        }
    }

    fn spawn_maintenance(&self) {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MAINTENANCE_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut tick: u32 = 0;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = queue.shutdown.cancelled() => break,
                }
                let promoted = queue.promote_due_jobs();
                queue.reclaim_stalled();
                for _ in 0..promoted {
                    queue.notify.notify_one();
                }
                tick = tick.wrapping_add(1);
                if tick % STATS_MIRROR_EVERY == 0 {
                    queue.mirror_stats().await;
                }
            }
        });
    }

    fn promote_due_jobs(&self) -> usize {
        let now_ms = Utc::now().timestamp_millis();
        let mut state = self.lock();
        let due: Vec<(i64, u64)> = state
            .delayed
            .range(..=(now_ms, u64::MAX))
            .map(|(key, _)| *key)
            .collect();

        let mut promoted = 0;
        for key in due {
            let Some(job_id) = state.delayed.remove(&key) else {
                continue;
            };
            let next_seq = state.next_seq;
            let Some(job) = state.jobs.get_mut(&job_id) else {
                continue;
            };
            if job.state != JobState::Delayed {
                continue;
            }
            job.state = JobState::Waiting;
            job.delay_until = None;
            // re-enqueued at the tail of its priority band
            job.seq = next_seq;
            let (priority, seq, id) = (job.priority, job.seq, job.id.clone());
            state.next_seq += 1;
            state.push_waiting(id, priority, seq);
            promoted += 1;
        }
        promoted
    }

    fn reclaim_stalled(&self) {
        let mut state = self.lock();
        let stalled: Vec<String> = state
            .active
            .iter()
            .filter(|(_, active)| active.heartbeat.elapsed() > self.config.stall_timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for job_id in stalled {
            if let Some(active) = state.active.remove(&job_id) {
                active.token.cancel();
            }
            let next_seq = state.next_seq;
            let Some(job) = state.jobs.get_mut(&job_id) else {
                continue;
            };
            tracing::warn!(queue = %self.name, job_id = %job_id, "Job stalled, reclaiming");
            job.state = JobState::Waiting;
            job.started_at = None;
            job.seq = next_seq;
            let (priority, seq, id) = (job.priority, job.seq, job.id.clone());
            state.next_seq += 1;
            state.push_waiting(id, priority, seq);
            self.notify.notify_one();
        }
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        let mut stats = QueueStats {
            paused: state.paused,
            active: state.active.len(),
            ..QueueStats::default()
        };
        for job in state.jobs.values() {
            match job.state {
                JobState::Waiting | JobState::Stalled => stats.waiting += 1,
                JobState::Delayed => stats.delayed += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
                JobState::Active => {}
            }
        }
        stats
    }

    pub fn pause(&self) {
        self.lock().paused = true;
        tracing::info!("Queue {} paused", self.name);
    }

    pub fn resume(&self) {
        self.lock().paused = false;
        tracing::info!("Queue {} resumed", self.name);
        self.notify.notify_waiters();
        // wake every idle worker, not just one
        for _ in 0..self.config.concurrency {
            self.notify.notify_one();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Drop jobs in `state` whose terminal timestamp (or enqueue time, for
    /// non-terminal states) is older than `grace`.
    pub fn clean(&self, grace: Duration, target: JobState) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        let mut state = self.lock();
        let doomed: Vec<String> = state
            .jobs
            .values()
            .filter(|job| job.state == target)
            .filter(|job| job.finished_at.unwrap_or(job.created_at) < cutoff)
            .map(|job| job.id.clone())
            .collect();

        for job_id in &doomed {
            state.jobs.remove(job_id);
            state.completed.retain(|id| id != job_id);
            state.failed.retain(|id| id != job_id);
        }
        doomed.len()
    }

    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.lock().jobs.get(job_id).cloned()
    }

    /// Re-enqueue a failed job as a fresh run.
    pub fn retry(&self, job_id: &str) -> AppResult<()> {
        let mut state = self.lock();
        let next_seq = state.next_seq;
        let Some(job) = state.jobs.get_mut(job_id) else {
            return Err(AppError::NotFound(format!("job {job_id} not found")));
        };
        if job.state != JobState::Failed {
            return Err(AppError::Validation(format!(
                "job {job_id} is {}, only failed jobs can be retried",
                job.state
            )));
        }
        job.state = JobState::Waiting;
        job.attempts = 0;
        job.finished_at = None;
        job.seq = next_seq;
        let (priority, seq, id) = (job.priority, job.seq, job.id.clone());
        state.next_seq += 1;
        state.failed.retain(|failed_id| failed_id.as_str() != job_id);
        state.push_waiting(id, priority, seq);
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    pub fn remove(&self, job_id: &str) -> bool {
        let mut state = self.lock();
        if let Some(active) = state.active.remove(job_id) {
            active.token.cancel();
        }
        state.completed.retain(|id| id.as_str() != job_id);
        state.failed.retain(|id| id.as_str() != job_id);
        state.jobs.remove(job_id).is_some()
    }

    /// Remove every waiting/delayed/active job matching the predicate.
    /// Active matches are cancelled and drain at their next suspension
    /// point. Returns the number of jobs affected.
    pub fn remove_matching(&self, predicate: impl Fn(&Job) -> bool) -> usize {
        let mut state = self.lock();
        let doomed: Vec<String> = state
            .jobs
            .values()
            .filter(|job| {
                matches!(
                    job.state,
                    JobState::Waiting | JobState::Delayed | JobState::Active | JobState::Stalled
                ) && predicate(job)
            })
            .map(|job| job.id.clone())
            .collect();

        for job_id in &doomed {
            if let Some(active) = state.active.remove(job_id) {
                active.token.cancel();
            }
            state.jobs.remove(job_id);
        }
        doomed.len()
    }

    pub(crate) fn cancel_active(&self) {
        let state = self.lock();
        for active in state.active.values() {
            active.token.cancel();
        }
    }

    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }
}

/// Owner of every named queue in the process.
#[derive(Clone)]
pub struct QueueEngine {
    queues: Arc<RwLock<HashMap<String, Queue>>>,
    store: SharedStore,
    shutdown: CancellationToken,
}

impl QueueEngine {
    pub fn new(store: SharedStore) -> Self {
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
            store,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn register(&self, name: &str, config: QueueConfig) -> Queue {
        let queue = Queue::new(name, config, self.store.clone(), self.shutdown.child_token());
        self.queues
            .write()
            .expect("queue registry poisoned")
            .insert(name.to_string(), queue.clone());
        tracing::info!("Queue {} registered", name);
        queue
    }

    pub fn get(&self, name: &str) -> Option<Queue> {
        self.queues
            .read()
            .expect("queue registry poisoned")
            .get(name)
            .cloned()
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues
            .read()
            .expect("queue registry poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn stats_all(&self) -> HashMap<String, QueueStats> {
        self.queues
            .read()
            .expect("queue registry poisoned")
            .iter()
            .map(|(name, queue)| (name.clone(), queue.stats()))
            .collect()
    }

    fn all_queues(&self) -> Vec<Queue> {
        self.queues
            .read()
            .expect("queue registry poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Drain active jobs up to `grace`, then force-close the rest.
    pub async fn shutdown(&self, grace: Duration) {
        let queues = self.all_queues();
        for queue in &queues {
            queue.pause();
        }

        let deadline = Instant::now() + grace;
        loop {
            let active: usize = queues.iter().map(Queue::active_count).sum();
            if active == 0 || Instant::now() >= deadline {
                if active > 0 {
                    tracing::warn!("Force-closing {} active jobs after drain grace", active);
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        for queue in &queues {
            queue.cancel_active();
        }
        self.shutdown.cancel();
    }
}
