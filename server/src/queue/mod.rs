mod engine;
mod job;
mod supervisor;

pub use engine::{Queue, QueueConfig, QueueEngine, QueueStats, CATCH_ALL_HANDLER};
pub use job::{Job, JobContext, JobError, JobErrorKind, JobHandler, JobOptions, JobState, NewJob};
pub use supervisor::{
    ControlAction, ControlMessage, SupervisorStatus, WorkerSupervisor, CONTROL_CHANNEL,
    EMAIL_QUEUE, IMPORT_QUEUE, WORKERS_STATUS_KEY,
};
