pub mod cron_utils;
pub mod dispatcher;
pub mod engine;
pub mod registry;
pub mod triggers;
pub mod worker;

pub use cron_utils::CronScheduler;
pub use dispatcher::{Dispatcher, JobOutcome, TickReport};
pub use engine::{EngineJob, JobAction, SchedulingEngine, TokioEngine, Trigger};
pub use registry::TaskRegistry;
pub use triggers::{CronTrigger, DateTrigger, TriggerKind, TriggerRegistration, TriggerTable};
pub use worker::{TaskHandle, TaskWorker, WorkerHandle};
