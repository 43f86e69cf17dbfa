pub mod config;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::{
    AppConfig, DatabaseConfig, DatabaseDriver, DispatchMode, LogFormat, LoggingConfig, RunMode,
    WorkerConfig,
};
pub use logging::init_logging;
pub use models::{ExecutionAudit, JobStatus, NewExecutionAudit, Payload, ScheduledJob};
pub use traits::{Clock, FnHandler, JobStore, SystemClock, TaskHandler, TaskSignature};
pub use taskworker_errors::{TaskWorkerError, TaskWorkerResult};
