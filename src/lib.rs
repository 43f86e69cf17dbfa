//! # TaskWorker
//!
//! 持久化、触发器驱动的任务调度器：
//!
//! - 延迟作业：`TaskHandle::apply` 写入作业存储，间隔派发逐个认领执行
//! - 定时任务：cron/date 触发直接调用处理函数，每次执行写一条审计记录
//! - 作业存储：SQLite（WAL）或 PostgreSQL，按配置选择
//!
//! ```no_run
//! use serde_json::json;
//! use taskworker::{AppConfig, FnHandler, TaskSignature, TaskWorker};
//!
//! # async fn demo() -> taskworker::TaskWorkerResult<()> {
//! let config = AppConfig::default().with_database_url("sqlite:///jobs.db");
//! let mut worker = TaskWorker::init(config).await?;
//! let send_email = worker.register_task(
//!     "send_email",
//!     FnHandler::arc(TaskSignature::new(["to", "subject"]), |p| async move {
//!         Ok(json!({ "sent_to": p["to"] }))
//!     }),
//! )?;
//! let handle = worker.start().await?;
//! # let _ = send_email;
//! handle.shutdown().await
//! # }
//! ```

pub mod cli;
pub mod shutdown;

pub use shutdown::{wait_for_shutdown_signal, ShutdownManager};
pub use taskworker_core::{
    init_logging, AppConfig, Clock, DatabaseConfig, DatabaseDriver, DispatchMode, ExecutionAudit,
    FnHandler, JobStatus, JobStore, LogFormat, LoggingConfig, NewExecutionAudit, Payload, RunMode,
    ScheduledJob, SystemClock, TaskHandler, TaskSignature, WorkerConfig,
};
pub use taskworker_dispatcher::{
    CronTrigger, DateTrigger, Dispatcher, EngineJob, JobAction, JobOutcome, SchedulingEngine,
    TaskHandle, TaskRegistry, TaskWorker, TickReport, TokioEngine, Trigger, WorkerHandle,
};
pub use taskworker_errors::{TaskWorkerError, TaskWorkerResult};
pub use taskworker_infrastructure::{DatabaseManager, PostgresJobStore, SqliteJobStore};
