pub mod manager;
pub mod mapping;
pub mod postgres;
pub mod sqlite;

pub use manager::DatabaseManager;
pub use mapping::MappingHelpers;
pub use postgres::PostgresJobStore;
pub use sqlite::SqliteJobStore;

/// 两种后端共用的作业列
pub(crate) const JOB_COLUMNS: &str = "id, task_name, payload, scheduled_at, status, result, \
     fail_message, created_at, claimed_at, finished_at";

pub(crate) const AUDIT_COLUMNS: &str =
    "id, task_name, started_at, finished_at, output, fail_message";
