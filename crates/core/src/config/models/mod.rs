pub mod app_config;
pub mod database;
pub mod logging;
pub mod worker;

pub use app_config::AppConfig;
pub use database::{DatabaseConfig, DatabaseDriver};
pub use logging::{LogFormat, LoggingConfig};
pub use worker::{DispatchMode, RunMode, WorkerConfig};
