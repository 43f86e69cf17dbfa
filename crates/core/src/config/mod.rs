pub mod models;

pub use models::{
    AppConfig, DatabaseConfig, DatabaseDriver, DispatchMode, LogFormat, LoggingConfig, RunMode,
    WorkerConfig,
};
