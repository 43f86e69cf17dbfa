use taskworker_errors::{TaskWorkerError, TaskWorkerResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// 初始化全局 tracing 订阅者，`RUST_LOG` 优先于配置中的级别
pub fn init_logging(config: &LoggingConfig) -> TaskWorkerResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| TaskWorkerError::config_error(format!("初始化JSON日志格式失败: {e}"))),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .map_err(|e| TaskWorkerError::config_error(format!("初始化Pretty日志格式失败: {e}"))),
    }
}
