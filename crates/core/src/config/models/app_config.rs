use config::{Config as ConfigBuilder, Environment, File, FileFormat, Map};
use serde::{Deserialize, Serialize};
use std::path::Path;
use taskworker_errors::{TaskWorkerError, TaskWorkerResult};

use super::{database::DatabaseConfig, logging::LoggingConfig, worker::WorkerConfig};

/// 环境变量覆盖前缀，如 `TASKWORKER_DATABASE__URL`
pub const ENV_PREFIX: &str = "TASKWORKER";
/// 宿主应用通用的数据库地址环境变量，作为 `database.url` 的回退
pub const HOST_DATABASE_URL_ENV: &str = "DATABASE_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 按 默认值 -> TOML文件 -> 环境变量 的顺序加载配置
    pub fn load(config_path: Option<&str>) -> TaskWorkerResult<Self> {
        Self::load_with_env(config_path, None)
    }

    /// 与 `load` 相同，但环境变量取自给定的映射而不是进程环境
    pub fn load_with_env(
        config_path: Option<&str>,
        env: Option<Map<String, String>>,
    ) -> TaskWorkerResult<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(TaskWorkerError::config_error(format!(
                    "配置文件不存在: {path}"
                )));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            for path in ["config/taskworker.toml", "taskworker.toml"] {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        let host_database_url = match &env {
            Some(map) => map.get(HOST_DATABASE_URL_ENV).cloned(),
            None => std::env::var(HOST_DATABASE_URL_ENV).ok(),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let mut config: AppConfig = builder
            .build()
            .map_err(|e| TaskWorkerError::config_error(format!("构建配置失败: {e}")))?
            .try_deserialize()
            .map_err(|e| TaskWorkerError::config_error(format!("反序列化配置失败: {e}")))?;

        if config.database.url.is_none() {
            config.database.url = host_database_url.filter(|url| !url.trim().is_empty());
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> TaskWorkerResult<Self> {
        let config: AppConfig = toml::from_str(toml_str)
            .map_err(|e| TaskWorkerError::config_error(format!("解析TOML配置失败: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> TaskWorkerResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TaskWorkerError::config_error(format!("序列化配置为TOML失败: {e}")))
    }

    /// 结构校验，不检查数据库地址是否存在（缺失时在初始化阶段报 `MissingDatabaseUri`）
    pub fn validate(&self) -> TaskWorkerResult<()> {
        self.database.validate()?;
        self.worker.validate()?;
        Ok(())
    }

    pub fn with_database_url<S: Into<String>>(mut self, url: S) -> Self {
        self.database.url = Some(url.into());
        self
    }
}
