use serde::{Deserialize, Serialize};
use std::fmt;
use taskworker_errors::{TaskWorkerError, TaskWorkerResult};

/// 作业存储后端
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// 嵌入式文件存储
    Sqlite,
    /// 网络化存储
    Postgres,
}

impl DatabaseDriver {
    /// 按URL协议推断后端，只在启动时调用一次
    ///
    /// 没有协议的地址视为SQLite文件路径；其余协议只接受 sqlite 与 postgres。
    pub fn infer_from_url(url: &str) -> TaskWorkerResult<Self> {
        match url_scheme(url) {
            None => Ok(DatabaseDriver::Sqlite),
            Some(scheme) => match scheme.as_str() {
                "sqlite" => Ok(DatabaseDriver::Sqlite),
                "postgres" | "postgresql" => Ok(DatabaseDriver::Postgres),
                other => Err(unsupported_scheme(other)),
            },
        }
    }
}

/// `postgresql+psycopg2://...` -> `postgresql`，没有 `://` 时返回 None
fn url_scheme(url: &str) -> Option<String> {
    let (scheme, _) = url.split_once("://")?;
    let base = scheme.split('+').next().unwrap_or(scheme);
    Some(base.to_ascii_lowercase())
}

fn unsupported_scheme(scheme: &str) -> TaskWorkerError {
    TaskWorkerError::config_error(format!(
        "不支持的数据库协议: {scheme} (可用: sqlite, postgres)"
    ))
}

impl fmt::Display for DatabaseDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseDriver::Sqlite => write!(f, "sqlite"),
            DatabaseDriver::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub driver: Option<DatabaseDriver>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    /// SQLite `journal_size_limit` pragma
    pub journal_size_limit: i64,
    /// SQLite 页缓存大小(KiB)，写入pragma时取负值
    pub cache_size_kib: i64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            driver: None,
            max_connections: 10,
            min_connections: 1,
            connection_timeout_seconds: 30,
            journal_size_limit: 1024,
            cache_size_kib: 65536,
        }
    }
}

impl DatabaseConfig {
    pub fn url(&self) -> TaskWorkerResult<&str> {
        match self.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(TaskWorkerError::MissingDatabaseUri),
        }
    }

    /// 显式配置的driver优先，否则按URL推断
    pub fn resolved_driver(&self) -> TaskWorkerResult<DatabaseDriver> {
        let url = self.url()?;
        match self.driver {
            Some(driver) => Ok(driver),
            None => DatabaseDriver::infer_from_url(url),
        }
    }

    /// 规范化后的连接目标
    ///
    /// - Postgres: 去掉 `postgresql+psycopg2://` 之类的驱动限定
    /// - SQLite: 返回文件路径，内存库返回 `:memory:`
    pub fn connection_target(&self) -> TaskWorkerResult<String> {
        let url = self.url()?;
        match self.resolved_driver()? {
            DatabaseDriver::Postgres => Ok(strip_driver_qualifier(url)),
            DatabaseDriver::Sqlite => sqlite_path(url),
        }
    }

    pub fn validate(&self) -> TaskWorkerResult<()> {
        if self.max_connections == 0 {
            return Err(TaskWorkerError::config_error(
                "database.max_connections 必须大于0",
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(TaskWorkerError::config_error(
                "database.min_connections 不能大于 max_connections",
            ));
        }
        if self.connection_timeout_seconds == 0 {
            return Err(TaskWorkerError::config_error(
                "database.connection_timeout_seconds 必须大于0",
            ));
        }
        Ok(())
    }
}

fn strip_driver_qualifier(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let base = scheme.split('+').next().unwrap_or(scheme);
            format!("{base}://{rest}")
        }
        None => url.to_string(),
    }
}

fn sqlite_path(url: &str) -> TaskWorkerResult<String> {
    let url = url.replace('\\', "/");
    let path = match (url.split_once("://"), url_scheme(&url)) {
        // sqlite:///relative.db, sqlite:////abs/path.db
        (Some((_, rest)), Some(scheme)) if scheme == "sqlite" => {
            rest.strip_prefix('/').unwrap_or(rest).to_string()
        }
        (_, Some(scheme)) => return Err(unsupported_scheme(&scheme)),
        _ => url.strip_prefix("sqlite:").unwrap_or(url.as_str()).to_string(),
    };

    if path.is_empty() || path == ":memory:" {
        Ok(":memory:".to_string())
    } else {
        Ok(path)
    }
}
