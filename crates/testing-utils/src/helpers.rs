//! 测试环境辅助工具

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use taskworker_core::{Clock, DatabaseConfig, JobStore};
use taskworker_errors::TaskWorkerResult;
use taskworker_infrastructure::SqliteJobStore;
use tempfile::TempDir;
use tokio::time::sleep;

use crate::builders::epoch;

/// 只在测试代码中手动推进的时钟
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap() = at;
    }

    pub fn advance(&self, by: chrono::Duration) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap();
        *now += by;
        *now
    }

    pub fn advance_secs(&self, secs: i64) -> DateTime<Utc> {
        self.advance(chrono::Duration::seconds(secs))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(epoch())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// 临时目录中的SQLite作业存储，目录随结构体一起删除
pub struct SqliteStoreFixture {
    pub store: Arc<SqliteJobStore>,
    pub config: DatabaseConfig,
    _dir: TempDir,
}

impl SqliteStoreFixture {
    pub fn database_url(&self) -> &str {
        self.config.url.as_deref().unwrap_or_default()
    }

    pub fn job_store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }
}

/// 创建一个已建表的临时文件SQLite存储
///
/// 并发测试必须使用文件库，`:memory:` 的每个连接都是独立数据库。
pub async fn sqlite_store() -> TaskWorkerResult<SqliteStoreFixture> {
    let dir = tempfile::tempdir()
        .map_err(|e| taskworker_errors::TaskWorkerError::Internal(e.to_string()))?;
    let path = dir.path().join("jobs.db");
    let path = path.to_string_lossy().replace('\\', "/");

    let config = DatabaseConfig {
        url: Some(format!("sqlite:///{path}")),
        max_connections: 8,
        ..Default::default()
    };
    let store = SqliteJobStore::connect(&config.connection_target()?, &config).await?;
    store.create_tables().await?;

    Ok(SqliteStoreFixture {
        store: Arc::new(store),
        config,
        _dir: dir,
    })
}

pub struct TestEnv;

impl TestEnv {
    /// 轮询等待条件成立，超时返回 false
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }
        false
    }
}
