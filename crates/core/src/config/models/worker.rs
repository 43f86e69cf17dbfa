use serde::{Deserialize, Serialize};
use std::time::Duration;
use taskworker_errors::{TaskWorkerError, TaskWorkerResult};

/// 每次调度tick处理的作业数量
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// 每个tick最多处理一个作业
    #[default]
    OnePerTick,
    /// 每个tick持续认领直到没有到期作业，上限为 `max_jobs_per_tick`
    Drain,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Background,
    Blocking,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub interval_seconds: u64,
    pub dispatch_mode: DispatchMode,
    pub max_jobs_per_tick: u32,
    pub run_mode: RunMode,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 5,
            dispatch_mode: DispatchMode::OnePerTick,
            max_jobs_per_tick: 100,
            run_mode: RunMode::Background,
        }
    }
}

impl WorkerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// 单个tick允许处理的作业上限
    pub fn jobs_per_tick(&self) -> u32 {
        match self.dispatch_mode {
            DispatchMode::OnePerTick => 1,
            DispatchMode::Drain => self.max_jobs_per_tick,
        }
    }

    pub fn validate(&self) -> TaskWorkerResult<()> {
        if self.interval_seconds == 0 {
            return Err(TaskWorkerError::config_error(
                "worker.interval_seconds 必须大于0",
            ));
        }
        if self.max_jobs_per_tick == 0 {
            return Err(TaskWorkerError::config_error(
                "worker.max_jobs_per_tick 必须大于0",
            ));
        }
        Ok(())
    }
}
