//! 测试数据构建器

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use taskworker_core::{JobStatus, Payload, ScheduledJob};

/// 测试中常用的固定起点：2024-01-01 00:00:00 UTC
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// 把 `json!({...})` 转成载荷，非对象值视为空载荷
pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

pub struct ScheduledJobBuilder {
    job: ScheduledJob,
}

impl ScheduledJobBuilder {
    pub fn new() -> Self {
        Self {
            job: ScheduledJob {
                id: 1,
                task_name: "test.task".to_string(),
                payload: Payload::new(),
                scheduled_date: epoch(),
                status: JobStatus::Pending,
                result: None,
                fail_message: None,
                created_at: epoch(),
                claimed_at: None,
                finished_at: None,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.job.id = id;
        self
    }

    pub fn with_task_name(mut self, name: &str) -> Self {
        self.job.task_name = name.to_string();
        self
    }

    pub fn with_payload(mut self, value: Value) -> Self {
        self.job.payload = payload(value);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.job.scheduled_date = at;
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.job.status = status;
        self
    }

    pub fn running(mut self) -> Self {
        self.job.status = JobStatus::Running;
        self.job.claimed_at = Some(self.job.scheduled_date);
        self
    }

    pub fn build(self) -> ScheduledJob {
        self.job
    }
}

impl Default for ScheduledJobBuilder {
    fn default() -> Self {
        Self::new()
    }
}
