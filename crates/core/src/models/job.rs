use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 关键字参数形式的任务载荷
pub type Payload = serde_json::Map<String, Value>;

/// 延迟作业的持久化记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledJob {
    pub id: i64,
    pub task_name: String,
    pub payload: Payload,
    /// 最早可执行时间
    pub scheduled_date: DateTime<Utc>,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub fail_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    /// 已被调度循环认领、正在执行
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("无效的作业状态: {s}")),
        }
    }
}

impl ScheduledJob {
    pub fn new(task_name: impl Into<String>, payload: Payload, scheduled_date: DateTime<Utc>) -> Self {
        Self {
            id: 0, // 将由数据库生成
            task_name: task_name.into(),
            payload,
            scheduled_date,
            status: JobStatus::Pending,
            result: None,
            fail_message: None,
            created_at: Utc::now(),
            claimed_at: None,
            finished_at: None,
        }
    }
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_date <= now
    }
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.is_due(now)
    }
    pub fn is_in_flight(&self) -> bool {
        self.status == JobStatus::Running
    }
    pub fn is_finished(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }
    pub fn entity_description(&self) -> String {
        format!("作业 (ID: {}, 任务: {})", self.id, self.task_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("PENDING".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_due_and_claimable() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut job = ScheduledJob::new("mail.send_email", Payload::new(), at);

        assert!(!job.is_due(at - Duration::milliseconds(1)));
        assert!(job.is_due(at));
        assert!(job.is_claimable(at));

        job.status = JobStatus::Running;
        assert!(!job.is_claimable(at));
        assert!(job.is_in_flight());
        assert!(!job.is_finished());

        job.status = JobStatus::Failed;
        assert!(job.is_finished());
    }
}
