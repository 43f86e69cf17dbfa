use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// cron/date 触发执行的审计记录，只追加不修改
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionAudit {
    pub id: i64,
    pub task_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output: Option<Value>,
    pub fail_message: Option<String>,
}

/// 待写入的审计记录
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecutionAudit {
    pub task_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output: Option<Value>,
    pub fail_message: Option<String>,
}

impl NewExecutionAudit {
    pub fn succeeded(
        task_name: impl Into<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        output: Option<Value>,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            started_at,
            finished_at,
            output,
            fail_message: None,
        }
    }

    pub fn failed(
        task_name: impl Into<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        fail_message: impl Into<String>,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            started_at,
            finished_at,
            output: None,
            fail_message: Some(fail_message.into()),
        }
    }

    pub fn into_audit(self, id: i64) -> ExecutionAudit {
        ExecutionAudit {
            id,
            task_name: self.task_name,
            started_at: self.started_at,
            finished_at: self.finished_at,
            output: self.output,
            fail_message: self.fail_message,
        }
    }
}

impl ExecutionAudit {
    pub fn is_success(&self) -> bool {
        self.fail_message.is_none()
    }
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
