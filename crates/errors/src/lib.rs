use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskWorkerError {
    #[error("未注册的任务: {name}")]
    UnknownTask { name: String },
    #[error("任务重复注册: {name}")]
    DuplicateTask { name: String },
    #[error("任务 {task} 的参数无效: {message}")]
    InvalidPayload { task: String, message: String },
    /// 处理函数自身返回的错误，显示内容即原始错误信息
    #[error("{message}")]
    HandlerFailed { task: String, message: String },
    #[error("存储不可用: {0}")]
    StorageUnavailable(String),
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("作业未找到: {id}")]
    JobNotFound { id: i64 },
    #[error("作业 {id} 未处于执行中 (当前状态: {status})")]
    JobNotInFlight { id: i64, status: String },
    #[error("作业 {id} 不是失败状态，无法重新提交 (当前状态: {status})")]
    JobNotFailed { id: i64, status: String },
    #[error("未配置数据库连接地址")]
    MissingDatabaseUri,
    #[error("无效的{kind}触发器: {message}")]
    InvalidTrigger { kind: String, message: String },
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type TaskWorkerResult<T> = Result<T, TaskWorkerError>;

impl TaskWorkerError {
    pub fn unknown_task<S: Into<String>>(name: S) -> Self {
        Self::UnknownTask { name: name.into() }
    }
    pub fn duplicate_task<S: Into<String>>(name: S) -> Self {
        Self::DuplicateTask { name: name.into() }
    }
    pub fn invalid_payload<T: Into<String>, M: Into<String>>(task: T, message: M) -> Self {
        Self::InvalidPayload {
            task: task.into(),
            message: message.into(),
        }
    }
    pub fn handler_failed<T: Into<String>, M: Into<String>>(task: T, message: M) -> Self {
        Self::HandlerFailed {
            task: task.into(),
            message: message.into(),
        }
    }
    pub fn invalid_trigger<K: Into<String>, M: Into<String>>(kind: K, message: M) -> Self {
        Self::InvalidTrigger {
            kind: kind.into(),
            message: message.into(),
        }
    }
    pub fn storage_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::StorageUnavailable(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn job_not_in_flight<S: Into<String>>(id: i64, status: S) -> Self {
        Self::JobNotInFlight {
            id,
            status: status.into(),
        }
    }

    /// 启动或注册阶段的错误，进程初始化应立即失败
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TaskWorkerError::MissingDatabaseUri
                | TaskWorkerError::InvalidTrigger { .. }
                | TaskWorkerError::DuplicateTask { .. }
                | TaskWorkerError::Configuration(_)
        )
    }

    /// 后端连接类故障，调度循环跳过本次tick即可
    pub fn is_transient(&self) -> bool {
        matches!(self, TaskWorkerError::StorageUnavailable(_))
    }

    /// 需要转换为作业回推(pushback)的任务级错误
    pub fn is_task_failure(&self) -> bool {
        matches!(
            self,
            TaskWorkerError::UnknownTask { .. }
                | TaskWorkerError::InvalidPayload { .. }
                | TaskWorkerError::HandlerFailed { .. }
        )
    }
}

impl From<serde_json::Error> for TaskWorkerError {
    fn from(err: serde_json::Error) -> Self {
        TaskWorkerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for TaskWorkerError {
    fn from(err: anyhow::Error) -> Self {
        TaskWorkerError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests;
