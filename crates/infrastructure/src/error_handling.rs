//! 存储操作的错误处理
//!
//! 为作业存储的每个操作提供上下文信息，并把 sqlx 错误分为两类：
//! 后端暂时不可达（`StorageUnavailable`，调度循环跳过本次tick）与其它数据库错误。

use chrono::{DateTime, Utc};
use sqlx::Error as SqlxError;
use std::fmt;
use taskworker_errors::TaskWorkerError;
use tracing::{debug, error, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryOperation {
    Create,
    Read,
    Update,
    Delete,
    Query,
    Claim,
    Migrate,
    Connect,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOperation::Create => write!(f, "创建"),
            RepositoryOperation::Read => write!(f, "查询"),
            RepositoryOperation::Update => write!(f, "更新"),
            RepositoryOperation::Delete => write!(f, "删除"),
            RepositoryOperation::Query => write!(f, "查询"),
            RepositoryOperation::Claim => write!(f, "认领"),
            RepositoryOperation::Migrate => write!(f, "初始化"),
            RepositoryOperation::Connect => write!(f, "连接"),
        }
    }
}

/// 作业存储操作的上下文
#[derive(Debug, Clone)]
pub struct JobOperationContext {
    pub operation: RepositoryOperation,
    pub job_id: Option<i64>,
    pub task_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub additional_info: Option<String>,
}

impl JobOperationContext {
    pub fn new(operation: RepositoryOperation) -> Self {
        Self {
            operation,
            job_id: None,
            task_name: None,
            timestamp: Utc::now(),
            additional_info: None,
        }
    }

    pub fn with_job_id(mut self, job_id: i64) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_task_name(mut self, task_name: String) -> Self {
        self.task_name = Some(task_name);
        self
    }

    pub fn with_additional_info(mut self, info: String) -> Self {
        self.additional_info = Some(info);
        self
    }

    pub fn entity_description(&self) -> String {
        match (&self.job_id, &self.task_name) {
            (Some(id), Some(name)) => format!("作业 '{name}' (ID: {id})"),
            (Some(id), None) => format!("作业 (ID: {id})"),
            (None, Some(name)) => format!("作业 '{name}'"),
            (None, None) => "作业".to_string(),
        }
    }
}

/// 后端不可达类错误：连接、TLS、连接池耗尽或关闭
pub fn is_connectivity_error(error: &SqlxError) -> bool {
    matches!(
        error,
        SqlxError::Io(_)
            | SqlxError::Tls(_)
            | SqlxError::PoolTimedOut
            | SqlxError::PoolClosed
            | SqlxError::WorkerCrashed
    )
}

pub fn classify_sqlx_error(error: SqlxError) -> TaskWorkerError {
    if is_connectivity_error(&error) {
        TaskWorkerError::storage_unavailable(error.to_string())
    } else {
        TaskWorkerError::Database(error)
    }
}

pub struct RepositoryErrorHelpers;

impl RepositoryErrorHelpers {
    #[instrument(skip_all, fields(
        operation = %context.operation,
        job_id = ?context.job_id,
        task_name = ?context.task_name,
    ))]
    pub fn job_database_error(context: JobOperationContext, error: SqlxError) -> TaskWorkerError {
        let entity_desc = context.entity_description();
        let operation_desc = context.operation.to_string();

        if is_connectivity_error(&error) {
            warn!(error = %error, "{operation_desc}{entity_desc}时存储不可用");
            return classify_sqlx_error(error);
        }

        match &error {
            SqlxError::Database(db_error) => {
                error!(
                    error = %error,
                    constraint = ?db_error.constraint(),
                    "{operation_desc}{entity_desc}时发生数据库错误: {db_error}"
                );
            }
            SqlxError::RowNotFound => {
                debug!("{operation_desc}{entity_desc}时未找到记录");
            }
            _ => {
                error!(error = %error, "{operation_desc}{entity_desc}时发生错误");
            }
        }
        TaskWorkerError::Database(error)
    }

    pub fn serialization_error(context: &JobOperationContext, error: impl fmt::Display) -> TaskWorkerError {
        let msg = format!(
            "{}{}时序列化失败: {error}",
            context.operation,
            context.entity_description()
        );
        error!("{msg}");
        TaskWorkerError::Serialization(msg)
    }

    pub fn log_operation_success(context: &JobOperationContext, additional_info: Option<&str>) {
        let base_msg = format!("{}{}成功", context.operation, context.entity_description());
        match additional_info.or(context.additional_info.as_deref()) {
            Some(info) => debug!("{base_msg}: {info}"),
            None => debug!("{base_msg}"),
        }
    }
}

/// 隐藏URL中的密码部分后再写日志
pub fn mask_database_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}

#[macro_export]
macro_rules! job_context {
    ($operation:expr) => {
        $crate::error_handling::JobOperationContext::new($operation)
    };
    ($operation:expr, job_id = $job_id:expr) => {
        $crate::error_handling::JobOperationContext::new($operation).with_job_id($job_id)
    };
    ($operation:expr, task_name = $task_name:expr) => {
        $crate::error_handling::JobOperationContext::new($operation)
            .with_task_name($task_name.to_string())
    };
    ($operation:expr, job_id = $job_id:expr, task_name = $task_name:expr) => {
        $crate::error_handling::JobOperationContext::new($operation)
            .with_job_id($job_id)
            .with_task_name($task_name.to_string())
    };
}
