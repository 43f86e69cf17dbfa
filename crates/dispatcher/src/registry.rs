use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use taskworker_core::{Payload, TaskHandler};
use taskworker_errors::{TaskWorkerError, TaskWorkerResult};
use tracing::{debug, info};

/// 任务名称到处理函数的映射，启动后只读
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同名任务重复注册返回 `DuplicateTask`
    pub fn register(&mut self, name: &str, handler: Arc<dyn TaskHandler>) -> TaskWorkerResult<()> {
        if self.handlers.contains_key(name) {
            return Err(TaskWorkerError::duplicate_task(name));
        }
        self.handlers.insert(name.to_string(), handler);
        info!("注册任务: {name}");
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> TaskWorkerResult<Arc<dyn TaskHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| TaskWorkerError::unknown_task(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// 解析、校验载荷并调用处理函数
    pub async fn invoke(&self, name: &str, payload: Payload) -> TaskWorkerResult<Value> {
        let handler = self.resolve(name)?;
        handler.signature().validate(name, &payload)?;
        debug!("调用任务: {name}");
        call_handler(name, handler.as_ref(), payload).await
    }
}

/// 调用处理函数，错误与panic都转换为 `HandlerFailed`
pub(crate) async fn call_handler(
    name: &str,
    handler: &dyn TaskHandler,
    payload: Payload,
) -> TaskWorkerResult<Value> {
    match AssertUnwindSafe(handler.call(payload)).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TaskWorkerError::handler_failed(name, e.to_string())),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "未知panic".to_string());
            Err(TaskWorkerError::handler_failed(
                name,
                format!("处理函数panic: {message}"),
            ))
        }
    }
}
