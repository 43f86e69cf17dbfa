use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use taskworker_errors::{TaskWorkerError, TaskWorkerResult};

use crate::models::Payload;

/// 可按名称调用的任务处理函数
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// 处理函数接受的关键字参数
    fn signature(&self) -> &TaskSignature;

    async fn call(&self, payload: Payload) -> anyhow::Result<Value>;
}

/// 处理函数的关键字参数声明
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSignature {
    required: BTreeSet<String>,
    optional: BTreeSet<String>,
}

impl TaskSignature {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            optional: BTreeSet::new(),
        }
    }

    /// 无参数处理函数（cron/date 任务）
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_optional<I, S>(mut self, optional: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional.extend(optional.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.optional.is_empty()
    }

    /// 缺少必填参数或出现未声明参数都视为无效载荷
    pub fn validate(&self, task: &str, payload: &Payload) -> TaskWorkerResult<()> {
        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|name| !payload.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(TaskWorkerError::invalid_payload(
                task,
                format!("缺少参数: {}", missing.join(", ")),
            ));
        }

        let mut unexpected: Vec<&str> = payload
            .keys()
            .filter(|key| !self.required.contains(*key) && !self.optional.contains(*key))
            .map(String::as_str)
            .collect();
        if !unexpected.is_empty() {
            unexpected.sort_unstable();
            return Err(TaskWorkerError::invalid_payload(
                task,
                format!("未声明的参数: {}", unexpected.join(", ")),
            ));
        }

        Ok(())
    }
}

/// 基于闭包的处理函数
pub struct FnHandler<F> {
    signature: TaskSignature,
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    pub fn new(signature: TaskSignature, f: F) -> Self {
        Self { signature, f }
    }

    pub fn arc(signature: TaskSignature, f: F) -> Arc<dyn TaskHandler> {
        Arc::new(Self::new(signature, f))
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn signature(&self) -> &TaskSignature {
        &self.signature
    }

    async fn call(&self, payload: Payload) -> anyhow::Result<Value> {
        (self.f)(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validate_exact_match() {
        let sig = TaskSignature::new(["to", "subject"]);
        assert!(sig
            .validate("mail.send_email", &payload(json!({"to": "a@x.com", "subject": "hi"})))
            .is_ok());
    }

    #[test]
    fn test_validate_missing_required() {
        let sig = TaskSignature::new(["to", "subject"]);
        let err = sig
            .validate("mail.send_email", &payload(json!({"to": "a@x.com"})))
            .unwrap_err();
        assert!(matches!(err, TaskWorkerError::InvalidPayload { .. }));
        assert!(err.to_string().contains("subject"));
    }

    #[test]
    fn test_validate_unexpected_key() {
        let sig = TaskSignature::new(["to"]).with_optional(["cc"]);
        assert!(sig
            .validate("mail.send_email", &payload(json!({"to": "a@x.com", "cc": "b@x.com"})))
            .is_ok());

        let err = sig
            .validate("mail.send_email", &payload(json!({"to": "a@x.com", "bcc": "c@x.com"})))
            .unwrap_err();
        assert!(err.to_string().contains("bcc"));
    }

    #[test]
    fn test_empty_signature_rejects_any_key() {
        let sig = TaskSignature::empty();
        assert!(sig.is_empty());
        assert!(sig.validate("ops.heartbeat", &Payload::new()).is_ok());
        assert!(sig
            .validate("ops.heartbeat", &payload(json!({"x": 1})))
            .is_err());
    }

    #[tokio::test]
    async fn test_fn_handler_call() {
        let handler = FnHandler::arc(TaskSignature::new(["n"]), |p: Payload| async move {
            let n = p.get("n").and_then(Value::as_i64).unwrap_or_default();
            Ok(json!(n * 2))
        });
        let out = handler.call(payload(json!({"n": 21}))).await.unwrap();
        assert_eq!(out, json!(42));
    }
}
