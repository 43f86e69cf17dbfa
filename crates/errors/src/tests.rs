use crate::*;

#[test]
fn test_error_display() {
    let err = TaskWorkerError::unknown_task("mail.send_email");
    assert_eq!(err.to_string(), "未注册的任务: mail.send_email");

    let err = TaskWorkerError::duplicate_task("mail.send_email");
    assert_eq!(err.to_string(), "任务重复注册: mail.send_email");

    let err = TaskWorkerError::invalid_payload("mail.send_email", "缺少参数: to");
    assert_eq!(
        err.to_string(),
        "任务 mail.send_email 的参数无效: 缺少参数: to"
    );

    let err = TaskWorkerError::JobNotFound { id: 42 };
    assert_eq!(err.to_string(), "作业未找到: 42");

    let err = TaskWorkerError::job_not_in_flight(7, "completed");
    assert_eq!(err.to_string(), "作业 7 未处于执行中 (当前状态: completed)");

    let err = TaskWorkerError::JobNotFailed {
        id: 7,
        status: "pending".to_string(),
    };
    assert!(err.to_string().contains("pending"));

    let err = TaskWorkerError::MissingDatabaseUri;
    assert_eq!(err.to_string(), "未配置数据库连接地址");

    let err = TaskWorkerError::invalid_trigger("cron", "second字段越界");
    assert_eq!(err.to_string(), "无效的cron触发器: second字段越界");
}

#[test]
fn test_handler_failed_displays_original_message() {
    let err = TaskWorkerError::handler_failed("mail.send_email", "smtp connection refused");
    assert_eq!(err.to_string(), "smtp connection refused");
}

#[test]
fn test_is_fatal() {
    assert!(TaskWorkerError::MissingDatabaseUri.is_fatal());
    assert!(TaskWorkerError::invalid_trigger("cron", "bad").is_fatal());
    assert!(TaskWorkerError::duplicate_task("a").is_fatal());
    assert!(TaskWorkerError::config_error("bad").is_fatal());

    assert!(!TaskWorkerError::storage_unavailable("down").is_fatal());
    assert!(!TaskWorkerError::unknown_task("a").is_fatal());
}

#[test]
fn test_is_transient() {
    assert!(TaskWorkerError::storage_unavailable("connection refused").is_transient());
    assert!(!TaskWorkerError::JobNotFound { id: 1 }.is_transient());
    assert!(!TaskWorkerError::handler_failed("a", "boom").is_transient());
}

#[test]
fn test_is_task_failure() {
    assert!(TaskWorkerError::unknown_task("a").is_task_failure());
    assert!(TaskWorkerError::invalid_payload("a", "x").is_task_failure());
    assert!(TaskWorkerError::handler_failed("a", "x").is_task_failure());
    assert!(!TaskWorkerError::storage_unavailable("x").is_task_failure());
    assert!(!TaskWorkerError::MissingDatabaseUri.is_task_failure());
}

#[test]
fn test_conversions() {
    let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
    let err: TaskWorkerError = json_err.into();
    assert!(matches!(err, TaskWorkerError::Serialization(_)));

    let err: TaskWorkerError = anyhow::anyhow!("unexpected").into();
    assert_eq!(err.to_string(), "内部错误: unexpected");
}
