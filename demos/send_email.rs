//! 嵌入式用法示例：注册延迟任务与定时任务，按配置的运行模式启动
//!
//! ```bash
//! DATABASE_URL=sqlite:///taskworker-demo.db cargo run --example send_email
//! ```

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use taskworker::{
    init_logging, AppConfig, CronTrigger, DateTrigger, FnHandler, Payload, RunMode,
    ShutdownManager, TaskSignature, TaskWorker,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load(None)?;
    init_logging(&config.logging)?;
    let run_mode = config.worker.run_mode;

    let mut worker = TaskWorker::init(config).await?;

    let send_email = worker.register_task(
        "send_email",
        FnHandler::arc(
            TaskSignature::new(["to", "subject"]).with_optional(["body"]),
            |p: Payload| async move {
                info!("发送邮件给 {} : {}", p["to"], p["subject"]);
                Ok(json!({ "delivered": true, "to": p["to"] }))
            },
        ),
    )?;

    let heartbeat = FnHandler::arc(TaskSignature::empty(), |_| async {
        info!("heartbeat");
        Ok(json!("alive"))
    });
    let heartbeat = worker.define_cron_task("heartbeat", &CronTrigger::new().second("*/5"), heartbeat)?;
    worker.define_date_task("startup_heartbeat", &DateTrigger::now(), Arc::clone(&heartbeat))?;

    let payload = |value: serde_json::Value| match value {
        serde_json::Value::Object(map) => map,
        _ => Payload::new(),
    };
    send_email
        .apply(payload(json!({"to": "a@x.com", "subject": "hi"})))
        .await?;
    send_email
        .apply_at(
            payload(json!({"to": "b@x.com", "subject": "later", "body": "..."})),
            chrono::Utc::now() + chrono::Duration::seconds(30),
        )
        .await?;

    let shutdown = ShutdownManager::new();
    match run_mode {
        RunMode::Blocking => {
            let signal = shutdown.signal().await;
            let listener = shutdown.clone();
            tokio::spawn(async move { listener.shutdown_on_signal().await });
            worker.run_until(signal).await?;
        }
        RunMode::Background => {
            let handle = worker.start().await?;
            shutdown.shutdown_on_signal().await;
            handle.shutdown().await?;
        }
    }

    info!("示例已退出");
    Ok(())
}
