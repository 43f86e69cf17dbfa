//! 作业存储接口定义
//!
//! `JobStore` 是延迟作业状态的唯一真实来源，每种关系型后端各有一个实现，
//! 在启动时根据配置选定后注入调度组件。
//!
//! ## 生命周期
//!
//! ```text
//! apply() ──> pending ──claim_next()──> running ──complete()──> completed
//!                ^                         │
//!                │                         └──pushback()──> failed
//!                ├──────────── resubmit() ─────────────────────┘
//!                └──────── requeue_stale() <── running (结果未写回)
//! ```
//!
//! - `claim_next` 必须是原子的：并发调用永远不会返回同一个作业
//! - `complete`/`pushback`/`release` 只作用于 `running` 状态的作业，重复调用会被拒绝
//! - `failed` 不会被自动重试，只能由宿主调用 `resubmit` 重新入队
//! - 执行后写回结果失败的作业停留在 `running`，由宿主调用 `requeue_stale` 放回

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use taskworker_errors::TaskWorkerResult;

use crate::models::{ExecutionAudit, JobStatus, NewExecutionAudit, Payload, ScheduledJob};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// 创建 `scheduled_job` 与 `execution_audit` 表（已存在则跳过）
    async fn create_tables(&self) -> TaskWorkerResult<()>;

    /// 生产者接口：写入一个 `pending` 作业并返回其ID
    async fn apply(
        &self,
        task_name: &str,
        payload: &Payload,
        scheduled_date: DateTime<Utc>,
    ) -> TaskWorkerResult<i64>;

    /// 原子地认领一个到期作业（`scheduled_date <= now`），
    /// 按 `scheduled_date` 升序、同一时间按写入顺序选取
    async fn claim_next(&self, now: DateTime<Utc>) -> TaskWorkerResult<Option<ScheduledJob>>;

    /// 标记作业成功并保存结果
    async fn complete(&self, job: &ScheduledJob, result: &Value) -> TaskWorkerResult<()>;

    /// 标记作业失败并保存失败信息，作业保留但不再可被认领
    async fn pushback(&self, job: &ScheduledJob, fail_message: &str) -> TaskWorkerResult<()>;

    /// 把提前认领的作业放回 `pending`（认领后复核发现尚未到期时使用）
    async fn release(&self, job: &ScheduledJob) -> TaskWorkerResult<()>;

    async fn get_job(&self, id: i64) -> TaskWorkerResult<Option<ScheduledJob>>;

    async fn list_jobs(&self, status: JobStatus, limit: i64) -> TaskWorkerResult<Vec<ScheduledJob>>;

    /// 宿主手动恢复：把 `failed` 作业重新放回 `pending`
    async fn resubmit(&self, id: i64, scheduled_date: DateTime<Utc>) -> TaskWorkerResult<()>;

    /// 宿主手动恢复：把 `claimed_at` 早于 `claimed_before` 的 `running` 作业放回 `pending`，
    /// 返回放回的数量。处理函数可能已经执行过一次
    async fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> TaskWorkerResult<u64>;

    /// 追加一条 cron/date 执行审计记录
    async fn record_execution(&self, audit: &NewExecutionAudit) -> TaskWorkerResult<ExecutionAudit>;

    async fn list_executions(
        &self,
        task_name: Option<&str>,
        limit: i64,
    ) -> TaskWorkerResult<Vec<ExecutionAudit>>;

    /// 删除早于 `before` 完结的作业，返回删除数量
    async fn prune_finished(&self, before: DateTime<Utc>) -> TaskWorkerResult<u64>;

    async fn health_check(&self) -> TaskWorkerResult<()>;
}
