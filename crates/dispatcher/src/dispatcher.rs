//! 延迟作业的轮询派发
//!
//! 每个间隔触发一次 `tick`：认领到期作业、调用处理函数、写回结果。
//! 处理函数的错误转换为 pushback，存储不可用时跳过本次 tick。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use taskworker_core::{Clock, DispatchMode, JobStore, ScheduledJob, WorkerConfig};
use taskworker_errors::{TaskWorkerError, TaskWorkerResult};
use tracing::{debug, error, info, warn, Instrument};

use crate::registry::TaskRegistry;

/// 单个作业在一次派发中的结局
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { id: i64 },
    Failed { id: i64, message: String },
    /// 认领后复查发现尚未到期，已放回待执行
    Released { id: i64 },
}

impl JobOutcome {
    pub fn job_id(&self) -> i64 {
        match self {
            JobOutcome::Completed { id }
            | JobOutcome::Failed { id, .. }
            | JobOutcome::Released { id } => *id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub outcomes: Vec<JobOutcome>,
    /// 本次 tick 因存储故障被跳过
    pub skipped: bool,
}

impl TickReport {
    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, JobOutcome::Completed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, JobOutcome::Failed { .. }))
            .count()
    }

    pub fn is_idle(&self) -> bool {
        self.outcomes.is_empty() && !self.skipped
    }
}

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    registry: Arc<TaskRegistry>,
    clock: Arc<dyn Clock>,
    jobs_per_tick: usize,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<TaskRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            registry,
            clock,
            jobs_per_tick: 1,
        }
    }

    pub fn with_config(mut self, config: &WorkerConfig) -> Self {
        self.jobs_per_tick = config.jobs_per_tick().max(1) as usize;
        if config.dispatch_mode == DispatchMode::Drain {
            info!("派发模式: drain，每次最多 {} 个作业", self.jobs_per_tick);
        }
        self
    }

    pub fn jobs_per_tick(&self) -> usize {
        self.jobs_per_tick
    }

    /// 执行一次派发；从不返回错误，失败只记录日志
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        for _ in 0..self.jobs_per_tick {
            let now = self.clock.now();
            match self.run_once(now).await {
                Ok(Some(outcome @ JobOutcome::Released { .. })) => {
                    report.outcomes.push(outcome);
                    break;
                }
                Ok(Some(outcome)) => report.outcomes.push(outcome),
                Ok(None) => break,
                Err(e) if e.is_transient() => {
                    warn!("存储不可用，跳过本次派发: {e}");
                    report.skipped = true;
                    break;
                }
                Err(e) => {
                    error!("派发作业失败: {e}");
                    report.skipped = true;
                    break;
                }
            }
        }

        if !report.outcomes.is_empty() {
            debug!(
                "派发完成: 成功 {}, 失败 {}",
                report.completed(),
                report.failed()
            );
        }
        report
    }

    /// 认领并执行最多一个到期作业
    pub async fn run_once(&self, now: DateTime<Utc>) -> TaskWorkerResult<Option<JobOutcome>> {
        let Some(job) = self.store.claim_next(now).await? else {
            return Ok(None);
        };

        // 认领与执行之间时钟可能回拨，复查一次
        if job.scheduled_date > self.clock.now() {
            warn!(
                "{} 尚未到期 (计划时间 {})，放回待执行",
                job.entity_description(),
                job.scheduled_date
            );
            self.store.release(&job).await?;
            return Ok(Some(JobOutcome::Released { id: job.id }));
        }

        self.execute(job).await.map(Some)
    }

    /// 处理函数已执行但结果未写回，作业停留在 running，需要宿主用 requeue_stale 恢复
    fn log_stuck(job: &ScheduledJob, e: &TaskWorkerError) {
        error!(job_id = job.id, task = %job.task_name, "作业结果写回失败，仍处于执行中: {e}");
    }

    async fn execute(&self, job: ScheduledJob) -> TaskWorkerResult<JobOutcome> {
        let span = tracing::info_span!("dispatch", job_id = job.id, task = %job.task_name);
        debug!("执行 {}", job.entity_description());
        match self
            .registry
            .invoke(&job.task_name, job.payload.clone())
            .instrument(span)
            .await
        {
            Ok(result) => {
                self.store
                    .complete(&job, &result)
                    .await
                    .inspect_err(|e| Self::log_stuck(&job, e))?;
                info!(job_id = job.id, task = %job.task_name, "作业执行成功");
                Ok(JobOutcome::Completed { id: job.id })
            }
            Err(e) => {
                let message = e.to_string();
                self.store
                    .pushback(&job, &message)
                    .await
                    .inspect_err(|e| Self::log_stuck(&job, e))?;
                warn!(job_id = job.id, task = %job.task_name, "作业执行失败: {message}");
                Ok(JobOutcome::Failed {
                    id: job.id,
                    message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskworker_core::{FnHandler, JobStatus, TaskSignature};
    use taskworker_testing_utils::{epoch, ManualClock, MockJobStore, ScheduledJobBuilder};

    fn registry() -> Arc<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        registry
            .register(
                "mail.send_email",
                FnHandler::arc(TaskSignature::new(["to", "subject"]), |p| async move {
                    Ok(json!({ "sent_to": p["to"] }))
                }),
            )
            .unwrap();
        registry
            .register(
                "mail.broken",
                FnHandler::arc(TaskSignature::empty(), |_| async move {
                    Err(anyhow::anyhow!("smtp down"))
                }),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn dispatcher(store: &MockJobStore, clock: &ManualClock) -> Dispatcher {
        Dispatcher::new(Arc::new(store.clone()), registry(), Arc::new(clock.clone()))
    }

    fn due_job(task: &str, p: serde_json::Value) -> ScheduledJob {
        ScheduledJobBuilder::new()
            .with_task_name(task)
            .with_payload(p)
            .scheduled_at(epoch())
            .build()
    }

    #[tokio::test]
    async fn test_one_job_per_tick_by_default() {
        let store = MockJobStore::new();
        let clock = ManualClock::default();
        for _ in 0..3 {
            store.insert(due_job("mail.send_email", json!({"to": "a@x.com", "subject": "hi"})));
        }

        let dispatcher = dispatcher(&store, &clock);
        let report = dispatcher.tick().await;
        assert_eq!(report.completed(), 1);
        assert_eq!(store.count_with_status(JobStatus::Pending), 2);
    }

    #[tokio::test]
    async fn test_drain_mode_bounded_by_max_jobs() {
        let store = MockJobStore::new();
        let clock = ManualClock::default();
        for _ in 0..5 {
            store.insert(due_job("mail.send_email", json!({"to": "a@x.com", "subject": "hi"})));
        }
        let config = WorkerConfig {
            dispatch_mode: DispatchMode::Drain,
            max_jobs_per_tick: 3,
            ..WorkerConfig::default()
        };

        let dispatcher = dispatcher(&store, &clock).with_config(&config);
        assert_eq!(dispatcher.tick().await.completed(), 3);
        assert_eq!(dispatcher.tick().await.completed(), 2);
        assert!(dispatcher.tick().await.is_idle());
    }

    #[tokio::test]
    async fn test_handler_error_becomes_pushback() {
        let store = MockJobStore::new();
        let clock = ManualClock::default();
        let id = store.insert(due_job("mail.broken", json!({})));

        let report = dispatcher(&store, &clock).tick().await;
        assert_eq!(
            report.outcomes,
            vec![JobOutcome::Failed {
                id,
                message: "smtp down".to_string()
            }]
        );
        let job = store.job(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.fail_message.as_deref(), Some("smtp down"));
    }

    #[tokio::test]
    async fn test_unknown_task_and_bad_payload_are_pushed_back() {
        let store = MockJobStore::new();
        let clock = ManualClock::default();
        let unknown = store.insert(due_job("mail.missing", json!({})));
        let bad = store.insert(due_job("mail.send_email", json!({"to": "a@x.com"})));

        let dispatcher = dispatcher(&store, &clock);
        dispatcher.tick().await;
        dispatcher.tick().await;

        let unknown = store.job(unknown).unwrap();
        assert_eq!(unknown.status, JobStatus::Failed);
        assert!(unknown.fail_message.unwrap().contains("mail.missing"));
        let bad = store.job(bad).unwrap();
        assert_eq!(bad.status, JobStatus::Failed);
        assert!(bad.fail_message.unwrap().contains("subject"));
    }

    #[tokio::test]
    async fn test_storage_outage_skips_tick() {
        let store = MockJobStore::new();
        let clock = ManualClock::default();
        let id = store.insert(due_job("mail.send_email", json!({"to": "a@x.com", "subject": "hi"})));
        store.fail_next(1);

        let dispatcher = dispatcher(&store, &clock);
        let report = dispatcher.tick().await;
        assert!(report.skipped);
        assert_eq!(store.job(id).unwrap().status, JobStatus::Pending);

        assert_eq!(dispatcher.tick().await.completed(), 1);
    }

    #[tokio::test]
    async fn test_future_job_released_after_clock_moves_back() {
        let store = MockJobStore::new();
        let clock = ManualClock::default();
        let id = store.insert(
            ScheduledJobBuilder::new()
                .with_task_name("mail.send_email")
                .scheduled_at(epoch() + chrono::Duration::seconds(10))
                .build(),
        );

        // 以未来时间认领，复查时时钟仍停在 epoch
        let outcome = dispatcher(&store, &clock)
            .run_once(epoch() + chrono::Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(outcome, Some(JobOutcome::Released { id }));
        assert_eq!(store.job(id).unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_empty_store_is_idle() {
        let store = MockJobStore::new();
        let clock = ManualClock::default();
        let report = dispatcher(&store, &clock).tick().await;
        assert!(report.is_idle());
        assert_eq!(store.claim_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_back_leaves_job_running_until_requeued() {
        let store = MockJobStore::new();
        let clock = ManualClock::default();
        let mut registry = TaskRegistry::new();
        let outage = store.clone();
        registry
            .register(
                "report.flaky_store",
                FnHandler::arc(TaskSignature::empty(), move |_| {
                    let outage = outage.clone();
                    async move {
                        outage.fail_next(1);
                        Ok(json!(null))
                    }
                }),
            )
            .unwrap();
        let dispatcher = Dispatcher::new(
            Arc::new(store.clone()),
            Arc::new(registry),
            Arc::new(clock.clone()),
        );
        let id = store.insert(due_job("report.flaky_store", json!({})));

        let err = dispatcher.run_once(epoch()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.job(id).unwrap().status, JobStatus::Running);
        assert!(dispatcher.run_once(epoch()).await.unwrap().is_none());

        let cutoff = epoch() + chrono::Duration::milliseconds(1);
        assert_eq!(store.requeue_stale(cutoff).await.unwrap(), 1);
        assert_eq!(store.job(id).unwrap().status, JobStatus::Pending);
        assert_eq!(
            dispatcher.run_once(epoch()).await.unwrap(),
            Some(JobOutcome::Completed { id })
        );
    }
}
