//! `TaskWorker`：把任务注册表、触发器登记表和作业存储组装到调度引擎上
//!
//! 生命周期分两阶段：
//! 1. 启动前注册：`register_task` / `define_cron_task` / `define_date_task`
//! 2. `start` / `run_until` / `run_forever`：建表、登记间隔派发与 cron/date 作业，
//!    之后交给引擎循环，注册表与登记表从此只读

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use taskworker_core::{
    AppConfig, Clock, JobStore, NewExecutionAudit, Payload, SystemClock, TaskHandler,
};
use taskworker_errors::{TaskWorkerError, TaskWorkerResult};
use taskworker_infrastructure::DatabaseManager;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

use crate::dispatcher::Dispatcher;
use crate::engine::{EngineJob, JobAction, SchedulingEngine, TokioEngine, Trigger};
use crate::registry::{call_handler, TaskRegistry};
use crate::triggers::{CronTrigger, DateTrigger, TriggerKind, TriggerTable};

const DISPATCH_JOB_NAME: &str = "taskworker.dispatch";

/// 已注册任务的句柄，用于提交延迟作业
#[derive(Clone)]
pub struct TaskHandle {
    name: String,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 提交立即可执行的作业，返回作业ID
    pub async fn apply(&self, payload: Payload) -> TaskWorkerResult<i64> {
        self.apply_at(payload, self.clock.now()).await
    }

    pub async fn apply_at(&self, payload: Payload, when: DateTime<Utc>) -> TaskWorkerResult<i64> {
        let id = self.store.apply(&self.name, &payload, when).await?;
        info!(job_id = id, task = %self.name, scheduled_date = %when, "提交延迟作业");
        Ok(id)
    }
}

pub struct TaskWorker {
    config: AppConfig,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    registry: TaskRegistry,
    triggers: TriggerTable,
}

impl TaskWorker {
    /// 校验配置并连接作业存储
    ///
    /// 没有数据库地址时返回 `MissingDatabaseUri`，不会尝试连接或建表。
    pub async fn init(config: AppConfig) -> TaskWorkerResult<Self> {
        config.validate()?;
        config.database.url()?;

        let manager = DatabaseManager::connect(&config.database).await?;
        info!(driver = %manager.driver(), "任务调度器初始化完成");
        Ok(Self::with_store(config, manager.job_store()))
    }

    pub fn with_store(config: AppConfig, store: Arc<dyn JobStore>) -> Self {
        Self {
            config,
            store,
            clock: Arc::new(SystemClock),
            registry: TaskRegistry::new(),
            triggers: TriggerTable::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn triggers(&self) -> &TriggerTable {
        &self.triggers
    }

    pub fn register_task(
        &mut self,
        name: &str,
        handler: Arc<dyn TaskHandler>,
    ) -> TaskWorkerResult<TaskHandle> {
        self.registry.register(name, handler)?;
        Ok(self.handle(name))
    }

    /// 已注册任务的句柄，未注册时返回 `UnknownTask`
    pub fn task(&self, name: &str) -> TaskWorkerResult<TaskHandle> {
        self.registry.resolve(name)?;
        Ok(self.handle(name))
    }

    fn handle(&self, name: &str) -> TaskHandle {
        TaskHandle {
            name: name.to_string(),
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }

    /// 登记 cron 触发，原样返回处理函数以便继续登记其他触发器
    pub fn define_cron_task(
        &mut self,
        name: &str,
        trigger: &CronTrigger,
        handler: Arc<dyn TaskHandler>,
    ) -> TaskWorkerResult<Arc<dyn TaskHandler>> {
        self.triggers.add_cron(name, trigger, Arc::clone(&handler))?;
        info!("登记cron任务: {name}");
        Ok(handler)
    }

    pub fn define_date_task(
        &mut self,
        name: &str,
        trigger: &DateTrigger,
        handler: Arc<dyn TaskHandler>,
    ) -> TaskWorkerResult<Arc<dyn TaskHandler>> {
        self.triggers
            .add_date(name, trigger, Arc::clone(&handler), self.clock.now())?;
        info!("登记date任务: {name}");
        Ok(handler)
    }

    /// 建表并把间隔派发与所有 cron/date 作业登记到引擎
    pub async fn install(self, engine: &mut dyn SchedulingEngine) -> TaskWorkerResult<()> {
        self.store.create_tables().await?;

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.store),
            Arc::new(self.registry),
            Arc::clone(&self.clock),
        )
        .with_config(&self.config.worker);

        engine.add_job(EngineJob {
            name: DISPATCH_JOB_NAME.to_string(),
            trigger: Trigger::Interval(self.config.worker.interval()),
            action: Arc::new(DispatchAction { dispatcher }),
        })?;

        for registration in self.triggers.into_entries() {
            let trigger = match registration.kind {
                TriggerKind::Cron(scheduler) => Trigger::Cron(scheduler),
                TriggerKind::Date(at) => Trigger::Date(at),
            };
            engine.add_job(EngineJob {
                name: registration.task_name.clone(),
                trigger,
                action: Arc::new(AuditedAction {
                    task_name: registration.task_name,
                    handler: registration.handler,
                    store: Arc::clone(&self.store),
                    clock: Arc::clone(&self.clock),
                }),
            })?;
        }

        Ok(())
    }

    async fn prepare(self) -> TaskWorkerResult<TokioEngine> {
        let mut engine = TokioEngine::new(Arc::clone(&self.clock));
        self.install(&mut engine).await?;
        Ok(engine)
    }

    /// 在当前 tokio 运行时后台运行，返回用于关闭的句柄
    pub async fn start(self) -> TaskWorkerResult<WorkerHandle> {
        let mut engine = self.prepare().await?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let join = tokio::spawn(async move { engine.start(shutdown_rx).await });
        info!("任务调度器已在后台启动");
        Ok(WorkerHandle { shutdown_tx, join })
    }

    /// 阻塞运行直到 `signal` 完成，正在执行的作业先完成再返回
    pub async fn run_until<F>(self, signal: F) -> TaskWorkerResult<()>
    where
        F: Future<Output = ()>,
    {
        let mut engine = self.prepare().await?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let running = engine.start(shutdown_rx);
        tokio::pin!(running);

        tokio::select! {
            result = &mut running => return result,
            _ = signal => {}
        }

        info!("收到停止信号，等待调度引擎退出");
        let _ = shutdown_tx.send(());
        running.await
    }

    pub async fn run_forever(self) -> TaskWorkerResult<()> {
        self.run_until(std::future::pending()).await
    }
}

/// 后台运行中的调度器
pub struct WorkerHandle {
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<TaskWorkerResult<()>>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn shutdown(self) -> TaskWorkerResult<()> {
        if self.shutdown_tx.send(()).is_err() {
            warn!("调度引擎已经退出");
        }
        self.join
            .await
            .map_err(|e| TaskWorkerError::Internal(format!("调度任务异常退出: {e}")))?
    }
}

/// 间隔触发：执行一次派发
struct DispatchAction {
    dispatcher: Dispatcher,
}

#[async_trait]
impl JobAction for DispatchAction {
    async fn run(&self, _fired_at: DateTime<Utc>) {
        self.dispatcher.tick().await;
    }
}

/// cron/date 触发：直接调用处理函数，无论成败都写一条审计记录
struct AuditedAction {
    task_name: String,
    handler: Arc<dyn TaskHandler>,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
}

impl AuditedAction {
    fn audit(&self, started_at: DateTime<Utc>, outcome: TaskWorkerResult<Value>) -> NewExecutionAudit {
        let finished_at = self.clock.now();
        match outcome {
            Ok(output) => NewExecutionAudit::succeeded(
                &self.task_name,
                started_at,
                finished_at,
                Some(output),
            ),
            Err(e) => {
                warn!(task = %self.task_name, "定时任务执行失败: {e}");
                NewExecutionAudit::failed(&self.task_name, started_at, finished_at, e.to_string())
            }
        }
    }
}

#[async_trait]
impl JobAction for AuditedAction {
    async fn run(&self, fired_at: DateTime<Utc>) {
        let started_at = self.clock.now();
        let span = tracing::info_span!("scheduled_task", task = %self.task_name, fired_at = %fired_at);
        let outcome = call_handler(&self.task_name, self.handler.as_ref(), Payload::new())
            .instrument(span)
            .await;

        let audit = self.audit(started_at, outcome);
        if let Err(e) = self.store.record_execution(&audit).await {
            error!(task = %self.task_name, "写入执行审计失败: {e}");
        }
    }
}
