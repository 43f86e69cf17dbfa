//! 调度引擎
//!
//! `SchedulingEngine` 是 `TaskWorker` 持有的触发能力：登记作业、在时间到达时执行。
//! `TokioEngine` 在单个任务中顺序执行所有到期作业，时间统一通过 `Clock` 读取，
//! 因此测试可以用手动时钟逐秒推进并调用 `fire_due`。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use taskworker_core::Clock;
use taskworker_errors::{TaskWorkerError, TaskWorkerResult};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cron_utils::CronScheduler;

/// 触发时执行的动作
#[async_trait]
pub trait JobAction: Send + Sync {
    async fn run(&self, fired_at: DateTime<Utc>);
}

#[derive(Debug, Clone)]
pub enum Trigger {
    Interval(Duration),
    Cron(CronScheduler),
    Date(DateTime<Utc>),
}

pub struct EngineJob {
    pub name: String,
    pub trigger: Trigger,
    pub action: Arc<dyn JobAction>,
}

#[async_trait]
pub trait SchedulingEngine: Send {
    fn add_job(&mut self, job: EngineJob) -> TaskWorkerResult<()>;

    /// 运行触发循环直到收到关闭信号，正在执行的动作会先完成
    async fn start(&mut self, shutdown: broadcast::Receiver<()>) -> TaskWorkerResult<()>;
}

struct Entry {
    job: EngineJob,
    /// 未加抖动的计划触发时间，cron 的下一次计算以它为基准
    base: DateTime<Utc>,
    next_fire: DateTime<Utc>,
}

pub struct TokioEngine {
    clock: Arc<dyn Clock>,
    entries: Vec<Entry>,
}

impl TokioEngine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Vec::new(),
        }
    }

    pub fn job_count(&self) -> usize {
        self.entries.len()
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|entry| entry.next_fire).min()
    }

    fn with_jitter(base: DateTime<Utc>, jitter: Option<u64>) -> DateTime<Utc> {
        match jitter {
            Some(max) if max > 0 => {
                let delay = rand::rng().random_range(0..=max);
                base + chrono::Duration::seconds(delay as i64)
            }
            _ => base,
        }
    }

    fn interval_step(period: Duration) -> TaskWorkerResult<chrono::Duration> {
        chrono::Duration::from_std(period)
            .ok()
            .filter(|step| *step > chrono::Duration::zero())
            .ok_or_else(|| TaskWorkerError::invalid_trigger("interval", "间隔必须大于0"))
    }

    /// 计算触发后的下一次时间，错过的多次触发合并为一次
    fn reschedule(entry: &Entry, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match &entry.job.trigger {
            Trigger::Interval(period) => {
                let step_ms = Self::interval_step(*period).ok()?.num_milliseconds().max(1);
                // 错过的周期合并：跳到严格晚于 now 的第一个周期点
                let elapsed_ms = (now - entry.base).num_milliseconds().max(0);
                let offset_ms = (elapsed_ms / step_ms).checked_add(1)?.checked_mul(step_ms)?;
                let next = entry
                    .base
                    .checked_add_signed(chrono::Duration::milliseconds(offset_ms))?;
                Some((next, next))
            }
            Trigger::Cron(scheduler) => {
                let base = scheduler.next_execution_time(now.max(entry.base))?;
                Some((base, Self::with_jitter(base, scheduler.jitter())))
            }
            Trigger::Date(_) => None,
        }
    }

    /// 顺序执行所有 `next_fire <= now` 的作业，返回执行次数
    pub async fn fire_due(&mut self, now: DateTime<Utc>) -> usize {
        let mut due: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.next_fire <= now)
            .map(|(index, _)| index)
            .collect();
        due.sort_by_key(|index| (self.entries[*index].next_fire, *index));

        let mut finished = Vec::new();
        for index in &due {
            let entry = &self.entries[*index];
            debug!(job = %entry.job.name, fire_time = %entry.next_fire, "触发作业");
            entry.job.action.run(now).await;

            let entry = &mut self.entries[*index];
            match Self::reschedule(entry, now) {
                Some((base, next_fire)) => {
                    entry.base = base;
                    entry.next_fire = next_fire;
                }
                None => finished.push(*index),
            }
        }

        finished.sort_unstable();
        for index in finished.into_iter().rev() {
            let entry = self.entries.remove(index);
            debug!(job = %entry.job.name, "作业不再触发，已移除");
        }

        due.len()
    }
}

#[async_trait]
impl SchedulingEngine for TokioEngine {
    fn add_job(&mut self, job: EngineJob) -> TaskWorkerResult<()> {
        let now = self.clock.now();
        let (base, next_fire) = match &job.trigger {
            Trigger::Interval(period) => {
                let first = now + Self::interval_step(*period)?;
                (first, first)
            }
            Trigger::Cron(scheduler) => match scheduler.next_execution_time(now) {
                Some(base) => (base, Self::with_jitter(base, scheduler.jitter())),
                None => {
                    warn!(job = %job.name, "cron触发器已没有后续触发时间，忽略");
                    return Ok(());
                }
            },
            // 过去的时间点不设宽限期，在下一次检查时执行一次
            Trigger::Date(at) => (*at, *at),
        };

        info!(job = %job.name, next_fire = %next_fire, "登记调度作业");
        self.entries.push(Entry {
            job,
            base,
            next_fire,
        });
        Ok(())
    }

    async fn start(&mut self, mut shutdown: broadcast::Receiver<()>) -> TaskWorkerResult<()> {
        info!("调度引擎启动，共 {} 个作业", self.entries.len());

        loop {
            let now = self.clock.now();
            self.fire_due(now).await;

            let sleep_for = match self.next_fire_time() {
                Some(next) => (next - self.clock.now()).to_std().unwrap_or(Duration::ZERO),
                None => {
                    debug!("没有待触发的作业，等待关闭信号");
                    Duration::MAX
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for.min(Duration::from_secs(3600))) => {}
                _ = shutdown.recv() => {
                    info!("调度引擎收到关闭信号");
                    break;
                }
            }
        }

        info!("调度引擎已停止");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use taskworker_testing_utils::{epoch, ManualClock};

    #[derive(Default)]
    struct Recorder {
        fires: Mutex<Vec<DateTime<Utc>>>,
        count: AtomicUsize,
    }

    #[async_trait]
    impl JobAction for Recorder {
        async fn run(&self, fired_at: DateTime<Utc>) {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.fires.lock().unwrap().push(fired_at);
        }
    }

    fn engine(clock: &ManualClock) -> TokioEngine {
        TokioEngine::new(Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_interval_fires_and_coalesces() {
        let clock = ManualClock::new(epoch());
        let mut engine = engine(&clock);
        let recorder = Arc::new(Recorder::default());
        engine
            .add_job(EngineJob {
                name: "tick".to_string(),
                trigger: Trigger::Interval(Duration::from_secs(5)),
                action: recorder.clone(),
            })
            .unwrap();

        assert_eq!(engine.fire_due(clock.advance_secs(4)).await, 0);
        assert_eq!(engine.fire_due(clock.advance_secs(1)).await, 1);

        // 跳过了3个周期，只补执行一次
        assert_eq!(engine.fire_due(clock.advance_secs(16)).await, 1);
        assert_eq!(recorder.count.load(Ordering::SeqCst), 2);
        assert_eq!(engine.next_fire_time(), Some(epoch() + chrono::Duration::seconds(25)));
    }

    #[tokio::test]
    async fn test_cron_every_five_seconds_over_twelve_seconds() {
        let clock = ManualClock::new(epoch());
        let mut engine = engine(&clock);
        let recorder = Arc::new(Recorder::default());
        let scheduler = CronScheduler::new("*/5 * * * * * *").unwrap();
        engine
            .add_job(EngineJob {
                name: "heartbeat".to_string(),
                trigger: Trigger::Cron(scheduler),
                action: recorder.clone(),
            })
            .unwrap();

        for _ in 0..12 {
            engine.fire_due(clock.advance_secs(1)).await;
        }

        let fires = recorder.fires.lock().unwrap().clone();
        assert_eq!(
            fires,
            vec![
                epoch() + chrono::Duration::seconds(5),
                epoch() + chrono::Duration::seconds(10)
            ]
        );
    }

    #[tokio::test]
    async fn test_date_fires_once_then_removed() {
        let clock = ManualClock::new(epoch());
        let mut engine = engine(&clock);
        let recorder = Arc::new(Recorder::default());
        engine
            .add_job(EngineJob {
                name: "once".to_string(),
                trigger: Trigger::Date(epoch() + chrono::Duration::seconds(3)),
                action: recorder.clone(),
            })
            .unwrap();

        engine.fire_due(clock.advance_secs(2)).await;
        assert_eq!(recorder.count.load(Ordering::SeqCst), 0);
        engine.fire_due(clock.advance_secs(1)).await;
        engine.fire_due(clock.advance_secs(10)).await;
        assert_eq!(recorder.count.load(Ordering::SeqCst), 1);
        assert_eq!(engine.job_count(), 0);
    }

    #[tokio::test]
    async fn test_interval_catch_up_after_long_stall() {
        let clock = ManualClock::new(epoch());
        let mut engine = engine(&clock);
        let recorder = Arc::new(Recorder::default());
        engine
            .add_job(EngineJob {
                name: "hot".to_string(),
                trigger: Trigger::Interval(Duration::from_millis(1)),
                action: recorder.clone(),
            })
            .unwrap();

        // 约260亿个错过的周期，超出 i32 范围
        let stalled = clock.advance(chrono::Duration::days(300));
        assert_eq!(engine.fire_due(stalled).await, 1);
        assert_eq!(
            engine.next_fire_time(),
            Some(stalled + chrono::Duration::milliseconds(1))
        );
        assert_eq!(engine.fire_due(stalled).await, 0);
    }

    #[tokio::test]
    async fn test_past_date_fires_on_first_check() {
        let clock = ManualClock::new(epoch());
        let mut engine = engine(&clock);
        let recorder = Arc::new(Recorder::default());
        engine
            .add_job(EngineJob {
                name: "late".to_string(),
                trigger: Trigger::Date(epoch() - chrono::Duration::hours(1)),
                action: recorder.clone(),
            })
            .unwrap();

        assert_eq!(engine.fire_due(epoch()).await, 1);
        assert_eq!(engine.job_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let clock = ManualClock::new(epoch());
        let mut engine = engine(&clock);
        let err = engine
            .add_job(EngineJob {
                name: "bad".to_string(),
                trigger: Trigger::Interval(Duration::ZERO),
                action: Arc::new(Recorder::default()),
            })
            .unwrap_err();
        assert!(matches!(err, TaskWorkerError::InvalidTrigger { .. }));
    }

    #[tokio::test]
    async fn test_start_stops_on_shutdown() {
        let clock: Arc<dyn Clock> = Arc::new(taskworker_core::SystemClock);
        let mut engine = TokioEngine::new(clock);
        let recorder = Arc::new(Recorder::default());
        engine
            .add_job(EngineJob {
                name: "fast".to_string(),
                trigger: Trigger::Interval(Duration::from_millis(10)),
                action: recorder.clone(),
            })
            .unwrap();

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { engine.start(rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert!(recorder.count.load(Ordering::SeqCst) >= 1);
    }
}
