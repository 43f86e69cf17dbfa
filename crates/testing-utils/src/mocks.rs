//! 内存版作业存储
//!
//! 状态迁移规则与SQL后端相同，另外可以注入“存储不可用”故障。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use taskworker_core::{
    ExecutionAudit, JobStatus, JobStore, NewExecutionAudit, Payload, ScheduledJob,
};
use taskworker_errors::{TaskWorkerError, TaskWorkerResult};

#[derive(Debug, Default)]
struct MockState {
    jobs: BTreeMap<i64, ScheduledJob>,
    audits: Vec<ExecutionAudit>,
    next_job_id: i64,
    next_audit_id: i64,
    tables_created: bool,
    unavailable_calls: u32,
    claim_calls: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MockJobStore {
    state: Arc<Mutex<MockState>>,
}

impl MockJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// 接下来 `calls` 次存储调用返回 `StorageUnavailable`
    pub fn fail_next(&self, calls: u32) {
        self.state().unavailable_calls = calls;
    }

    pub fn tables_created(&self) -> bool {
        self.state().tables_created
    }

    pub fn claim_calls(&self) -> u32 {
        self.state().claim_calls
    }

    pub fn jobs(&self) -> Vec<ScheduledJob> {
        self.state().jobs.values().cloned().collect()
    }

    pub fn job(&self, id: i64) -> Option<ScheduledJob> {
        self.state().jobs.get(&id).cloned()
    }

    pub fn audits(&self) -> Vec<ExecutionAudit> {
        self.state().audits.clone()
    }

    pub fn count_with_status(&self, status: JobStatus) -> usize {
        self.state()
            .jobs
            .values()
            .filter(|job| job.status == status)
            .count()
    }

    /// 直接写入一条任意状态的作业
    pub fn insert(&self, mut job: ScheduledJob) -> i64 {
        let mut state = self.state();
        state.next_job_id = state.next_job_id.max(job.id);
        if job.id == 0 {
            state.next_job_id += 1;
            job.id = state.next_job_id;
        }
        let id = job.id;
        state.jobs.insert(id, job);
        id
    }

    fn check_available(state: &mut MockState) -> TaskWorkerResult<()> {
        if state.unavailable_calls > 0 {
            state.unavailable_calls -= 1;
            return Err(TaskWorkerError::storage_unavailable("模拟的存储故障"));
        }
        Ok(())
    }

    fn finish(
        &self,
        job: &ScheduledJob,
        status: JobStatus,
        result: Option<Value>,
        fail_message: Option<String>,
    ) -> TaskWorkerResult<()> {
        let mut state = self.state();
        Self::check_available(&mut state)?;
        let stored = state
            .jobs
            .get_mut(&job.id)
            .ok_or(TaskWorkerError::JobNotFound { id: job.id })?;
        if stored.status != JobStatus::Running {
            return Err(TaskWorkerError::job_not_in_flight(
                job.id,
                stored.status.as_str(),
            ));
        }
        stored.status = status;
        stored.result = result;
        stored.fail_message = fail_message;
        stored.finished_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl JobStore for MockJobStore {
    async fn create_tables(&self) -> TaskWorkerResult<()> {
        let mut state = self.state();
        Self::check_available(&mut state)?;
        state.tables_created = true;
        Ok(())
    }

    async fn apply(
        &self,
        task_name: &str,
        payload: &Payload,
        scheduled_date: DateTime<Utc>,
    ) -> TaskWorkerResult<i64> {
        let mut state = self.state();
        Self::check_available(&mut state)?;
        state.next_job_id += 1;
        let mut job = ScheduledJob::new(task_name, payload.clone(), scheduled_date);
        job.id = state.next_job_id;
        state.jobs.insert(job.id, job);
        Ok(state.next_job_id)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> TaskWorkerResult<Option<ScheduledJob>> {
        let mut state = self.state();
        state.claim_calls += 1;
        Self::check_available(&mut state)?;

        let next = state
            .jobs
            .values()
            .filter(|job| job.is_claimable(now))
            .min_by_key(|job| (job.scheduled_date, job.id))
            .map(|job| job.id);

        Ok(next.and_then(|id| {
            let job = state.jobs.get_mut(&id)?;
            job.status = JobStatus::Running;
            job.claimed_at = Some(now);
            Some(job.clone())
        }))
    }

    async fn complete(&self, job: &ScheduledJob, result: &Value) -> TaskWorkerResult<()> {
        self.finish(job, JobStatus::Completed, Some(result.clone()), None)
    }

    async fn pushback(&self, job: &ScheduledJob, fail_message: &str) -> TaskWorkerResult<()> {
        self.finish(job, JobStatus::Failed, None, Some(fail_message.to_string()))
    }

    async fn release(&self, job: &ScheduledJob) -> TaskWorkerResult<()> {
        let mut state = self.state();
        Self::check_available(&mut state)?;
        let stored = state
            .jobs
            .get_mut(&job.id)
            .ok_or(TaskWorkerError::JobNotFound { id: job.id })?;
        if stored.status != JobStatus::Running {
            return Err(TaskWorkerError::job_not_in_flight(
                job.id,
                stored.status.as_str(),
            ));
        }
        stored.status = JobStatus::Pending;
        stored.claimed_at = None;
        Ok(())
    }

    async fn get_job(&self, id: i64) -> TaskWorkerResult<Option<ScheduledJob>> {
        let mut state = self.state();
        Self::check_available(&mut state)?;
        Ok(state.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, status: JobStatus, limit: i64) -> TaskWorkerResult<Vec<ScheduledJob>> {
        let mut state = self.state();
        Self::check_available(&mut state)?;
        let mut jobs: Vec<ScheduledJob> = state
            .jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.scheduled_date, job.id));
        jobs.truncate(usize::try_from(limit).unwrap_or_default());
        Ok(jobs)
    }

    async fn resubmit(&self, id: i64, scheduled_date: DateTime<Utc>) -> TaskWorkerResult<()> {
        let mut state = self.state();
        Self::check_available(&mut state)?;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(TaskWorkerError::JobNotFound { id })?;
        if job.status != JobStatus::Failed {
            return Err(TaskWorkerError::JobNotFailed {
                id,
                status: job.status.to_string(),
            });
        }
        job.status = JobStatus::Pending;
        job.scheduled_date = scheduled_date;
        job.result = None;
        job.fail_message = None;
        job.claimed_at = None;
        job.finished_at = None;
        Ok(())
    }

    async fn record_execution(&self, audit: &NewExecutionAudit) -> TaskWorkerResult<ExecutionAudit> {
        let mut state = self.state();
        Self::check_available(&mut state)?;
        state.next_audit_id += 1;
        let record = audit.clone().into_audit(state.next_audit_id);
        state.audits.push(record.clone());
        Ok(record)
    }

    async fn list_executions(
        &self,
        task_name: Option<&str>,
        limit: i64,
    ) -> TaskWorkerResult<Vec<ExecutionAudit>> {
        let mut state = self.state();
        Self::check_available(&mut state)?;
        let mut audits: Vec<ExecutionAudit> = state
            .audits
            .iter()
            .filter(|audit| task_name.map_or(true, |name| audit.task_name == name))
            .cloned()
            .collect();
        audits.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        audits.truncate(usize::try_from(limit).unwrap_or_default());
        Ok(audits)
    }

    async fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> TaskWorkerResult<u64> {
        let mut state = self.state();
        Self::check_available(&mut state)?;
        let mut count = 0;
        for job in state.jobs.values_mut() {
            if job.status == JobStatus::Running && job.claimed_at.is_some_and(|at| at < claimed_before) {
                job.status = JobStatus::Pending;
                job.claimed_at = None;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn prune_finished(&self, before: DateTime<Utc>) -> TaskWorkerResult<u64> {
        let mut state = self.state();
        Self::check_available(&mut state)?;
        let before_len = state.jobs.len();
        state.jobs.retain(|_, job| {
            !(job.is_finished() && job.finished_at.is_some_and(|at| at < before))
        });
        Ok((before_len - state.jobs.len()) as u64)
    }

    async fn health_check(&self) -> TaskWorkerResult<()> {
        let mut state = self.state();
        Self::check_available(&mut state)
    }
}
