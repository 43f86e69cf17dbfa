use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use taskworker_core::{
    DatabaseConfig, ExecutionAudit, JobStatus, JobStore, NewExecutionAudit, Payload, ScheduledJob,
};
use taskworker_errors::{TaskWorkerError, TaskWorkerResult};
use tracing::{debug, info, instrument};

use crate::database::{MappingHelpers, AUDIT_COLUMNS, JOB_COLUMNS};
use crate::error_handling::{mask_database_url, RepositoryErrorHelpers, RepositoryOperation};
use crate::job_context;

/// 嵌入式（SQLite文件）作业存储
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 打开（必要时创建）数据库文件，`:memory:` 使用单连接内存库
    pub async fn connect(path: &str, config: &DatabaseConfig) -> TaskWorkerResult<Self> {
        let in_memory = path == ":memory:";
        let connect_options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };

        let connect_options = connect_options
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Off)
            .busy_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .pragma("journal_size_limit", config.journal_size_limit.to_string())
            .pragma("cache_size", format!("-{}", config.cache_size_kib));

        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));
        pool_options = if in_memory {
            // 每个连接都是独立的内存库，只能保留一个常驻连接
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
        };

        let context = job_context!(RepositoryOperation::Connect)
            .with_additional_info(format!("SQLite: {}", mask_database_url(path)));
        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        RepositoryErrorHelpers::log_operation_success(&context, None);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_job(row: &SqliteRow) -> TaskWorkerResult<ScheduledJob> {
        let status: String = row.try_get("status")?;
        Ok(ScheduledJob {
            id: row.try_get("id")?,
            task_name: row.try_get("task_name")?,
            payload: MappingHelpers::parse_payload_sqlite(row, "payload")?,
            scheduled_date: MappingHelpers::from_millis(row.try_get("scheduled_at")?)?,
            status: MappingHelpers::parse_status(&status)?,
            result: MappingHelpers::parse_json_sqlite(row, "result")?,
            fail_message: row.try_get("fail_message")?,
            created_at: MappingHelpers::from_millis(row.try_get("created_at")?)?,
            claimed_at: MappingHelpers::from_millis_opt(row.try_get("claimed_at")?)?,
            finished_at: MappingHelpers::from_millis_opt(row.try_get("finished_at")?)?,
        })
    }

    fn row_to_audit(row: &SqliteRow) -> TaskWorkerResult<ExecutionAudit> {
        Ok(ExecutionAudit {
            id: row.try_get("id")?,
            task_name: row.try_get("task_name")?,
            started_at: MappingHelpers::from_millis(row.try_get("started_at")?)?,
            finished_at: MappingHelpers::from_millis(row.try_get("finished_at")?)?,
            output: MappingHelpers::parse_json_sqlite(row, "output")?,
            fail_message: row.try_get("fail_message")?,
        })
    }

    /// 把 `running` 作业转入终态
    async fn finish(
        &self,
        job: &ScheduledJob,
        status: JobStatus,
        result: Option<String>,
        fail_message: Option<&str>,
    ) -> TaskWorkerResult<()> {
        let context = job_context!(
            RepositoryOperation::Update,
            job_id = job.id,
            task_name = job.task_name
        )
        .with_additional_info(format!("状态: {status}"));

        let updated = sqlx::query(
            r#"
            UPDATE scheduled_job
            SET status = ?1, result = ?2, fail_message = ?3, finished_at = ?4
            WHERE id = ?5 AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(result)
        .bind(fail_message)
        .bind(MappingHelpers::to_millis(Utc::now()))
        .bind(job.id)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        if updated.rows_affected() == 0 {
            return Err(self.not_in_flight(job.id).await);
        }

        RepositoryErrorHelpers::log_operation_success(&context, None);
        Ok(())
    }

    /// 状态迁移影响0行时，区分作业不存在与状态不对
    async fn not_in_flight(&self, id: i64) -> TaskWorkerError {
        match self.get_job(id).await {
            Ok(Some(current)) => TaskWorkerError::job_not_in_flight(id, current.status.as_str()),
            Ok(None) => TaskWorkerError::JobNotFound { id },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create_tables(&self) -> TaskWorkerResult<()> {
        debug!("创建SQLite作业表");
        let context = job_context!(RepositoryOperation::Migrate);

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_job (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                scheduled_at INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                result TEXT,
                fail_message TEXT,
                created_at INTEGER NOT NULL,
                claimed_at INTEGER,
                finished_at INTEGER
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS execution_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_name TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                finished_at INTEGER NOT NULL,
                output TEXT,
                fail_message TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_scheduled_job_claim ON scheduled_job(status, scheduled_at, id)",
            "CREATE INDEX IF NOT EXISTS idx_execution_audit_task ON execution_audit(task_name, started_at)",
        ];

        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;
        }

        info!("SQLite作业表已就绪");
        Ok(())
    }

    #[instrument(skip(self, payload), fields(task_name = %task_name, scheduled_date = %scheduled_date))]
    async fn apply(
        &self,
        task_name: &str,
        payload: &Payload,
        scheduled_date: DateTime<Utc>,
    ) -> TaskWorkerResult<i64> {
        let context = job_context!(RepositoryOperation::Create, task_name = task_name);
        let payload_json = serde_json::to_string(payload)
            .map_err(|e| RepositoryErrorHelpers::serialization_error(&context, e))?;

        let row = sqlx::query(
            r#"
            INSERT INTO scheduled_job (task_name, payload, scheduled_at, status, created_at)
            VALUES (?1, ?2, ?3, 'pending', ?4)
            RETURNING id
            "#,
        )
        .bind(task_name)
        .bind(payload_json)
        .bind(MappingHelpers::to_millis(scheduled_date))
        .bind(MappingHelpers::to_millis(Utc::now()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        let id: i64 = row.try_get("id")?;
        RepositoryErrorHelpers::log_operation_success(&context.with_job_id(id), None);
        Ok(id)
    }

    #[instrument(skip(self), fields(now = %now))]
    async fn claim_next(&self, now: DateTime<Utc>) -> TaskWorkerResult<Option<ScheduledJob>> {
        let context = job_context!(RepositoryOperation::Claim);
        let now_ms = MappingHelpers::to_millis(now);

        // 单条语句完成选取与状态迁移，写锁保证并发认领互斥
        let sql = format!(
            r#"
            UPDATE scheduled_job
            SET status = 'running', claimed_at = ?1
            WHERE id = (
                SELECT id FROM scheduled_job
                WHERE status = 'pending' AND scheduled_at <= ?1
                ORDER BY scheduled_at, id
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(now_ms)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::job_database_error(context, e))?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self, job, result), fields(job_id = job.id))]
    async fn complete(&self, job: &ScheduledJob, result: &Value) -> TaskWorkerResult<()> {
        let result_json = serde_json::to_string(result)?;
        self.finish(job, JobStatus::Completed, Some(result_json), None)
            .await
    }

    #[instrument(skip(self, job), fields(job_id = job.id))]
    async fn pushback(&self, job: &ScheduledJob, fail_message: &str) -> TaskWorkerResult<()> {
        self.finish(job, JobStatus::Failed, None, Some(fail_message))
            .await
    }

    #[instrument(skip(self, job), fields(job_id = job.id))]
    async fn release(&self, job: &ScheduledJob) -> TaskWorkerResult<()> {
        let context = job_context!(
            RepositoryOperation::Update,
            job_id = job.id,
            task_name = job.task_name
        )
        .with_additional_info("放回待执行队列".to_string());

        let updated = sqlx::query(
            "UPDATE scheduled_job SET status = 'pending', claimed_at = NULL \
             WHERE id = ?1 AND status = 'running'",
        )
        .bind(job.id)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        if updated.rows_affected() == 0 {
            return Err(self.not_in_flight(job.id).await);
        }

        RepositoryErrorHelpers::log_operation_success(&context, None);
        Ok(())
    }

    async fn get_job(&self, id: i64) -> TaskWorkerResult<Option<ScheduledJob>> {
        let context = job_context!(RepositoryOperation::Read, job_id = id);
        let sql = format!("SELECT {JOB_COLUMNS} FROM scheduled_job WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::job_database_error(context, e))?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn list_jobs(&self, status: JobStatus, limit: i64) -> TaskWorkerResult<Vec<ScheduledJob>> {
        let context = job_context!(RepositoryOperation::Query)
            .with_additional_info(format!("状态: {status}"));
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_job WHERE status = ?1 \
             ORDER BY scheduled_at, id LIMIT ?2"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::job_database_error(context, e))?;

        rows.iter().map(Self::row_to_job).collect()
    }

    #[instrument(skip(self), fields(job_id = id, scheduled_date = %scheduled_date))]
    async fn resubmit(&self, id: i64, scheduled_date: DateTime<Utc>) -> TaskWorkerResult<()> {
        let context = job_context!(RepositoryOperation::Update, job_id = id)
            .with_additional_info("重新提交".to_string());
        let updated = sqlx::query(
            r#"
            UPDATE scheduled_job
            SET status = 'pending', scheduled_at = ?1, result = NULL, fail_message = NULL,
                claimed_at = NULL, finished_at = NULL
            WHERE id = ?2 AND status = 'failed'
            "#,
        )
        .bind(MappingHelpers::to_millis(scheduled_date))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        if updated.rows_affected() == 0 {
            return match self.get_job(id).await? {
                Some(current) => Err(TaskWorkerError::JobNotFailed {
                    id,
                    status: current.status.to_string(),
                }),
                None => Err(TaskWorkerError::JobNotFound { id }),
            };
        }

        RepositoryErrorHelpers::log_operation_success(&context, None);
        Ok(())
    }

    #[instrument(skip(self, audit), fields(task_name = %audit.task_name))]
    async fn record_execution(&self, audit: &NewExecutionAudit) -> TaskWorkerResult<ExecutionAudit> {
        let context = job_context!(RepositoryOperation::Create, task_name = audit.task_name)
            .with_additional_info("执行审计".to_string());
        let output = audit
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let row = sqlx::query(
            r#"
            INSERT INTO execution_audit (task_name, started_at, finished_at, output, fail_message)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING id
            "#,
        )
        .bind(&audit.task_name)
        .bind(MappingHelpers::to_millis(audit.started_at))
        .bind(MappingHelpers::to_millis(audit.finished_at))
        .bind(output)
        .bind(&audit.fail_message)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::job_database_error(context, e))?;

        Ok(audit.clone().into_audit(row.try_get("id")?))
    }

    async fn list_executions(
        &self,
        task_name: Option<&str>,
        limit: i64,
    ) -> TaskWorkerResult<Vec<ExecutionAudit>> {
        let context = job_context!(RepositoryOperation::Query)
            .with_additional_info("执行审计".to_string());
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM execution_audit \
             WHERE (?1 IS NULL OR task_name = ?1) \
             ORDER BY started_at DESC, id DESC LIMIT ?2"
        );
        let rows = sqlx::query(&sql)
            .bind(task_name)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::job_database_error(context, e))?;

        rows.iter().map(Self::row_to_audit).collect()
    }

    #[instrument(skip(self), fields(claimed_before = %claimed_before))]
    async fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> TaskWorkerResult<u64> {
        let context = job_context!(RepositoryOperation::Update)
            .with_additional_info(format!("放回 {claimed_before} 之前认领的执行中作业"));
        let updated = sqlx::query(
            "UPDATE scheduled_job SET status = 'pending', claimed_at = NULL \
             WHERE status = 'running' AND claimed_at < ?1",
        )
        .bind(MappingHelpers::to_millis(claimed_before))
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        let count = updated.rows_affected();
        RepositoryErrorHelpers::log_operation_success(&context, Some(&format!("放回 {count} 条")));
        Ok(count)
    }

    async fn prune_finished(&self, before: DateTime<Utc>) -> TaskWorkerResult<u64> {
        let context = job_context!(RepositoryOperation::Delete)
            .with_additional_info(format!("清理 {before} 之前完结的作业"));
        let deleted = sqlx::query(
            "DELETE FROM scheduled_job \
             WHERE status IN ('completed', 'failed') AND finished_at < ?1",
        )
        .bind(MappingHelpers::to_millis(before))
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        let count = deleted.rows_affected();
        RepositoryErrorHelpers::log_operation_success(&context, Some(&format!("删除 {count} 条")));
        Ok(count)
    }

    async fn health_check(&self) -> TaskWorkerResult<()> {
        let context = job_context!(RepositoryOperation::Query)
            .with_additional_info("健康检查".to_string());
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::job_database_error(context, e))?;
        Ok(())
    }
}
