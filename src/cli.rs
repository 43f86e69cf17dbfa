//! 运维命令行：直接操作配置好的作业存储
//!
//! 任务处理函数只存在于宿主进程中，这里只负责建表、提交、查看和恢复作业。

use std::io::Write;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use taskworker_core::{
    init_logging, AppConfig, ExecutionAudit, JobStatus, JobStore, LogFormat, Payload,
    ScheduledJob,
};
use taskworker_infrastructure::DatabaseManager;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "taskworker")]
#[command(version)]
#[command(about = "持久化任务调度器 - 作业存储管理工具")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// 配置文件路径，缺省时依次查找 config/taskworker.toml 与 taskworker.toml
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// 数据库地址，优先于配置文件和环境变量
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// 日志级别
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// 日志格式
    #[arg(long, global = true, value_parser = ["json", "pretty"])]
    pub log_format: Option<String>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// 创建作业表和审计表（已存在时不做任何事）
    InitDb,
    /// 提交一个延迟作业
    Apply {
        /// 任务名称
        task: String,
        /// 关键字参数 (JSON对象)
        #[arg(short, long, default_value = "{}")]
        payload: String,
        /// 计划执行时间 (RFC3339)
        #[arg(long, conflicts_with = "delay")]
        at: Option<DateTime<Utc>>,
        /// 延迟秒数
        #[arg(long)]
        delay: Option<i64>,
    },
    /// 按状态列出作业
    Jobs {
        #[arg(short, long, default_value = "pending")]
        status: JobStatus,
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },
    /// 查看作业详情
    Job { id: i64 },
    /// 把失败的作业重新放回待执行
    Resubmit {
        id: i64,
        /// 新的计划执行时间 (RFC3339)，默认立即
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// 列出 cron/date 任务的执行审计
    Audits {
        #[arg(short, long)]
        task: Option<String>,
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },
    /// 把认领后长时间未写回结果的执行中作业放回待执行
    RequeueStale {
        #[arg(long, default_value = "30")]
        older_than_minutes: i64,
    },
    /// 删除早于指定天数的已完成/失败作业
    Prune {
        #[arg(long)]
        older_than_days: i64,
    },
}

impl Cli {
    /// 加载配置并应用命令行覆盖
    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load(self.config.as_deref()).context("加载配置失败")?;
        if let Some(url) = &self.database_url {
            config.database.url = Some(url.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = format.parse::<LogFormat>().map_err(anyhow::Error::msg)?;
        }
        Ok(config)
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;
    init_logging(&config.logging)?;

    let manager = DatabaseManager::connect(&config.database)
        .await
        .context("连接作业存储失败")?;
    info!(driver = %manager.driver(), "已连接作业存储");

    let store = manager.job_store();
    let mut stdout = std::io::stdout();
    execute(&cli.command, store.as_ref(), Utc::now(), &mut stdout).await
}

/// 对给定存储执行命令，输出写入 `out`
pub async fn execute<W: Write>(
    command: &Command,
    store: &dyn JobStore,
    now: DateTime<Utc>,
    out: &mut W,
) -> Result<()> {
    match command {
        Command::InitDb => {
            store.create_tables().await?;
            writeln!(out, "数据表已就绪")?;
        }
        Command::Apply {
            task,
            payload,
            at,
            delay,
        } => {
            let payload = parse_payload(payload)?;
            let scheduled_date = match (at, delay) {
                (Some(at), _) => *at,
                (None, Some(seconds)) => now + Duration::seconds(*seconds),
                (None, None) => now,
            };
            let id = store.apply(task, &payload, scheduled_date).await?;
            writeln!(out, "作业已提交: {id} (计划时间 {scheduled_date})")?;
        }
        Command::Jobs { status, limit } => {
            let jobs = store.list_jobs(*status, *limit).await?;
            print_jobs(out, &jobs)?;
        }
        Command::Job { id } => match store.get_job(*id).await? {
            Some(job) => print_job(out, &job)?,
            None => bail!("作业不存在: {id}"),
        },
        Command::Resubmit { id, at } => {
            let scheduled_date = at.unwrap_or(now);
            store.resubmit(*id, scheduled_date).await?;
            writeln!(out, "作业 {id} 已重新提交 (计划时间 {scheduled_date})")?;
        }
        Command::Audits { task, limit } => {
            let audits = store.list_executions(task.as_deref(), *limit).await?;
            print_audits(out, &audits)?;
        }
        Command::RequeueStale { older_than_minutes } => {
            if *older_than_minutes < 0 {
                bail!("older-than-minutes 不能为负数");
            }
            let requeued = store
                .requeue_stale(now - Duration::minutes(*older_than_minutes))
                .await?;
            writeln!(out, "已放回 {requeued} 个执行中作业")?;
        }
        Command::Prune { older_than_days } => {
            if *older_than_days < 0 {
                bail!("older-than-days 不能为负数");
            }
            let removed = store
                .prune_finished(now - Duration::days(*older_than_days))
                .await?;
            writeln!(out, "已清理 {removed} 个作业")?;
        }
    }
    Ok(())
}

fn parse_payload(raw: &str) -> Result<Payload> {
    match serde_json::from_str::<Value>(raw).context("payload 不是合法的JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("payload 必须是JSON对象: {other}"),
    }
}

fn print_jobs<W: Write>(out: &mut W, jobs: &[ScheduledJob]) -> Result<()> {
    if jobs.is_empty() {
        writeln!(out, "没有作业")?;
        return Ok(());
    }
    writeln!(
        out,
        "{:<8} {:<32} {:<10} {:<25}",
        "ID", "任务", "状态", "计划时间"
    )?;
    writeln!(out, "{}", "-".repeat(78))?;
    for job in jobs {
        writeln!(
            out,
            "{:<8} {:<32} {:<10} {:<25}",
            job.id,
            job.task_name,
            job.status,
            job.scheduled_date.to_rfc3339()
        )?;
    }
    Ok(())
}

fn print_job<W: Write>(out: &mut W, job: &ScheduledJob) -> Result<()> {
    writeln!(out, "作业详情:")?;
    writeln!(out, "  ID: {}", job.id)?;
    writeln!(out, "  任务: {}", job.task_name)?;
    writeln!(out, "  状态: {}", job.status)?;
    writeln!(out, "  参数: {}", Value::Object(job.payload.clone()))?;
    writeln!(out, "  计划时间: {}", job.scheduled_date.to_rfc3339())?;
    writeln!(out, "  创建时间: {}", job.created_at.to_rfc3339())?;
    if let Some(claimed_at) = job.claimed_at {
        writeln!(out, "  认领时间: {}", claimed_at.to_rfc3339())?;
    }
    if let Some(finished_at) = job.finished_at {
        writeln!(out, "  结束时间: {}", finished_at.to_rfc3339())?;
    }
    if let Some(result) = &job.result {
        writeln!(out, "  结果: {result}")?;
    }
    if let Some(message) = &job.fail_message {
        writeln!(out, "  失败原因: {message}")?;
    }
    Ok(())
}

fn print_audits<W: Write>(out: &mut W, audits: &[ExecutionAudit]) -> Result<()> {
    if audits.is_empty() {
        writeln!(out, "没有执行记录")?;
        return Ok(());
    }
    for audit in audits {
        let outcome = match &audit.fail_message {
            Some(message) => format!("失败: {message}"),
            None => "成功".to_string(),
        };
        writeln!(
            out,
            "#{:<6} {:<28} {} ({}ms) {}",
            audit.id,
            audit.task_name,
            audit.started_at.to_rfc3339(),
            audit.duration_ms(),
            outcome
        )?;
    }
    Ok(())
}
