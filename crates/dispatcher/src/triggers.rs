//! cron/date 触发器登记表
//!
//! 登记在启动阶段完成，每条记录在注册时就编译/校验，
//! 调度器启动时一次性读取，此后只读。

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Offset, TimeZone, Utc};
use taskworker_core::TaskHandler;
use taskworker_errors::{TaskWorkerError, TaskWorkerResult};

use crate::cron_utils::{parse_timezone, CronScheduler};

/// 日历字段触发器，字段语法为 cron 语法（`*`、`*/5`、`1-5`、`mon,wed`）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CronTrigger {
    pub year: Option<String>,
    pub month: Option<String>,
    pub day: Option<String>,
    pub week: Option<String>,
    /// 周一为0，也接受 `mon`..`sun`
    pub day_of_week: Option<String>,
    pub hour: Option<String>,
    pub minute: Option<String>,
    pub second: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    /// 每次触发随机延迟 0..=jitter 秒
    pub jitter: Option<u64>,
}

macro_rules! cron_field_setters {
    ($($field:ident),*) => {
        $(
            pub fn $field(mut self, value: impl ToString) -> Self {
                self.$field = Some(value.to_string());
                self
            }
        )*
    };
}

impl CronTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    cron_field_setters!(year, month, day, week, day_of_week, hour, minute, second);

    pub fn start_date(mut self, at: DateTime<Utc>) -> Self {
        self.start_date = Some(at);
        self
    }

    pub fn end_date(mut self, at: DateTime<Utc>) -> Self {
        self.end_date = Some(at);
        self
    }

    pub fn timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    pub fn jitter(mut self, seconds: u64) -> Self {
        self.jitter = Some(seconds);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
enum RunDate {
    Absolute(DateTime<Utc>),
    /// 不带时区的本地时间，按 `timezone` 解释
    Local(NaiveDateTime),
}

/// 一次性触发器
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DateTrigger {
    run_date: Option<RunDate>,
    timezone: Option<String>,
}

impl DateTrigger {
    /// 未指定时间：调度器启动后立即执行一次
    pub fn now() -> Self {
        Self::default()
    }

    pub fn at(run_date: DateTime<Utc>) -> Self {
        Self {
            run_date: Some(RunDate::Absolute(run_date)),
            timezone: None,
        }
    }

    pub fn local(run_date: NaiveDateTime) -> Self {
        Self {
            run_date: Some(RunDate::Local(run_date)),
            timezone: None,
        }
    }

    pub fn timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    /// 换算成UTC触发时间
    pub fn resolve(&self, now: DateTime<Utc>) -> TaskWorkerResult<DateTime<Utc>> {
        let offset = match self.timezone.as_deref() {
            Some(tz) => Some(parse_timezone("date", tz)?),
            None => None,
        };

        match &self.run_date {
            None => Ok(now),
            Some(RunDate::Absolute(at)) => Ok(*at),
            Some(RunDate::Local(naive)) => {
                let offset = offset.unwrap_or_else(|| Utc.fix());
                offset
                    .from_local_datetime(naive)
                    .single()
                    .map(|at| at.with_timezone(&Utc))
                    .ok_or_else(|| {
                        TaskWorkerError::invalid_trigger("date", format!("无法解析本地时间: {naive}"))
                    })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum TriggerKind {
    Cron(CronScheduler),
    Date(DateTime<Utc>),
}

impl TriggerKind {
    pub fn label(&self) -> &'static str {
        match self {
            TriggerKind::Cron(_) => "cron",
            TriggerKind::Date(_) => "date",
        }
    }
}

#[derive(Clone)]
pub struct TriggerRegistration {
    pub task_name: String,
    pub handler: Arc<dyn TaskHandler>,
    pub kind: TriggerKind,
}

#[derive(Clone, Default)]
pub struct TriggerTable {
    entries: Vec<TriggerRegistration>,
}

impl TriggerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// cron/date 处理函数不接受参数
    fn check_zero_argument(kind: &str, task_name: &str, handler: &dyn TaskHandler) -> TaskWorkerResult<()> {
        if handler.signature().is_empty() {
            Ok(())
        } else {
            Err(TaskWorkerError::invalid_trigger(
                kind,
                format!("任务 {task_name} 的处理函数必须是无参数的"),
            ))
        }
    }

    pub fn add_cron(
        &mut self,
        task_name: &str,
        trigger: &CronTrigger,
        handler: Arc<dyn TaskHandler>,
    ) -> TaskWorkerResult<()> {
        Self::check_zero_argument("cron", task_name, handler.as_ref())?;
        let scheduler = CronScheduler::from_trigger(trigger)?;
        self.entries.push(TriggerRegistration {
            task_name: task_name.to_string(),
            handler,
            kind: TriggerKind::Cron(scheduler),
        });
        Ok(())
    }

    pub fn add_date(
        &mut self,
        task_name: &str,
        trigger: &DateTrigger,
        handler: Arc<dyn TaskHandler>,
        now: DateTime<Utc>,
    ) -> TaskWorkerResult<()> {
        Self::check_zero_argument("date", task_name, handler.as_ref())?;
        let run_date = trigger.resolve(now)?;
        self.entries.push(TriggerRegistration {
            task_name: task_name.to_string(),
            handler,
            kind: TriggerKind::Date(run_date),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TriggerRegistration> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<TriggerRegistration> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use taskworker_core::{FnHandler, Payload, TaskSignature};

    fn noop() -> Arc<dyn TaskHandler> {
        FnHandler::arc(TaskSignature::empty(), |_p: Payload| async { Ok(json!(null)) })
    }

    #[test]
    fn test_date_trigger_resolution() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(DateTrigger::now().resolve(now).unwrap(), now);

        let at = Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap();
        assert_eq!(DateTrigger::at(at).resolve(now).unwrap(), at);

        let naive = NaiveDate::from_ymd_opt(2024, 2, 1)
            .unwrap()
            .and_hms_opt(16, 0, 0)
            .unwrap();
        let resolved = DateTrigger::local(naive)
            .timezone("+08:00")
            .resolve(now)
            .unwrap();
        assert_eq!(resolved, at);

        assert!(DateTrigger::local(naive).timezone("Mars/Olympus").resolve(now).is_err());
    }

    #[test]
    fn test_invalid_cron_fails_at_registration() {
        let mut table = TriggerTable::new();
        let err = table
            .add_cron("ops.bad", &CronTrigger::new().second("61"), noop())
            .unwrap_err();
        assert!(matches!(err, TaskWorkerError::InvalidTrigger { .. }));
        assert!(table.is_empty());
    }

    #[test]
    fn test_handler_with_parameters_rejected() {
        let mut table = TriggerTable::new();
        let handler = FnHandler::arc(TaskSignature::new(["to"]), |_p: Payload| async {
            Ok(json!(null))
        });
        let err = table
            .add_cron("mail.digest", &CronTrigger::new().hour("8"), handler)
            .unwrap_err();
        assert!(matches!(err, TaskWorkerError::InvalidTrigger { .. }));
    }

    #[test]
    fn test_same_handler_stacked_on_several_triggers() {
        let mut table = TriggerTable::new();
        let handler = noop();
        let now = Utc::now();
        table
            .add_cron("ops.report", &CronTrigger::new().hour("8"), handler.clone())
            .unwrap();
        table
            .add_date("ops.report", &DateTrigger::now(), handler, now)
            .unwrap();

        let kinds: Vec<&str> = table.iter().map(|entry| entry.kind.label()).collect();
        assert_eq!(kinds, vec!["cron", "date"]);
    }
}
