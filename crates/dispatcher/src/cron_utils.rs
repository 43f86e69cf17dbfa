use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use cron::Schedule;
use std::str::FromStr;
use tracing::debug;

use taskworker_errors::{TaskWorkerError, TaskWorkerResult};

use crate::triggers::CronTrigger;

/// 周一为0的星期名称，cron 引擎使用名称避免数字约定差异
const WEEKDAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// CRON表达式解析和触发时间计算
#[derive(Debug, Clone)]
pub struct CronScheduler {
    schedule: Schedule,
    expression: String,
    offset: FixedOffset,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    jitter: Option<u64>,
}

impl CronScheduler {
    /// 由完整的 `秒 分 时 日 月 周 [年]` 表达式创建，按UTC计算
    pub fn new(cron_expr: &str) -> TaskWorkerResult<Self> {
        let schedule = Schedule::from_str(cron_expr)
            .map_err(|e| TaskWorkerError::invalid_trigger("cron", format!("{cron_expr}: {e}")))?;

        Ok(Self {
            schedule,
            expression: cron_expr.to_string(),
            offset: utc_offset(),
            start_date: None,
            end_date: None,
            jitter: None,
        })
    }

    /// 由字段集合创建，注册时即完成全部校验
    pub fn from_trigger(trigger: &CronTrigger) -> TaskWorkerResult<Self> {
        let expression = translate_fields(trigger)?;
        let offset = match trigger.timezone.as_deref() {
            Some(tz) => parse_timezone("cron", tz)?,
            None => utc_offset(),
        };
        if let (Some(start), Some(end)) = (trigger.start_date, trigger.end_date) {
            if end < start {
                return Err(TaskWorkerError::invalid_trigger(
                    "cron",
                    format!("end_date {end} 早于 start_date {start}"),
                ));
            }
        }

        debug!(expression = %expression, offset = %offset, "解析cron触发器");
        let mut scheduler = Self::new(&expression)?;
        scheduler.offset = offset;
        scheduler.start_date = trigger.start_date;
        scheduler.end_date = trigger.end_date;
        scheduler.jitter = trigger.jitter.filter(|j| *j > 0);
        Ok(scheduler)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn jitter(&self) -> Option<u64> {
        self.jitter
    }

    /// 严格晚于 `from` 的下一次触发时间，超出 `end_date` 时返回 None
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let search_from = match self.start_date {
            // start_date 本身也是合法触发点
            Some(start) if start > from => start - Duration::milliseconds(1),
            _ => from,
        };

        let next = self
            .schedule
            .after(&search_from.with_timezone(&self.offset))
            .next()?
            .with_timezone(&Utc);

        match self.end_date {
            Some(end) if next > end => None,
            _ => Some(next),
        }
    }

    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = from;
        while times.len() < count {
            match self.next_execution_time(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }

    pub fn validate_cron_expression(cron_expr: &str) -> TaskWorkerResult<()> {
        Self::new(cron_expr).map(|_| ())
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

/// 把字段集合翻译成 cron 表达式
///
/// 未给出的字段：比最低位的已给字段更高位的取 `*`，更低位的取最小值；
/// `day_of_week` 始终默认 `*`。全部未给出时每秒触发。
pub fn translate_fields(trigger: &CronTrigger) -> TaskWorkerResult<String> {
    if let Some(week) = trigger.week.as_deref() {
        if week.trim() != "*" {
            return Err(TaskWorkerError::invalid_trigger(
                "cron",
                format!("不支持按ISO周(week={week})调度"),
            ));
        }
    }

    // 从高位到低位
    let fields: [(&str, Option<&str>, &str); 7] = [
        ("year", trigger.year.as_deref(), "*"),
        ("month", trigger.month.as_deref(), "1"),
        ("day", trigger.day.as_deref(), "1"),
        ("day_of_week", trigger.day_of_week.as_deref(), "*"),
        ("hour", trigger.hour.as_deref(), "0"),
        ("minute", trigger.minute.as_deref(), "0"),
        ("second", trigger.second.as_deref(), "0"),
    ];

    let least_significant = fields.iter().rposition(|(_, value, _)| value.is_some());

    let mut resolved = Vec::with_capacity(fields.len());
    for (index, (name, value, minimum)) in fields.iter().enumerate() {
        let expr = match value {
            Some(value) => {
                let value = value.trim();
                if value.is_empty() {
                    return Err(TaskWorkerError::invalid_trigger(
                        "cron",
                        format!("字段 {name} 为空"),
                    ));
                }
                if value.contains(char::is_whitespace) {
                    return Err(TaskWorkerError::invalid_trigger(
                        "cron",
                        format!("字段 {name} 不能包含空白: {value}"),
                    ));
                }
                if *name == "day_of_week" {
                    translate_day_of_week(value)?
                } else {
                    value.to_string()
                }
            }
            None => match least_significant {
                Some(lowest) if index > lowest && *name != "day_of_week" => minimum.to_string(),
                _ => "*".to_string(),
            },
        };
        resolved.push(expr);
    }

    let [year, month, day, day_of_week, hour, minute, second] = <[String; 7]>::try_from(resolved)
        .map_err(|_| TaskWorkerError::Internal("cron字段数量不正确".to_string()))?;

    Ok(format!(
        "{second} {minute} {hour} {day} {month} {day_of_week} {year}"
    ))
}

/// 周一为0的数字或英文缩写 -> cron 引擎的星期名称
fn translate_day_of_week(expr: &str) -> TaskWorkerResult<String> {
    let mut parts = Vec::new();
    for part in expr.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (part, None),
        };

        let translated = if range == "*" {
            range.to_string()
        } else {
            range
                .split('-')
                .map(weekday_name)
                .collect::<TaskWorkerResult<Vec<_>>>()?
                .join("-")
        };

        parts.push(match step {
            Some(step) => format!("{translated}/{step}"),
            None => translated,
        });
    }
    Ok(parts.join(","))
}

fn weekday_name(atom: &str) -> TaskWorkerResult<String> {
    if let Ok(n) = atom.parse::<usize>() {
        return WEEKDAY_NAMES
            .get(n)
            .map(|name| name.to_string())
            .ok_or_else(|| {
                TaskWorkerError::invalid_trigger("cron", format!("day_of_week 越界: {atom}"))
            });
    }

    let lower = atom.to_ascii_lowercase();
    WEEKDAY_NAMES
        .iter()
        .find(|name| name.to_ascii_lowercase() == lower)
        .map(|name| name.to_string())
        .ok_or_else(|| TaskWorkerError::invalid_trigger("cron", format!("无效的星期: {atom}")))
}

/// 解析固定偏移时区：`UTC`、`Z`、`+08:00`、`-0530`、`+08`
pub fn parse_timezone(kind: &str, tz: &str) -> TaskWorkerResult<FixedOffset> {
    let tz = tz.trim();
    if tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("z") || tz.eq_ignore_ascii_case("gmt") {
        return Ok(utc_offset());
    }

    let invalid = || TaskWorkerError::invalid_trigger(kind, format!("无法识别的时区: {tz}"));

    let (sign, rest) = match tz.chars().next() {
        Some('+') => (1, &tz[1..]),
        Some('-') => (-1, &tz[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    let (hours, minutes) = match digits.len() {
        2 => (digits.as_str(), "00"),
        4 => (&digits[..2], &digits[2..]),
        _ => return Err(invalid()),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if minutes >= 60 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fill_below_least_significant_field() {
        let trigger = CronTrigger::new().hour("3");
        assert_eq!(translate_fields(&trigger).unwrap(), "0 0 3 * * * *");

        let trigger = CronTrigger::new().day("15");
        assert_eq!(translate_fields(&trigger).unwrap(), "0 0 0 15 * * *");

        let trigger = CronTrigger::new().second("*/5");
        assert_eq!(translate_fields(&trigger).unwrap(), "*/5 * * * * * *");

        let trigger = CronTrigger::new().month("6").minute("30");
        assert_eq!(translate_fields(&trigger).unwrap(), "0 30 * * 6 * *");
    }

    #[test]
    fn test_day_of_week_is_monday_based() {
        let trigger = CronTrigger::new().day_of_week("0-4").hour("9");
        assert_eq!(translate_fields(&trigger).unwrap(), "0 0 9 * * Mon-Fri *");

        let trigger = CronTrigger::new().day_of_week("sat,SUN");
        assert_eq!(translate_fields(&trigger).unwrap(), "0 0 0 * * Sat,Sun *");

        assert!(translate_fields(&CronTrigger::new().day_of_week("7")).is_err());
    }

    #[test]
    fn test_week_field_rejected() {
        let err = translate_fields(&CronTrigger::new().week("2")).unwrap_err();
        assert!(matches!(err, TaskWorkerError::InvalidTrigger { .. }));
        assert!(translate_fields(&CronTrigger::new().week("*").minute("1")).is_ok());
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("cron", "UTC").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_timezone("cron", "Z").unwrap().local_minus_utc(), 0);
        assert_eq!(
            parse_timezone("cron", "+08:00").unwrap().local_minus_utc(),
            8 * 3600
        );
        assert_eq!(
            parse_timezone("cron", "-0530").unwrap().local_minus_utc(),
            -(5 * 3600 + 30 * 60)
        );
        assert!(parse_timezone("cron", "Asia/Shanghai").is_err());
        assert!(parse_timezone("cron", "+08:75").is_err());
    }
}
