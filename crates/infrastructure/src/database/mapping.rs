//! 行映射辅助函数
//!
//! 时间戳在两种后端中都存为毫秒级 `BIGINT`；JSON 字段在 PostgreSQL 中为
//! `JSONB`，在 SQLite 中为 `TEXT`。

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use taskworker_core::{JobStatus, Payload};
use taskworker_errors::{TaskWorkerError, TaskWorkerResult};

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn to_millis(at: DateTime<Utc>) -> i64 {
        at.timestamp_millis()
    }

    pub fn from_millis(ms: i64) -> TaskWorkerResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| TaskWorkerError::Serialization(format!("时间戳越界: {ms}")))
    }

    pub fn from_millis_opt(ms: Option<i64>) -> TaskWorkerResult<Option<DateTime<Utc>>> {
        ms.map(Self::from_millis).transpose()
    }

    pub fn parse_status(value: &str) -> TaskWorkerResult<JobStatus> {
        value.parse().map_err(TaskWorkerError::Serialization)
    }

    pub fn payload_from_value(value: Value) -> TaskWorkerResult<Payload> {
        match value {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Payload::new()),
            other => Err(TaskWorkerError::Serialization(format!(
                "作业载荷必须是JSON对象: {other}"
            ))),
        }
    }

    pub fn parse_payload_sqlite(
        row: &sqlx::sqlite::SqliteRow,
        field_name: &str,
    ) -> TaskWorkerResult<Payload> {
        let json_str: String = row.try_get(field_name)?;
        let value: Value = serde_json::from_str(&json_str)
            .map_err(|e| TaskWorkerError::Serialization(format!("解析作业载荷失败: {e}")))?;
        Self::payload_from_value(value)
    }

    pub fn parse_payload_postgres(
        row: &sqlx::postgres::PgRow,
        field_name: &str,
    ) -> TaskWorkerResult<Payload> {
        let value: Value = row.try_get(field_name)?;
        Self::payload_from_value(value)
    }

    pub fn parse_json_sqlite(
        row: &sqlx::sqlite::SqliteRow,
        field_name: &str,
    ) -> TaskWorkerResult<Option<Value>> {
        match row.try_get::<Option<String>, _>(field_name)? {
            Some(json_str) => serde_json::from_str(&json_str)
                .map(Some)
                .map_err(|e| TaskWorkerError::Serialization(format!("解析{field_name}失败: {e}"))),
            None => Ok(None),
        }
    }

    pub fn parse_json_postgres(
        row: &sqlx::postgres::PgRow,
        field_name: &str,
    ) -> TaskWorkerResult<Option<Value>> {
        Ok(row.try_get::<Option<Value>, _>(field_name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_millis_round_trip_keeps_precision() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let ms = MappingHelpers::to_millis(at);
        assert_eq!(ms, 1_700_000_000_123);
        assert_eq!(MappingHelpers::from_millis(ms).unwrap(), at);
        assert_eq!(MappingHelpers::from_millis_opt(None).unwrap(), None);
    }

    #[test]
    fn test_payload_from_value() {
        let payload = MappingHelpers::payload_from_value(json!({"to": "a@x.com"})).unwrap();
        assert_eq!(payload.get("to"), Some(&json!("a@x.com")));
        assert!(MappingHelpers::payload_from_value(Value::Null).unwrap().is_empty());
        assert!(MappingHelpers::payload_from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(
            MappingHelpers::parse_status("running").unwrap(),
            JobStatus::Running
        );
        assert!(matches!(
            MappingHelpers::parse_status("lost"),
            Err(TaskWorkerError::Serialization(_))
        ));
    }
}
