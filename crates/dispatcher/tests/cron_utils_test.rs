use chrono::{Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
use taskworker_dispatcher::cron_utils::*;
use taskworker_dispatcher::CronTrigger;
use taskworker_errors::TaskWorkerError;

#[test]
fn test_cron_scheduler_creation() {
    assert!(CronScheduler::new("0 0 0 * * *").is_ok());
    assert!(CronScheduler::new("invalid").is_err());
}

#[test]
fn test_validate_cron_expression() {
    assert!(CronScheduler::validate_cron_expression("0 */5 * * * *").is_ok());
    assert!(CronScheduler::validate_cron_expression("0 0 9-17 * * Mon-Fri").is_ok());
    assert!(CronScheduler::validate_cron_expression("0 0 0 32 * *").is_err());
    assert!(CronScheduler::validate_cron_expression("").is_err());
}

#[test]
fn test_every_five_seconds_from_fields() {
    let scheduler = CronScheduler::from_trigger(&CronTrigger::new().second("*/5")).unwrap();
    assert_eq!(scheduler.expression(), "*/5 * * * * * *");

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let times = scheduler.upcoming_times(start, 3);
    assert_eq!(
        times,
        vec![
            start + Duration::seconds(5),
            start + Duration::seconds(10),
            start + Duration::seconds(15)
        ]
    );
}

#[test]
fn test_unspecified_lower_fields_default_to_minimum() {
    let scheduler = CronScheduler::from_trigger(&CronTrigger::new().hour(3)).unwrap();
    assert_eq!(scheduler.expression(), "0 0 3 * * * *");

    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let next = scheduler.next_execution_time(now).unwrap();
    assert_eq!((next.day(), next.hour(), next.minute()), (2, 3, 0));
}

#[test]
fn test_monday_based_weekdays() {
    let trigger = CronTrigger::new().day_of_week(0).hour(9);
    let scheduler = CronScheduler::from_trigger(&trigger).unwrap();

    // 2024-01-01 是周一
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
    let next = scheduler.next_execution_time(now).unwrap();
    assert_eq!(next.weekday(), Weekday::Mon);
    assert_eq!(next.day(), 8);

    let named = CronScheduler::from_trigger(&CronTrigger::new().day_of_week("mon-fri")).unwrap();
    assert!(named.expression().contains("Mon-Fri"));
}

#[test]
fn test_start_and_end_dates_bound_fires() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 3, 0).unwrap();
    let trigger = CronTrigger::new().minute("*").start_date(start).end_date(end);
    let scheduler = CronScheduler::from_trigger(&trigger).unwrap();

    let before = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(
        scheduler.upcoming_times(before, 10),
        vec![start, start + Duration::minutes(1), end]
    );

    let reversed = CronTrigger::new().start_date(end).end_date(start);
    assert!(CronScheduler::from_trigger(&reversed).is_err());
}

#[test]
fn test_timezone_offset_shifts_fire_time() {
    let trigger = CronTrigger::new().hour(8).timezone("+08:00");
    let scheduler = CronScheduler::from_trigger(&trigger).unwrap();

    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let next = scheduler.next_execution_time(now).unwrap();
    assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
}

#[test]
fn test_invalid_fields_fail_at_registration() {
    let invalid = [
        CronTrigger::new().second(61),
        CronTrigger::new().week(3),
        CronTrigger::new().hour(1).timezone("Mars/Olympus"),
    ];
    for trigger in invalid {
        let err = CronScheduler::from_trigger(&trigger).unwrap_err();
        assert!(matches!(err, TaskWorkerError::InvalidTrigger { .. }), "{err}");
    }
}
