//! Pure mapping from WHOOP's nested JSON records to the flat text-metric
//! rows in the whoop_* tables.
//!
//! Two rules are deliberate carryovers from the original import behavior:
//! - Durations in milliseconds become hours rounded to 2 decimals, with a
//!   missing value treated as 0 before rounding. Downstream cannot tell an
//!   absent metric from a zero one.
//! - `record_date` comes from a fixed UTC offset, not a real timezone
//!   conversion, so it does not follow DST transitions.

use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::models::whoop::{RecoveryRow, SleepRow, WorkoutRow};
use crate::services::whoop_client::{WhoopRecovery, WhoopSleep, WhoopWorkout};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Parse a UTC ISO-8601 timestamp (`Z` suffix) and shift it by the fixed
/// offset to get the local calendar date.
pub fn extract_local_date(ts: &str, offset_hours: i32) -> Option<NaiveDate> {
    let utc = DateTime::parse_from_rfc3339(ts).ok()?;
    let offset = FixedOffset::east_opt(offset_hours * 3600)?;
    Some(utc.with_timezone(&offset).date_naive())
}

/// Milliseconds to hours, rounded to 2 decimal places. Missing input counts
/// as 0 before rounding.
pub fn ms_to_hours(ms: Option<f64>) -> f64 {
    let hours = ms.unwrap_or(0.0) / MS_PER_HOUR;
    (hours * 100.0).round() / 100.0
}

/// Stringify a scalar metric; absent metrics stay NULL.
fn to_text<T: ToString>(value: Option<T>) -> Option<String> {
    value.map(|v| v.to_string())
}

/// Recovery rows are dated by the record's creation timestamp.
pub fn normalize_recovery(record: &WhoopRecovery, offset_hours: i32) -> Option<RecoveryRow> {
    let cycle_id = record.cycle_id?;
    let score = record.score.as_ref();
    Some(RecoveryRow {
        cycle_id: cycle_id.to_string(),
        recovery_score: to_text(score.and_then(|s| s.recovery_score)),
        resting_heart_rate: to_text(score.and_then(|s| s.resting_heart_rate)),
        hrv_rmssd_milli: to_text(score.and_then(|s| s.hrv_rmssd_milli)),
        spo2_percentage: to_text(score.and_then(|s| s.spo2_percentage)),
        skin_temp_celsius: to_text(score.and_then(|s| s.skin_temp_celsius)),
        record_date: record
            .created_at
            .as_deref()
            .and_then(|ts| extract_local_date(ts, offset_hours)),
    })
}

/// Sleep rows are dated by the sleep's end timestamp.
pub fn normalize_sleep(record: &WhoopSleep, offset_hours: i32) -> SleepRow {
    let score = record.score.as_ref();
    let stages = score.and_then(|s| s.stage_summary.as_ref());
    SleepRow {
        id: record.id.clone(),
        cycle_id: to_text(record.cycle_id),
        start: record.start.clone(),
        end: record.end.clone(),
        sleep_performance_percentage: to_text(score.and_then(|s| s.sleep_performance_percentage)),
        sleep_efficiency_percentage: to_text(score.and_then(|s| s.sleep_efficiency_percentage)),
        rem_sleep_hours: Some(
            ms_to_hours(stages.and_then(|s| s.total_rem_sleep_time_milli)).to_string(),
        ),
        deep_sleep_hours: Some(
            ms_to_hours(stages.and_then(|s| s.total_slow_wave_sleep_time_milli)).to_string(),
        ),
        respiratory_rate: to_text(score.and_then(|s| s.respiratory_rate)),
        record_date: record
            .end
            .as_deref()
            .and_then(|ts| extract_local_date(ts, offset_hours)),
    }
}

/// Workout rows are dated by the workout's end timestamp.
pub fn normalize_workout(record: &WhoopWorkout, offset_hours: i32) -> WorkoutRow {
    let score = record.score.as_ref();
    WorkoutRow {
        id: record.id.clone(),
        sport_name: record.sport_name.clone(),
        strain: to_text(score.and_then(|s| s.strain)),
        average_heart_rate: to_text(score.and_then(|s| s.average_heart_rate)),
        max_heart_rate: to_text(score.and_then(|s| s.max_heart_rate)),
        kilojoule: to_text(score.and_then(|s| s.kilojoule)),
        distance_meter: to_text(score.and_then(|s| s.distance_meter)),
        altitude_gain_meter: to_text(score.and_then(|s| s.altitude_gain_meter)),
        record_date: record
            .end
            .as_deref()
            .and_then(|ts| extract_local_date(ts, offset_hours)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_local_date_crosses_midnight_backward() {
        // 02:28 UTC minus 5 hours lands on the previous calendar day.
        let date = extract_local_date("2025-11-09T02:28:43.376Z", -5).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 11, 8).unwrap());
    }

    #[test]
    fn test_extract_local_date_same_day() {
        let date = extract_local_date("2025-11-09T14:00:00.000Z", -5).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 11, 9).unwrap());
    }

    #[test]
    fn test_extract_local_date_invalid_input() {
        assert!(extract_local_date("not-a-timestamp", -5).is_none());
        assert!(extract_local_date("", -5).is_none());
    }

    #[test]
    fn test_ms_to_hours_rounds_to_two_decimals() {
        // 5_400_000 ms = 1.5 h exactly; 5_000_000 ms = 1.3888.. h -> 1.39
        assert_eq!(ms_to_hours(Some(5_400_000.0)), 1.5);
        assert_eq!(ms_to_hours(Some(5_000_000.0)), 1.39);
    }

    #[test]
    fn test_ms_to_hours_missing_is_zero() {
        assert_eq!(ms_to_hours(None), 0.0);
    }

    #[test]
    fn test_normalize_recovery_dates_by_created_at() {
        let record = WhoopRecovery {
            cycle_id: Some(42),
            created_at: Some("2025-11-09T02:28:43.376Z".into()),
            score: None,
        };
        let row = normalize_recovery(&record, -5).unwrap();
        assert_eq!(row.cycle_id, "42");
        assert_eq!(row.record_date, NaiveDate::from_ymd_opt(2025, 11, 8));
        assert!(row.recovery_score.is_none());
    }

    #[test]
    fn test_normalize_recovery_without_cycle_id_is_skipped() {
        let record = WhoopRecovery {
            cycle_id: None,
            created_at: Some("2025-11-09T02:28:43.376Z".into()),
            score: None,
        };
        assert!(normalize_recovery(&record, -5).is_none());
    }

    #[test]
    fn test_normalize_sleep_dates_by_end_and_fills_hours() {
        let record = WhoopSleep {
            id: "sleep-1".into(),
            cycle_id: Some(42),
            start: Some("2025-11-08T23:10:00.000Z".into()),
            end: Some("2025-11-09T06:40:00.000Z".into()),
            score: Some(crate::services::whoop_client::SleepScore {
                sleep_performance_percentage: Some(88.0),
                sleep_efficiency_percentage: None,
                respiratory_rate: Some(15.2),
                stage_summary: Some(crate::services::whoop_client::SleepStageSummary {
                    total_rem_sleep_time_milli: Some(5_400_000.0),
                    total_slow_wave_sleep_time_milli: None,
                }),
            }),
        };
        let row = normalize_sleep(&record, -5);
        // end is 06:40 UTC -> 01:40 local, still Nov 9
        assert_eq!(row.record_date, NaiveDate::from_ymd_opt(2025, 11, 9));
        assert_eq!(row.rem_sleep_hours.as_deref(), Some("1.5"));
        // absent deep-sleep metric collapses to zero hours
        assert_eq!(row.deep_sleep_hours.as_deref(), Some("0"));
        assert_eq!(row.sleep_performance_percentage.as_deref(), Some("88"));
        assert!(row.sleep_efficiency_percentage.is_none());
    }

    #[test]
    fn test_normalize_workout_serializes_metrics_as_text() {
        let record = WhoopWorkout {
            id: "w-9".into(),
            sport_name: Some("running".into()),
            end: Some("2025-11-09T18:05:00.000Z".into()),
            score: Some(crate::services::whoop_client::WorkoutScore {
                strain: Some(14.3),
                average_heart_rate: Some(142.0),
                max_heart_rate: None,
                kilojoule: Some(2012.7),
                distance_meter: None,
                altitude_gain_meter: None,
            }),
        };
        let row = normalize_workout(&record, -5);
        assert_eq!(row.strain.as_deref(), Some("14.3"));
        assert_eq!(row.average_heart_rate.as_deref(), Some("142"));
        assert!(row.max_heart_rate.is_none());
        assert_eq!(row.record_date, NaiveDate::from_ymd_opt(2025, 11, 9));
    }
}
