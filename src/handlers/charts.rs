use axum::{extract::State, Json};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::models::whoop::{RecoveryRow, SleepRow, WorkoutRow};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct RecoveryPoint {
    pub date: NaiveDate,
    pub recovery_score: Option<f64>,
    pub rhr: Option<f64>,
    pub hrv: Option<f64>,
    pub spo2: Option<f64>,
    pub temp: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SleepPoint {
    pub date: NaiveDate,
    pub performance: Option<f64>,
    pub efficiency: Option<f64>,
    pub rem: Option<f64>,
    pub deep: Option<f64>,
    pub total: Option<f64>,
    pub resp_rate: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct WorkoutPoint {
    pub date: NaiveDate,
    pub strain: Option<f64>,
    pub avg_hr: Option<f64>,
    pub max_hr: Option<f64>,
    pub distance: Option<f64>,
    pub altitude_gain: Option<f64>,
    pub energy: Option<f64>,
    pub sport: Option<String>,
}

/// Combined recovery/sleep/workout trends with averages, threshold insights,
/// and the composite longevity score.
pub async fn overview(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let recovery = sqlx::query_as::<_, RecoveryRow>(
        "SELECT * FROM whoop_recovery WHERE record_date IS NOT NULL ORDER BY record_date ASC",
    )
    .fetch_all(&state.db)
    .await?;

    let sleep = sqlx::query_as::<_, SleepRow>(
        "SELECT * FROM whoop_sleep WHERE record_date IS NOT NULL ORDER BY record_date ASC",
    )
    .fetch_all(&state.db)
    .await?;

    let workouts = sqlx::query_as::<_, WorkoutRow>(
        "SELECT * FROM whoop_workouts WHERE record_date IS NOT NULL ORDER BY record_date ASC",
    )
    .fetch_all(&state.db)
    .await?;

    // ── recovery ─────────────────────────────────────────────────────────
    let recovery_trend: Vec<RecoveryPoint> = recovery
        .iter()
        .filter_map(|r| {
            Some(RecoveryPoint {
                date: r.record_date?,
                recovery_score: safe_float(r.recovery_score.as_deref()),
                rhr: safe_float(r.resting_heart_rate.as_deref()),
                hrv: safe_float(r.hrv_rmssd_milli.as_deref()),
                spo2: safe_float(r.spo2_percentage.as_deref()),
                temp: safe_float(r.skin_temp_celsius.as_deref()),
            })
        })
        .collect();

    let avg_recovery_score = avg(recovery_trend.iter().map(|p| p.recovery_score));
    let avg_rhr = avg(recovery_trend.iter().map(|p| p.rhr));
    let avg_hrv = avg(recovery_trend.iter().map(|p| p.hrv));
    let avg_spo2 = avg(recovery_trend.iter().map(|p| p.spo2));
    let avg_temp = avg(recovery_trend.iter().map(|p| p.temp));

    let mut recovery_insights: Vec<&str> = Vec::new();
    if avg_hrv.is_some_and(|v| v < 50.0) {
        recovery_insights.push("Low HRV trend — potential stress or overtraining.");
    }
    if avg_rhr.is_some_and(|v| v > 60.0) {
        recovery_insights.push("Elevated RHR — body still recovering from workload.");
    }
    if avg_spo2.is_some_and(|v| v < 95.0) {
        recovery_insights.push("Slight drop in SpO2 levels — prioritize breathing quality.");
    }
    if avg_temp.is_some_and(|v| v > 36.8) {
        recovery_insights.push("Skin temperature elevated — possible early fatigue or illness.");
    }

    // ── sleep ────────────────────────────────────────────────────────────
    let sleep_trend: Vec<SleepPoint> = sleep
        .iter()
        .filter_map(|s| {
            Some(SleepPoint {
                date: s.record_date?,
                performance: safe_float(s.sleep_performance_percentage.as_deref()),
                efficiency: safe_float(s.sleep_efficiency_percentage.as_deref()),
                rem: safe_float(s.rem_sleep_hours.as_deref()),
                deep: safe_float(s.deep_sleep_hours.as_deref()),
                total: sleep_duration_hours(s.start.as_deref(), s.end.as_deref()),
                resp_rate: safe_float(s.respiratory_rate.as_deref()),
            })
        })
        .collect();

    let avg_performance = avg(sleep_trend.iter().map(|p| p.performance));
    let avg_efficiency = avg(sleep_trend.iter().map(|p| p.efficiency));
    let avg_rem = avg(sleep_trend.iter().map(|p| p.rem));
    let avg_deep = avg(sleep_trend.iter().map(|p| p.deep));
    let avg_total = avg(sleep_trend.iter().map(|p| p.total));
    let avg_resp = avg(sleep_trend.iter().map(|p| p.resp_rate));

    let mut sleep_insights: Vec<&str> = Vec::new();
    if avg_efficiency.is_some_and(|v| v < 85.0) {
        sleep_insights.push("Sleep efficiency below optimal — maintain a consistent bedtime.");
    }
    if avg_deep.is_some_and(|v| v < 1.0) {
        sleep_insights.push("Low deep sleep — reduce stimulants and screens before bed.");
    }
    if avg_resp.is_some_and(|v| v > 18.0) {
        sleep_insights.push("Elevated respiratory rate — possible signs of poor recovery.");
    }
    if avg_total.is_some_and(|v| v < 7.0) {
        sleep_insights.push("Average sleep below 7 hours — aim for 7-8 hours nightly.");
    }
    if avg_rem.is_some_and(|v| v < 1.5) {
        sleep_insights.push("Low REM sleep — may indicate mental or emotional fatigue.");
    }

    // ── workouts ─────────────────────────────────────────────────────────
    let workout_trend: Vec<WorkoutPoint> = workouts
        .iter()
        .filter_map(|w| {
            Some(WorkoutPoint {
                date: w.record_date?,
                strain: safe_float(w.strain.as_deref()),
                avg_hr: safe_float(w.average_heart_rate.as_deref()),
                max_hr: safe_float(w.max_heart_rate.as_deref()),
                distance: safe_float(w.distance_meter.as_deref()),
                altitude_gain: safe_float(w.altitude_gain_meter.as_deref()),
                energy: safe_float(w.kilojoule.as_deref()),
                sport: w.sport_name.clone(),
            })
        })
        .collect();

    let avg_strain = avg(workout_trend.iter().map(|p| p.strain));
    let avg_hr = avg(workout_trend.iter().map(|p| p.avg_hr));
    let avg_distance = avg(workout_trend.iter().map(|p| p.distance));
    let avg_altitude = avg(workout_trend.iter().map(|p| p.altitude_gain));
    let avg_energy = avg(workout_trend.iter().map(|p| p.energy));

    let mut workout_insights: Vec<&str> = Vec::new();
    if avg_strain.is_some_and(|v| v > 15.0) {
        workout_insights.push("High training load — ensure recovery and proper hydration.");
    } else if avg_strain.is_some_and(|v| v < 10.0) {
        workout_insights.push("Light training trend — could add higher intensity sessions.");
    }
    if avg_distance.is_some_and(|v| v < 3000.0) {
        workout_insights.push("Low weekly distance — aim for longer endurance sessions.");
    }
    if avg_energy.is_some_and(|v| v > 2000.0) {
        workout_insights.push("Strong energy output trend — keep balancing with rest.");
    }

    // ── longevity composite ──────────────────────────────────────────────
    let longevity_score = longevity(avg_recovery_score, avg_efficiency, avg_strain);
    let longevity_insights: Vec<&str> = match longevity_score {
        Some(score) if score > 80.0 => {
            vec!["Excellent physiological balance — maintain this mix."]
        }
        Some(score) if score > 60.0 => {
            vec!["Good longevity potential — improve sleep for optimal performance."]
        }
        Some(_) => vec!["Fatigue warning — strain outweighs recovery capacity."],
        None => vec![],
    };

    Ok(Json(json!({
        "recovery": {
            "trend": recovery_trend,
            "averages": {
                "recovery_score": avg_recovery_score,
                "rhr": avg_rhr,
                "hrv": avg_hrv,
                "spo2": avg_spo2,
                "temp": avg_temp,
            },
            "insights": recovery_insights,
        },
        "sleep": {
            "trend": sleep_trend,
            "averages": {
                "performance": avg_performance,
                "efficiency": avg_efficiency,
                "rem": avg_rem,
                "deep": avg_deep,
                "total": avg_total,
                "resp_rate": avg_resp,
            },
            "insights": sleep_insights,
        },
        "workouts": {
            "trend": workout_trend,
            "averages": {
                "strain": avg_strain,
                "avg_hr": avg_hr,
                "distance": avg_distance,
                "altitude_gain": avg_altitude,
                "energy": avg_energy,
            },
            "insights": workout_insights,
        },
        "longevity": {
            "score": longevity_score,
            "insights": longevity_insights,
        },
        "generated_at": Utc::now().to_rfc3339(),
    })))
}

/// Lenient numeric parse for text metric columns.
fn safe_float(raw: Option<&str>) -> Option<f64> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse().ok()
}

/// Mean over present values, rounded to 2 decimals. None when nothing is
/// present.
fn avg(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let clean: Vec<f64> = values.flatten().collect();
    if clean.is_empty() {
        return None;
    }
    let mean = clean.iter().sum::<f64>() / clean.len() as f64;
    Some((mean * 100.0).round() / 100.0)
}

/// Total sleep duration from the stored start/end timestamps.
fn sleep_duration_hours(start: Option<&str>, end: Option<&str>) -> Option<f64> {
    let start = DateTime::parse_from_rfc3339(start?).ok()?;
    let end = DateTime::parse_from_rfc3339(end?).ok()?;
    let seconds = (end - start).num_seconds();
    if seconds < 0 {
        return None;
    }
    Some(seconds as f64 / 3600.0)
}

/// 0.4·recovery + 0.4·sleep-efficiency + 0.2·(20 − strain), rounded to one
/// decimal. Requires all three inputs.
fn longevity(
    recovery_score: Option<f64>,
    sleep_efficiency: Option<f64>,
    strain: Option<f64>,
) -> Option<f64> {
    let score =
        recovery_score? * 0.4 + sleep_efficiency? * 0.4 + (20.0 - strain?) * 0.2;
    Some((score * 10.0).round() / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_float_lenient_parse() {
        assert_eq!(safe_float(Some("61.5")), Some(61.5));
        assert_eq!(safe_float(Some(" 42 ")), Some(42.0));
        assert_eq!(safe_float(Some("")), None);
        assert_eq!(safe_float(Some("n/a")), None);
        assert_eq!(safe_float(None), None);
    }

    #[test]
    fn test_avg_ignores_missing_values() {
        let values = vec![Some(1.0), None, Some(2.0)];
        assert_eq!(avg(values.into_iter()), Some(1.5));
    }

    #[test]
    fn test_avg_of_nothing_is_none() {
        assert_eq!(avg(std::iter::empty()), None);
        assert_eq!(avg(vec![None, None].into_iter()), None);
    }

    #[test]
    fn test_avg_rounds_to_two_decimals() {
        let values = vec![Some(1.0), Some(2.0), Some(2.0)];
        assert_eq!(avg(values.into_iter()), Some(1.67));
    }

    #[test]
    fn test_sleep_duration_hours() {
        let hours = sleep_duration_hours(
            Some("2025-11-08T23:00:00.000Z"),
            Some("2025-11-09T06:30:00.000Z"),
        );
        assert_eq!(hours, Some(7.5));
    }

    #[test]
    fn test_sleep_duration_rejects_inverted_range() {
        let hours = sleep_duration_hours(
            Some("2025-11-09T06:30:00.000Z"),
            Some("2025-11-08T23:00:00.000Z"),
        );
        assert_eq!(hours, None);
    }

    #[test]
    fn test_longevity_composite() {
        // 0.4*75 + 0.4*90 + 0.2*(20-12) = 30 + 36 + 1.6 = 67.6
        assert_eq!(longevity(Some(75.0), Some(90.0), Some(12.0)), Some(67.6));
        assert_eq!(longevity(None, Some(90.0), Some(12.0)), None);
    }
}
