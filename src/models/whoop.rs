use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The single persisted OAuth bundle (row id 1 in `whoop_tokens`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WhoopToken {
    pub id: i16,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl WhoopToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Flat row shapes matching the whoop_* tables. All metrics are text; the
/// charts layer parses leniently.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct RecoveryRow {
    pub cycle_id: String,
    pub recovery_score: Option<String>,
    pub resting_heart_rate: Option<String>,
    pub hrv_rmssd_milli: Option<String>,
    pub spo2_percentage: Option<String>,
    pub skin_temp_celsius: Option<String>,
    pub record_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct SleepRow {
    pub id: String,
    pub cycle_id: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub sleep_performance_percentage: Option<String>,
    pub sleep_efficiency_percentage: Option<String>,
    pub rem_sleep_hours: Option<String>,
    pub deep_sleep_hours: Option<String>,
    pub respiratory_rate: Option<String>,
    pub record_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct WorkoutRow {
    pub id: String,
    pub sport_name: Option<String>,
    pub strain: Option<String>,
    pub average_heart_rate: Option<String>,
    pub max_heart_rate: Option<String>,
    pub kilojoule: Option<String>,
    pub distance_meter: Option<String>,
    pub altitude_gain_meter: Option<String>,
    pub record_date: Option<NaiveDate>,
}
