use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::models::whoop::RecoveryRow;
use crate::services::normalize::{normalize_recovery, normalize_sleep, normalize_workout};
use crate::services::sync::{
    run_batch_upsert, ChunkSink, RecoverySink, RetryPolicy, SleepSink, SyncReport, WorkoutSink,
};
use crate::services::whoop_client::{
    WhoopRecovery, WhoopSleep, WhoopWorkout, RECOVERY_ENDPOINT, SLEEP_ENDPOINT, WORKOUT_ENDPOINT,
};
use crate::AppState;

/// Build the provider authorization URL for the browser redirect.
pub async fn auth_url(State(state): State<AppState>) -> Json<Value> {
    let (url, _state) = state.whoop.authorize_url();
    Json(json!({ "auth_url": url }))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    #[allow(dead_code)]
    pub state: Option<String>,
}

/// OAuth callback: exchange the code, persist the bundle.
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> AppResult<Json<Value>> {
    let code = query
        .code
        .ok_or_else(|| AppError::Validation("Missing authorization code".into()))?;

    let response = state.whoop.exchange_code(&code).await?;
    let has_refresh = response.refresh_token.is_some();
    state.tokens.save(&response).await?;

    tracing::info!(has_refresh_token = has_refresh, "WHOOP connected");
    Ok(Json(json!({
        "message": "WHOOP connected successfully",
        "has_refresh_token": has_refresh,
    })))
}

/// Connection status from the stored bundle, without calling the provider.
pub async fn status(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let Some(token) = state.tokens.load().await? else {
        return Ok(Json(json!({
            "connected": false,
            "message": "Not connected to WHOOP",
        })));
    };

    let now = Utc::now();
    let expired = token.is_expired(now);
    Ok(Json(json!({
        "connected": !expired,
        "message": if expired { "Token expired — reconnect required" } else { "Connected to WHOOP" },
        "expires_in": (token.expires_at - now).num_seconds(),
        "has_refresh_token": token.refresh_token.is_some(),
    })))
}

/// Per-entity outcome of an incremental sync.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
enum LatestOutcome {
    Inserted,
    Skipped { reason: String },
    NoRecords,
    Error { error: String },
}

/// Fetch the most recent record of each entity type (limit=1) and upsert it.
///
/// A rejected access token triggers one refresh-and-retry; any other
/// provider failure is recorded for that entity and the sync moves on.
pub async fn sync_latest(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let mut access = state.tokens.get_valid_token(&state.whoop).await?;
    let offset_hours = state.config.local_utc_offset_hours;

    let recovery = match fetch_latest::<WhoopRecovery>(&state, &mut access, RECOVERY_ENDPOINT).await
    {
        Ok(Some(record)) => match normalize_recovery(&record, offset_hours) {
            Some(row) => upsert_latest_recovery(&state, row).await?,
            None => LatestOutcome::Skipped {
                reason: "Record has no cycle_id".into(),
            },
        },
        Ok(None) => LatestOutcome::NoRecords,
        Err(AppError::Upstream(e)) => LatestOutcome::Error { error: e },
        Err(e) => return Err(e),
    };

    let sleep = match fetch_latest::<WhoopSleep>(&state, &mut access, SLEEP_ENDPOINT).await {
        Ok(Some(record)) => {
            let row = normalize_sleep(&record, offset_hours);
            let mut sink = SleepSink { pool: &state.db };
            sink.upsert_chunk(std::slice::from_ref(&row))
                .await
                .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
            LatestOutcome::Inserted
        }
        Ok(None) => LatestOutcome::NoRecords,
        Err(AppError::Upstream(e)) => LatestOutcome::Error { error: e },
        Err(e) => return Err(e),
    };

    let workouts = match fetch_latest::<WhoopWorkout>(&state, &mut access, WORKOUT_ENDPOINT).await {
        Ok(Some(record)) => {
            let row = normalize_workout(&record, offset_hours);
            let mut sink = WorkoutSink { pool: &state.db };
            sink.upsert_chunk(std::slice::from_ref(&row))
                .await
                .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
            LatestOutcome::Inserted
        }
        Ok(None) => LatestOutcome::NoRecords,
        Err(AppError::Upstream(e)) => LatestOutcome::Error { error: e },
        Err(e) => return Err(e),
    };

    Ok(Json(json!({
        "message": "WHOOP latest data synced",
        "details": {
            "recovery": recovery,
            "sleep": sleep,
            "workouts": workouts,
        },
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

/// One page of one record, refreshing the token once on a 401.
async fn fetch_latest<T: serde::de::DeserializeOwned>(
    state: &AppState,
    access: &mut String,
    endpoint: &str,
) -> AppResult<Option<T>> {
    match state.whoop.fetch_page::<T>(access, endpoint, 1, None).await {
        Ok(page) => Ok(page.records.into_iter().next()),
        Err(AppError::Auth(_)) => {
            tracing::info!(endpoint, "WHOOP rejected access token, refreshing");
            let token = state
                .tokens
                .load()
                .await?
                .ok_or_else(|| AppError::Auth("not authorized".into()))?;
            let refreshed = state.tokens.refresh(&state.whoop, &token).await?;
            *access = refreshed.access_token;
            let page = state.whoop.fetch_page::<T>(access, endpoint, 1, None).await?;
            Ok(page.records.into_iter().next())
        }
        Err(e) => Err(e),
    }
}

/// Recovery is insert-only per day during incremental sync: a second record
/// for a date that already has one is skipped, matching the import history.
async fn upsert_latest_recovery(state: &AppState, row: RecoveryRow) -> AppResult<LatestOutcome> {
    if let Some(date) = row.record_date {
        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM whoop_recovery WHERE record_date = $1",
        )
        .bind(date)
        .fetch_one(&state.db)
        .await?;
        if existing > 0 {
            return Ok(LatestOutcome::Skipped {
                reason: format!("Recovery for {date} already exists"),
            });
        }
    }

    let mut sink = RecoverySink { pool: &state.db };
    sink.upsert_chunk(std::slice::from_ref(&row))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
    Ok(LatestOutcome::Inserted)
}

/// Per-table summary of a full import.
#[derive(Debug, Serialize)]
pub struct EntitySyncSummary {
    pub fetched: usize,
    pub normalized: usize,
    pub upserted: usize,
    pub failed_chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_stopped_by: Option<String>,
    pub report: SyncReport,
}

/// Full historical import: paginate each entity to exhaustion, normalize,
/// and push through the chunked upsert pipeline. Partial failures (a
/// truncated walk, a failed chunk) are reported, not fatal.
pub async fn sync_full(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let access = state.tokens.get_valid_token(&state.whoop).await?;
    let offset_hours = state.config.local_utc_offset_hours;
    let limit = state.config.sync_page_limit;
    let chunk_size = state.config.sync_chunk_size;
    let policy = RetryPolicy::from_config(&state.config);

    let recovery = {
        let outcome = state
            .whoop
            .fetch_all::<WhoopRecovery>(&access, RECOVERY_ENDPOINT, limit)
            .await;
        if let Some(err) = &outcome.stopped_by {
            tracing::warn!(error = %err, "Recovery fetch truncated, importing partial set");
        }
        let rows: Vec<_> = outcome
            .records
            .iter()
            .filter_map(|r| normalize_recovery(r, offset_hours))
            .collect();
        let mut sink = RecoverySink { pool: &state.db };
        let report =
            run_batch_upsert("whoop_recovery", &mut sink, &rows, chunk_size, &policy).await;
        EntitySyncSummary {
            fetched: outcome.records.len(),
            normalized: rows.len(),
            upserted: report.rows_upserted(),
            failed_chunks: report.failed_chunks(),
            fetch_stopped_by: outcome.stopped_by,
            report,
        }
    };

    let sleep = {
        let outcome = state
            .whoop
            .fetch_all::<WhoopSleep>(&access, SLEEP_ENDPOINT, limit)
            .await;
        if let Some(err) = &outcome.stopped_by {
            tracing::warn!(error = %err, "Sleep fetch truncated, importing partial set");
        }
        let rows: Vec<_> = outcome
            .records
            .iter()
            .map(|r| normalize_sleep(r, offset_hours))
            .collect();
        let mut sink = SleepSink { pool: &state.db };
        let report = run_batch_upsert("whoop_sleep", &mut sink, &rows, chunk_size, &policy).await;
        EntitySyncSummary {
            fetched: outcome.records.len(),
            normalized: rows.len(),
            upserted: report.rows_upserted(),
            failed_chunks: report.failed_chunks(),
            fetch_stopped_by: outcome.stopped_by,
            report,
        }
    };

    let workouts = {
        let outcome = state
            .whoop
            .fetch_all::<WhoopWorkout>(&access, WORKOUT_ENDPOINT, limit)
            .await;
        if let Some(err) = &outcome.stopped_by {
            tracing::warn!(error = %err, "Workout fetch truncated, importing partial set");
        }
        let rows: Vec<_> = outcome
            .records
            .iter()
            .map(|r| normalize_workout(r, offset_hours))
            .collect();
        let mut sink = WorkoutSink { pool: &state.db };
        let report =
            run_batch_upsert("whoop_workouts", &mut sink, &rows, chunk_size, &policy).await;
        EntitySyncSummary {
            fetched: outcome.records.len(),
            normalized: rows.len(),
            upserted: report.rows_upserted(),
            failed_chunks: report.failed_chunks(),
            fetch_stopped_by: outcome.stopped_by,
            report,
        }
    };

    Ok(Json(json!({
        "message": "WHOOP full import finished",
        "recovery": recovery,
        "sleep": sleep,
        "workouts": workouts,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}
