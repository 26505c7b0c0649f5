use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::entry::{
    AddNoteRequest, DailyEntry, EntryAttribute, EntryDetail, EntryNote, EntryQuery,
    EntryWithAttributes, SetVisibilityRequest, UpsertEntryRequest, Visibility,
};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

/// Create or replace the entry for a (date, day_period) pair.
///
/// The whole call is one transaction: entry write, attribute deletion, and
/// attribute insertion commit together or not at all. Replacing an entry
/// swaps its entire attribute set; attributes omitted from the request are
/// removed.
pub async fn upsert_entry(
    State(state): State<AppState>,
    Json(body): Json<UpsertEntryRequest>,
) -> AppResult<Json<EntryWithAttributes>> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let (period, visibility) = body.validate_domain().map_err(AppError::Validation)?;

    let mut tx = state.db.begin().await?;

    let existing = sqlx::query_as::<_, DailyEntry>(
        "SELECT * FROM daily_entries WHERE date = $1 AND day_period = $2",
    )
    .bind(body.date)
    .bind(period)
    .fetch_optional(&mut *tx)
    .await?;

    let entry = match existing {
        Some(found) if !body.overwrite => {
            return Err(AppError::Conflict(format!(
                "Entry for {} {} already exists",
                found.date, body.day_period
            )));
        }
        Some(found) => {
            let updated = sqlx::query_as::<_, DailyEntry>(
                r#"
                UPDATE daily_entries SET visibility = $2, notes = $3
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(found.id)
            .bind(visibility)
            .bind(&body.notes)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM entry_attributes WHERE entry_id = $1")
                .bind(found.id)
                .execute(&mut *tx)
                .await?;

            updated
        }
        None => {
            sqlx::query_as::<_, DailyEntry>(
                r#"
                INSERT INTO daily_entries (id, date, day_period, visibility, notes)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(body.date)
            .bind(period)
            .bind(visibility)
            .bind(&body.notes)
            .fetch_one(&mut *tx)
            .await?
        }
    };

    let mut attributes = Vec::with_capacity(body.attributes.len());
    for attr in &body.attributes {
        let row = sqlx::query_as::<_, EntryAttribute>(
            r#"
            INSERT INTO entry_attributes (id, entry_id, name, value, unit, note)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.id)
        .bind(attr.name.trim())
        .bind(&attr.value)
        .bind(&attr.unit)
        .bind(&attr.note)
        .fetch_one(&mut *tx)
        .await?;
        attributes.push(row);
    }

    tx.commit().await?;

    Ok(Json(EntryWithAttributes { entry, attributes }))
}

pub async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<EntryQuery>,
) -> AppResult<Json<Vec<EntryWithAttributes>>> {
    let visibility = match query.visibility.as_deref() {
        Some(raw) => Some(Visibility::parse(raw).map_err(AppError::Validation)?),
        None => None,
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let entries = sqlx::query_as::<_, DailyEntry>(
        r#"
        SELECT * FROM daily_entries
        WHERE ($1::visibility IS NULL OR visibility = $1)
          AND ($2::date IS NULL OR date >= $2)
          AND ($3::date IS NULL OR date <= $3)
        ORDER BY date DESC, day_period ASC
        LIMIT $4 OFFSET $5
        "#,
    )
    .bind(visibility)
    .bind(query.date_from)
    .bind(query.date_to)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db)
    .await?;

    let ids: Vec<Uuid> = entries.iter().map(|e| e.id).collect();
    let attributes = sqlx::query_as::<_, EntryAttribute>(
        "SELECT * FROM entry_attributes WHERE entry_id = ANY($1) ORDER BY created_at ASC",
    )
    .bind(&ids)
    .fetch_all(&state.db)
    .await?;

    let mut by_entry: HashMap<Uuid, Vec<EntryAttribute>> = HashMap::new();
    for attr in attributes {
        by_entry.entry(attr.entry_id).or_default().push(attr);
    }

    let result = entries
        .into_iter()
        .map(|entry| {
            let attributes = by_entry.remove(&entry.id).unwrap_or_default();
            EntryWithAttributes { entry, attributes }
        })
        .collect();

    Ok(Json(result))
}

pub async fn get_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> AppResult<Json<EntryDetail>> {
    let entry = sqlx::query_as::<_, DailyEntry>("SELECT * FROM daily_entries WHERE id = $1")
        .bind(entry_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound("Entry not found".into()))?;

    let attributes = sqlx::query_as::<_, EntryAttribute>(
        "SELECT * FROM entry_attributes WHERE entry_id = $1 ORDER BY created_at ASC",
    )
    .bind(entry_id)
    .fetch_all(&state.db)
    .await?;

    let entry_notes = sqlx::query_as::<_, EntryNote>(
        "SELECT * FROM entry_notes WHERE entry_id = $1 ORDER BY created_at ASC",
    )
    .bind(entry_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(EntryDetail {
        entry,
        attributes,
        entry_notes,
    }))
}

pub async fn set_visibility(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    Json(body): Json<SetVisibilityRequest>,
) -> AppResult<Json<DailyEntry>> {
    let visibility = Visibility::parse(&body.visibility).map_err(AppError::Validation)?;

    let entry = sqlx::query_as::<_, DailyEntry>(
        "UPDATE daily_entries SET visibility = $2 WHERE id = $1 RETURNING *",
    )
    .bind(entry_id)
    .bind(visibility)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("Entry not found".into()))?;

    Ok(Json(entry))
}

/// Append a note to an entry. Notes are never updated or reordered.
pub async fn add_note(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    Json(body): Json<AddNoteRequest>,
) -> AppResult<Json<EntryNote>> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let content = body.content.trim();
    if content.is_empty() {
        return Err(AppError::Validation("Note content must not be empty".into()));
    }

    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM daily_entries WHERE id = $1")
        .bind(entry_id)
        .fetch_one(&state.db)
        .await?;
    if exists == 0 {
        return Err(AppError::NotFound("Entry not found".into()));
    }

    let note = sqlx::query_as::<_, EntryNote>(
        r#"
        INSERT INTO entry_notes (id, entry_id, content)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(entry_id)
    .bind(content)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(note))
}

pub async fn delete_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    // Attributes and notes go with it via ON DELETE CASCADE.
    let result = sqlx::query("DELETE FROM daily_entries WHERE id = $1")
        .bind(entry_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Entry not found".into()));
    }

    Ok(Json(serde_json::json!({ "deleted": true })))
}
