use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::attribute_definition::{
    AttributeDefinition, CreateAttributeDefinitionRequest, UpdateAttributeDefinitionRequest,
};
use crate::models::entry::DayPeriod;
use crate::AppState;

pub async fn list_definitions(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<AttributeDefinition>>> {
    let definitions = sqlx::query_as::<_, AttributeDefinition>(
        r#"
        SELECT * FROM attribute_definitions
        ORDER BY category, day_period, label
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(definitions))
}

pub async fn create_definition(
    State(state): State<AppState>,
    Json(body): Json<CreateAttributeDefinitionRequest>,
) -> AppResult<Json<AttributeDefinition>> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let day_period = match body.day_period.as_deref() {
        Some(raw) => DayPeriod::parse(raw).map_err(AppError::Validation)?,
        None => DayPeriod::Am,
    };

    let definition = sqlx::query_as::<_, AttributeDefinition>(
        r#"
        INSERT INTO attribute_definitions
            (id, name, label, unit, category, active, default_visible, weight, day_period)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(body.name.trim())
    .bind(body.label.trim())
    .bind(&body.unit)
    .bind(&body.category)
    .bind(body.active.unwrap_or(true))
    .bind(body.default_visible.unwrap_or(true))
    .bind(body.weight.unwrap_or(1))
    .bind(day_period)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(definition))
}

pub async fn update_definition(
    State(state): State<AppState>,
    Path(definition_id): Path<Uuid>,
    Json(body): Json<UpdateAttributeDefinitionRequest>,
) -> AppResult<Json<AttributeDefinition>> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let day_period = match body.day_period.as_deref() {
        Some(raw) => Some(DayPeriod::parse(raw).map_err(AppError::Validation)?),
        None => None,
    };

    let definition = sqlx::query_as::<_, AttributeDefinition>(
        r#"
        UPDATE attribute_definitions SET
            name = COALESCE($2, name),
            label = COALESCE($3, label),
            unit = COALESCE($4, unit),
            category = COALESCE($5, category),
            active = COALESCE($6, active),
            default_visible = COALESCE($7, default_visible),
            weight = COALESCE($8, weight),
            day_period = COALESCE($9, day_period)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(definition_id)
    .bind(&body.name)
    .bind(&body.label)
    .bind(&body.unit)
    .bind(&body.category)
    .bind(body.active)
    .bind(body.default_visible)
    .bind(body.weight)
    .bind(day_period)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("Attribute definition not found".into()))?;

    Ok(Json(definition))
}

pub async fn delete_definition(
    State(state): State<AppState>,
    Path(definition_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM attribute_definitions WHERE id = $1")
        .bind(definition_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Attribute definition not found".into()));
    }

    Ok(Json(serde_json::json!({ "deleted": definition_id })))
}
