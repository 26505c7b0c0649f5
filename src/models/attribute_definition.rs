use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::models::entry::DayPeriod;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AttributeDefinition {
    pub id: Uuid,
    pub name: String,
    pub label: String,
    pub unit: Option<String>,
    pub category: Option<String>,
    pub active: bool,
    pub default_visible: bool,
    pub weight: i32,
    pub day_period: DayPeriod,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAttributeDefinitionRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,
    #[validate(length(min = 1, max = 200, message = "Label must be 1-200 characters"))]
    pub label: String,
    pub unit: Option<String>,
    pub category: Option<String>,
    pub active: Option<bool>,
    pub default_visible: Option<bool>,
    pub weight: Option<i32>,
    /// "am" or "pm", case-insensitive. Default: "am"
    pub day_period: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAttributeDefinitionRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub label: Option<String>,
    pub unit: Option<String>,
    pub category: Option<String>,
    pub active: Option<bool>,
    pub default_visible: Option<bool>,
    pub weight: Option<i32>,
    pub day_period: Option<String>,
}
