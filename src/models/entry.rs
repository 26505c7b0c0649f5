use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "day_period", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DayPeriod {
    Am,
    Pm,
}

impl DayPeriod {
    /// Case-insensitive parse, normalized to lowercase storage values.
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_lowercase().as_str() {
            "am" => Ok(Self::Am),
            "pm" => Ok(Self::Pm),
            _ => Err("day_period must be 'am' or 'pm'".into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "visibility", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            _ => Err("visibility must be 'public' or 'private'".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DailyEntry {
    pub id: Uuid,
    pub date: NaiveDate,
    pub day_period: DayPeriod,
    pub visibility: Visibility,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EntryAttribute {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub name: String,
    pub value: Option<String>,
    pub unit: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EntryNote {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AttributeInput {
    #[validate(length(max = 200, message = "Attribute name too long"))]
    pub name: String,
    pub value: Option<String>,
    pub unit: Option<String>,
    #[validate(length(max = 2000, message = "Attribute note too long"))]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpsertEntryRequest {
    pub date: NaiveDate,
    pub day_period: String,
    #[serde(default = "default_visibility")]
    pub visibility: String,
    #[validate(length(max = 10000, message = "Notes must be under 10000 characters"))]
    pub notes: Option<String>,
    #[serde(default)]
    #[validate]
    pub attributes: Vec<AttributeInput>,
    /// When false, writing to an already-populated (date, day_period) pair
    /// is a conflict instead of a replace.
    #[serde(default)]
    pub overwrite: bool,
}

fn default_visibility() -> String {
    "private".into()
}

impl UpsertEntryRequest {
    /// Validate the domain fields before any write. Returns the normalized
    /// period/visibility pair so handlers never re-parse.
    pub fn validate_domain(&self) -> Result<(DayPeriod, Visibility), String> {
        let period = DayPeriod::parse(&self.day_period)?;
        let visibility = Visibility::parse(&self.visibility)?;
        for attr in &self.attributes {
            if attr.name.trim().is_empty() {
                return Err("Attribute name must not be empty".into());
            }
        }
        Ok((period, visibility))
    }
}

#[derive(Debug, Deserialize)]
pub struct EntryQuery {
    pub visibility: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddNoteRequest {
    #[validate(length(max = 10000, message = "Note content too long"))]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct SetVisibilityRequest {
    pub visibility: String,
}

/// List projection: entry plus its aggregated attributes.
#[derive(Debug, Serialize)]
pub struct EntryWithAttributes {
    #[serde(flatten)]
    pub entry: DailyEntry,
    pub attributes: Vec<EntryAttribute>,
}

/// Detail projection: entry, attributes, and the append-only note list.
#[derive(Debug, Serialize)]
pub struct EntryDetail {
    #[serde(flatten)]
    pub entry: DailyEntry,
    pub attributes: Vec<EntryAttribute>,
    pub entry_notes: Vec<EntryNote>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_period_parse_case_insensitive() {
        assert_eq!(DayPeriod::parse("am").unwrap(), DayPeriod::Am);
        assert_eq!(DayPeriod::parse("PM").unwrap(), DayPeriod::Pm);
        assert_eq!(DayPeriod::parse(" Am ").unwrap(), DayPeriod::Am);
    }

    #[test]
    fn test_day_period_parse_rejects_garbage() {
        assert!(DayPeriod::parse("XY").is_err());
        assert!(DayPeriod::parse("").is_err());
        assert!(DayPeriod::parse("a.m.").is_err());
    }

    #[test]
    fn test_visibility_parse() {
        assert_eq!(Visibility::parse("Public").unwrap(), Visibility::Public);
        assert_eq!(Visibility::parse("private").unwrap(), Visibility::Private);
        assert!(Visibility::parse("hidden").is_err());
    }

    #[test]
    fn test_validate_domain_rejects_blank_attribute_name() {
        let req: UpsertEntryRequest = serde_json::from_str(
            r#"{"date":"2025-11-08","day_period":"am","attributes":[{"name":"   "}]}"#,
        )
        .unwrap();
        assert!(req.validate_domain().is_err());
    }

    #[test]
    fn test_upsert_request_defaults() {
        let req: UpsertEntryRequest =
            serde_json::from_str(r#"{"date":"2025-11-08","day_period":"pm"}"#).unwrap();
        assert_eq!(req.visibility, "private");
        assert!(req.attributes.is_empty());
        assert!(!req.overwrite);
        let (period, vis) = req.validate_domain().unwrap();
        assert_eq!(period, DayPeriod::Pm);
        assert_eq!(vis, Visibility::Private);
    }
}
