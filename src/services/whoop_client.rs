//! WHOOP API client: OAuth2 token endpoints and cursor-paginated data
//! fetching.
//!
//! Pagination walks follow a partial-success policy: a non-2xx response
//! mid-walk stops the walk and returns everything accumulated so far, with
//! the stopping error attached for the caller to log.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// WHOOP pagination envelope.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub records: Vec<T>,
    pub next_token: Option<String>,
}

/// Result of a full pagination walk. `stopped_by` is set when the walk was
/// cut short by a provider error; the records gathered before the failure
/// are still returned.
#[derive(Debug)]
pub struct FetchOutcome<T> {
    pub records: Vec<T>,
    pub stopped_by: Option<String>,
}

/// Token endpoint response for both the code exchange and refresh grants.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

// ============================================================================
// Provider record shapes (nested JSON, normalized in services::normalize)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct WhoopRecovery {
    pub cycle_id: Option<i64>,
    pub created_at: Option<String>,
    pub score: Option<RecoveryScore>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryScore {
    pub recovery_score: Option<f64>,
    pub resting_heart_rate: Option<f64>,
    pub hrv_rmssd_milli: Option<f64>,
    pub spo2_percentage: Option<f64>,
    pub skin_temp_celsius: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhoopSleep {
    pub id: String,
    pub cycle_id: Option<i64>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub score: Option<SleepScore>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SleepScore {
    pub sleep_performance_percentage: Option<f64>,
    pub sleep_efficiency_percentage: Option<f64>,
    pub respiratory_rate: Option<f64>,
    pub stage_summary: Option<SleepStageSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SleepStageSummary {
    pub total_rem_sleep_time_milli: Option<f64>,
    pub total_slow_wave_sleep_time_milli: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhoopWorkout {
    pub id: String,
    pub sport_name: Option<String>,
    pub end: Option<String>,
    pub score: Option<WorkoutScore>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkoutScore {
    pub strain: Option<f64>,
    pub average_heart_rate: Option<f64>,
    pub max_heart_rate: Option<f64>,
    pub kilojoule: Option<f64>,
    pub distance_meter: Option<f64>,
    pub altitude_gain_meter: Option<f64>,
}

// ============================================================================
// Client
// ============================================================================

/// Data-record endpoints, relative to the API base.
pub const RECOVERY_ENDPOINT: &str = "recovery";
pub const SLEEP_ENDPOINT: &str = "activity/sleep";
pub const WORKOUT_ENDPOINT: &str = "activity/workout";

const AUTH_SCOPES: &str =
    "offline read:recovery read:cycles read:sleep read:workout read:profile read:body_measurement";

#[derive(Clone)]
pub struct WhoopClient {
    http: reqwest::Client,
    auth_url: String,
    token_url: String,
    api_base: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl WhoopClient {
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.http_timeout_secs))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            auth_url: config.whoop_auth_url.clone(),
            token_url: config.whoop_token_url.clone(),
            api_base: config.whoop_api_base.clone(),
            client_id: config.whoop_client_id.clone(),
            client_secret: config.whoop_client_secret.clone(),
            redirect_uri: config.whoop_redirect_uri.clone(),
        }
    }

    /// Build the authorization redirect URL with a fresh random state.
    pub fn authorize_url(&self) -> (String, String) {
        let state: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(22)
            .map(char::from)
            .collect();
        let url = format!(
            "{}?client_id={}&response_type=code&scope={}&redirect_uri={}&state={}",
            self.auth_url,
            self.client_id,
            urlencoding::encode(AUTH_SCOPES),
            urlencoding::encode(&self.redirect_uri),
            state,
        );
        (url, state)
    }

    /// Exchange an authorization code for a token bundle.
    pub async fn exchange_code(&self, code: &str) -> AppResult<TokenResponse> {
        self.token_grant(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ])
        .await
    }

    /// Exchange a refresh token for a new bundle.
    pub async fn refresh_token(&self, refresh_token: &str) -> AppResult<TokenResponse> {
        self.token_grant(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", "offline"),
        ])
        .await
    }

    async fn token_grant(&self, form: &[(&str, &str)]) -> AppResult<TokenResponse> {
        let response = self
            .http
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::Auth(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "WHOOP token grant rejected");
            return Err(AppError::Auth(format!(
                "Token grant failed with status {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Auth(format!("Failed to parse token response: {e}")))
    }

    /// Fetch one page of records. A 401 is surfaced as `AppError::Auth` so
    /// the caller can refresh once and retry; other non-2xx statuses are
    /// `AppError::Upstream`.
    pub async fn fetch_page<T: DeserializeOwned>(
        &self,
        access_token: &str,
        endpoint: &str,
        limit: u32,
        next_token: Option<&str>,
    ) -> AppResult<Page<T>> {
        let url = page_url(&self.api_base, endpoint, limit, next_token);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("WHOOP request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AppError::Auth("WHOOP access token rejected".into()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!("WHOOP HTTP {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("WHOOP JSON parse error: {e}")))
    }

    /// Walk every page of an endpoint, preserving provider order. Stops on
    /// the first error and returns what was accumulated up to that point.
    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        access_token: &str,
        endpoint: &str,
        limit: u32,
    ) -> FetchOutcome<T> {
        walk_pages(|next| async move {
            self.fetch_page(access_token, endpoint, limit, next.as_deref())
                .await
        })
        .await
    }
}

/// Drive a cursor walk over any page source. Independent of the HTTP client
/// so the accumulation policy is testable on its own.
pub async fn walk_pages<T, F, Fut>(mut fetch_page: F) -> FetchOutcome<T>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: std::future::Future<Output = AppResult<Page<T>>>,
{
    let mut records = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let page = match fetch_page(next_token.clone()).await {
            Ok(page) => page,
            Err(e) => {
                return FetchOutcome {
                    records,
                    stopped_by: Some(e.to_string()),
                };
            }
        };

        records.extend(page.records);
        match page.next_token {
            Some(token) => next_token = Some(token),
            None => break,
        }
    }

    FetchOutcome {
        records,
        stopped_by: None,
    }
}

/// Page URL for an endpoint, with the continuation token when present.
pub fn page_url(api_base: &str, endpoint: &str, limit: u32, next_token: Option<&str>) -> String {
    match next_token {
        Some(token) => format!(
            "{api_base}/{endpoint}?limit={limit}&nextToken={}",
            urlencoding::encode(token)
        ),
        None => format!("{api_base}/{endpoint}?limit={limit}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_url_first_page() {
        assert_eq!(
            page_url("https://api.example.com/v2", "recovery", 25, None),
            "https://api.example.com/v2/recovery?limit=25"
        );
    }

    #[test]
    fn test_page_url_with_continuation() {
        assert_eq!(
            page_url("https://api.example.com/v2", "activity/sleep", 10, Some("abc==")),
            "https://api.example.com/v2/activity/sleep?limit=10&nextToken=abc%3D%3D"
        );
    }

    #[test]
    fn test_page_deserializes_missing_records() {
        let page: Page<WhoopWorkout> = serde_json::from_str(r#"{"next_token":null}"#).unwrap();
        assert!(page.records.is_empty());
        assert!(page.next_token.is_none());
    }

    #[test]
    fn test_recovery_record_deserializes_nested_score() {
        let raw = r#"{
            "cycle_id": 93845,
            "created_at": "2025-11-09T02:28:43.376Z",
            "score": { "recovery_score": 61.0, "resting_heart_rate": 55.0 }
        }"#;
        let rec: WhoopRecovery = serde_json::from_str(raw).unwrap();
        assert_eq!(rec.cycle_id, Some(93845));
        let score = rec.score.unwrap();
        assert_eq!(score.recovery_score, Some(61.0));
        assert!(score.hrv_rmssd_milli.is_none());
    }

    #[tokio::test]
    async fn test_walk_pages_accumulates_in_provider_order() {
        let mut call = 0;
        let seen_tokens = std::cell::RefCell::new(Vec::new());
        let outcome: FetchOutcome<i32> = walk_pages(|next| {
            call += 1;
            seen_tokens.borrow_mut().push(next.clone());
            let page = match call {
                1 => Page {
                    records: vec![1, 2],
                    next_token: Some("t1".into()),
                },
                2 => Page {
                    records: vec![3],
                    next_token: Some("t2".into()),
                },
                _ => Page {
                    records: vec![4],
                    next_token: None,
                },
            };
            async move { Ok(page) }
        })
        .await;

        assert_eq!(outcome.records, vec![1, 2, 3, 4]);
        assert!(outcome.stopped_by.is_none());
        assert_eq!(
            *seen_tokens.borrow(),
            vec![None, Some("t1".to_string()), Some("t2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_walk_pages_keeps_partial_results_on_failure() {
        let mut call = 0;
        let outcome: FetchOutcome<i32> = walk_pages(|_next| {
            call += 1;
            let result = match call {
                1 => Ok(Page {
                    records: vec![10, 11],
                    next_token: Some("t1".into()),
                }),
                _ => Err(crate::error::AppError::Upstream("WHOOP HTTP 500".into())),
            };
            async move { result }
        })
        .await;

        // page 1 survives the page 2 failure
        assert_eq!(outcome.records, vec![10, 11]);
        let stopped_by = outcome.stopped_by.unwrap();
        assert!(stopped_by.contains("500"), "got: {stopped_by}");
    }

    #[test]
    fn test_token_response_without_refresh_token() {
        let raw = r#"{"access_token":"at","expires_in":3600,"token_type":"bearer"}"#;
        let tok: TokenResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(tok.access_token, "at");
        assert!(tok.refresh_token.is_none());
        assert_eq!(tok.expires_in, 3600);
    }
}
