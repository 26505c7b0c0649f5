//! Persistence and refresh of the single WHOOP OAuth bundle.
//!
//! The bundle lives in one overwritten row; there is no history and no
//! coordination between concurrent refreshes. Last writer wins; callers
//! tolerate a refresh response that is immediately stale.

use chrono::{Duration, Utc};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::models::whoop::WhoopToken;
use crate::services::whoop_client::{TokenResponse, WhoopClient};

#[derive(Clone)]
pub struct TokenStore {
    pool: PgPool,
}

impl TokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Last-saved bundle, or None before the first authorization.
    pub async fn load(&self) -> AppResult<Option<WhoopToken>> {
        let token = sqlx::query_as::<_, WhoopToken>("SELECT * FROM whoop_tokens WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(token)
    }

    /// Overwrite the bundle. Expiry is always recomputed from the returned
    /// lifetime at save time.
    pub async fn save(&self, response: &TokenResponse) -> AppResult<WhoopToken> {
        let expires_at = Utc::now() + Duration::seconds(response.expires_in);
        let token = sqlx::query_as::<_, WhoopToken>(
            r#"
            INSERT INTO whoop_tokens (id, access_token, refresh_token, expires_at, scope, token_type, updated_at)
            VALUES (1, $1, $2, $3, $4, $5, NOW())
            ON CONFLICT (id) DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                scope = EXCLUDED.scope,
                token_type = EXCLUDED.token_type,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(&response.access_token)
        .bind(&response.refresh_token)
        .bind(expires_at)
        .bind(&response.scope)
        .bind(&response.token_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(token)
    }

    /// Exchange the stored refresh token for a new bundle and persist it.
    pub async fn refresh(&self, client: &WhoopClient, token: &WhoopToken) -> AppResult<WhoopToken> {
        let refresh_token = token.refresh_token.as_deref().ok_or_else(|| {
            AppError::Auth("Missing refresh_token — reauthorize with offline scope".into())
        })?;
        let response = client.refresh_token(refresh_token).await?;
        self.save(&response).await
    }

    /// A usable access token: load, refresh if expired.
    pub async fn get_valid_token(&self, client: &WhoopClient) -> AppResult<String> {
        let token = self
            .load()
            .await?
            .ok_or_else(|| AppError::Auth("not authorized".into()))?;

        if token.is_expired(Utc::now()) {
            tracing::info!("WHOOP token expired, refreshing");
            let refreshed = self.refresh(client, &token).await?;
            return Ok(refreshed.access_token);
        }
        Ok(token.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bundle(expires_at: chrono::DateTime<Utc>) -> WhoopToken {
        WhoopToken {
            id: 1,
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_at,
            scope: Some("offline".into()),
            token_type: Some("bearer".into()),
            updated_at: Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_token_expired_at_and_after_expiry() {
        let expiry = Utc.with_ymd_and_hms(2025, 11, 9, 12, 0, 0).unwrap();
        let token = bundle(expiry);
        assert!(token.is_expired(expiry));
        assert!(token.is_expired(expiry + Duration::seconds(1)));
    }

    #[test]
    fn test_token_not_expired_before_expiry() {
        let expiry = Utc.with_ymd_and_hms(2025, 11, 9, 12, 0, 0).unwrap();
        let token = bundle(expiry);
        assert!(!token.is_expired(expiry - Duration::seconds(1)));
    }
}
