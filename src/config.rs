use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub frontend_url: String,

    pub whoop_client_id: String,
    pub whoop_client_secret: String,
    pub whoop_redirect_uri: String,
    pub whoop_auth_url: String,
    pub whoop_token_url: String,
    pub whoop_api_base: String,

    /// Fixed offset applied to provider UTC timestamps to derive the local
    /// calendar date. Not DST-aware; downstream grouping assumes this exact
    /// boundary.
    pub local_utc_offset_hours: i32,

    pub sync_page_limit: u32,
    pub sync_chunk_size: usize,
    pub sync_max_retries: u32,
    pub sync_retry_base_ms: u64,
    pub sync_retry_jitter_ms: u64,

    pub http_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .expect("PORT must be a number"),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),

            whoop_client_id: env::var("WHOOP_CLIENT_ID").unwrap_or_else(|_| String::new()),
            whoop_client_secret: env::var("WHOOP_CLIENT_SECRET")
                .unwrap_or_else(|_| String::new()),
            whoop_redirect_uri: env::var("WHOOP_REDIRECT_URI").unwrap_or_else(|_| String::new()),
            whoop_auth_url: env::var("WHOOP_AUTH_URL")
                .unwrap_or_else(|_| "https://api.prod.whoop.com/oauth/oauth2/auth".into()),
            whoop_token_url: env::var("WHOOP_TOKEN_URL")
                .unwrap_or_else(|_| "https://api.prod.whoop.com/oauth/oauth2/token".into()),
            whoop_api_base: env::var("WHOOP_API_BASE")
                .unwrap_or_else(|_| "https://api.prod.whoop.com/developer/v2".into()),

            local_utc_offset_hours: env::var("LOCAL_UTC_OFFSET_HOURS")
                .unwrap_or_else(|_| "-5".into())
                .parse()
                .expect("LOCAL_UTC_OFFSET_HOURS must be a number"),

            sync_page_limit: env::var("SYNC_PAGE_LIMIT")
                .unwrap_or_else(|_| "25".into())
                .parse()
                .unwrap_or(25),
            sync_chunk_size: env::var("SYNC_CHUNK_SIZE")
                .unwrap_or_else(|_| "200".into())
                .parse()
                .unwrap_or(200),
            sync_max_retries: env::var("SYNC_MAX_RETRIES")
                .unwrap_or_else(|_| "3".into())
                .parse()
                .unwrap_or(3),
            sync_retry_base_ms: env::var("SYNC_RETRY_BASE_MS")
                .unwrap_or_else(|_| "500".into())
                .parse()
                .unwrap_or(500),
            sync_retry_jitter_ms: env::var("SYNC_RETRY_JITTER_MS")
                .unwrap_or_else(|_| "400".into())
                .parse()
                .unwrap_or(400),

            http_timeout_secs: env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".into())
                .parse()
                .unwrap_or(30),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
