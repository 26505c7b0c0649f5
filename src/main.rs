use axum::{
    routing::{delete, get, patch, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod config;
mod db;
mod error;
mod handlers;
mod models;
mod services;

use config::Config;
use services::token_store::TokenStore;
use services::whoop_client::WhoopClient;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub whoop: WhoopClient,
    pub tokens: TokenStore,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lifeof_api=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    let config = Arc::new(Config::from_env());

    // Database
    let db = db::create_pool(&config.database_url).await;

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations applied");

    let whoop = WhoopClient::new(&config);
    let tokens = TokenStore::new(db.clone());

    let state = AppState {
        db,
        config: config.clone(),
        whoop,
        tokens,
    };

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/readyz", get(handlers::health::readyz))
        // Journal entries
        .route("/entries", post(handlers::entries::upsert_entry))
        .route("/entries", get(handlers::entries::list_entries))
        .route("/entries/:id", get(handlers::entries::get_entry))
        .route("/entries/:id", delete(handlers::entries::delete_entry))
        .route(
            "/entries/:id/visibility",
            patch(handlers::entries::set_visibility),
        )
        .route("/entries/:id/notes", post(handlers::entries::add_note))
        // Attribute definitions
        .route(
            "/attribute-definitions",
            get(handlers::attribute_definitions::list_definitions),
        )
        .route(
            "/attribute-definitions",
            post(handlers::attribute_definitions::create_definition),
        )
        .route(
            "/attribute-definitions/:id",
            put(handlers::attribute_definitions::update_definition),
        )
        .route(
            "/attribute-definitions/:id",
            delete(handlers::attribute_definitions::delete_definition),
        )
        // WHOOP integration
        .route("/whoop/auth", get(handlers::whoop::auth_url))
        .route("/whoop/callback", get(handlers::whoop::callback))
        .route("/whoop/status", get(handlers::whoop::status))
        .route(
            "/whoop/sync/latest",
            get(handlers::whoop::sync_latest).post(handlers::whoop::sync_latest),
        )
        .route("/whoop/sync/full", post(handlers::whoop::sync_full))
        // Charts
        .route("/charts/overview", get(handlers::charts::overview))
        .layer(
            CorsLayer::new()
                .allow_origin(
                    config
                        .frontend_url
                        .parse::<axum::http::HeaderValue>()
                        .expect("FRONTEND_URL must be a valid origin"),
                )
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::PATCH,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::AUTHORIZATION,
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::ACCEPT,
                ]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.listen_addr();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listen address");
    axum::serve(listener, app)
        .await
        .expect("Server error");
}
