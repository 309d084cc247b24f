pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod search_client;
pub mod seating;
pub mod services;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;

use crate::services::payment::PaymentGatewayClient;

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub db: database::Database,
    pub redis: redis_client::RedisClient,
    pub cache: cache::CacheService,
    pub config: config::Config,
    pub search_client: search_client::SearchClient,
    pub payments: PaymentGatewayClient,
}

impl AppState {
    /// Connects to Postgres and Redis and applies pending migrations.
    pub async fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let db = database::Database::connect(&config.database).await?;
        tracing::info!("Database connected");

        db.run_migrations().await?;

        let redis = redis_client::RedisClient::connect(&config.redis.url).await?;
        tracing::info!("Redis connected");

        let cache = cache::CacheService::new(redis.clone(), db.clone());
        let search_client = search_client::SearchClient::new(db.pool.clone());
        let payments = PaymentGatewayClient::from_config(&config.payment, &config.circuit_breaker)?;
        if payments.is_simulated() {
            tracing::warn!("PAYMENT_GATEWAY_URL not set, mobile money payments are simulated");
        }

        Ok(Arc::new(Self {
            db,
            redis,
            cache,
            config,
            search_client,
            payments,
        }))
    }
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = state.db.ping().await.is_ok();
    let redis = state.redis.ping().await.is_ok();
    let status = if database && redis {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "success": status == StatusCode::OK,
            "database": database,
            "redis": redis,
            "payment_circuit": state.payments.circuit_state(),
        })),
    )
}

/// Application router without the outer layers.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Bus Booking API v1.0" }))
        .route("/health", get(health))
        .nest("/api", controllers::routes())
        .with_state(state)
}
