//! Gateway between the therapist dashboard / patient chatbot and the CRM and
//! language-model providers behind them.

use axum::{http::HeaderValue, Extension, Router};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tower_http::cors::{Any, CorsLayer};

pub mod claude_client;
pub mod config;
pub mod crm_client;
pub mod db;
pub mod error;
pub mod handlers;
pub mod integrations;
pub mod middleware;
pub mod models;
pub mod openai_client;
pub mod security;
pub mod services;
pub mod store;

use config::Config;
use integrations::{AiProvider, CrmGateway};
use middleware::RateLimiter;
use security::{FieldCipher, TokenService};
use services::CrisisDetector;
use store::Store;

/// Requests per minute allowed on the authentication endpoints.
pub const AUTH_RATE_LIMIT_PER_MINUTE: u32 = 10;

pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub ai: Option<Arc<dyn AiProvider>>,
    pub crm: Option<Arc<dyn CrmGateway>>,
    pub cipher: FieldCipher,
    pub tokens: TokenService,
    pub rate_limiter: RateLimiter,
    pub auth_limiter: RateLimiter,
    pub crisis: CrisisDetector,
    /// Hash verified against when a login email is unknown, so misses cost the
    /// same bcrypt work as wrong passwords. Built on first use at the configured cost.
    pub decoy_hash: OnceCell<String>,
}

impl AppState {
    /// Derives the cipher, token service, limiters and crisis detector from
    /// `config`. Fails only if the configured crisis keywords do not compile.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        ai: Option<Arc<dyn AiProvider>>,
        crm: Option<Arc<dyn CrmGateway>>,
    ) -> Result<Self, regex::Error> {
        let crisis = CrisisDetector::new(&config.crisis.keywords)?;
        Ok(Self {
            cipher: FieldCipher::derive(&config.patient_data_encryption_key),
            tokens: TokenService::from_config(&config),
            rate_limiter: RateLimiter::from_settings(&config.rate_limits),
            auth_limiter: RateLimiter::per_minute(AUTH_RATE_LIMIT_PER_MINUTE),
            crisis,
            decoy_hash: OnceCell::new(),
            config: Arc::new(config),
            store,
            ai,
            crm,
        })
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.is_development() && config.cors_allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }
    if config.is_production() && config.cors_allowed_origins.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS is empty; browser clients will be refused");
    }
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(handlers::health::health_routes())
        .merge(handlers::auth::auth_routes())
        .merge(handlers::chat::chat_routes())
        .merge(handlers::therapist::therapist_routes())
        .merge(handlers::chatbot_config::chatbot_config_routes())
        .layer(axum::middleware::from_fn(middleware::rate_limit::rate_limit_middleware))
        .layer(axum::middleware::from_fn(middleware::logging::request_logging_middleware))
        .layer(cors_layer(&state.config))
        .layer(Extension(state))
}
