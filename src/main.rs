use std::net::SocketAddr;
use std::sync::Arc;

use engage_gateway::claude_client::ClaudeClient;
use engage_gateway::config::{AiProviderKind, Config, StoreBackend};
use engage_gateway::crm_client::McpCrmClient;
use engage_gateway::integrations::{AiProvider, CrmGateway};
use engage_gateway::openai_client::OpenAiClient;
use engage_gateway::services::spawn_retention_task;
use engage_gateway::store::{MemoryStore, PgStore, Store};
use engage_gateway::{build_router, db, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging()?;

    let config = Config::from_env().map_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        e
    })?;
    log_configuration(&config);

    let store: Arc<dyn Store> = match config.store_backend {
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or("DATABASE_URL is required for the postgres store")?;
            let pool = db::create_pool(url, config.database_pool_size).await?;
            tracing::info!("Connected to PostgreSQL");
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let ai = build_ai_provider(&config);
    let crm: Option<Arc<dyn CrmGateway>> = match McpCrmClient::from_settings(&config.crm) {
        Some(client) => {
            tracing::info!(url = %config.crm.mcp_server_url, "CRM bridge configured");
            Some(Arc::new(client))
        }
        None => {
            tracing::warn!("GHL_API_KEY / GHL_LOCATION_ID not set. CRM features will be disabled.");
            None
        }
    };

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState::new(config, store, ai, crm)?);

    spawn_retention_task(state.store.clone(), state.config.clone());

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

fn build_ai_provider(config: &Config) -> Option<Arc<dyn AiProvider>> {
    let ai = &config.ai;
    match ai.provider {
        AiProviderKind::Anthropic => match &ai.anthropic_api_key {
            Some(key) => {
                tracing::info!(model = %ai.model, "Initializing Claude AI client...");
                Some(Arc::new(ClaudeClient::new(key.clone(), ai.model.clone(), ai.timeout_secs)))
            }
            None => {
                tracing::warn!("ANTHROPIC_API_KEY not found. Chat replies will be unavailable.");
                None
            }
        },
        AiProviderKind::OpenAi => match &ai.openai_api_key {
            Some(key) => {
                tracing::info!(model = %ai.model, base_url = %ai.openai_base_url, "Initializing OpenAI client...");
                Some(Arc::new(OpenAiClient::new(key, &ai.model, &ai.openai_base_url, ai.timeout_secs)))
            }
            None => {
                tracing::warn!("OPENAI_API_KEY not found. Chat replies will be unavailable.");
                None
            }
        },
    }
}

// Production-grade logging configuration
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,engage_gateway=trace,audit=info,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,engage_gateway=info,audit=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        // JSON logging for production (easier for log aggregation)
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init()?;

    tracing::info!("Engage gateway starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Build mode: {}", if cfg!(debug_assertions) { "development" } else { "production" });
    tracing::info!("Log level: {}", log_level);
    Ok(())
}

fn log_configuration(config: &Config) {
    let mark = |on: bool| if on { "✅" } else { "❌" };
    tracing::info!(
        "Configuration - Environment: {}, Store: {:?}, AI: {:?}, CRM: {}, Cache: {}, Consent required: {}",
        config.environment,
        config.store_backend,
        config.ai.provider,
        mark(config.crm.is_configured()),
        mark(config.redis_url.is_some()),
        config.patient_consent_required,
    );
    tracing::info!(
        per_minute = config.rate_limits.per_minute,
        per_hour = config.rate_limits.per_hour,
        per_day = config.rate_limits.per_day,
        "Rate limits"
    );
}
