use axum::{
    extract::Extension,
    http::StatusCode,
    response::Json,
    routing::{get, Router},
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::AppState;

pub fn health_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/detailed", get(health_detailed))
}

async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment.to_string(),
        "timestamp": Utc::now(),
    }))
}

/// Component status. Returns 503 when the store cannot be reached.
async fn health_detailed(Extension(state): Extension<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let database = match state.store.ping().await {
        Ok(()) => json!({ "status": "healthy" }),
        Err(e) => {
            tracing::error!(error = %e, "Store health check failed");
            json!({ "status": "unhealthy" })
        }
    };
    let healthy = database["status"] == "healthy";

    let body = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment.to_string(),
        "timestamp": Utc::now(),
        "components": {
            "database": database,
            "ai_provider": {
                "configured": state.ai.is_some(),
                "name": state.ai.as_ref().map(|ai| ai.name()),
            },
            "crm": { "configured": state.crm.is_some() },
            "cache": { "configured": state.config.redis_url.is_some() },
        },
    });

    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body))
}
