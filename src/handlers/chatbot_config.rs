use axum::{
    extract::{rejection::JsonRejection, Extension},
    response::Json,
    routing::{get, Router},
};
use std::sync::Arc;

use super::validated;
use crate::error::ApiError;
use crate::middleware::auth::{auth_middleware, AuthenticatedTherapist};
use crate::models::audit::{AuditEvent, AuditOutcome};
use crate::models::chatbot::{ChatbotConfig, ChatbotConfigRecord, ChatbotConfigResponse};
use crate::services::audit;
use crate::AppState;

pub fn chatbot_config_routes() -> Router {
    Router::new()
        .route("/therapist/chatbot-config", get(get_config).put(put_config))
        .route_layer(axum::middleware::from_fn(auth_middleware))
}

async fn get_config(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedTherapist>,
) -> Result<Json<ChatbotConfigResponse>, ApiError> {
    let record = state
        .store
        .get_chatbot_config(auth.id())
        .await?
        .unwrap_or_else(|| ChatbotConfigRecord::default_for(auth.id()));

    Ok(Json(ChatbotConfigResponse { success: true, record }))
}

/// Replaces the whole configuration; the last write wins.
async fn put_config(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedTherapist>,
    payload: Result<Json<ChatbotConfig>, JsonRejection>,
) -> Result<Json<ChatbotConfigResponse>, ApiError> {
    let config = validated(payload)?;
    let record = state.store.put_chatbot_config(auth.id(), &config).await?;

    tracing::info!(therapist_id = %auth.id(), version = record.version, "Chatbot configuration updated");
    audit::record(
        state.store.as_ref(),
        AuditEvent::new(auth.id().to_string(), "update_chatbot_config", "chatbot_config", AuditOutcome::Success),
    )
    .await;

    Ok(Json(ChatbotConfigResponse { success: true, record }))
}
