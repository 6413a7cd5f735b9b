use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Extension},
    http::StatusCode,
    response::Json,
    routing::{get, post, Router},
};
use chrono::Utc;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use super::{client_ip, validated};
use crate::error::ApiError;
use crate::middleware::auth::{auth_middleware, AuthenticatedTherapist};
use crate::middleware::rate_limit::strict_rate_limit_middleware;
use crate::models::audit::{AuditEvent, AuditOutcome};
use crate::models::auth::{AuthResponse, LoginRequest, RefreshRequest, RefreshResponse, RegisterRequest, TokenType};
use crate::models::therapist::{AccountStatus, Therapist, TherapistResponse, TherapistRole};
use crate::services::audit;
use crate::AppState;

pub fn auth_routes() -> Router {
    let public = Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .layer(axum::middleware::from_fn(strict_rate_limit_middleware));

    let protected = Router::new()
        .route("/auth/verify", get(verify_token))
        .route_layer(axum::middleware::from_fn(auth_middleware));

    public.merge(protected)
}

async fn hash_password(password: String, cost: u32) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| ApiError::Internal(format!("hash task failed: {}", e)))?
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))
}

async fn verify_password(password: String, hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| ApiError::Internal(format!("verify task failed: {}", e)))?
        .map_err(|e| ApiError::Internal(format!("password verification failed: {}", e)))
}

async fn decoy_hash(state: &AppState) -> Result<String, ApiError> {
    state
        .decoy_hash
        .get_or_try_init(|| hash_password(Uuid::new_v4().to_string(), state.config.bcrypt_cost))
        .await
        .cloned()
}

fn token_pair(state: &AppState, therapist: &Therapist, message: &str) -> Result<AuthResponse, ApiError> {
    Ok(AuthResponse {
        success: true,
        message: message.to_string(),
        therapist: TherapistResponse::from(therapist),
        access_token: state.tokens.issue(therapist, TokenType::Access)?,
        refresh_token: state.tokens.issue(therapist, TokenType::Refresh)?,
        token_type: "bearer",
        expires_in: state.tokens.access_ttl_secs(),
    })
}

async fn register(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let payload = validated(payload)?;
    let email = payload.email.trim().to_lowercase();

    if state.store.find_therapist_by_email(&email).await?.is_some() {
        return Err(ApiError::Conflict("An account with this email already exists".to_string()));
    }

    let password_hash = hash_password(payload.password, state.config.bcrypt_cost).await?;
    let now = Utc::now();
    let therapist = Therapist {
        id: Uuid::new_v4(),
        email,
        password_hash,
        first_name: payload.first_name.trim().to_string(),
        last_name: payload.last_name.trim().to_string(),
        role: TherapistRole::Therapist,
        practice_id: payload.practice_id,
        status: AccountStatus::Active,
        created_at: now,
        updated_at: now,
        last_login_at: None,
    };
    state.store.create_therapist(&therapist).await?;

    tracing::info!(therapist_id = %therapist.id, "Therapist registered");
    audit::record(
        state.store.as_ref(),
        AuditEvent::new(therapist.id.to_string(), "register", "therapist", AuditOutcome::Success)
            .ip(client_ip(&connect_info)),
    )
    .await;

    let response = token_pair(&state, &therapist, "Registration successful")?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn login(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let payload = validated(payload)?;
    let email = payload.email.trim().to_lowercase();
    let ip = client_ip(&connect_info);
    let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());

    let Some(mut therapist) = state.store.find_therapist_by_email(&email).await? else {
        verify_password(payload.password, decoy_hash(&state).await?).await?;
        tracing::warn!("Login attempt for unknown email");
        return Err(invalid());
    };

    if !verify_password(payload.password, therapist.password_hash.clone()).await? {
        tracing::warn!(therapist_id = %therapist.id, "Failed login attempt");
        audit::record(
            state.store.as_ref(),
            AuditEvent::new(therapist.id.to_string(), "login", "therapist", AuditOutcome::Failure).ip(ip),
        )
        .await;
        return Err(invalid());
    }

    if !therapist.is_active() {
        audit::record(
            state.store.as_ref(),
            AuditEvent::new(therapist.id.to_string(), "login", "therapist", AuditOutcome::Denied).ip(ip),
        )
        .await;
        return Err(ApiError::Forbidden("Account is disabled".to_string()));
    }

    let now = Utc::now();
    state.store.record_login(therapist.id, now).await?;
    therapist.last_login_at = Some(now);

    audit::record(
        state.store.as_ref(),
        AuditEvent::new(therapist.id.to_string(), "login", "therapist", AuditOutcome::Success).ip(ip),
    )
    .await;

    Ok(Json(token_pair(&state, &therapist, "Login successful")?))
}

async fn refresh(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let payload = validated(payload)?;
    let claims = state.tokens.verify(payload.refresh_token.trim(), TokenType::Refresh)?;

    let therapist_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| ApiError::Unauthorized("Invalid or expired token".to_string()))?;
    let therapist = state
        .store
        .get_therapist(therapist_id)
        .await?
        .filter(Therapist::is_active)
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired token".to_string()))?;

    Ok(Json(RefreshResponse {
        success: true,
        access_token: state.tokens.issue(&therapist, TokenType::Access)?,
        token_type: "bearer",
        expires_in: state.tokens.access_ttl_secs(),
    }))
}

async fn verify_token(Extension(auth): Extension<AuthenticatedTherapist>) -> Json<Value> {
    Json(json!({
        "success": true,
        "therapist": TherapistResponse::from(&auth.therapist),
    }))
}
