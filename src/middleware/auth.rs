use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
    Extension,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::auth::{Claims, TokenType};
use crate::models::therapist::Therapist;
use crate::AppState;

/// The verified caller, inserted into request extensions by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct AuthenticatedTherapist {
    pub therapist: Therapist,
    pub claims: Claims,
}

impl AuthenticatedTherapist {
    pub fn id(&self) -> Uuid {
        self.therapist.id
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| ApiError::Unauthorized("Invalid Authorization header format".to_string()))?;

    auth_str.strip_prefix("Bearer ").map(str::trim).ok_or_else(|| {
        ApiError::Unauthorized("Invalid Authorization header format. Expected 'Bearer <token>'".to_string())
    })
}

pub async fn auth_middleware(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers)?;

    let claims = state.tokens.verify(token, TokenType::Access).map_err(|e| {
        tracing::warn!(error = %e, "JWT verification failed");
        ApiError::from(e)
    })?;

    let therapist_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| ApiError::Unauthorized("Invalid or expired token".to_string()))?;

    let therapist = state
        .store
        .get_therapist(therapist_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired token".to_string()))?;

    if !therapist.is_active() {
        tracing::warn!(therapist_id = %therapist.id, "Token presented for disabled account");
        return Err(ApiError::Unauthorized("Account is disabled".to_string()));
    }

    request
        .extensions_mut()
        .insert(AuthenticatedTherapist { therapist, claims });

    Ok(next.run(request).await)
}
