pub mod auth;
pub mod chat;
pub mod chatbot_config;
pub mod health;
pub mod therapist;

use axum::extract::rejection::JsonRejection;
use axum::extract::ConnectInfo;
use axum::Json;
use std::net::SocketAddr;

use crate::error::ApiError;
use crate::models::validation::Validate;

/// Unwraps a JSON body and runs its schema validation.
pub(crate) fn validated<T: Validate>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    let Json(body) = payload?;
    body.validate()?;
    Ok(body)
}

pub(crate) fn client_ip(connect_info: &Option<ConnectInfo<SocketAddr>>) -> Option<String> {
    connect_info.as_ref().map(|ConnectInfo(addr)| addr.ip().to_string())
}
