//! Seams to the outside world: hosted language models and the CRM.
//!
//! Each adapter makes a single attempt per call under an explicit timeout and
//! reports failures as [`IntegrationError`]; the gateway turns those into a
//! 502 with a correlation id.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::dashboard::DeliveryChannel;

#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("{service} is not configured")]
    NotConfigured { service: &'static str },

    #[error("{service} request timed out")]
    Timeout { service: &'static str },

    #[error("{service} transport error: {message}")]
    Transport { service: &'static str, message: String },

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} returned a malformed response: {message}")]
    Malformed { service: &'static str, message: String },

    #[error("{service} reported an error: {message}")]
    Remote { service: &'static str, message: String },
}

impl IntegrationError {
    pub fn service(&self) -> &'static str {
        match self {
            IntegrationError::NotConfigured { service }
            | IntegrationError::Timeout { service }
            | IntegrationError::Transport { service, .. }
            | IntegrationError::Status { service, .. }
            | IntegrationError::Malformed { service, .. }
            | IntegrationError::Remote { service, .. } => service,
        }
    }

    pub fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IntegrationError::Timeout { service }
        } else if err.is_decode() {
            IntegrationError::Malformed {
                service,
                message: err.to_string(),
            }
        } else {
            IntegrationError::Transport {
                service,
                message: err.to_string(),
            }
        }
    }
}

/// Reads an HTTP response body, mapping non-2xx statuses to [`IntegrationError::Status`].
pub async fn read_success_body(
    service: &'static str,
    response: reqwest::Response,
) -> Result<String, IntegrationError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| IntegrationError::from_reqwest(service, e))?;

    if !status.is_success() {
        return Err(IntegrationError::Status {
            service,
            status: status.as_u16(),
            body: body.chars().take(512).collect(),
        });
    }
    Ok(body)
}

// ── language models ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct AiRequest {
    pub system: String,
    pub history: Vec<ChatTurn>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the raw assistant text for the conversation.
    async fn complete(&self, request: &AiRequest) -> Result<String, IntegrationError>;
}

// ── CRM ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct NewContact {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub id: String,
    pub status: String,
}

/// A therapy session to book on the therapist's CRM calendar.
#[derive(Debug, Clone)]
pub struct SessionBooking {
    pub title: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledSession {
    pub appointment_id: String,
    pub calendar_id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: String,
}

/// One SMS or email from the CRM conversation with a patient.
#[derive(Debug, Clone, Serialize)]
pub struct CrmMessage {
    pub id: String,
    pub channel: String,
    pub direction: String,
    pub body: String,
    pub status: String,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct CrmSnapshot {
    pub contact_count: u64,
    pub appointments_today: u64,
}

#[async_trait]
pub trait CrmGateway: Send + Sync {
    /// Creates a patient contact and returns the CRM's contact id.
    async fn create_contact(&self, contact: &NewContact) -> Result<String, IntegrationError>;

    async fn send_message(
        &self,
        contact_id: &str,
        channel: DeliveryChannel,
        subject: Option<&str>,
        body: &str,
    ) -> Result<DeliveryReceipt, IntegrationError>;

    async fn dashboard_snapshot(&self, day: NaiveDate) -> Result<CrmSnapshot, IntegrationError>;

    async fn schedule_session(
        &self,
        contact_id: &str,
        booking: &SessionBooking,
    ) -> Result<ScheduledSession, IntegrationError>;

    /// Most recent CRM messages exchanged with the contact, newest first.
    async fn patient_messages(&self, contact_id: &str, limit: u32) -> Result<Vec<CrmMessage>, IntegrationError>;
}
