// src/models/chat.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::Sender;
use super::patient::{ConsentStatus, RiskLevel};
use super::validation::{optional_text, require_text, validate_email, Validate};
use crate::error::ApiError;

pub const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct ChatMessageRequest {
    pub therapist_id: Uuid,
    /// Caller-side patient reference; anonymized before it is stored or logged.
    pub patient_ref: String,
    pub session_id: String,
    pub message: String,
}

impl Validate for ChatMessageRequest {
    fn validate(&self) -> Result<(), ApiError> {
        require_text("patient_ref", &self.patient_ref, 200)?;
        require_text("session_id", &self.session_id, 100)?;
        require_text("message", &self.message, MAX_MESSAGE_CHARS)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub success: bool,
    pub message: String,
    pub session_id: String,
    pub patient_id: String,
    pub timestamp: DateTime<Utc>,
    pub risk_level: Option<RiskLevel>,
    pub crisis_detected: bool,
    pub crisis_resources: Option<EmergencyResources>,
    pub therapist_notified: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConsentRequest {
    pub therapist_id: Uuid,
    pub patient_ref: String,
    pub consent_granted: bool,
    pub consent_text: String,
    pub signature: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub create_crm_contact: bool,
}

impl Validate for ConsentRequest {
    fn validate(&self) -> Result<(), ApiError> {
        require_text("patient_ref", &self.patient_ref, 200)?;
        require_text("consent_text", &self.consent_text, 10_000)?;
        require_text("signature", &self.signature, 200)?;
        optional_text("first_name", self.first_name.as_deref(), 100)?;
        optional_text("last_name", self.last_name.as_deref(), 100)?;
        optional_text("phone", self.phone.as_deref(), 30)?;
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        if self.create_crm_contact && self.consent_granted && self.email.is_none() && self.phone.is_none() {
            return Err(ApiError::Validation(
                "An email or phone number is required to create a CRM contact".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsentResponse {
    pub success: bool,
    pub message: String,
    pub patient_id: String,
    pub consent_status: ConsentStatus,
    pub crm_contact_created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hotline {
    pub name: String,
    pub number: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyResources {
    pub message: String,
    pub hotlines: Vec<Hotline>,
    pub emergency_contact_email: Option<String>,
    pub therapist_instructions: Option<String>,
    pub safety_plan: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct EmergencyResourcesQuery {
    pub therapist_id: Option<Uuid>,
}

pub const DEFAULT_HISTORY_LIMIT: usize = 20;
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Identifies one patient chat session in query strings.
#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub therapist_id: Uuid,
    pub patient_ref: String,
    pub session_id: String,
    pub limit: Option<usize>,
}

impl Validate for SessionQuery {
    fn validate(&self) -> Result<(), ApiError> {
        require_text("patient_ref", &self.patient_ref, 200)?;
        require_text("session_id", &self.session_id, 100)?;
        match self.limit {
            Some(limit) if !(1..=MAX_HISTORY_LIMIT).contains(&limit) => Err(ApiError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_HISTORY_LIMIT
            ))),
            _ => Ok(()),
        }
    }
}

/// One message as the patient sees it.
#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub sender: Sender,
    pub content: String,
    pub from: &'static str,
}

impl HistoryEntry {
    pub fn label(sender: Sender) -> &'static str {
        match sender {
            Sender::Patient => "You",
            Sender::Assistant => "AI Support",
            Sender::Therapist => "Your therapist",
            Sender::System => "System",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConversationHistoryResponse {
    pub success: bool,
    pub session_id: String,
    pub message_count: usize,
    pub messages: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct ChatbotInfo {
    pub name: String,
    pub purpose: &'static str,
    pub capabilities: Vec<&'static str>,
    pub limitations: Vec<&'static str>,
    pub privacy: &'static str,
    pub crisis_support: &'static str,
}

impl ChatbotInfo {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            purpose: "I'm here to provide support between your therapy sessions",
            capabilities: vec![
                "Active listening and emotional support",
                "Crisis detection and safety resources",
                "Therapeutic conversation techniques",
                "Session scheduling assistance",
            ],
            limitations: vec![
                "I cannot provide therapy or clinical treatment",
                "I cannot diagnose mental health conditions",
                "I cannot prescribe medications",
                "I cannot replace your therapist",
                "I will notify your therapist of any safety concerns",
            ],
            privacy: "This conversation is protected and only shared with your therapist",
            crisis_support: "If you're in crisis, I will immediately provide resources and notify your therapist",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionInfoResponse {
    pub success: bool,
    pub session_id: String,
    pub message_count: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub consent_status: ConsentStatus,
    pub chatbot_info: ChatbotInfo,
}
