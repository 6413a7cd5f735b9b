use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alert::CrisisAlert;
use super::message::{ConversationEntry, Sender};
use super::patient::{PatientSummary, RiskLevel};
use super::text_enum;
use super::validation::{optional_text, require_text, Validate};
use crate::error::ApiError;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_patients: i64,
    pub active_patients_7d: i64,
    pub pending_consent: i64,
    pub high_risk_patients: i64,
    pub crisis_patients: i64,
    pub open_alerts: i64,
    pub messages_today: i64,
}

/// CRM figures shown on the dashboard. `available = false` when the CRM is
/// unconfigured or failed; the rest of the dashboard still renders.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CrmOverview {
    pub available: bool,
    pub contact_count: Option<u64>,
    pub appointments_today: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub success: bool,
    pub therapist_name: String,
    pub stats: DashboardStats,
    pub recent_alerts: Vec<CrisisAlert>,
    pub recent_patients: Vec<PatientSummary>,
    pub crm: CrmOverview,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    Sms,
    Email,
}

text_enum!(DeliveryChannel {
    Sms => "sms",
    Email => "email",
});

#[derive(Debug, Deserialize)]
pub struct TherapistMessageRequest {
    pub channel: DeliveryChannel,
    pub message: String,
    pub subject: Option<String>,
}

impl Validate for TherapistMessageRequest {
    fn validate(&self) -> Result<(), ApiError> {
        let limit = match self.channel {
            DeliveryChannel::Sms => 1600,
            DeliveryChannel::Email => 10_000,
        };
        require_text("message", &self.message, limit)?;
        optional_text("subject", self.subject.as_deref(), 200)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TherapistMessageResponse {
    pub success: bool,
    pub patient_id: String,
    pub channel: DeliveryChannel,
    pub delivery_id: String,
    pub delivery_status: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ConversationStats {
    pub total_messages: usize,
    pub patient_messages: usize,
    pub assistant_messages: usize,
    pub therapist_messages: usize,
    pub sessions: usize,
}

impl ConversationStats {
    pub fn count(&mut self, sender: Sender) {
        self.total_messages += 1;
        match sender {
            Sender::Patient => self.patient_messages += 1,
            Sender::Assistant => self.assistant_messages += 1,
            Sender::Therapist => self.therapist_messages += 1,
            Sender::System => {}
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConversationReview {
    pub success: bool,
    pub patient_id: String,
    pub initials: String,
    pub risk_level: RiskLevel,
    pub stats: ConversationStats,
    pub highest_risk_seen: Option<RiskLevel>,
    pub open_alerts: usize,
    pub key_themes: Vec<String>,
    pub recommendations: Vec<String>,
    pub messages: Vec<ConversationEntry>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ConversationQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleSessionRequest {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl Validate for ScheduleSessionRequest {
    fn validate(&self) -> Result<(), ApiError> {
        optional_text("title", self.title.as_deref(), 200)?;
        optional_text("description", self.description.as_deref(), 2_000)?;
        if self.end_time <= self.start_time {
            return Err(ApiError::Validation("end_time must be after start_time".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct CrmMessagesQuery {
    pub limit: Option<u32>,
}
