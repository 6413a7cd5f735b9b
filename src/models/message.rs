use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::patient::RiskLevel;
use super::text_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    Patient,
    Assistant,
    Therapist,
    System,
}

text_enum!(Sender {
    Patient => "patient",
    Assistant => "assistant",
    Therapist => "therapist",
    System => "system",
});

/// One conversation entry. Content is encrypted before it reaches the store.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: Uuid,
    pub patient_id: String,
    pub session_id: String,
    pub sender: Sender,
    pub encrypted_content: String,
    pub risk_flag: Option<RiskLevel>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(
        patient_id: &str,
        session_id: &str,
        sender: Sender,
        encrypted_content: String,
        risk_flag: Option<RiskLevel>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id: patient_id.to_string(),
            session_id: session_id.to_string(),
            sender,
            encrypted_content,
            risk_flag,
            created_at: Utc::now(),
        }
    }
}

/// Decrypted message as the therapist's conversation review shows it.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationEntry {
    pub id: Uuid,
    pub session_id: String,
    pub sender: Sender,
    pub content: String,
    pub risk_flag: Option<RiskLevel>,
    pub created_at: DateTime<Utc>,
}
