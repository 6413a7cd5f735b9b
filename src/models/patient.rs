use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Pending,
    Granted,
    Revoked,
}

text_enum!(ConsentStatus {
    Pending => "pending",
    Granted => "granted",
    Revoked => "revoked",
});

/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Crisis,
}

text_enum!(RiskLevel {
    Low => "low",
    Moderate => "moderate",
    High => "high",
    Crisis => "crisis",
});

impl RiskLevel {
    pub fn is_elevated(&self) -> bool {
        *self >= RiskLevel::High
    }
}

/// Decrypted form of `encrypted_personal_info`. Only ever lives in memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonalInfo {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Stored patient record; `id` is the anonymized identifier.
#[derive(Debug, Clone)]
pub struct PatientRecord {
    pub id: String,
    pub therapist_id: Uuid,
    pub encrypted_personal_info: Option<String>,
    pub encrypted_crm_contact_id: Option<String>,
    pub consent_status: ConsentStatus,
    pub consent_at: Option<DateTime<Utc>>,
    pub risk_level: RiskLevel,
    pub retention_until: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl PatientRecord {
    pub fn has_consent(&self) -> bool {
        self.consent_status == ConsentStatus::Granted
    }
}

/// What the therapist view sees of a patient. Never carries the raw reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientSummary {
    pub patient_id: String,
    pub initials: String,
    pub consent_status: ConsentStatus,
    pub risk_level: RiskLevel,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub message_count: i64,
    pub open_alerts: i64,
    pub flags: Vec<String>,
}

impl PatientSummary {
    pub fn flags_for(risk_level: RiskLevel, consent_status: ConsentStatus, open_alerts: i64) -> Vec<String> {
        let mut flags = Vec::new();
        if risk_level == RiskLevel::Crisis || open_alerts > 0 {
            flags.push("Crisis alert".to_string());
        } else if risk_level == RiskLevel::High {
            flags.push("High risk".to_string());
        }
        if consent_status != ConsentStatus::Granted {
            flags.push("Consent required".to_string());
        }
        flags
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct PatientListQuery {
    pub risk_level: Option<RiskLevel>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PatientListResponse {
    pub success: bool,
    pub patients: Vec<PatientSummary>,
    pub total: usize,
    pub limit: i64,
    pub offset: i64,
}
