use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::patient::RiskLevel;
use super::validation::{optional_text, require_text, Validate};
use crate::error::ApiError;

/// Clinical note a therapist files after a session. Note text and plan are
/// encrypted before they reach the store.
#[derive(Debug, Clone)]
pub struct SessionNote {
    pub id: Uuid,
    pub patient_id: String,
    pub therapist_id: Uuid,
    pub session_date: NaiveDate,
    pub encrypted_note: String,
    pub encrypted_plan: Option<String>,
    pub risk_assessment: RiskLevel,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct SessionNoteRequest {
    pub session_date: NaiveDate,
    pub note_content: String,
    #[serde(default = "default_risk")]
    pub risk_assessment: RiskLevel,
    #[serde(default)]
    pub next_session_plan: Option<String>,
}

fn default_risk() -> RiskLevel {
    RiskLevel::Low
}

impl Validate for SessionNoteRequest {
    fn validate(&self) -> Result<(), ApiError> {
        require_text("note_content", &self.note_content, 20_000)?;
        optional_text("next_session_plan", self.next_session_plan.as_deref(), 5_000)?;
        if self.session_date > Utc::now().date_naive() {
            return Err(ApiError::Validation("session_date cannot be in the future".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct SessionNoteView {
    pub id: Uuid,
    pub session_date: NaiveDate,
    pub note_content: String,
    pub next_session_plan: Option<String>,
    pub risk_assessment: RiskLevel,
    pub created_at: DateTime<Utc>,
}

/// Message count and time span of one chat session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub message_count: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(session_date: NaiveDate) -> SessionNoteRequest {
        SessionNoteRequest {
            session_date,
            note_content: "Worked on sleep routine.".to_string(),
            risk_assessment: RiskLevel::Low,
            next_session_plan: None,
        }
    }

    #[test]
    fn test_future_session_date_rejected() {
        let today = Utc::now().date_naive();
        assert!(request(today).validate().is_ok());
        assert!(request(today - Duration::days(3)).validate().is_ok());
        assert!(request(today + Duration::days(2)).validate().is_err());
    }

    #[test]
    fn test_risk_defaults_to_low() {
        let parsed: SessionNoteRequest =
            serde_json::from_str(r#"{"session_date": "2025-02-01", "note_content": "ok"}"#).unwrap();
        assert_eq!(parsed.risk_assessment, RiskLevel::Low);
        assert!(parsed.next_session_plan.is_none());
    }
}
