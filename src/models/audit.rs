use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::text_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

text_enum!(AuditOutcome {
    Success => "success",
    Failure => "failure",
    Denied => "denied",
});

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: Uuid,
    /// Therapist id, or `patient:<anon id>` for patient-initiated actions.
    pub actor: String,
    pub patient_id: Option<String>,
    pub action: String,
    pub resource: String,
    pub outcome: AuditOutcome,
    pub ip: Option<String>,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(actor: impl Into<String>, action: &str, resource: &str, outcome: AuditOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor: actor.into(),
            patient_id: None,
            action: action.to_string(),
            resource: resource.to_string(),
            outcome,
            ip: None,
            correlation_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn patient(mut self, patient_id: &str) -> Self {
        self.patient_id = Some(patient_id.to_string());
        self
    }

    pub fn ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }

    pub fn correlation(mut self, correlation_id: &str) -> Self {
        self.correlation_id = Some(correlation_id.to_string());
        self
    }
}
