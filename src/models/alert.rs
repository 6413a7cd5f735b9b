use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::patient::RiskLevel;
use super::text_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    SuicideIdeation,
    SelfHarm,
    PsychosisIndicators,
    GeneralCrisis,
}

text_enum!(AlertType {
    SuicideIdeation => "suicide_ideation",
    SelfHarm => "self_harm",
    PsychosisIndicators => "psychosis_indicators",
    GeneralCrisis => "general_crisis",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Medium,
    High,
    Critical,
}

text_enum!(AlertSeverity {
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

impl AlertSeverity {
    pub fn from_risk(risk: RiskLevel) -> Option<Self> {
        match risk {
            RiskLevel::Crisis => Some(AlertSeverity::Critical),
            RiskLevel::High => Some(AlertSeverity::High),
            RiskLevel::Moderate => Some(AlertSeverity::Medium),
            RiskLevel::Low => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    Keyword,
    AiAssessment,
}

text_enum!(AlertSource {
    Keyword => "keyword",
    AiAssessment => "ai_assessment",
});

/// Crisis alert raised for the therapist. The triggering text is never kept here.
#[derive(Debug, Clone, Serialize)]
pub struct CrisisAlert {
    pub id: Uuid,
    pub patient_id: String,
    pub therapist_id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub source: AlertSource,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl CrisisAlert {
    pub fn new(
        patient_id: &str,
        therapist_id: Uuid,
        alert_type: AlertType,
        severity: AlertSeverity,
        source: AlertSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id: patient_id.to_string(),
            therapist_id,
            alert_type,
            severity,
            source,
            created_at: Utc::now(),
            acknowledged_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.acknowledged_at.is_none()
    }
}
