use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;
use super::validation::{optional_text, Validate};
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TherapistRole {
    Therapist,
    PracticeAdmin,
}

text_enum!(TherapistRole {
    Therapist => "therapist",
    PracticeAdmin => "practice_admin",
});

/// Accounts are never hard-deleted; disabling keeps the audit trail intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Disabled,
}

text_enum!(AccountStatus {
    Active => "active",
    Disabled => "disabled",
});

#[derive(Debug, Clone)]
pub struct Therapist {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: TherapistRole,
    pub practice_id: Option<String>,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl Therapist {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TherapistResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: TherapistRole,
    pub practice_id: Option<String>,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&Therapist> for TherapistResponse {
    fn from(therapist: &Therapist) -> Self {
        TherapistResponse {
            id: therapist.id,
            email: therapist.email.clone(),
            first_name: therapist.first_name.clone(),
            last_name: therapist.last_name.clone(),
            role: therapist.role,
            practice_id: therapist.practice_id.clone(),
            status: therapist.status,
            created_at: therapist.created_at,
            last_login_at: therapist.last_login_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Validate for UpdateSettingsRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.first_name.is_none() && self.last_name.is_none() {
            return Err(ApiError::Validation("Nothing to update".to_string()));
        }
        for (field, value) in [("first_name", &self.first_name), ("last_name", &self.last_name)] {
            if let Some(v) = value {
                if v.trim().is_empty() {
                    return Err(ApiError::Validation(format!("{} cannot be empty", field)));
                }
            }
            optional_text(field, value.as_deref(), 100)?;
        }
        Ok(())
    }
}
