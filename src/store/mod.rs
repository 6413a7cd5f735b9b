//! Persistence seam.
//!
//! Handlers talk to [`Store`] only. `PgStore` is the production backend;
//! `MemoryStore` backs local demos (`STORE_BACKEND=memory`) and the test suite.
//! Everything patient-related that reaches a store is already anonymized or
//! encrypted.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::alert::CrisisAlert;
use crate::models::audit::AuditEvent;
use crate::models::chatbot::{ChatbotConfig, ChatbotConfigRecord};
use crate::models::message::{Sender, StoredMessage};
use crate::models::patient::{PatientRecord, RiskLevel};
use crate::models::session_note::{SessionNote, SessionSummary};
use crate::models::therapist::{AccountStatus, Therapist};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    // therapists
    async fn create_therapist(&self, therapist: &Therapist) -> StoreResult<()>;
    async fn find_therapist_by_email(&self, email: &str) -> StoreResult<Option<Therapist>>;
    async fn get_therapist(&self, id: Uuid) -> StoreResult<Option<Therapist>>;
    async fn update_therapist_profile(
        &self,
        id: Uuid,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> StoreResult<Therapist>;
    async fn set_therapist_status(&self, id: Uuid, status: AccountStatus) -> StoreResult<()>;
    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    // patients
    async fn get_patient(&self, id: &str) -> StoreResult<Option<PatientRecord>>;
    async fn upsert_patient(&self, patient: &PatientRecord) -> StoreResult<()>;
    async fn list_patients(&self, therapist_id: Uuid) -> StoreResult<Vec<PatientRecord>>;
    async fn update_patient_activity(
        &self,
        id: &str,
        risk_level: RiskLevel,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    // messages
    async fn append_message(&self, message: &StoredMessage) -> StoreResult<()>;
    /// The most recent `limit` messages, oldest first.
    async fn recent_messages(&self, patient_id: &str, limit: usize) -> StoreResult<Vec<StoredMessage>>;
    async fn count_session_messages(
        &self,
        patient_id: &str,
        session_id: &str,
        sender: Sender,
    ) -> StoreResult<i64>;
    /// The most recent `limit` messages of one session, oldest first.
    async fn session_messages(
        &self,
        patient_id: &str,
        session_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<StoredMessage>>;
    async fn session_summary(&self, patient_id: &str, session_id: &str) -> StoreResult<SessionSummary>;
    /// Message totals per patient for one therapist's caseload.
    async fn message_counts(&self, therapist_id: Uuid) -> StoreResult<HashMap<String, i64>>;
    async fn count_messages_since(&self, therapist_id: Uuid, since: DateTime<Utc>) -> StoreResult<i64>;

    // chatbot configuration
    async fn get_chatbot_config(&self, therapist_id: Uuid) -> StoreResult<Option<ChatbotConfigRecord>>;
    /// Replaces the record and bumps its version in one step. Last write wins.
    async fn put_chatbot_config(
        &self,
        therapist_id: Uuid,
        config: &ChatbotConfig,
    ) -> StoreResult<ChatbotConfigRecord>;

    // session notes
    async fn create_session_note(&self, note: &SessionNote) -> StoreResult<()>;
    /// Newest session first.
    async fn list_session_notes(&self, patient_id: &str, limit: usize) -> StoreResult<Vec<SessionNote>>;

    // crisis alerts
    async fn create_alert(&self, alert: &CrisisAlert) -> StoreResult<()>;
    async fn list_alerts(&self, therapist_id: Uuid, open_only: bool, limit: usize) -> StoreResult<Vec<CrisisAlert>>;
    async fn acknowledge_alert(
        &self,
        therapist_id: Uuid,
        alert_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<CrisisAlert>;

    // audit + retention
    async fn record_audit(&self, event: &AuditEvent) -> StoreResult<()>;
    /// Deletes patients past `retention_until`; messages, notes and alerts go with them.
    async fn purge_expired_patients(&self, now: DateTime<Utc>) -> StoreResult<u64>;
    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    async fn ping(&self) -> StoreResult<()>;
}
