use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Store, StoreError, StoreResult};
use crate::models::alert::CrisisAlert;
use crate::models::audit::AuditEvent;
use crate::models::chatbot::{ChatbotConfig, ChatbotConfigRecord};
use crate::models::message::{Sender, StoredMessage};
use crate::models::patient::{PatientRecord, RiskLevel};
use crate::models::session_note::{SessionNote, SessionSummary};
use crate::models::therapist::{AccountStatus, Therapist};

#[derive(Default)]
struct Inner {
    therapists: HashMap<Uuid, Therapist>,
    patients: HashMap<String, PatientRecord>,
    messages: Vec<StoredMessage>,
    configs: HashMap<Uuid, ChatbotConfigRecord>,
    alerts: Vec<CrisisAlert>,
    notes: Vec<SessionNote>,
    audit: Vec<AuditEvent>,
}

/// In-process store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audit trail snapshot, newest last.
    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.inner.read().await.audit.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_therapist(&self, therapist: &Therapist) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let taken = inner
            .therapists
            .values()
            .any(|t| t.email.eq_ignore_ascii_case(&therapist.email));
        if taken {
            return Err(StoreError::Conflict(
                "A therapist with this email already exists".to_string(),
            ));
        }
        inner.therapists.insert(therapist.id, therapist.clone());
        Ok(())
    }

    async fn find_therapist_by_email(&self, email: &str) -> StoreResult<Option<Therapist>> {
        let inner = self.inner.read().await;
        Ok(inner
            .therapists
            .values()
            .find(|t| t.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn get_therapist(&self, id: Uuid) -> StoreResult<Option<Therapist>> {
        Ok(self.inner.read().await.therapists.get(&id).cloned())
    }

    async fn update_therapist_profile(
        &self,
        id: Uuid,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> StoreResult<Therapist> {
        let mut inner = self.inner.write().await;
        let therapist = inner
            .therapists
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound("therapist".to_string()))?;
        if let Some(first) = first_name {
            therapist.first_name = first.to_string();
        }
        if let Some(last) = last_name {
            therapist.last_name = last.to_string();
        }
        therapist.updated_at = Utc::now();
        Ok(therapist.clone())
    }

    async fn set_therapist_status(&self, id: Uuid, status: AccountStatus) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let therapist = inner
            .therapists
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound("therapist".to_string()))?;
        therapist.status = status;
        therapist.updated_at = Utc::now();
        Ok(())
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(therapist) = self.inner.write().await.therapists.get_mut(&id) {
            therapist.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn get_patient(&self, id: &str) -> StoreResult<Option<PatientRecord>> {
        Ok(self.inner.read().await.patients.get(id).cloned())
    }

    async fn upsert_patient(&self, patient: &PatientRecord) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let created_at = inner
            .patients
            .get(&patient.id)
            .map(|existing| existing.created_at)
            .unwrap_or(patient.created_at);
        let mut record = patient.clone();
        record.created_at = created_at;
        inner.patients.insert(record.id.clone(), record);
        Ok(())
    }

    async fn list_patients(&self, therapist_id: Uuid) -> StoreResult<Vec<PatientRecord>> {
        let inner = self.inner.read().await;
        let mut patients: Vec<PatientRecord> = inner
            .patients
            .values()
            .filter(|p| p.therapist_id == therapist_id)
            .cloned()
            .collect();
        // Most recently active first; never-active patients last.
        patients.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(patients)
    }

    async fn update_patient_activity(
        &self,
        id: &str,
        risk_level: RiskLevel,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let patient = inner
            .patients
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound("patient".to_string()))?;
        patient.risk_level = risk_level;
        patient.last_activity_at = Some(at);
        patient.updated_at = at;
        Ok(())
    }

    async fn append_message(&self, message: &StoredMessage) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.patients.contains_key(&message.patient_id) {
            return Err(StoreError::NotFound("patient".to_string()));
        }
        inner.messages.push(message.clone());
        Ok(())
    }

    async fn recent_messages(&self, patient_id: &str, limit: usize) -> StoreResult<Vec<StoredMessage>> {
        let inner = self.inner.read().await;
        let mut messages: Vec<StoredMessage> = inner
            .messages
            .iter()
            .filter(|m| m.patient_id == patient_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn count_session_messages(
        &self,
        patient_id: &str,
        session_id: &str,
        sender: Sender,
    ) -> StoreResult<i64> {
        let inner = self.inner.read().await;
        let count = inner
            .messages
            .iter()
            .filter(|m| m.patient_id == patient_id && m.session_id == session_id && m.sender == sender)
            .count();
        Ok(count as i64)
    }

    async fn session_messages(
        &self,
        patient_id: &str,
        session_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<StoredMessage>> {
        let inner = self.inner.read().await;
        let mut messages: Vec<StoredMessage> = inner
            .messages
            .iter()
            .filter(|m| m.patient_id == patient_id && m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn session_summary(&self, patient_id: &str, session_id: &str) -> StoreResult<SessionSummary> {
        let inner = self.inner.read().await;
        let session = inner
            .messages
            .iter()
            .filter(|m| m.patient_id == patient_id && m.session_id == session_id);
        let mut summary = SessionSummary::default();
        for message in session {
            summary.message_count += 1;
            summary.started_at = Some(summary.started_at.map_or(message.created_at, |at| at.min(message.created_at)));
            summary.last_activity = Some(summary.last_activity.map_or(message.created_at, |at| at.max(message.created_at)));
        }
        Ok(summary)
    }

    async fn message_counts(&self, therapist_id: Uuid) -> StoreResult<HashMap<String, i64>> {
        let inner = self.inner.read().await;
        let mut counts = HashMap::new();
        for message in &inner.messages {
            let owned = inner
                .patients
                .get(&message.patient_id)
                .map(|p| p.therapist_id == therapist_id)
                .unwrap_or(false);
            if owned {
                *counts.entry(message.patient_id.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn count_messages_since(&self, therapist_id: Uuid, since: DateTime<Utc>) -> StoreResult<i64> {
        let inner = self.inner.read().await;
        let count = inner
            .messages
            .iter()
            .filter(|m| m.created_at >= since)
            .filter(|m| {
                inner
                    .patients
                    .get(&m.patient_id)
                    .map(|p| p.therapist_id == therapist_id)
                    .unwrap_or(false)
            })
            .count();
        Ok(count as i64)
    }

    async fn get_chatbot_config(&self, therapist_id: Uuid) -> StoreResult<Option<ChatbotConfigRecord>> {
        Ok(self.inner.read().await.configs.get(&therapist_id).cloned())
    }

    async fn put_chatbot_config(
        &self,
        therapist_id: Uuid,
        config: &ChatbotConfig,
    ) -> StoreResult<ChatbotConfigRecord> {
        let mut inner = self.inner.write().await;
        let version = inner
            .configs
            .get(&therapist_id)
            .map(|existing| existing.version + 1)
            .unwrap_or(1);
        let record = ChatbotConfigRecord {
            therapist_id,
            config: config.clone(),
            version,
            updated_at: Some(Utc::now()),
        };
        inner.configs.insert(therapist_id, record.clone());
        Ok(record)
    }

    async fn create_session_note(&self, note: &SessionNote) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.patients.contains_key(&note.patient_id) {
            return Err(StoreError::NotFound("patient".to_string()));
        }
        inner.notes.push(note.clone());
        Ok(())
    }

    async fn list_session_notes(&self, patient_id: &str, limit: usize) -> StoreResult<Vec<SessionNote>> {
        let inner = self.inner.read().await;
        let mut notes: Vec<SessionNote> = inner
            .notes
            .iter()
            .filter(|n| n.patient_id == patient_id)
            .cloned()
            .collect();
        notes.sort_by(|a, b| {
            b.session_date
                .cmp(&a.session_date)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        notes.truncate(limit);
        Ok(notes)
    }

    async fn create_alert(&self, alert: &CrisisAlert) -> StoreResult<()> {
        self.inner.write().await.alerts.push(alert.clone());
        Ok(())
    }

    async fn list_alerts(&self, therapist_id: Uuid, open_only: bool, limit: usize) -> StoreResult<Vec<CrisisAlert>> {
        let inner = self.inner.read().await;
        let mut alerts: Vec<CrisisAlert> = inner
            .alerts
            .iter()
            .filter(|a| a.therapist_id == therapist_id && (!open_only || a.is_open()))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts.truncate(limit);
        Ok(alerts)
    }

    async fn acknowledge_alert(
        &self,
        therapist_id: Uuid,
        alert_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<CrisisAlert> {
        let mut inner = self.inner.write().await;
        let alert = inner
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id && a.therapist_id == therapist_id)
            .ok_or_else(|| StoreError::NotFound("alert".to_string()))?;
        if alert.acknowledged_at.is_none() {
            alert.acknowledged_at = Some(at);
        }
        Ok(alert.clone())
    }

    async fn record_audit(&self, event: &AuditEvent) -> StoreResult<()> {
        self.inner.write().await.audit.push(event.clone());
        Ok(())
    }

    async fn purge_expired_patients(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let expired: Vec<String> = inner
            .patients
            .values()
            .filter(|p| p.retention_until < now)
            .map(|p| p.id.clone())
            .collect();
        for id in &expired {
            inner.patients.remove(id);
        }
        inner.messages.retain(|m| !expired.contains(&m.patient_id));
        inner.alerts.retain(|a| !expired.contains(&a.patient_id));
        inner.notes.retain(|n| !expired.contains(&n.patient_id));
        Ok(expired.len() as u64)
    }

    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.audit.len();
        inner.audit.retain(|e| e.created_at >= cutoff);
        Ok((before - inner.audit.len()) as u64)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
