use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{Store, StoreError, StoreResult};
use crate::models::alert::CrisisAlert;
use crate::models::audit::AuditEvent;
use crate::models::chatbot::{ChatbotConfig, ChatbotConfigRecord};
use crate::models::message::{Sender, StoredMessage};
use crate::models::patient::{PatientRecord, RiskLevel};
use crate::models::session_note::{SessionNote, SessionSummary};
use crate::models::therapist::{AccountStatus, Therapist};

const THERAPIST_COLUMNS: &str = "id, email, password_hash, first_name, last_name, role, practice_id, status, created_at, updated_at, last_login_at";
const PATIENT_COLUMNS: &str = "id, therapist_id, encrypted_personal_info, encrypted_crm_contact_id, consent_status, consent_at, risk_level, retention_until, created_at, updated_at, last_activity_at";
const MESSAGE_COLUMNS: &str = "id, patient_id, session_id, sender, encrypted_content, risk_flag, created_at";
const NOTE_COLUMNS: &str = "id, patient_id, therapist_id, session_date, encrypted_note, encrypted_plan, risk_assessment, created_at";
const ALERT_COLUMNS: &str = "id, patient_id, therapist_id, alert_type, severity, source, created_at, acknowledged_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse<T>(column: &str, raw: &str) -> StoreResult<T>
where
    T: FromStr<Err = String>,
{
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("{}: {}", column, e)))
}

#[derive(FromRow)]
struct TherapistRow {
    id: Uuid,
    email: String,
    password_hash: String,
    first_name: String,
    last_name: String,
    role: String,
    practice_id: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
}

impl TryFrom<TherapistRow> for Therapist {
    type Error = StoreError;

    fn try_from(row: TherapistRow) -> StoreResult<Self> {
        Ok(Therapist {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            first_name: row.first_name,
            last_name: row.last_name,
            role: parse("therapists.role", &row.role)?,
            practice_id: row.practice_id,
            status: parse("therapists.status", &row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_login_at: row.last_login_at,
        })
    }
}

#[derive(FromRow)]
struct PatientRow {
    id: String,
    therapist_id: Uuid,
    encrypted_personal_info: Option<String>,
    encrypted_crm_contact_id: Option<String>,
    consent_status: String,
    consent_at: Option<DateTime<Utc>>,
    risk_level: String,
    retention_until: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_activity_at: Option<DateTime<Utc>>,
}

impl TryFrom<PatientRow> for PatientRecord {
    type Error = StoreError;

    fn try_from(row: PatientRow) -> StoreResult<Self> {
        Ok(PatientRecord {
            id: row.id,
            therapist_id: row.therapist_id,
            encrypted_personal_info: row.encrypted_personal_info,
            encrypted_crm_contact_id: row.encrypted_crm_contact_id,
            consent_status: parse("patients.consent_status", &row.consent_status)?,
            consent_at: row.consent_at,
            risk_level: parse("patients.risk_level", &row.risk_level)?,
            retention_until: row.retention_until,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_activity_at: row.last_activity_at,
        })
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    patient_id: String,
    session_id: String,
    sender: String,
    encrypted_content: String,
    risk_flag: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for StoredMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> StoreResult<Self> {
        let risk_flag = match row.risk_flag {
            Some(raw) => Some(parse("messages.risk_flag", &raw)?),
            None => None,
        };
        Ok(StoredMessage {
            id: row.id,
            patient_id: row.patient_id,
            session_id: row.session_id,
            sender: parse("messages.sender", &row.sender)?,
            encrypted_content: row.encrypted_content,
            risk_flag,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct AlertRow {
    id: Uuid,
    patient_id: String,
    therapist_id: Uuid,
    alert_type: String,
    severity: String,
    source: String,
    created_at: DateTime<Utc>,
    acknowledged_at: Option<DateTime<Utc>>,
}

impl TryFrom<AlertRow> for CrisisAlert {
    type Error = StoreError;

    fn try_from(row: AlertRow) -> StoreResult<Self> {
        Ok(CrisisAlert {
            id: row.id,
            patient_id: row.patient_id,
            therapist_id: row.therapist_id,
            alert_type: parse("crisis_alerts.alert_type", &row.alert_type)?,
            severity: parse("crisis_alerts.severity", &row.severity)?,
            source: parse("crisis_alerts.source", &row.source)?,
            created_at: row.created_at,
            acknowledged_at: row.acknowledged_at,
        })
    }
}

#[derive(FromRow)]
struct NoteRow {
    id: Uuid,
    patient_id: String,
    therapist_id: Uuid,
    session_date: NaiveDate,
    encrypted_note: String,
    encrypted_plan: Option<String>,
    risk_assessment: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<NoteRow> for SessionNote {
    type Error = StoreError;

    fn try_from(row: NoteRow) -> StoreResult<Self> {
        Ok(SessionNote {
            id: row.id,
            patient_id: row.patient_id,
            therapist_id: row.therapist_id,
            session_date: row.session_date,
            encrypted_note: row.encrypted_note,
            encrypted_plan: row.encrypted_plan,
            risk_assessment: parse("session_notes.risk_assessment", &row.risk_assessment)?,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ConfigRow {
    therapist_id: Uuid,
    config: Json<ChatbotConfig>,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl From<ConfigRow> for ChatbotConfigRecord {
    fn from(row: ConfigRow) -> Self {
        ChatbotConfigRecord {
            therapist_id: row.therapist_id,
            config: row.config.0,
            version: row.version,
            updated_at: Some(row.updated_at),
        }
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl Store for PgStore {
    async fn create_therapist(&self, therapist: &Therapist) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO therapists (id, email, password_hash, first_name, last_name, role, practice_id, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(therapist.id)
        .bind(&therapist.email)
        .bind(&therapist.password_hash)
        .bind(&therapist.first_name)
        .bind(&therapist.last_name)
        .bind(therapist.role.as_str())
        .bind(&therapist.practice_id)
        .bind(therapist.status.as_str())
        .bind(therapist.created_at)
        .bind(therapist.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(StoreError::Conflict(
                "A therapist with this email already exists".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_therapist_by_email(&self, email: &str) -> StoreResult<Option<Therapist>> {
        let row: Option<TherapistRow> = sqlx::query_as(&format!(
            "SELECT {} FROM therapists WHERE lower(email) = lower($1)",
            THERAPIST_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Therapist::try_from).transpose()
    }

    async fn get_therapist(&self, id: Uuid) -> StoreResult<Option<Therapist>> {
        let row: Option<TherapistRow> = sqlx::query_as(&format!(
            "SELECT {} FROM therapists WHERE id = $1",
            THERAPIST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Therapist::try_from).transpose()
    }

    async fn update_therapist_profile(
        &self,
        id: Uuid,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> StoreResult<Therapist> {
        let row: Option<TherapistRow> = sqlx::query_as(&format!(
            "UPDATE therapists
             SET first_name = COALESCE($2, first_name), last_name = COALESCE($3, last_name), updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            THERAPIST_COLUMNS
        ))
        .bind(id)
        .bind(first_name)
        .bind(last_name)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| StoreError::NotFound("therapist".to_string()))?
            .try_into()
    }

    async fn set_therapist_status(&self, id: Uuid, status: AccountStatus) -> StoreResult<()> {
        let result = sqlx::query("UPDATE therapists SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("therapist".to_string()));
        }
        Ok(())
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE therapists SET last_login_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_patient(&self, id: &str) -> StoreResult<Option<PatientRecord>> {
        let row: Option<PatientRow> = sqlx::query_as(&format!(
            "SELECT {} FROM patients WHERE id = $1",
            PATIENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PatientRecord::try_from).transpose()
    }

    async fn upsert_patient(&self, patient: &PatientRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO patients (id, therapist_id, encrypted_personal_info, encrypted_crm_contact_id, consent_status,
                                   consent_at, risk_level, retention_until, created_at, updated_at, last_activity_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (id) DO UPDATE SET
                 encrypted_personal_info = EXCLUDED.encrypted_personal_info,
                 encrypted_crm_contact_id = EXCLUDED.encrypted_crm_contact_id,
                 consent_status = EXCLUDED.consent_status,
                 consent_at = EXCLUDED.consent_at,
                 risk_level = EXCLUDED.risk_level,
                 retention_until = EXCLUDED.retention_until,
                 updated_at = EXCLUDED.updated_at,
                 last_activity_at = EXCLUDED.last_activity_at",
        )
        .bind(&patient.id)
        .bind(patient.therapist_id)
        .bind(&patient.encrypted_personal_info)
        .bind(&patient.encrypted_crm_contact_id)
        .bind(patient.consent_status.as_str())
        .bind(patient.consent_at)
        .bind(patient.risk_level.as_str())
        .bind(patient.retention_until)
        .bind(patient.created_at)
        .bind(patient.updated_at)
        .bind(patient.last_activity_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_patients(&self, therapist_id: Uuid) -> StoreResult<Vec<PatientRecord>> {
        let rows: Vec<PatientRow> = sqlx::query_as(&format!(
            "SELECT {} FROM patients WHERE therapist_id = $1
             ORDER BY last_activity_at DESC NULLS LAST, created_at DESC",
            PATIENT_COLUMNS
        ))
        .bind(therapist_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn update_patient_activity(
        &self,
        id: &str,
        risk_level: RiskLevel,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE patients SET risk_level = $2, last_activity_at = $3, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(risk_level.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("patient".to_string()));
        }
        Ok(())
    }

    async fn append_message(&self, message: &StoredMessage) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO messages (id, patient_id, session_id, sender, encrypted_content, risk_flag, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(message.id)
        .bind(&message.patient_id)
        .bind(&message.session_id)
        .bind(message.sender.as_str())
        .bind(&message.encrypted_content)
        .bind(message.risk_flag.map(|r| r.as_str()))
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_messages(&self, patient_id: &str, limit: usize) -> StoreResult<Vec<StoredMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {cols} FROM (
                 SELECT {cols} FROM messages WHERE patient_id = $1
                 ORDER BY created_at DESC, id DESC LIMIT $2
             ) recent
             ORDER BY created_at ASC, id ASC",
            cols = MESSAGE_COLUMNS
        ))
        .bind(patient_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn count_session_messages(
        &self,
        patient_id: &str,
        session_id: &str,
        sender: Sender,
    ) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE patient_id = $1 AND session_id = $2 AND sender = $3",
        )
        .bind(patient_id)
        .bind(session_id)
        .bind(sender.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn session_messages(
        &self,
        patient_id: &str,
        session_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<StoredMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {cols} FROM (
                 SELECT {cols} FROM messages WHERE patient_id = $1 AND session_id = $2
                 ORDER BY created_at DESC, id DESC LIMIT $3
             ) recent
             ORDER BY created_at ASC, id ASC",
            cols = MESSAGE_COLUMNS
        ))
        .bind(patient_id)
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn session_summary(&self, patient_id: &str, session_id: &str) -> StoreResult<SessionSummary> {
        let (message_count, started_at, last_activity): (i64, Option<DateTime<Utc>>, Option<DateTime<Utc>>) =
            sqlx::query_as(
                "SELECT COUNT(*), MIN(created_at), MAX(created_at) FROM messages
                 WHERE patient_id = $1 AND session_id = $2",
            )
            .bind(patient_id)
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(SessionSummary {
            message_count,
            started_at,
            last_activity,
        })
    }

    async fn message_counts(&self, therapist_id: Uuid) -> StoreResult<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT m.patient_id, COUNT(*) FROM messages m
             JOIN patients p ON p.id = m.patient_id
             WHERE p.therapist_id = $1
             GROUP BY m.patient_id",
        )
        .bind(therapist_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn count_messages_since(&self, therapist_id: Uuid, since: DateTime<Utc>) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages m
             JOIN patients p ON p.id = m.patient_id
             WHERE p.therapist_id = $1 AND m.created_at >= $2",
        )
        .bind(therapist_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn get_chatbot_config(&self, therapist_id: Uuid) -> StoreResult<Option<ChatbotConfigRecord>> {
        let row: Option<ConfigRow> = sqlx::query_as(
            "SELECT therapist_id, config, version, updated_at FROM chatbot_configs WHERE therapist_id = $1",
        )
        .bind(therapist_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ChatbotConfigRecord::from))
    }

    async fn put_chatbot_config(
        &self,
        therapist_id: Uuid,
        config: &ChatbotConfig,
    ) -> StoreResult<ChatbotConfigRecord> {
        let row: ConfigRow = sqlx::query_as(
            "INSERT INTO chatbot_configs (therapist_id, config, version, updated_at)
             VALUES ($1, $2, 1, NOW())
             ON CONFLICT (therapist_id) DO UPDATE SET
                 config = EXCLUDED.config,
                 version = chatbot_configs.version + 1,
                 updated_at = NOW()
             RETURNING therapist_id, config, version, updated_at",
        )
        .bind(therapist_id)
        .bind(Json(config))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn create_session_note(&self, note: &SessionNote) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO session_notes (id, patient_id, therapist_id, session_date, encrypted_note, encrypted_plan, risk_assessment, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(note.id)
        .bind(&note.patient_id)
        .bind(note.therapist_id)
        .bind(note.session_date)
        .bind(&note.encrypted_note)
        .bind(&note.encrypted_plan)
        .bind(note.risk_assessment.as_str())
        .bind(note.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_session_notes(&self, patient_id: &str, limit: usize) -> StoreResult<Vec<SessionNote>> {
        let rows: Vec<NoteRow> = sqlx::query_as(&format!(
            "SELECT {} FROM session_notes WHERE patient_id = $1
             ORDER BY session_date DESC, created_at DESC LIMIT $2",
            NOTE_COLUMNS
        ))
        .bind(patient_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn create_alert(&self, alert: &CrisisAlert) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO crisis_alerts (id, patient_id, therapist_id, alert_type, severity, source, created_at, acknowledged_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(alert.id)
        .bind(&alert.patient_id)
        .bind(alert.therapist_id)
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(alert.source.as_str())
        .bind(alert.created_at)
        .bind(alert.acknowledged_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_alerts(&self, therapist_id: Uuid, open_only: bool, limit: usize) -> StoreResult<Vec<CrisisAlert>> {
        let rows: Vec<AlertRow> = sqlx::query_as(&format!(
            "SELECT {} FROM crisis_alerts
             WHERE therapist_id = $1 AND ($2 = FALSE OR acknowledged_at IS NULL)
             ORDER BY created_at DESC LIMIT $3",
            ALERT_COLUMNS
        ))
        .bind(therapist_id)
        .bind(open_only)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn acknowledge_alert(
        &self,
        therapist_id: Uuid,
        alert_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<CrisisAlert> {
        let row: Option<AlertRow> = sqlx::query_as(&format!(
            "UPDATE crisis_alerts SET acknowledged_at = COALESCE(acknowledged_at, $3)
             WHERE id = $1 AND therapist_id = $2
             RETURNING {}",
            ALERT_COLUMNS
        ))
        .bind(alert_id)
        .bind(therapist_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| StoreError::NotFound("alert".to_string()))?
            .try_into()
    }

    async fn record_audit(&self, event: &AuditEvent) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO audit_events (id, actor, patient_id, action, resource, outcome, ip, correlation_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(event.id)
        .bind(&event.actor)
        .bind(&event.patient_id)
        .bind(&event.action)
        .bind(&event.resource)
        .bind(event.outcome.as_str())
        .bind(&event.ip)
        .bind(&event.correlation_id)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_expired_patients(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM patients WHERE retention_until < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM audit_events WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
