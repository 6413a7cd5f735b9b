use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        ConnectInfo, Extension, Path, Query,
    },
    response::Json,
    routing::{get, post, put, Router},
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use super::{client_ip, validated};
use crate::error::ApiError;
use crate::integrations::{CrmGateway, IntegrationError, SessionBooking};
use crate::middleware::auth::{auth_middleware, AuthenticatedTherapist};
use crate::models::alert::CrisisAlert;
use crate::models::audit::{AuditEvent, AuditOutcome};
use crate::models::dashboard::{
    ConversationQuery, ConversationReview, ConversationStats, CrmMessagesQuery, CrmOverview,
    DashboardResponse, DashboardStats, ScheduleSessionRequest, TherapistMessageRequest,
    TherapistMessageResponse,
};
use crate::models::message::{ConversationEntry, Sender, StoredMessage};
use crate::models::patient::{
    ConsentStatus, PatientListQuery, PatientListResponse, PatientRecord, PatientSummary, PersonalInfo,
    RiskLevel,
};
use crate::models::session_note::{SessionNote, SessionNoteRequest, SessionNoteView};
use crate::models::therapist::{AccountStatus, TherapistResponse, UpdateSettingsRequest};
use crate::security::initials;
use crate::services::{audit, conversation};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;
const DEFAULT_CONVERSATION_LIMIT: usize = 100;
const MAX_CONVERSATION_LIMIT: usize = 500;
const RECENT_ITEMS: usize = 5;
// Upper bound on open alerts loaded for per-patient counts.
const OPEN_ALERT_SCAN: usize = 10_000;
const OUTREACH_SESSION: &str = "therapist_outreach";
const SESSION_NOTE_LIMIT: usize = 50;
const DEFAULT_CRM_MESSAGES: u32 = 50;
const MAX_CRM_MESSAGES: u32 = 100;
const DEFAULT_SESSION_TITLE: &str = "Therapy Session";
const DEFAULT_SESSION_DESCRIPTION: &str = "Individual therapy session";

pub fn therapist_routes() -> Router {
    Router::new()
        .route("/therapist/dashboard", get(dashboard))
        .route("/therapist/patients", get(list_patients))
        .route("/therapist/patients/:id/conversation", get(conversation_review))
        .route("/therapist/patients/:id/message", post(message_patient))
        .route("/therapist/patients/:id/session-note", post(create_session_note))
        .route("/therapist/patients/:id/session-notes", get(list_session_notes))
        .route("/therapist/patients/:id/sessions", post(schedule_session))
        .route("/therapist/patients/:id/crm-messages", get(crm_messages))
        .route("/therapist/alerts/:id/acknowledge", post(acknowledge_alert))
        .route("/therapist/settings", put(update_settings))
        .route("/therapist/account/disable", post(disable_account))
        .route_layer(axum::middleware::from_fn(auth_middleware))
}

fn patient_initials(state: &AppState, patient: &PatientRecord) -> Result<String, ApiError> {
    let info: PersonalInfo = match &patient.encrypted_personal_info {
        Some(encrypted) => state.cipher.decrypt_json(encrypted)?,
        None => PersonalInfo::default(),
    };
    Ok(initials(info.first_name.as_deref(), info.last_name.as_deref()))
}

fn summarize(
    state: &AppState,
    patient: &PatientRecord,
    message_counts: &HashMap<String, i64>,
    open_alerts: &HashMap<String, i64>,
) -> Result<PatientSummary, ApiError> {
    let open = open_alerts.get(&patient.id).copied().unwrap_or(0);
    Ok(PatientSummary {
        patient_id: patient.id.clone(),
        initials: patient_initials(state, patient)?,
        consent_status: patient.consent_status,
        risk_level: patient.risk_level,
        last_activity_at: patient.last_activity_at,
        message_count: message_counts.get(&patient.id).copied().unwrap_or(0),
        open_alerts: open,
        flags: PatientSummary::flags_for(patient.risk_level, patient.consent_status, open),
    })
}

fn open_alerts_by_patient(alerts: &[CrisisAlert]) -> HashMap<String, i64> {
    let mut counts = HashMap::new();
    for alert in alerts.iter().filter(|a| a.is_open()) {
        *counts.entry(alert.patient_id.clone()).or_insert(0) += 1;
    }
    counts
}

/// Loads a patient only if it belongs to the calling therapist.
async fn owned_patient(state: &AppState, therapist_id: Uuid, patient_id: &str) -> Result<PatientRecord, ApiError> {
    state
        .store
        .get_patient(patient_id)
        .await?
        .filter(|p| p.therapist_id == therapist_id)
        .ok_or_else(|| ApiError::NotFound("Patient not found".to_string()))
}

/// Decrypted CRM contact id and the configured CRM for a consented patient.
fn crm_contact(state: &AppState, patient: &PatientRecord) -> Result<(String, Arc<dyn CrmGateway>), ApiError> {
    if !patient.has_consent() {
        return Err(ApiError::Forbidden("Patient has not consented to contact".to_string()));
    }
    let contact_id = match &patient.encrypted_crm_contact_id {
        Some(encrypted) => state.cipher.decrypt_str(encrypted)?,
        None => return Err(ApiError::Validation("Patient has no CRM contact on file".to_string())),
    };
    let crm = state
        .crm
        .clone()
        .ok_or(IntegrationError::NotConfigured { service: "crm" })?;
    Ok((contact_id, crm))
}

async fn dashboard(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedTherapist>,
) -> Result<Json<DashboardResponse>, ApiError> {
    let therapist_id = auth.id();
    let now = Utc::now();

    let patients = state.store.list_patients(therapist_id).await?;
    let open_alerts = state.store.list_alerts(therapist_id, true, OPEN_ALERT_SCAN).await?;
    let message_counts = state.store.message_counts(therapist_id).await?;
    let start_of_day = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now);
    let messages_today = state.store.count_messages_since(therapist_id, start_of_day).await?;

    let week_ago = now - Duration::days(7);
    let stats = DashboardStats {
        total_patients: patients.len() as i64,
        active_patients_7d: patients
            .iter()
            .filter(|p| p.last_activity_at.map_or(false, |at| at >= week_ago))
            .count() as i64,
        pending_consent: patients
            .iter()
            .filter(|p| p.consent_status != ConsentStatus::Granted)
            .count() as i64,
        high_risk_patients: patients.iter().filter(|p| p.risk_level == RiskLevel::High).count() as i64,
        crisis_patients: patients.iter().filter(|p| p.risk_level == RiskLevel::Crisis).count() as i64,
        open_alerts: open_alerts.len() as i64,
        messages_today,
    };

    let alert_counts = open_alerts_by_patient(&open_alerts);
    let recent_patients = patients
        .iter()
        .filter(|p| p.last_activity_at.is_some())
        .take(RECENT_ITEMS)
        .map(|p| summarize(&state, p, &message_counts, &alert_counts))
        .collect::<Result<Vec<_>, _>>()?;

    let crm = match &state.crm {
        Some(crm) => match crm.dashboard_snapshot(now.date_naive()).await {
            Ok(snapshot) => CrmOverview {
                available: true,
                contact_count: Some(snapshot.contact_count),
                appointments_today: Some(snapshot.appointments_today),
            },
            Err(e) => {
                tracing::warn!(service = e.service(), error = %e, "CRM snapshot unavailable for dashboard");
                CrmOverview::default()
            }
        },
        None => CrmOverview::default(),
    };

    audit::record(
        state.store.as_ref(),
        AuditEvent::new(therapist_id.to_string(), "view_dashboard", "dashboard", AuditOutcome::Success),
    )
    .await;

    Ok(Json(DashboardResponse {
        success: true,
        therapist_name: format!("{} {}", auth.therapist.first_name, auth.therapist.last_name),
        stats,
        recent_alerts: open_alerts.into_iter().take(RECENT_ITEMS).collect(),
        recent_patients,
        crm,
        generated_at: now,
    }))
}

async fn list_patients(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedTherapist>,
    query: Result<Query<PatientListQuery>, QueryRejection>,
) -> Result<Json<PatientListResponse>, ApiError> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(ApiError::Validation(format!("limit must be between 1 and {}", MAX_PAGE_SIZE)));
    }
    if offset < 0 {
        return Err(ApiError::Validation("offset cannot be negative".to_string()));
    }

    let therapist_id = auth.id();
    let mut patients = state.store.list_patients(therapist_id).await?;
    if let Some(risk) = query.risk_level {
        patients.retain(|p| p.risk_level == risk);
    }
    // Highest risk first; the store already orders by recent activity.
    patients.sort_by(|a, b| b.risk_level.cmp(&a.risk_level));
    let total = patients.len();

    let message_counts = state.store.message_counts(therapist_id).await?;
    let alert_counts = open_alerts_by_patient(&state.store.list_alerts(therapist_id, true, OPEN_ALERT_SCAN).await?);

    let page = patients
        .iter()
        .skip(offset as usize)
        .take(limit as usize)
        .map(|p| summarize(&state, p, &message_counts, &alert_counts))
        .collect::<Result<Vec<_>, _>>()?;

    audit::record(
        state.store.as_ref(),
        AuditEvent::new(therapist_id.to_string(), "list_patients", "patients", AuditOutcome::Success),
    )
    .await;

    Ok(Json(PatientListResponse {
        success: true,
        patients: page,
        total,
        limit,
        offset,
    }))
}

async fn conversation_review(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedTherapist>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<ConversationQuery>, QueryRejection>,
) -> Result<Json<ConversationReview>, ApiError> {
    let Path(patient_id) = path?;
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_CONVERSATION_LIMIT);
    if !(1..=MAX_CONVERSATION_LIMIT).contains(&limit) {
        return Err(ApiError::Validation(format!(
            "limit must be between 1 and {}",
            MAX_CONVERSATION_LIMIT
        )));
    }

    let therapist_id = auth.id();
    let patient = owned_patient(&state, therapist_id, &patient_id).await?;

    let mut stats = ConversationStats::default();
    let mut sessions = HashSet::new();
    let mut messages = Vec::new();
    for message in state.store.recent_messages(&patient.id, limit).await? {
        stats.count(message.sender);
        sessions.insert(message.session_id.clone());
        messages.push(ConversationEntry {
            content: state.cipher.decrypt_str(&message.encrypted_content)?,
            id: message.id,
            session_id: message.session_id,
            sender: message.sender,
            risk_flag: message.risk_flag,
            created_at: message.created_at,
        });
    }
    stats.sessions = sessions.len();

    let open_alerts = state
        .store
        .list_alerts(therapist_id, true, OPEN_ALERT_SCAN)
        .await?
        .iter()
        .filter(|a| a.patient_id == patient.id)
        .count();

    let key_themes = conversation::key_themes(&messages);
    let recommendations =
        conversation::recommendations(patient.risk_level, open_alerts, stats.total_messages, &key_themes);

    audit::record(
        state.store.as_ref(),
        AuditEvent::new(therapist_id.to_string(), "view_conversation", "conversation", AuditOutcome::Success)
            .patient(&patient.id)
            .ip(client_ip(&connect_info)),
    )
    .await;

    Ok(Json(ConversationReview {
        success: true,
        initials: patient_initials(&state, &patient)?,
        risk_level: patient.risk_level,
        highest_risk_seen: conversation::highest_risk(&messages),
        patient_id: patient.id,
        stats,
        open_alerts,
        key_themes,
        recommendations,
        messages,
    }))
}

async fn message_patient(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedTherapist>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    path: Result<Path<String>, PathRejection>,
    payload: Result<Json<TherapistMessageRequest>, JsonRejection>,
) -> Result<Json<TherapistMessageResponse>, ApiError> {
    let Path(patient_id) = path?;
    let payload = validated(payload)?;
    let therapist_id = auth.id();
    let patient = owned_patient(&state, therapist_id, &patient_id).await?;

    let (contact_id, crm) = crm_contact(&state, &patient)?;

    let receipt = match crm
        .send_message(&contact_id, payload.channel, payload.subject.as_deref(), &payload.message)
        .await
    {
        Ok(receipt) => receipt,
        Err(e) => {
            return Err(crm_failure(&state, therapist_id, &patient.id, "message_patient", client_ip(&connect_info), e).await)
        }
    };

    let record = StoredMessage::new(
        &patient.id,
        OUTREACH_SESSION,
        Sender::Therapist,
        state.cipher.encrypt_str(&payload.message)?,
        None,
    );
    state.store.append_message(&record).await?;

    tracing::info!(
        patient_id = %patient.id,
        channel = payload.channel.as_str(),
        delivery_id = %receipt.id,
        "Therapist message delivered to CRM"
    );
    audit::record(
        state.store.as_ref(),
        AuditEvent::new(therapist_id.to_string(), "message_patient", "crm", AuditOutcome::Success)
            .patient(&patient.id)
            .ip(client_ip(&connect_info)),
    )
    .await;

    Ok(Json(TherapistMessageResponse {
        success: true,
        patient_id: patient.id,
        channel: payload.channel,
        delivery_id: receipt.id,
        delivery_status: receipt.status,
    }))
}

/// Audits a failed CRM call and returns the error carrying the same correlation id.
async fn crm_failure(
    state: &AppState,
    therapist_id: Uuid,
    patient_id: &str,
    action: &str,
    ip: Option<String>,
    error: IntegrationError,
) -> ApiError {
    let correlation_id = Uuid::new_v4().to_string();
    audit::record(
        state.store.as_ref(),
        AuditEvent::new(therapist_id.to_string(), action, "crm", AuditOutcome::Failure)
            .patient(patient_id)
            .ip(ip)
            .correlation(&correlation_id),
    )
    .await;
    ApiError::integration(error, correlation_id)
}

async fn create_session_note(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedTherapist>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    path: Result<Path<String>, PathRejection>,
    payload: Result<Json<SessionNoteRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(patient_id) = path?;
    let payload = validated(payload)?;
    let therapist_id = auth.id();
    let patient = owned_patient(&state, therapist_id, &patient_id).await?;

    let encrypted_plan = match payload.next_session_plan.as_deref().map(str::trim) {
        Some(plan) if !plan.is_empty() => Some(state.cipher.encrypt_str(plan)?),
        _ => None,
    };
    let note = SessionNote {
        id: Uuid::new_v4(),
        patient_id: patient.id.clone(),
        therapist_id,
        session_date: payload.session_date,
        encrypted_note: state.cipher.encrypt_str(payload.note_content.trim())?,
        encrypted_plan,
        risk_assessment: payload.risk_assessment,
        created_at: Utc::now(),
    };
    state.store.create_session_note(&note).await?;

    tracing::info!(
        patient_id = %patient.id,
        session_date = %note.session_date,
        risk_assessment = note.risk_assessment.as_str(),
        "Session note recorded"
    );
    audit::record(
        state.store.as_ref(),
        AuditEvent::new(therapist_id.to_string(), "create_session_note", "session_note", AuditOutcome::Success)
            .patient(&patient.id)
            .ip(client_ip(&connect_info)),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "note_id": note.id,
        "created_at": note.created_at,
    })))
}

async fn list_session_notes(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedTherapist>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(patient_id) = path?;
    let therapist_id = auth.id();
    let patient = owned_patient(&state, therapist_id, &patient_id).await?;

    let notes = state
        .store
        .list_session_notes(&patient.id, SESSION_NOTE_LIMIT)
        .await?
        .into_iter()
        .map(|note| {
            Ok(SessionNoteView {
                note_content: state.cipher.decrypt_str(&note.encrypted_note)?,
                next_session_plan: note
                    .encrypted_plan
                    .as_deref()
                    .map(|plan| state.cipher.decrypt_str(plan))
                    .transpose()?,
                id: note.id,
                session_date: note.session_date,
                risk_assessment: note.risk_assessment,
                created_at: note.created_at,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    audit::record(
        state.store.as_ref(),
        AuditEvent::new(therapist_id.to_string(), "view_session_notes", "session_note", AuditOutcome::Success)
            .patient(&patient.id)
            .ip(client_ip(&connect_info)),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "patient_id": patient.id,
        "notes": notes,
    })))
}

async fn schedule_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedTherapist>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    path: Result<Path<String>, PathRejection>,
    payload: Result<Json<ScheduleSessionRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(patient_id) = path?;
    let payload = validated(payload)?;
    let therapist_id = auth.id();
    let patient = owned_patient(&state, therapist_id, &patient_id).await?;
    let (contact_id, crm) = crm_contact(&state, &patient)?;

    let booking = SessionBooking {
        title: payload
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string()),
        description: payload
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_DESCRIPTION.to_string()),
        start_time: payload.start_time,
        end_time: payload.end_time,
    };
    let ip = client_ip(&connect_info);
    let session = match crm.schedule_session(&contact_id, &booking).await {
        Ok(session) => session,
        Err(e) => return Err(crm_failure(&state, therapist_id, &patient.id, "schedule_session", ip, e).await),
    };

    tracing::info!(
        patient_id = %patient.id,
        appointment_id = %session.appointment_id,
        start_time = %session.start_time,
        "Therapy session scheduled"
    );
    audit::record(
        state.store.as_ref(),
        AuditEvent::new(therapist_id.to_string(), "schedule_session", "crm", AuditOutcome::Success)
            .patient(&patient.id)
            .ip(ip),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "patient_id": patient.id,
        "session": session,
    })))
}

async fn crm_messages(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedTherapist>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<CrmMessagesQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(patient_id) = path?;
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_CRM_MESSAGES);
    if !(1..=MAX_CRM_MESSAGES).contains(&limit) {
        return Err(ApiError::Validation(format!("limit must be between 1 and {}", MAX_CRM_MESSAGES)));
    }

    let therapist_id = auth.id();
    let patient = owned_patient(&state, therapist_id, &patient_id).await?;
    let (contact_id, crm) = crm_contact(&state, &patient)?;

    let ip = client_ip(&connect_info);
    let messages = match crm.patient_messages(&contact_id, limit).await {
        Ok(messages) => messages,
        Err(e) => return Err(crm_failure(&state, therapist_id, &patient.id, "view_crm_messages", ip, e).await),
    };

    audit::record(
        state.store.as_ref(),
        AuditEvent::new(therapist_id.to_string(), "view_crm_messages", "crm", AuditOutcome::Success)
            .patient(&patient.id)
            .ip(ip),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "patient_id": patient.id,
        "total": messages.len(),
        "messages": messages,
    })))
}

async fn acknowledge_alert(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedTherapist>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(alert_id) = path?;
    let therapist_id = auth.id();
    let alert = state.store.acknowledge_alert(therapist_id, alert_id, Utc::now()).await?;

    audit::record(
        state.store.as_ref(),
        AuditEvent::new(therapist_id.to_string(), "acknowledge_alert", "crisis_alert", AuditOutcome::Success)
            .patient(&alert.patient_id),
    )
    .await;

    Ok(Json(json!({ "success": true, "alert": alert })))
}

async fn update_settings(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedTherapist>,
    payload: Result<Json<UpdateSettingsRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let payload = validated(payload)?;
    let therapist = state
        .store
        .update_therapist_profile(
            auth.id(),
            payload.first_name.as_deref().map(str::trim),
            payload.last_name.as_deref().map(str::trim),
        )
        .await?;

    audit::record(
        state.store.as_ref(),
        AuditEvent::new(therapist.id.to_string(), "update_settings", "therapist", AuditOutcome::Success),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "therapist": TherapistResponse::from(&therapist),
    })))
}

async fn disable_account(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedTherapist>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Result<Json<Value>, ApiError> {
    let therapist_id = auth.id();
    state.store.set_therapist_status(therapist_id, AccountStatus::Disabled).await?;

    tracing::info!(therapist_id = %therapist_id, "Therapist account disabled");
    audit::record(
        state.store.as_ref(),
        AuditEvent::new(therapist_id.to_string(), "disable_account", "therapist", AuditOutcome::Success)
            .ip(client_ip(&connect_info)),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Account disabled. Existing tokens are no longer accepted.",
    })))
}
