//! Patient-facing chatbot endpoints.
//!
//! Patients are not authenticated. They are identified by the therapist they
//! belong to plus a caller-side reference, which is anonymized on arrival and
//! never stored or logged in raw form.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, Extension, Query,
    },
    response::Json,
    routing::{get, post, Router},
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use super::{client_ip, validated};
use crate::error::ApiError;
use crate::integrations::{AiRequest, ChatRole, ChatTurn, IntegrationError, NewContact};
use crate::models::alert::{AlertSeverity, AlertSource, CrisisAlert};
use crate::models::audit::{AuditEvent, AuditOutcome};
use crate::models::chat::{
    ChatMessageRequest, ChatResponse, ChatbotInfo, ConsentRequest, ConsentResponse,
    ConversationHistoryResponse, EmergencyResourcesQuery, HistoryEntry, SessionInfoResponse, SessionQuery,
    DEFAULT_HISTORY_LIMIT,
};
use crate::models::chatbot::{ChatbotConfig, ChatbotConfigRecord};
use crate::models::message::{Sender, StoredMessage};
use crate::models::patient::{ConsentStatus, PatientRecord, PersonalInfo, RiskLevel};
use crate::models::therapist::Therapist;
use crate::models::validation::Validate;
use crate::security::anonymize_patient_id;
use crate::services::{audit, crisis, days_after, prompt};
use crate::AppState;

const AI_MAX_TOKENS: u32 = 1024;

pub fn chat_routes() -> Router {
    Router::new()
        .route("/chat/message", post(send_message))
        .route("/chat/consent", post(record_consent))
        .route("/chat/emergency-resources", get(emergency_resources))
        .route("/chat/conversation-history", get(conversation_history))
        .route("/chat/session-info", get(session_info))
}

async fn active_therapist(state: &AppState, therapist_id: Uuid) -> Result<Therapist, ApiError> {
    state
        .store
        .get_therapist(therapist_id)
        .await?
        .filter(Therapist::is_active)
        .ok_or_else(|| ApiError::NotFound("Therapist not found".to_string()))
}

async fn chatbot_config(state: &AppState, therapist_id: Uuid) -> Result<ChatbotConfig, ApiError> {
    Ok(state
        .store
        .get_chatbot_config(therapist_id)
        .await?
        .unwrap_or_else(|| ChatbotConfigRecord::default_for(therapist_id))
        .config)
}

fn retention_deadline(now: DateTime<Utc>, retention_days: i64) -> Result<DateTime<Utc>, ApiError> {
    days_after(now, retention_days)
        .ok_or_else(|| ApiError::Internal(format!("retention of {} days is out of range", retention_days)))
}

fn new_patient(id: String, therapist_id: Uuid, retention_days: i64) -> Result<PatientRecord, ApiError> {
    let now = Utc::now();
    Ok(PatientRecord {
        id,
        therapist_id,
        encrypted_personal_info: None,
        encrypted_crm_contact_id: None,
        consent_status: ConsentStatus::Pending,
        consent_at: None,
        risk_level: RiskLevel::Low,
        retention_until: retention_deadline(now, retention_days)?,
        created_at: now,
        updated_at: now,
        last_activity_at: None,
    })
}

async fn send_message(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    payload: Result<Json<ChatMessageRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let payload = validated(payload)?;
    let therapist = active_therapist(&state, payload.therapist_id).await?;
    let patient_id = anonymize_patient_id(
        &therapist.id.to_string(),
        &payload.patient_ref,
        &state.config.anonymization_salt,
    );
    let actor = format!("patient:{}", patient_id);
    let ip = client_ip(&connect_info);

    let existing = state.store.get_patient(&patient_id).await?;
    check_chat_access(&state, existing.as_ref(), &patient_id, "chat_message", ip.clone()).await?;
    let patient = match existing {
        Some(patient) => patient,
        None => {
            let patient = new_patient(patient_id.clone(), therapist.id, state.config.data_retention_days)?;
            state.store.upsert_patient(&patient).await?;
            patient
        }
    };

    let config = chatbot_config(&state, therapist.id).await?;
    let sent = state
        .store
        .count_session_messages(&patient_id, &payload.session_id, Sender::Patient)
        .await?;
    if sent >= i64::from(config.instructions.max_messages_per_conversation) {
        return Err(ApiError::Forbidden(
            "This conversation has reached its message limit. Please start a new session or contact your therapist."
                .to_string(),
        ));
    }

    let now = Utc::now();

    if let Some(found) = state.crisis.screen(&payload.message) {
        tracing::warn!(
            patient_id = %patient_id,
            alert_type = found.alert_type.as_str(),
            keyword_hits = found.keyword_hits,
            "Crisis language detected"
        );

        let resources = crisis::emergency_resources(&state.config.crisis, Some(&config.instructions));
        let reply = crisis::crisis_reply(&resources);

        store_exchange(&state, &patient_id, &payload.session_id, &payload.message, &reply, Some(RiskLevel::Crisis))
            .await?;
        state
            .store
            .create_alert(&CrisisAlert::new(
                &patient_id,
                therapist.id,
                found.alert_type,
                AlertSeverity::Critical,
                AlertSource::Keyword,
            ))
            .await?;
        state
            .store
            .update_patient_activity(&patient_id, RiskLevel::Crisis, now)
            .await?;

        audit::record(
            state.store.as_ref(),
            AuditEvent::new(actor, "crisis_detected", "conversation", AuditOutcome::Success)
                .patient(&patient_id)
                .ip(ip),
        )
        .await;

        return Ok(Json(ChatResponse {
            success: true,
            message: reply,
            session_id: payload.session_id,
            patient_id,
            timestamp: now,
            risk_level: Some(RiskLevel::Crisis),
            crisis_detected: true,
            crisis_resources: Some(resources),
            therapist_notified: true,
        }));
    }

    let ai = state
        .ai
        .as_ref()
        .ok_or(IntegrationError::NotConfigured { service: "ai" })?;

    let mut history = recent_history(&state, &patient_id).await?;
    history.push(ChatTurn {
        role: ChatRole::User,
        content: payload.message.clone(),
    });

    let request = AiRequest {
        system: prompt::build_system_prompt(&config),
        history,
        temperature: state.config.ai.temperature,
        max_tokens: AI_MAX_TOKENS,
    };
    let raw = match ai.complete(&request).await {
        Ok(raw) => raw,
        Err(e) => {
            let correlation_id = Uuid::new_v4().to_string();
            audit::record(
                state.store.as_ref(),
                AuditEvent::new(actor, "chat_message", "conversation", AuditOutcome::Failure)
                    .patient(&patient_id)
                    .ip(ip)
                    .correlation(&correlation_id),
            )
            .await;
            return Err(ApiError::integration(e, correlation_id));
        }
    };
    let parsed = prompt::parse_model_reply(&raw);

    store_exchange(
        &state,
        &patient_id,
        &payload.session_id,
        &payload.message,
        &parsed.reply,
        parsed.risk_level,
    )
    .await?;

    let elevated = parsed.risk_level.filter(RiskLevel::is_elevated);
    if let Some(risk) = elevated {
        tracing::warn!(patient_id = %patient_id, risk_level = risk.as_str(), "Model reported elevated risk");
        if let Some(severity) = AlertSeverity::from_risk(risk) {
            state
                .store
                .create_alert(&CrisisAlert::new(
                    &patient_id,
                    therapist.id,
                    state.crisis.categorize(&payload.message),
                    severity,
                    AlertSource::AiAssessment,
                ))
                .await?;
        }
    }

    state
        .store
        .update_patient_activity(&patient_id, parsed.risk_level.unwrap_or(patient.risk_level), now)
        .await?;

    audit::record(
        state.store.as_ref(),
        AuditEvent::new(actor, "chat_message", "conversation", AuditOutcome::Success)
            .patient(&patient_id)
            .ip(ip),
    )
    .await;

    tracing::info!(
        patient_id = %patient_id,
        provider = ai.name(),
        reply_chars = parsed.reply.chars().count(),
        "Chat reply generated"
    );

    Ok(Json(ChatResponse {
        success: true,
        message: parsed.reply,
        session_id: payload.session_id,
        patient_id,
        timestamp: now,
        risk_level: parsed.risk_level,
        crisis_detected: elevated == Some(RiskLevel::Crisis),
        crisis_resources: elevated
            .map(|_| crisis::emergency_resources(&state.config.crisis, Some(&config.instructions))),
        therapist_notified: elevated.is_some(),
    }))
}

/// Rejects revoked patients always, and patients without consent when
/// consent is required. Denials are audited.
async fn check_chat_access(
    state: &AppState,
    patient: Option<&PatientRecord>,
    patient_id: &str,
    action: &str,
    ip: Option<String>,
) -> Result<(), ApiError> {
    let status = patient.map(|p| p.consent_status);
    let denial = match status {
        Some(ConsentStatus::Revoked) => Some("Patient consent has been revoked"),
        Some(ConsentStatus::Granted) => None,
        _ if state.config.patient_consent_required => Some("Patient consent is required before using the chat"),
        _ => None,
    };
    let Some(message) = denial else {
        return Ok(());
    };

    audit::record(
        state.store.as_ref(),
        AuditEvent::new(format!("patient:{}", patient_id), action, "conversation", AuditOutcome::Denied)
            .patient(patient_id)
            .ip(ip),
    )
    .await;
    Err(ApiError::Forbidden(message.to_string()))
}

/// Decrypted prior turns, oldest first, leaving room for the new message.
async fn recent_history(state: &AppState, patient_id: &str) -> Result<Vec<ChatTurn>, ApiError> {
    let limit = state.config.ai.max_conversation_history.saturating_sub(1);
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut turns = Vec::new();
    for message in state.store.recent_messages(patient_id, limit).await? {
        let role = match message.sender {
            Sender::Patient => ChatRole::User,
            Sender::Assistant => ChatRole::Assistant,
            Sender::Therapist | Sender::System => continue,
        };
        turns.push(ChatTurn {
            role,
            content: state.cipher.decrypt_str(&message.encrypted_content)?,
        });
    }
    Ok(turns)
}

async fn store_exchange(
    state: &AppState,
    patient_id: &str,
    session_id: &str,
    patient_text: &str,
    reply: &str,
    risk: Option<RiskLevel>,
) -> Result<(), ApiError> {
    let incoming = StoredMessage::new(
        patient_id,
        session_id,
        Sender::Patient,
        state.cipher.encrypt_str(patient_text)?,
        risk,
    );
    let mut outgoing = StoredMessage::new(
        patient_id,
        session_id,
        Sender::Assistant,
        state.cipher.encrypt_str(reply)?,
        None,
    );
    // Keep the reply strictly after the message it answers.
    outgoing.created_at = incoming.created_at + Duration::milliseconds(1);

    state.store.append_message(&incoming).await?;
    state.store.append_message(&outgoing).await?;
    Ok(())
}

async fn record_consent(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    payload: Result<Json<ConsentRequest>, JsonRejection>,
) -> Result<Json<ConsentResponse>, ApiError> {
    let payload = validated(payload)?;
    let therapist = active_therapist(&state, payload.therapist_id).await?;
    let patient_id = anonymize_patient_id(
        &therapist.id.to_string(),
        &payload.patient_ref,
        &state.config.anonymization_salt,
    );
    let now = Utc::now();

    let mut patient = match state.store.get_patient(&patient_id).await? {
        Some(patient) => patient,
        None => new_patient(patient_id.clone(), therapist.id, state.config.data_retention_days)?,
    };

    let mut crm_contact_created = false;

    if payload.consent_granted {
        let info = PersonalInfo {
            first_name: payload.first_name.clone(),
            last_name: payload.last_name.clone(),
            email: payload.email.clone(),
            phone: payload.phone.clone(),
        };
        let has_info = info.first_name.is_some()
            || info.last_name.is_some()
            || info.email.is_some()
            || info.phone.is_some();
        if has_info {
            patient.encrypted_personal_info = Some(state.cipher.encrypt_json(&info)?);
        }

        if payload.create_crm_contact && patient.encrypted_crm_contact_id.is_none() {
            match &state.crm {
                Some(crm) => {
                    let contact_id = crm
                        .create_contact(&NewContact {
                            first_name: info.first_name.clone().unwrap_or_default(),
                            last_name: info.last_name.clone().unwrap_or_default(),
                            email: info.email.clone(),
                            phone: info.phone.clone(),
                        })
                        .await?;
                    patient.encrypted_crm_contact_id = Some(state.cipher.encrypt_str(&contact_id)?);
                    crm_contact_created = true;
                }
                None => tracing::warn!(patient_id = %patient_id, "CRM not configured; contact not created"),
            }
        }

        patient.consent_status = ConsentStatus::Granted;
        patient.consent_at = Some(now);
        patient.retention_until = retention_deadline(now, state.config.data_retention_days)?;
    } else {
        patient.consent_status = ConsentStatus::Revoked;
        patient.consent_at = Some(now);
    }
    patient.updated_at = now;

    state.store.upsert_patient(&patient).await?;

    let action = if payload.consent_granted { "consent_granted" } else { "consent_revoked" };
    tracing::info!(patient_id = %patient_id, action = action, crm_contact_created, "Consent recorded");
    audit::record(
        state.store.as_ref(),
        AuditEvent::new(format!("patient:{}", patient_id), action, "consent", AuditOutcome::Success)
            .patient(&patient_id)
            .ip(client_ip(&connect_info)),
    )
    .await;

    Ok(Json(ConsentResponse {
        success: true,
        message: if payload.consent_granted {
            "Consent recorded".to_string()
        } else {
            "Consent revoked".to_string()
        },
        patient_id,
        consent_status: patient.consent_status,
        crm_contact_created,
    }))
}

async fn emergency_resources(
    Extension(state): Extension<Arc<AppState>>,
    query: Result<Query<EmergencyResourcesQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;

    let instructions = match query.therapist_id {
        Some(therapist_id) => {
            let therapist = active_therapist(&state, therapist_id).await?;
            Some(chatbot_config(&state, therapist.id).await?.instructions)
        }
        None => None,
    };

    let resources = crisis::emergency_resources(&state.config.crisis, instructions.as_ref());
    Ok(Json(json!({ "success": true, "resources": resources })))
}

/// Anonymized id and stored record for a session lookup, after the consent gate.
async fn session_patient(
    state: &AppState,
    query: &SessionQuery,
    action: &str,
    ip: Option<String>,
) -> Result<(String, Option<PatientRecord>), ApiError> {
    let therapist = active_therapist(state, query.therapist_id).await?;
    let patient_id = anonymize_patient_id(
        &therapist.id.to_string(),
        &query.patient_ref,
        &state.config.anonymization_salt,
    );
    let patient = state.store.get_patient(&patient_id).await?;
    check_chat_access(state, patient.as_ref(), &patient_id, action, ip).await?;
    Ok((patient_id, patient))
}

async fn conversation_history(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> Result<Json<ConversationHistoryResponse>, ApiError> {
    let Query(query) = query?;
    query.validate()?;
    let ip = client_ip(&connect_info);
    let (patient_id, patient) = session_patient(&state, &query, "view_history", ip.clone()).await?;

    let mut messages = Vec::new();
    if patient.is_some() {
        let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        for message in state.store.session_messages(&patient_id, &query.session_id, limit).await? {
            let content = match message.sender {
                Sender::System => "[System message]".to_string(),
                _ => state.cipher.decrypt_str(&message.encrypted_content)?,
            };
            messages.push(HistoryEntry {
                timestamp: message.created_at,
                sender: message.sender,
                content,
                from: HistoryEntry::label(message.sender),
            });
        }
    }

    audit::record(
        state.store.as_ref(),
        AuditEvent::new(format!("patient:{}", patient_id), "view_history", "conversation", AuditOutcome::Success)
            .patient(&patient_id)
            .ip(ip),
    )
    .await;

    Ok(Json(ConversationHistoryResponse {
        success: true,
        session_id: query.session_id,
        message_count: messages.len(),
        messages,
    }))
}

async fn session_info(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> Result<Json<SessionInfoResponse>, ApiError> {
    let Query(query) = query?;
    query.validate()?;
    let (patient_id, patient) = session_patient(&state, &query, "view_session_info", client_ip(&connect_info)).await?;

    let summary = match &patient {
        Some(_) => state.store.session_summary(&patient_id, &query.session_id).await?,
        None => Default::default(),
    };
    let config = chatbot_config(&state, query.therapist_id).await?;

    Ok(Json(SessionInfoResponse {
        success: true,
        session_id: query.session_id,
        message_count: summary.message_count,
        started_at: summary.started_at,
        last_activity: summary.last_activity,
        consent_status: patient.map_or(ConsentStatus::Pending, |p| p.consent_status),
        chatbot_info: ChatbotInfo::named(&config.branding.bot_name),
    }))
}
