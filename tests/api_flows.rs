use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use engage_gateway::config::Config;
use engage_gateway::integrations::{
    AiProvider, AiRequest, CrmGateway, CrmMessage, CrmSnapshot, DeliveryReceipt, IntegrationError, NewContact,
    ScheduledSession, SessionBooking,
};
use engage_gateway::models::audit::AuditOutcome;
use engage_gateway::models::auth::{Claims, TokenType};
use engage_gateway::models::dashboard::DeliveryChannel;
use engage_gateway::models::therapist::TherapistRole;
use engage_gateway::store::MemoryStore;
use engage_gateway::{build_router, AppState};

const PASSWORD: &str = "Str0ng!Passphrase";
const RAW_PATIENT_REF: &str = "jane.doe@northside-clinic";

struct StubAi {
    reply: Option<String>,
    calls: AtomicUsize,
}

#[async_trait]
impl AiProvider for StubAi {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn complete(&self, _request: &AiRequest) -> Result<String, IntegrationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Some(reply) => Ok(reply.clone()),
            None => Err(IntegrationError::Status {
                service: "anthropic",
                status: 500,
                body: "internal provider stack trace".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct StubCrm {
    contacts: Mutex<Vec<NewContact>>,
    sent: Mutex<Vec<(String, DeliveryChannel, String)>>,
    bookings: Mutex<Vec<(String, SessionBooking)>>,
    fail_sends: AtomicBool,
}

#[async_trait]
impl CrmGateway for StubCrm {
    async fn create_contact(&self, contact: &NewContact) -> Result<String, IntegrationError> {
        self.contacts.lock().unwrap().push(contact.clone());
        Ok("ghl_contact_1".to_string())
    }

    async fn send_message(
        &self,
        contact_id: &str,
        channel: DeliveryChannel,
        _subject: Option<&str>,
        body: &str,
    ) -> Result<DeliveryReceipt, IntegrationError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(IntegrationError::Timeout { service: "crm" });
        }
        self.sent
            .lock()
            .unwrap()
            .push((contact_id.to_string(), channel, body.to_string()));
        Ok(DeliveryReceipt {
            id: "msg_1".to_string(),
            status: "sent".to_string(),
        })
    }

    async fn dashboard_snapshot(&self, _day: NaiveDate) -> Result<CrmSnapshot, IntegrationError> {
        Ok(CrmSnapshot {
            contact_count: 4,
            appointments_today: 2,
        })
    }

    async fn schedule_session(
        &self,
        contact_id: &str,
        booking: &SessionBooking,
    ) -> Result<ScheduledSession, IntegrationError> {
        self.bookings
            .lock()
            .unwrap()
            .push((contact_id.to_string(), booking.clone()));
        Ok(ScheduledSession {
            appointment_id: "appt_1".to_string(),
            calendar_id: "cal_therapy".to_string(),
            title: booking.title.clone(),
            start_time: booking.start_time,
            end_time: booking.end_time,
            status: "confirmed".to_string(),
        })
    }

    async fn patient_messages(&self, contact_id: &str, limit: u32) -> Result<Vec<CrmMessage>, IntegrationError> {
        let sent = self.sent.lock().unwrap();
        Ok(sent
            .iter()
            .rev()
            .filter(|(contact, _, _)| contact == contact_id)
            .take(limit as usize)
            .enumerate()
            .map(|(i, (_, channel, body))| CrmMessage {
                id: format!("crm_msg_{}", i),
                channel: channel.as_str().to_string(),
                direction: "outbound".to_string(),
                body: body.clone(),
                status: "delivered".to_string(),
                sent_at: None,
            })
            .collect())
    }
}

struct Harness {
    app: Router,
    state: Arc<AppState>,
    store: Arc<MemoryStore>,
    ai: Arc<StubAi>,
    crm: Arc<StubCrm>,
}

fn harness_with(overrides: &[(&str, &str)], ai_reply: Option<&str>) -> Harness {
    let mut vars: HashMap<&str, &str> = [
        ("SECRET_KEY", "integration-test-signing-secret-0123456789"),
        ("PATIENT_DATA_ENCRYPTION_KEY", "integration-test-encryption-key-0123456789"),
        ("STORE_BACKEND", "memory"),
        ("BCRYPT_COST", "4"),
        ("RATE_LIMIT_PER_MINUTE", "500"),
        ("EMERGENCY_CONTACT_EMAIL", "oncall@northside.example"),
    ]
    .into_iter()
    .collect();
    for &(key, value) in overrides {
        vars.insert(key, value);
    }
    let config = Config::from_map(&vars).unwrap();

    let ai = Arc::new(StubAi {
        reply: ai_reply.map(str::to_string),
        calls: AtomicUsize::new(0),
    });
    let crm = Arc::new(StubCrm::default());
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(
        AppState::new(
            config,
            store.clone(),
            Some(ai.clone() as Arc<dyn AiProvider>),
            Some(crm.clone() as Arc<dyn CrmGateway>),
        )
        .unwrap(),
    );
    Harness {
        app: build_router(state.clone()),
        state,
        store,
        ai,
        crm,
    }
}

fn harness() -> Harness {
    harness_with(&[], Some(r#"{"reply": "Thanks for sharing. How did that feel?", "risk_level": "low"}"#))
}

async fn call(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

/// Registers a therapist and returns (therapist id, access token, refresh token).
async fn register(app: &Router, email: &str) -> (String, String, String) {
    let (status, body) = call(
        app,
        Method::POST,
        "/auth/register",
        None,
        Some(json!({
            "email": email,
            "password": PASSWORD,
            "first_name": "Ana",
            "last_name": "Lee",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    (
        body["therapist"]["id"].as_str().unwrap().to_string(),
        body["access_token"].as_str().unwrap().to_string(),
        body["refresh_token"].as_str().unwrap().to_string(),
    )
}

async fn consent(app: &Router, therapist_id: &str, patient_ref: &str, create_crm_contact: bool) -> Value {
    let (status, body) = call(
        app,
        Method::POST,
        "/chat/consent",
        None,
        Some(json!({
            "therapist_id": therapist_id,
            "patient_ref": patient_ref,
            "consent_granted": true,
            "consent_text": "I agree to use the between-session assistant.",
            "signature": "Jane Doe",
            "first_name": "Jane",
            "last_name": "Doe",
            "email": "jane@example.com",
            "create_crm_contact": create_crm_contact,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body
}

async fn chat(app: &Router, therapist_id: &str, patient_ref: &str, message: &str) -> (StatusCode, Value) {
    chat_in(app, therapist_id, patient_ref, "session-1", message).await
}

async fn chat_in(
    app: &Router,
    therapist_id: &str,
    patient_ref: &str,
    session_id: &str,
    message: &str,
) -> (StatusCode, Value) {
    call(
        app,
        Method::POST,
        "/chat/message",
        None,
        Some(json!({
            "therapist_id": therapist_id,
            "patient_ref": patient_ref,
            "session_id": session_id,
            "message": message,
        })),
    )
    .await
}

#[tokio::test]
async fn health_reports_status() {
    let h = harness();
    let (status, body) = call(&h.app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = call(&h.app, Method::GET, "/health/detailed", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["components"]["database"]["status"], "healthy");
    assert_eq!(body["components"]["crm"]["configured"], true);
}

#[tokio::test]
async fn register_login_and_verify() {
    let h = harness();
    let (therapist_id, _, _) = register(&h.app, "ana@northside.example").await;

    let (status, body) = call(
        &h.app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": "ANA@northside.example", "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["access_token"].as_str().unwrap().to_string();

    let (status, body) = call(&h.app, Method::GET, "/auth/verify", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["therapist"]["id"], therapist_id);
    assert!(body["therapist"].get("password_hash").is_none());

    let (status, _) = call(
        &h.app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": "ana@northside.example", "password": "wrong-password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn duplicate_and_weak_registrations_rejected() {
    let h = harness();
    register(&h.app, "dup@northside.example").await;

    let body = json!({
        "email": "dup@northside.example",
        "password": PASSWORD,
        "first_name": "Ana",
        "last_name": "Lee",
    });
    let (status, _) = call(&h.app, Method::POST, "/auth/register", None, Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let weak = json!({
        "email": "weak@northside.example",
        "password": "short",
        "first_name": "Ana",
        "last_name": "Lee",
    });
    let (status, body) = call(&h.app, Method::POST, "/auth/register", None, Some(weak)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn malformed_json_is_a_client_error() {
    let h = harness();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/chat/message")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chatbot_config_read_after_write() {
    let h = harness();
    let (_, token, _) = register(&h.app, "config@northside.example").await;

    let (status, body) = call(&h.app, Method::GET, "/therapist/chatbot-config", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 0);
    assert_eq!(body["config"]["branding"]["bot_name"], "Therapy Bot");

    let mut config = body["config"].clone();
    config["branding"]["bot_name"] = json!("Willow");
    config["branding"]["primary_color"] = json!("#336699");
    config["instructions"]["allowed_topics"] = json!(["sleep hygiene"]);
    config["booking"]["hours_start"] = json!("08:30");

    let (status, written) =
        call(&h.app, Method::PUT, "/therapist/chatbot-config", Some(&token), Some(config.clone())).await;
    assert_eq!(status, StatusCode::OK, "{}", written);
    assert_eq!(written["version"], 1);

    let (_, read) = call(&h.app, Method::GET, "/therapist/chatbot-config", Some(&token), None).await;
    assert_eq!(read["config"], config);
    assert_eq!(read["version"], 1);

    config["branding"]["bot_name"] = json!("Second write");
    call(&h.app, Method::PUT, "/therapist/chatbot-config", Some(&token), Some(config)).await;
    let (_, read) = call(&h.app, Method::GET, "/therapist/chatbot-config", Some(&token), None).await;
    assert_eq!(read["config"]["branding"]["bot_name"], "Second write");
    assert_eq!(read["version"], 2);
}

#[tokio::test]
async fn invalid_chatbot_config_rejected() {
    let h = harness();
    let (_, token, _) = register(&h.app, "badconfig@northside.example").await;
    let (status, _) = call(
        &h.app,
        Method::PUT,
        "/therapist/chatbot-config",
        Some(&token),
        Some(json!({ "branding": { "primary_color": "blue" } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn patient_list_never_exposes_raw_reference() {
    let h = harness();
    let (therapist_id, token, _) = register(&h.app, "list@northside.example").await;
    consent(&h.app, &therapist_id, RAW_PATIENT_REF, false).await;
    let (status, _) = chat(&h.app, &therapist_id, RAW_PATIENT_REF, "Work has been stressful this week").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&h.app, Method::GET, "/therapist/patients", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let patient = &body["patients"][0];
    let patient_id = patient["patient_id"].as_str().unwrap();
    assert!(patient_id.starts_with("anon_"));
    assert_ne!(patient_id, RAW_PATIENT_REF);
    assert_eq!(patient["initials"], "J.D.");
    assert_eq!(patient["message_count"], 2);

    let raw = body.to_string();
    assert!(!raw.contains(RAW_PATIENT_REF));
    assert!(!raw.contains("Jane"));
    assert!(!raw.contains("jane@example.com"));
}

#[tokio::test]
async fn other_therapists_patients_are_invisible() {
    let h = harness();
    let (therapist_id, _, _) = register(&h.app, "owner@northside.example").await;
    let (_, other_token, _) = register(&h.app, "other@northside.example").await;
    let consented = consent(&h.app, &therapist_id, RAW_PATIENT_REF, false).await;
    let patient_id = consented["patient_id"].as_str().unwrap();

    let (_, body) = call(&h.app, Method::GET, "/therapist/patients", Some(&other_token), None).await;
    assert_eq!(body["total"], 0);

    let uri = format!("/therapist/patients/{}/conversation", patient_id);
    let (status, _) = call(&h.app, Method::GET, &uri, Some(&other_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn crisis_message_returns_emergency_contacts() {
    let h = harness();
    let (therapist_id, token, _) = register(&h.app, "crisis@northside.example").await;
    consent(&h.app, &therapist_id, RAW_PATIENT_REF, false).await;

    let (status, body) = chat(&h.app, &therapist_id, RAW_PATIENT_REF, "Some days I want to die").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["crisis_detected"], true);
    assert_eq!(body["risk_level"], "crisis");
    assert_eq!(body["therapist_notified"], true);

    let resources = &body["crisis_resources"];
    let numbers: Vec<&str> = resources["hotlines"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["number"].as_str().unwrap())
        .collect();
    assert!(numbers.contains(&"988"));
    assert!(numbers.contains(&"1-800-273-8255"));
    assert_eq!(resources["emergency_contact_email"], "oncall@northside.example");
    assert!(body["message"].as_str().unwrap().contains("988"));
    assert_eq!(h.ai.calls.load(Ordering::SeqCst), 0);

    let (_, dashboard) = call(&h.app, Method::GET, "/therapist/dashboard", Some(&token), None).await;
    assert_eq!(dashboard["stats"]["open_alerts"], 1);
    assert_eq!(dashboard["stats"]["crisis_patients"], 1);
    assert_eq!(dashboard["crm"]["available"], true);
    let alert_id = dashboard["recent_alerts"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(dashboard["recent_alerts"][0]["alert_type"], "suicide_ideation");

    let uri = format!("/therapist/alerts/{}/acknowledge", alert_id);
    let (status, _) = call(&h.app, Method::POST, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, dashboard) = call(&h.app, Method::GET, "/therapist/dashboard", Some(&token), None).await;
    assert_eq!(dashboard["stats"]["open_alerts"], 0);
}

#[tokio::test]
async fn emergency_resources_are_public() {
    let h = harness();
    let (status, body) = call(&h.app, Method::GET, "/chat/emergency-resources", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resources"]["hotlines"][0]["number"], "988");

    let (status, _) = call(&h.app, Method::GET, "/chat/emergency-resources?therapist_id=nope", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_without_consent_is_forbidden() {
    let h = harness();
    let (therapist_id, _, _) = register(&h.app, "noconsent@northside.example").await;
    let (status, body) = chat(&h.app, &therapist_id, RAW_PATIENT_REF, "hello").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);
    assert_eq!(h.ai.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn model_reported_high_risk_raises_alert() {
    let h = harness_with(&[], Some(r#"{"reply": "I'm glad you told me.", "risk_level": "high"}"#));
    let (therapist_id, token, _) = register(&h.app, "highrisk@northside.example").await;
    consent(&h.app, &therapist_id, RAW_PATIENT_REF, false).await;

    let (status, body) = chat(&h.app, &therapist_id, RAW_PATIENT_REF, "Everything feels pointless lately").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["risk_level"], "high");
    assert_eq!(body["therapist_notified"], true);
    assert!(body["crisis_resources"].is_object());

    let (_, dashboard) = call(&h.app, Method::GET, "/therapist/dashboard", Some(&token), None).await;
    assert_eq!(dashboard["recent_alerts"][0]["source"], "ai_assessment");
    assert_eq!(dashboard["recent_alerts"][0]["severity"], "high");
}

#[tokio::test]
async fn upstream_failure_is_502_with_correlation_id() {
    let h = harness_with(&[], None);
    let (therapist_id, _, _) = register(&h.app, "upstream@northside.example").await;
    consent(&h.app, &therapist_id, RAW_PATIENT_REF, false).await;

    let (status, body) = chat(&h.app, &therapist_id, RAW_PATIENT_REF, "hello there").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["success"], false);
    assert!(body["correlation_id"].as_str().is_some());
    assert!(!body.to_string().contains("stack trace"));
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let h = harness();
    let (therapist_id, _, _) = register(&h.app, "expired@northside.example").await;

    let past = (Utc::now().timestamp() - 120) as usize;
    let claims = Claims {
        sub: therapist_id,
        email: "expired@northside.example".to_string(),
        role: TherapistRole::Therapist,
        practice_id: None,
        token_type: TokenType::Access,
        exp: past,
        iat: past - 1800,
    };
    let expired = h.state.tokens.sign(&claims).unwrap();

    let (status, body) = call(&h.app, Method::GET, "/therapist/patients", Some(&expired), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.get("patients").is_none());
}

#[tokio::test]
async fn refresh_token_cannot_access_therapist_routes() {
    let h = harness();
    let (_, _, refresh) = register(&h.app, "refresh@northside.example").await;

    let (status, _) = call(&h.app, Method::GET, "/therapist/dashboard", Some(&refresh), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(
        &h.app,
        Method::POST,
        "/auth/refresh",
        None,
        Some(json!({ "refresh_token": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let access = body["access_token"].as_str().unwrap();
    let (status, _) = call(&h.app, Method::GET, "/therapist/dashboard", Some(access), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn disabled_account_tokens_stop_working() {
    let h = harness();
    let (_, token, _) = register(&h.app, "disable@northside.example").await;

    let (status, _) = call(&h.app, Method::POST, "/therapist/account/disable", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&h.app, Method::GET, "/therapist/dashboard", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn requests_over_minute_limit_get_429() {
    let h = harness_with(&[("RATE_LIMIT_PER_MINUTE", "3")], None);
    for _ in 0..3 {
        let (status, _) = call(&h.app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().get(header::RETRY_AFTER).is_some());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["retry_after"].as_u64().unwrap() <= 60);
}

#[tokio::test]
async fn therapist_message_goes_through_crm() {
    let h = harness();
    let (therapist_id, token, _) = register(&h.app, "outreach@northside.example").await;
    let consented = consent(&h.app, &therapist_id, RAW_PATIENT_REF, true).await;
    assert_eq!(consented["crm_contact_created"], true);
    let patient_id = consented["patient_id"].as_str().unwrap();
    assert_eq!(h.crm.contacts.lock().unwrap()[0].first_name, "Jane");

    let uri = format!("/therapist/patients/{}/message", patient_id);
    let (status, body) = call(
        &h.app,
        Method::POST,
        &uri,
        Some(&token),
        Some(json!({ "channel": "sms", "message": "Reminder: session tomorrow at 10." })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["delivery_id"], "msg_1");

    let sent = h.crm.sent.lock().unwrap();
    assert_eq!(sent[0].0, "ghl_contact_1");
    assert_eq!(sent[0].1, DeliveryChannel::Sms);

    let (status, _) = call(
        &h.app,
        Method::POST,
        "/therapist/patients/anon_0000000000000000/message",
        Some(&token),
        Some(json!({ "channel": "sms", "message": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn conversation_review_summarizes_history() {
    let h = harness();
    let (therapist_id, token, _) = register(&h.app, "review@northside.example").await;
    let consented = consent(&h.app, &therapist_id, RAW_PATIENT_REF, false).await;
    let patient_id = consented["patient_id"].as_str().unwrap();
    chat(&h.app, &therapist_id, RAW_PATIENT_REF, "I've been anxious about my job").await;

    let uri = format!("/therapist/patients/{}/conversation", patient_id);
    let (status, body) = call(&h.app, Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["stats"]["total_messages"], 2);
    assert_eq!(body["stats"]["patient_messages"], 1);
    assert_eq!(body["messages"][0]["content"], "I've been anxious about my job");
    assert_eq!(body["key_themes"], json!(["anxiety", "work_stress"]));
}

async fn revoke(app: &Router, therapist_id: &str, patient_ref: &str) {
    let (status, body) = call(
        app,
        Method::POST,
        "/chat/consent",
        None,
        Some(json!({
            "therapist_id": therapist_id,
            "patient_ref": patient_ref,
            "consent_granted": false,
            "consent_text": "I withdraw my consent.",
            "signature": "Jane Doe",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["consent_status"], "revoked");
}

#[tokio::test]
async fn auth_endpoints_allow_ten_requests_per_minute() {
    let h = harness();
    for _ in 0..10 {
        let (status, _) = call(
            &h.app,
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "nobody@northside.example", "password": PASSWORD })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, body) = call(
        &h.app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": "nobody@northside.example", "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["retry_after"].as_u64().unwrap() <= 60);

    // The general limiter is separate.
    let (status, _) = call(&h.app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_email_still_runs_password_check() {
    let h = harness();
    assert!(h.state.decoy_hash.get().is_none());

    let (status, unknown) = call(
        &h.app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": "ghost@northside.example", "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let decoy = h.state.decoy_hash.get().expect("decoy hash built on first miss");
    assert!(decoy.starts_with("$2"));
    assert!(!bcrypt::verify(PASSWORD, decoy).unwrap());

    register(&h.app, "known@northside.example").await;
    let (status, wrong) = call(
        &h.app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": "known@northside.example", "password": "Wr0ng!Passphrase" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown, wrong);
}

#[tokio::test]
async fn session_message_cap_is_enforced() {
    let h = harness();
    let (therapist_id, token, _) = register(&h.app, "cap@northside.example").await;

    let (_, body) = call(&h.app, Method::GET, "/therapist/chatbot-config", Some(&token), None).await;
    let mut config = body["config"].clone();
    config["instructions"]["max_messages_per_conversation"] = json!(2);
    let (status, _) = call(&h.app, Method::PUT, "/therapist/chatbot-config", Some(&token), Some(config)).await;
    assert_eq!(status, StatusCode::OK);

    consent(&h.app, &therapist_id, RAW_PATIENT_REF, false).await;
    for message in ["First check-in", "Second check-in"] {
        let (status, _) = chat(&h.app, &therapist_id, RAW_PATIENT_REF, message).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = chat(&h.app, &therapist_id, RAW_PATIENT_REF, "Third check-in").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["message"].as_str().unwrap().contains("message limit"));
    assert_eq!(h.ai.calls.load(Ordering::SeqCst), 2);

    let (status, _) = chat_in(&h.app, &therapist_id, RAW_PATIENT_REF, "session-2", "New session").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn chat_without_consent_allowed_when_not_required() {
    let h = harness_with(
        &[("PATIENT_CONSENT_REQUIRED", "false")],
        Some(r#"{"reply": "Hello, I'm here to listen.", "risk_level": "low"}"#),
    );
    let (therapist_id, token, _) = register(&h.app, "optional@northside.example").await;

    let (status, body) = chat(&h.app, &therapist_id, RAW_PATIENT_REF, "hello").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"], "Hello, I'm here to listen.");

    let (_, patients) = call(&h.app, Method::GET, "/therapist/patients", Some(&token), None).await;
    assert_eq!(patients["patients"][0]["consent_status"], "pending");
}

#[tokio::test]
async fn revoked_consent_blocks_chat() {
    let h = harness();
    let (therapist_id, _, _) = register(&h.app, "revoked@northside.example").await;
    consent(&h.app, &therapist_id, RAW_PATIENT_REF, false).await;
    let (status, _) = chat(&h.app, &therapist_id, RAW_PATIENT_REF, "hello").await;
    assert_eq!(status, StatusCode::OK);

    revoke(&h.app, &therapist_id, RAW_PATIENT_REF).await;
    let (status, body) = chat(&h.app, &therapist_id, RAW_PATIENT_REF, "hello again").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["message"].as_str().unwrap().contains("revoked"));
    assert_eq!(h.ai.calls.load(Ordering::SeqCst), 1);

    let denied = h
        .store
        .audit_events()
        .await
        .into_iter()
        .filter(|e| e.action == "chat_message" && e.outcome == AuditOutcome::Denied)
        .count();
    assert_eq!(denied, 1);
}

#[tokio::test]
async fn revoked_consent_blocks_chat_even_when_not_required() {
    let h = harness_with(&[("PATIENT_CONSENT_REQUIRED", "false")], Some(r#"{"reply": "ok", "risk_level": "low"}"#));
    let (therapist_id, _, _) = register(&h.app, "optout@northside.example").await;
    revoke(&h.app, &therapist_id, RAW_PATIENT_REF).await;

    let (status, _) = chat(&h.app, &therapist_id, RAW_PATIENT_REF, "hello").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(h.ai.calls.load(Ordering::SeqCst), 0);

    let uri = format!(
        "/chat/session-info?therapist_id={}&patient_ref={}&session_id=session-1",
        therapist_id, "jane.doe%40northside-clinic"
    );
    let (status, _) = call(&h.app, Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let stranger = format!(
        "/chat/session-info?therapist_id={}&patient_ref=first-visit&session_id=session-1",
        therapist_id
    );
    let (status, body) = call(&h.app, Method::GET, &stranger, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["consent_status"], "pending");
    assert_eq!(body["message_count"], 0);
}

#[tokio::test]
async fn model_risk_alert_uses_message_category() {
    let h = harness_with(&[], Some(r#"{"reply": "Thank you for telling me.", "risk_level": "high"}"#));
    let (therapist_id, token, _) = register(&h.app, "category@northside.example").await;
    consent(&h.app, &therapist_id, RAW_PATIENT_REF, false).await;

    let (status, body) = chat(&h.app, &therapist_id, RAW_PATIENT_REF, "I feel paranoid, like none of this is real").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["crisis_detected"], false);

    let (_, dashboard) = call(&h.app, Method::GET, "/therapist/dashboard", Some(&token), None).await;
    assert_eq!(dashboard["recent_alerts"][0]["alert_type"], "psychosis_indicators");
    assert_eq!(dashboard["recent_alerts"][0]["source"], "ai_assessment");
}

#[tokio::test]
async fn crm_failure_correlation_id_matches_audit() {
    let h = harness();
    let (therapist_id, token, _) = register(&h.app, "corr@northside.example").await;
    let consented = consent(&h.app, &therapist_id, RAW_PATIENT_REF, true).await;
    let patient_id = consented["patient_id"].as_str().unwrap();
    h.crm.fail_sends.store(true, Ordering::SeqCst);

    let uri = format!("/therapist/patients/{}/message", patient_id);
    let (status, body) = call(
        &h.app,
        Method::POST,
        &uri,
        Some(&token),
        Some(json!({ "channel": "sms", "message": "Checking in" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let correlation_id = body["correlation_id"].as_str().unwrap();

    let failures: Vec<_> = h
        .store
        .audit_events()
        .await
        .into_iter()
        .filter(|e| e.action == "message_patient" && e.outcome == AuditOutcome::Failure)
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].correlation_id.as_deref(), Some(correlation_id));
    assert_eq!(failures[0].patient_id.as_deref(), Some(patient_id));
}

#[tokio::test]
async fn ai_failure_correlation_id_matches_audit() {
    let h = harness_with(&[], None);
    let (therapist_id, _, _) = register(&h.app, "aicorr@northside.example").await;
    consent(&h.app, &therapist_id, RAW_PATIENT_REF, false).await;

    let (status, body) = chat(&h.app, &therapist_id, RAW_PATIENT_REF, "hello there").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let audited = h
        .store
        .audit_events()
        .await
        .into_iter()
        .find(|e| e.outcome == AuditOutcome::Failure)
        .unwrap();
    assert_eq!(audited.correlation_id.as_deref(), body["correlation_id"].as_str());
}

#[tokio::test]
async fn patient_reads_own_session_history() {
    let h = harness();
    let (therapist_id, _, _) = register(&h.app, "history@northside.example").await;
    consent(&h.app, &therapist_id, RAW_PATIENT_REF, false).await;
    chat(&h.app, &therapist_id, RAW_PATIENT_REF, "I slept better this week").await;
    chat_in(&h.app, &therapist_id, RAW_PATIENT_REF, "session-2", "Different session").await;

    let uri = format!(
        "/chat/conversation-history?therapist_id={}&patient_ref={}&session_id=session-1",
        therapist_id, "jane.doe%40northside-clinic"
    );
    let (status, body) = call(&h.app, Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["session_id"], "session-1");
    assert_eq!(body["message_count"], 2);
    assert_eq!(body["messages"][0]["content"], "I slept better this week");
    assert_eq!(body["messages"][0]["from"], "You");
    assert_eq!(body["messages"][0]["type"], "patient");
    assert_eq!(body["messages"][1]["from"], "AI Support");

    let (_, limited) = call(&h.app, Method::GET, &format!("{}&limit=1", uri), None, None).await;
    assert_eq!(limited["message_count"], 1);
    assert_eq!(limited["messages"][0]["from"], "AI Support");

    let (status, _) = call(&h.app, Method::GET, &format!("{}&limit=500", uri), None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let stranger = format!(
        "/chat/conversation-history?therapist_id={}&patient_ref=someone-else&session_id=session-1",
        therapist_id
    );
    let (status, _) = call(&h.app, Method::GET, &stranger, None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn session_info_reports_counts_and_bot() {
    let h = harness();
    let (therapist_id, _, _) = register(&h.app, "info@northside.example").await;
    consent(&h.app, &therapist_id, RAW_PATIENT_REF, false).await;
    chat(&h.app, &therapist_id, RAW_PATIENT_REF, "Quick check-in").await;

    let uri = format!(
        "/chat/session-info?therapist_id={}&patient_ref={}&session_id=session-1",
        therapist_id, "jane.doe%40northside-clinic"
    );
    let (status, body) = call(&h.app, Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message_count"], 2);
    assert_eq!(body["consent_status"], "granted");
    assert!(body["started_at"].is_string());
    assert!(body["last_activity"].is_string());
    assert_eq!(body["chatbot_info"]["name"], "Therapy Bot");
    assert!(!body["chatbot_info"]["limitations"].as_array().unwrap().is_empty());

    let (status, _) = call(&h.app, Method::GET, "/chat/session-info?therapist_id=nope", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn session_notes_are_encrypted_and_owner_only() {
    let h = harness();
    let (therapist_id, token, _) = register(&h.app, "notes@northside.example").await;
    let (_, other_token, _) = register(&h.app, "notes-other@northside.example").await;
    let consented = consent(&h.app, &therapist_id, RAW_PATIENT_REF, false).await;
    let patient_id = consented["patient_id"].as_str().unwrap();

    let uri = format!("/therapist/patients/{}/session-note", patient_id);
    let today = Utc::now().date_naive();
    let (status, body) = call(
        &h.app,
        Method::POST,
        &uri,
        Some(&token),
        Some(json!({
            "session_date": today,
            "note_content": "Discussed sleep hygiene and work boundaries.",
            "next_session_plan": "Review sleep diary",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    let note_id = body["note_id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &h.app,
        Method::POST,
        &uri,
        Some(&token),
        Some(json!({ "session_date": today + Duration::days(1), "note_content": "Too early" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &h.app,
        Method::POST,
        &uri,
        Some(&other_token),
        Some(json!({ "session_date": today, "note_content": "Not my patient" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let list_uri = format!("/therapist/patients/{}/session-notes", patient_id);
    let (status, body) = call(&h.app, Method::GET, &list_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let notes = body["notes"].as_array().unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0]["id"], note_id);
    assert_eq!(notes[0]["note_content"], "Discussed sleep hygiene and work boundaries.");
    assert_eq!(notes[0]["next_session_plan"], "Review sleep diary");
    assert_eq!(notes[0]["risk_assessment"], "low");

    let audited = h
        .store
        .audit_events()
        .await
        .into_iter()
        .any(|e| e.action == "create_session_note" && e.patient_id.as_deref() == Some(patient_id));
    assert!(audited);
}

#[tokio::test]
async fn therapist_books_session_and_reads_crm_messages() {
    let h = harness();
    let (therapist_id, token, _) = register(&h.app, "booking@northside.example").await;
    let consented = consent(&h.app, &therapist_id, RAW_PATIENT_REF, true).await;
    let patient_id = consented["patient_id"].as_str().unwrap();

    let start: DateTime<Utc> = Utc::now() + Duration::days(2);
    let uri = format!("/therapist/patients/{}/sessions", patient_id);
    let (status, body) = call(
        &h.app,
        Method::POST,
        &uri,
        Some(&token),
        Some(json!({ "start_time": start, "end_time": start + Duration::minutes(50) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["session"]["appointment_id"], "appt_1");
    {
        let bookings = h.crm.bookings.lock().unwrap();
        assert_eq!(bookings[0].0, "ghl_contact_1");
        assert_eq!(bookings[0].1.title, "Therapy Session");
        assert_eq!(bookings[0].1.description, "Individual therapy session");
    }

    let (status, _) = call(
        &h.app,
        Method::POST,
        &uri,
        Some(&token),
        Some(json!({ "start_time": start, "end_time": start - Duration::minutes(5) })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let message_uri = format!("/therapist/patients/{}/message", patient_id);
    call(
        &h.app,
        Method::POST,
        &message_uri,
        Some(&token),
        Some(json!({ "channel": "sms", "message": "See you Thursday." })),
    )
    .await;

    let crm_uri = format!("/therapist/patients/{}/crm-messages?limit=10", patient_id);
    let (status, body) = call(&h.app, Method::GET, &crm_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["total"], 1);
    assert_eq!(body["messages"][0]["body"], "See you Thursday.");

    let (status, _) = call(
        &h.app,
        Method::GET,
        &format!("/therapist/patients/{}/crm-messages?limit=0", patient_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn booking_requires_crm_contact() {
    let h = harness();
    let (therapist_id, token, _) = register(&h.app, "nocontact@northside.example").await;
    let consented = consent(&h.app, &therapist_id, RAW_PATIENT_REF, false).await;
    let patient_id = consented["patient_id"].as_str().unwrap();

    let start = Utc::now() + Duration::days(1);
    let (status, _) = call(
        &h.app,
        Method::POST,
        &format!("/therapist/patients/{}/sessions", patient_id),
        Some(&token),
        Some(json!({ "start_time": start, "end_time": start + Duration::minutes(50) })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.crm.bookings.lock().unwrap().is_empty());
}
