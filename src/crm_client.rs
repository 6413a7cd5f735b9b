//! GoHighLevel access through its MCP server (JSON-RPC 2.0 `tools/call`).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::CrmSettings;
use crate::integrations::{
    read_success_body, CrmGateway, CrmMessage, CrmSnapshot, DeliveryReceipt, IntegrationError, NewContact,
    ScheduledSession, SessionBooking,
};
use crate::models::dashboard::DeliveryChannel;

const SERVICE: &str = "crm";
const PATIENT_TAG: &str = "therapy_patient";
const THERAPY_CALENDAR: &str = "Therapy Sessions";

pub struct McpCrmClient {
    client: Client,
    base_url: String,
    api_key: String,
    location_id: String,
    timeout: Duration,
    next_id: AtomicU64,
    calendar_id: OnceCell<String>,
}

#[derive(Debug, Serialize)]
struct McpRequest<'a> {
    jsonrpc: &'static str,
    id: String,
    method: &'static str,
    params: McpParams<'a>,
}

#[derive(Debug, Serialize)]
struct McpParams<'a> {
    name: &'a str,
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct McpResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl McpCrmClient {
    pub fn new(base_url: &str, api_key: &str, location_id: &str, timeout_secs: u64) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            location_id: location_id.to_string(),
            timeout: Duration::from_secs(timeout_secs),
            next_id: AtomicU64::new(1),
            calendar_id: OnceCell::new(),
        }
    }

    /// `None` when the API key or location id is missing.
    pub fn from_settings(settings: &CrmSettings) -> Option<Self> {
        match (&settings.api_key, &settings.location_id) {
            (Some(key), Some(location)) => Some(Self::new(
                &settings.mcp_server_url,
                key,
                location,
                settings.timeout_secs,
            )),
            _ => None,
        }
    }

    async fn call_tool(&self, tool: &str, arguments: Map<String, Value>) -> Result<Value, IntegrationError> {
        let mut arguments = arguments;
        arguments.insert("authorization".to_string(), json!(format!("Bearer {}", self.api_key)));
        arguments.insert("locationId".to_string(), json!(self.location_id));

        let request = McpRequest {
            jsonrpc: "2.0",
            id: format!("req_{}", self.next_id.fetch_add(1, Ordering::Relaxed)),
            method: "tools/call",
            params: McpParams {
                name: tool,
                arguments: Value::Object(arguments),
            },
        };

        tracing::debug!(tool = tool, request_id = %request.id, "MCP tool call");

        let response = self
            .client
            .post(format!("{}/mcp", self.base_url))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| IntegrationError::from_reqwest(SERVICE, e))?;

        let body = read_success_body(SERVICE, response).await?;
        let parsed: McpResponse = serde_json::from_str(&body).map_err(|e| IntegrationError::Malformed {
            service: SERVICE,
            message: e.to_string(),
        })?;

        if let Some(error) = parsed.error {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(IntegrationError::Remote {
                service: SERVICE,
                message: format!("{}: {}", tool, message),
            });
        }

        Ok(parsed.result.unwrap_or_else(|| json!({})))
    }

    /// Id of the location's therapy calendar, created on first use and cached.
    async fn therapy_calendar(&self) -> Result<String, IntegrationError> {
        self.calendar_id
            .get_or_try_init(|| async {
                let listed = self.call_tool("calendars_list", Map::new()).await?;
                let existing = listed
                    .get("calendars")
                    .and_then(Value::as_array)
                    .and_then(|calendars| {
                        calendars
                            .iter()
                            .find(|c| c.get("name").and_then(Value::as_str) == Some(THERAPY_CALENDAR))
                    })
                    .and_then(|c| c.get("id"))
                    .and_then(Value::as_str);
                if let Some(id) = existing {
                    return Ok(id.to_string());
                }

                let mut args = Map::new();
                args.insert("name".into(), json!(THERAPY_CALENDAR));
                args.insert("description".into(), json!("Calendar for individual therapy sessions"));
                args.insert("eventTitle".into(), json!("Therapy Session"));
                args.insert("slotDuration".into(), json!(50));
                args.insert("slotInterval".into(), json!(60));
                args.insert("slotBuffer".into(), json!(10));
                tracing::info!("Creating therapy calendar in CRM");
                let created = self.call_tool("calendars_create", args).await?;
                created
                    .pointer("/calendar/id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| malformed("calendars_create result has no calendar.id"))
            })
            .await
            .cloned()
    }
}

fn malformed(message: &str) -> IntegrationError {
    IntegrationError::Malformed {
        service: SERVICE,
        message: message.to_string(),
    }
}

fn timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc))
}

fn text_or(value: &Value, key: &str, default: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or(default).to_string()
}

fn array_len(result: &Value, key: &str) -> u64 {
    result
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.len() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl CrmGateway for McpCrmClient {
    async fn create_contact(&self, contact: &NewContact) -> Result<String, IntegrationError> {
        let mut args = Map::new();
        args.insert("firstName".into(), json!(contact.first_name));
        args.insert("lastName".into(), json!(contact.last_name));
        if let Some(email) = &contact.email {
            args.insert("email".into(), json!(email));
        }
        if let Some(phone) = &contact.phone {
            args.insert("phone".into(), json!(phone));
        }
        args.insert("tags".into(), json!([PATIENT_TAG, "hipaa_compliant"]));

        let result = self.call_tool("contacts_create", args).await?;
        result
            .pointer("/contact/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| malformed("contacts_create result has no contact.id"))
    }

    async fn send_message(
        &self,
        contact_id: &str,
        channel: DeliveryChannel,
        subject: Option<&str>,
        body: &str,
    ) -> Result<DeliveryReceipt, IntegrationError> {
        let mut args = Map::new();
        args.insert("contactId".into(), json!(contact_id));
        args.insert("message".into(), json!(body));
        args.insert("type".into(), json!(channel.as_str()));

        let tool = match channel {
            DeliveryChannel::Sms => "conversations_send_sms",
            DeliveryChannel::Email => {
                args.insert(
                    "subject".into(),
                    json!(subject.unwrap_or("Message from your therapist")),
                );
                "conversations_send_email"
            }
        };

        let result = self.call_tool(tool, args).await?;
        let message = result
            .get("message")
            .ok_or_else(|| malformed("send result has no message"))?;
        let id = message
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("send result has no message.id"))?;
        let status = message.get("status").and_then(Value::as_str).unwrap_or("sent");

        Ok(DeliveryReceipt {
            id: id.to_string(),
            status: status.to_string(),
        })
    }

    async fn dashboard_snapshot(&self, day: NaiveDate) -> Result<CrmSnapshot, IntegrationError> {
        let mut contacts_args = Map::new();
        contacts_args.insert("query".into(), json!(""));
        contacts_args.insert("tags".into(), json!([PATIENT_TAG]));
        contacts_args.insert("limit".into(), json!(100));

        let mut events_args = Map::new();
        events_args.insert("startDate".into(), json!(day.to_string()));
        events_args.insert("endDate".into(), json!(day.to_string()));

        let (contacts, events) = futures::try_join!(
            self.call_tool("contacts_search", contacts_args),
            self.call_tool("calendars_get_events", events_args),
        )?;

        Ok(CrmSnapshot {
            contact_count: array_len(&contacts, "contacts"),
            appointments_today: array_len(&events, "events"),
        })
    }

    async fn schedule_session(
        &self,
        contact_id: &str,
        booking: &SessionBooking,
    ) -> Result<ScheduledSession, IntegrationError> {
        let calendar_id = self.therapy_calendar().await?;

        let mut args = Map::new();
        args.insert("calendarId".into(), json!(calendar_id));
        args.insert("contactId".into(), json!(contact_id));
        args.insert("title".into(), json!(booking.title));
        args.insert("description".into(), json!(booking.description));
        args.insert("startTime".into(), json!(booking.start_time.to_rfc3339()));
        args.insert("endTime".into(), json!(booking.end_time.to_rfc3339()));
        args.insert("appointmentStatus".into(), json!("confirmed"));

        let result = self.call_tool("calendars_create_appointment", args).await?;
        let appointment = result
            .get("appointment")
            .ok_or_else(|| malformed("appointment result has no appointment"))?;
        let appointment_id = appointment
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("appointment result has no appointment.id"))?;

        Ok(ScheduledSession {
            appointment_id: appointment_id.to_string(),
            calendar_id,
            title: text_or(appointment, "title", &booking.title),
            start_time: timestamp(appointment.get("startTime")).unwrap_or(booking.start_time),
            end_time: timestamp(appointment.get("endTime")).unwrap_or(booking.end_time),
            status: text_or(appointment, "appointmentStatus", "confirmed"),
        })
    }

    async fn patient_messages(&self, contact_id: &str, limit: u32) -> Result<Vec<CrmMessage>, IntegrationError> {
        let mut args = Map::new();
        args.insert("contactId".into(), json!(contact_id));
        args.insert("limit".into(), json!(limit));

        let result = self.call_tool("conversations_get_messages", args).await?;
        let Some(items) = result.get("messages").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };

        items
            .iter()
            .map(|item| {
                let id = item
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("message without id"))?;
                Ok(CrmMessage {
                    id: id.to_string(),
                    channel: text_or(item, "type", "sms"),
                    direction: text_or(item, "direction", "inbound"),
                    body: text_or(item, "body", ""),
                    status: text_or(item, "status", "delivered"),
                    sent_at: timestamp(item.get("dateAdded")),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use std::sync::{Arc, Mutex};

    /// Fake MCP server that records every request and answers per tool name.
    async fn spawn_fake_mcp(
        seen: Arc<Mutex<Vec<Value>>>,
    ) -> String {
        let app = Router::new().route(
            "/mcp",
            post(move |Json(body): Json<Value>| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(body.clone());
                    let tool = body["params"]["name"].as_str().unwrap_or_default().to_string();
                    let reply = match tool.as_str() {
                        "contacts_create" => json!({"jsonrpc": "2.0", "id": body["id"], "result": {"contact": {"id": "ghl_123"}}}),
                        "conversations_send_email" => json!({"jsonrpc": "2.0", "id": body["id"], "result": {"message": {"id": "msg_9", "status": "queued"}}}),
                        "contacts_search" => json!({"jsonrpc": "2.0", "id": body["id"], "result": {"contacts": [{}, {}, {}]}}),
                        "calendars_get_events" => json!({"jsonrpc": "2.0", "id": body["id"], "result": {"events": [{}]}}),
                        "calendars_list" => json!({"jsonrpc": "2.0", "id": body["id"], "result": {"calendars": [{"id": "cal_other", "name": "Intake calls"}]}}),
                        "calendars_create" => json!({"jsonrpc": "2.0", "id": body["id"], "result": {"calendar": {"id": "cal_therapy"}}}),
                        "calendars_create_appointment" => json!({"jsonrpc": "2.0", "id": body["id"], "result": {"appointment": {
                            "id": "appt_1",
                            "title": body["params"]["arguments"]["title"],
                            "startTime": "2025-03-05T15:00:00Z",
                            "endTime": "2025-03-05T15:50:00Z",
                        }}}),
                        "conversations_get_messages" => json!({"jsonrpc": "2.0", "id": body["id"], "result": {"messages": [
                            {"id": "m2", "type": "sms", "direction": "inbound", "body": "See you then", "dateAdded": "2025-03-04T10:05:00Z"},
                            {"id": "m1", "type": "email", "direction": "outbound", "body": "Reminder", "status": "sent"},
                        ]}}),
                        _ => json!({"jsonrpc": "2.0", "id": body["id"], "error": {"code": -32601, "message": "unknown tool"}}),
                    };
                    Json(reply)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_create_contact_sends_credentials_and_tags() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let base = spawn_fake_mcp(seen.clone()).await;
        let client = McpCrmClient::new(&base, "ghl-key", "loc-1", 5);

        let id = client
            .create_contact(&NewContact {
                first_name: "Jane".into(),
                last_name: "Doe".into(),
                email: Some("jane@example.com".into()),
                phone: None,
            })
            .await
            .unwrap();
        assert_eq!(id, "ghl_123");

        let requests = seen.lock().unwrap();
        let args = &requests[0]["params"]["arguments"];
        assert_eq!(requests[0]["method"], "tools/call");
        assert_eq!(args["authorization"], "Bearer ghl-key");
        assert_eq!(args["locationId"], "loc-1");
        assert_eq!(args["tags"], json!(["therapy_patient", "hipaa_compliant"]));
        assert!(args.get("phone").is_none());
    }

    #[tokio::test]
    async fn test_email_uses_default_subject() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let base = spawn_fake_mcp(seen.clone()).await;
        let client = McpCrmClient::new(&base, "k", "l", 5);

        let receipt = client
            .send_message("ghl_123", DeliveryChannel::Email, None, "See you Tuesday")
            .await
            .unwrap();
        assert_eq!(receipt.id, "msg_9");
        assert_eq!(receipt.status, "queued");
        let requests = seen.lock().unwrap();
        assert_eq!(
            requests[0]["params"]["arguments"]["subject"],
            "Message from your therapist"
        );
    }

    #[tokio::test]
    async fn test_remote_error_is_surfaced() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let base = spawn_fake_mcp(seen).await;
        let client = McpCrmClient::new(&base, "k", "l", 5);

        let err = client
            .send_message("ghl_123", DeliveryChannel::Sms, None, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::Remote { .. }));
    }

    #[tokio::test]
    async fn test_dashboard_snapshot_counts() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let base = spawn_fake_mcp(seen).await;
        let client = McpCrmClient::new(&base, "k", "l", 5);

        let day = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        let snapshot = client.dashboard_snapshot(day).await.unwrap();
        assert_eq!(snapshot.contact_count, 3);
        assert_eq!(snapshot.appointments_today, 1);
    }

    #[tokio::test]
    async fn test_schedule_session_creates_calendar_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let base = spawn_fake_mcp(seen.clone()).await;
        let client = McpCrmClient::new(&base, "k", "l", 5);

        let start = DateTime::parse_from_rfc3339("2025-03-05T15:00:00Z").unwrap().with_timezone(&Utc);
        let booking = SessionBooking {
            title: "Therapy Session".into(),
            description: "Weekly session".into(),
            start_time: start,
            end_time: start + chrono::TimeDelta::minutes(50),
        };
        let session = client.schedule_session("ghl_123", &booking).await.unwrap();
        assert_eq!(session.appointment_id, "appt_1");
        assert_eq!(session.calendar_id, "cal_therapy");
        assert_eq!(session.end_time, booking.end_time);
        assert_eq!(session.status, "confirmed");

        client.schedule_session("ghl_123", &booking).await.unwrap();
        let tools: Vec<String> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| r["params"]["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            tools,
            vec![
                "calendars_list",
                "calendars_create",
                "calendars_create_appointment",
                "calendars_create_appointment"
            ]
        );
        let requests = seen.lock().unwrap();
        assert_eq!(requests[2]["params"]["arguments"]["calendarId"], "cal_therapy");
        assert_eq!(requests[2]["params"]["arguments"]["contactId"], "ghl_123");
    }

    #[tokio::test]
    async fn test_patient_messages_are_mapped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let base = spawn_fake_mcp(seen.clone()).await;
        let client = McpCrmClient::new(&base, "k", "l", 5);

        let messages = client.patient_messages("ghl_123", 25).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "m2");
        assert_eq!(messages[0].direction, "inbound");
        assert!(messages[0].sent_at.is_some());
        assert_eq!(messages[1].channel, "email");
        assert_eq!(messages[1].status, "sent");
        assert!(messages[1].sent_at.is_none());
        assert_eq!(seen.lock().unwrap()[0]["params"]["arguments"]["limit"], 25);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let client = McpCrmClient::new("http://127.0.0.1:9", "k", "l", 2);
        let err = client
            .create_contact(&NewContact::default())
            .await
            .unwrap_err();
        assert_eq!(err.service(), "crm");
    }
}
