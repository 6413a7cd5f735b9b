use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::validation::{optional_text, require_text, validate_hex_color, Validate};
use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatbotBranding {
    pub bot_name: String,
    pub primary_color: String,
    pub secondary_color: String,
    pub title_font: String,
    pub body_font: String,
    pub logo_url: Option<String>,
    pub welcome_message: String,
}

impl Default for ChatbotBranding {
    fn default() -> Self {
        Self {
            bot_name: "Therapy Bot".to_string(),
            primary_color: "#ac7782".to_string(),
            secondary_color: "#d3d6de".to_string(),
            title_font: "Inter".to_string(),
            body_font: "Inter".to_string(),
            logo_url: None,
            welcome_message: "Hi! I'm here to support you between sessions. How are you feeling today?"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotInstructions {
    pub allowed_topics: Vec<String>,
    pub disallowed_topics: Vec<String>,
    pub what_bot_should_say: String,
    pub what_bot_should_never_say: String,
    pub emergency_instructions: String,
    pub max_messages_per_conversation: u32,
}

impl Default for BotInstructions {
    fn default() -> Self {
        Self {
            allowed_topics: vec![
                "coping strategies".to_string(),
                "mood check-ins".to_string(),
                "scheduling".to_string(),
            ],
            disallowed_topics: vec!["diagnosis".to_string(), "medication changes".to_string()],
            what_bot_should_say: "Be warm, supportive and professional. Encourage the patient to bring important topics to their next session."
                .to_string(),
            what_bot_should_never_say: "Never diagnose conditions, recommend medication changes or discuss specific treatment details."
                .to_string(),
            emergency_instructions: "For mental health emergencies, call 988 (Suicide & Crisis Lifeline) or 911."
                .to_string(),
            max_messages_per_conversation: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingSettings {
    pub enabled: bool,
    pub calendar_id: Option<String>,
    #[serde(with = "hhmm")]
    pub hours_start: NaiveTime,
    #[serde(with = "hhmm")]
    pub hours_end: NaiveTime,
    pub available_days: Vec<DayOfWeek>,
    pub appointment_types: Vec<String>,
    pub buffer_minutes: u32,
    pub advance_booking_days: u32,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            calendar_id: None,
            hours_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            hours_end: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
            available_days: vec![
                DayOfWeek::Monday,
                DayOfWeek::Tuesday,
                DayOfWeek::Wednesday,
                DayOfWeek::Thursday,
                DayOfWeek::Friday,
            ],
            appointment_types: vec![
                "Initial Consultation".to_string(),
                "Individual Therapy".to_string(),
                "Couples Therapy".to_string(),
            ],
            buffer_minutes: 15,
            advance_booking_days: 30,
        }
    }
}

/// Per-therapist chatbot configuration. `PUT` replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatbotConfig {
    pub branding: ChatbotBranding,
    pub instructions: BotInstructions,
    pub booking: BookingSettings,
}

impl Validate for ChatbotConfig {
    fn validate(&self) -> Result<(), ApiError> {
        let b = &self.branding;
        require_text("branding.bot_name", &b.bot_name, 50)?;
        validate_hex_color("branding.primary_color", &b.primary_color)?;
        validate_hex_color("branding.secondary_color", &b.secondary_color)?;
        require_text("branding.title_font", &b.title_font, 50)?;
        require_text("branding.body_font", &b.body_font, 50)?;
        require_text("branding.welcome_message", &b.welcome_message, 500)?;
        if let Some(url) = &b.logo_url {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(ApiError::Validation(
                    "branding.logo_url must be an http(s) URL".to_string(),
                ));
            }
            optional_text("branding.logo_url", Some(url), 2048)?;
        }

        let i = &self.instructions;
        for topic in i.allowed_topics.iter().chain(i.disallowed_topics.iter()) {
            require_text("instructions topic", topic, 100)?;
        }
        optional_text("instructions.what_bot_should_say", Some(&i.what_bot_should_say), 2000)?;
        optional_text(
            "instructions.what_bot_should_never_say",
            Some(&i.what_bot_should_never_say),
            2000,
        )?;
        require_text("instructions.emergency_instructions", &i.emergency_instructions, 2000)?;
        if !(1..=500).contains(&i.max_messages_per_conversation) {
            return Err(ApiError::Validation(
                "instructions.max_messages_per_conversation must be between 1 and 500".to_string(),
            ));
        }

        let k = &self.booking;
        if k.hours_start >= k.hours_end {
            return Err(ApiError::Validation(
                "booking.hours_start must be before booking.hours_end".to_string(),
            ));
        }
        if k.enabled && k.available_days.is_empty() {
            return Err(ApiError::Validation(
                "booking.available_days cannot be empty when booking is enabled".to_string(),
            ));
        }
        for kind in &k.appointment_types {
            require_text("booking appointment type", kind, 100)?;
        }
        if k.buffer_minutes > 240 {
            return Err(ApiError::Validation(
                "booking.buffer_minutes must be at most 240".to_string(),
            ));
        }
        if !(1..=365).contains(&k.advance_booking_days) {
            return Err(ApiError::Validation(
                "booking.advance_booking_days must be between 1 and 365".to_string(),
            ));
        }
        Ok(())
    }
}

/// Stored configuration with its version. Version 0 means "never written".
#[derive(Debug, Clone, Serialize)]
pub struct ChatbotConfigRecord {
    pub therapist_id: Uuid,
    pub config: ChatbotConfig,
    pub version: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChatbotConfigRecord {
    pub fn default_for(therapist_id: Uuid) -> Self {
        Self {
            therapist_id,
            config: ChatbotConfig::default(),
            version: 0,
            updated_at: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatbotConfigResponse {
    pub success: bool,
    #[serde(flatten)]
    pub record: ChatbotConfigRecord,
}

/// `"HH:MM"` wire format for booking hours.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}
