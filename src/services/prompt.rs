use serde::Deserialize;

use crate::models::chatbot::ChatbotConfig;
use crate::models::patient::RiskLevel;

/// System prompt for the patient-facing assistant, shaped by the therapist's
/// chatbot configuration.
pub fn build_system_prompt(config: &ChatbotConfig) -> String {
    let b = &config.branding;
    let i = &config.instructions;

    let mut prompt = format!(
        "You are {}, a supportive assistant that helps a therapy patient between sessions. \
         You are not a therapist and you do not provide therapy, diagnoses or medication advice.\n\n",
        b.bot_name
    );

    if !i.what_bot_should_say.trim().is_empty() {
        prompt.push_str(&format!("Guidance from the therapist: {}\n", i.what_bot_should_say.trim()));
    }
    if !i.what_bot_should_never_say.trim().is_empty() {
        prompt.push_str(&format!("Never: {}\n", i.what_bot_should_never_say.trim()));
    }
    if !i.allowed_topics.is_empty() {
        prompt.push_str(&format!("Topics you may discuss: {}.\n", i.allowed_topics.join(", ")));
    }
    if !i.disallowed_topics.is_empty() {
        prompt.push_str(&format!(
            "Topics you must decline and redirect to the therapist: {}.\n",
            i.disallowed_topics.join(", ")
        ));
    }
    prompt.push_str(&format!(
        "If the patient may be in danger, share this: {}\n",
        i.emergency_instructions.trim()
    ));

    if config.booking.enabled && !config.booking.appointment_types.is_empty() {
        prompt.push_str(&format!(
            "The practice offers: {}. Sessions can be booked between {} and {}.\n",
            config.booking.appointment_types.join(", "),
            config.booking.hours_start.format("%H:%M"),
            config.booking.hours_end.format("%H:%M"),
        ));
    }

    prompt.push_str(
        "\nRespond with a JSON object and nothing else: \
         {\"reply\": \"<your message to the patient>\", \"risk_level\": \"low|moderate|high|crisis\"}. \
         risk_level is your assessment of the patient's current risk.",
    );
    prompt
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub reply: String,
    pub risk_level: Option<RiskLevel>,
}

#[derive(Deserialize)]
struct ModelReply {
    reply: String,
    #[serde(default)]
    risk_level: Option<String>,
}

/// Accepts the structured `{"reply", "risk_level"}` answer, optionally inside a
/// code fence or surrounded by prose. Anything else is treated as plain text
/// with no risk flag.
pub fn parse_model_reply(raw: &str) -> ParsedReply {
    let trimmed = raw.trim();

    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => Some(&trimmed[start..=end]),
        _ => None,
    };

    if let Some(json) = candidate {
        if let Ok(parsed) = serde_json::from_str::<ModelReply>(json) {
            if !parsed.reply.trim().is_empty() {
                return ParsedReply {
                    reply: parsed.reply.trim().to_string(),
                    risk_level: parsed.risk_level.as_deref().and_then(parse_risk),
                };
            }
        }
    }

    ParsedReply {
        reply: trimmed.to_string(),
        risk_level: None,
    }
}

fn parse_risk(raw: &str) -> Option<RiskLevel> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "low" | "none" => Some(RiskLevel::Low),
        "moderate" | "medium" => Some(RiskLevel::Moderate),
        "high" => Some(RiskLevel::High),
        "crisis" | "critical" => Some(RiskLevel::Crisis),
        _ => None,
    }
}
