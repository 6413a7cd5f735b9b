//! Therapist-facing summary of a patient's conversation history.

use std::collections::HashSet;

use crate::models::message::{ConversationEntry, Sender};
use crate::models::patient::RiskLevel;

const THEMES: &[(&str, &[&str])] = &[
    ("anxiety", &["anxious", "anxiety", "panic", "worried", "nervous", "overwhelmed"]),
    ("depression", &["depressed", "hopeless", "empty", "numb", "sad", "tired all the time"]),
    ("relationships", &["partner", "marriage", "divorce", "boyfriend", "girlfriend", "family", "friend"]),
    ("work_stress", &["work", "job", "boss", "deadline", "burnout", "coworker"]),
    ("sleep", &["sleep", "insomnia", "nightmare", "can't rest"]),
    ("trauma", &["trauma", "flashback", "abuse", "assault", "ptsd"]),
];

/// Conversations longer than this get a "discuss in session" recommendation.
const LONG_CONVERSATION: usize = 40;

/// Themes mentioned in the patient's own messages, in fixed order.
pub fn key_themes(messages: &[ConversationEntry]) -> Vec<String> {
    let patient_text: Vec<String> = messages
        .iter()
        .filter(|m| m.sender == Sender::Patient)
        .map(|m| m.content.to_lowercase())
        .collect();

    let mut found = HashSet::new();
    for text in &patient_text {
        for (theme, markers) in THEMES {
            if markers.iter().any(|marker| text.contains(marker)) {
                found.insert(*theme);
            }
        }
    }

    THEMES
        .iter()
        .filter(|(theme, _)| found.contains(theme))
        .map(|(theme, _)| theme.to_string())
        .collect()
}

pub fn highest_risk(messages: &[ConversationEntry]) -> Option<RiskLevel> {
    messages.iter().filter_map(|m| m.risk_flag).max()
}

pub fn recommendations(
    current_risk: RiskLevel,
    open_alerts: usize,
    total_messages: usize,
    themes: &[String],
) -> Vec<String> {
    let mut out = Vec::new();
    if open_alerts > 0 {
        out.push(format!(
            "Review and acknowledge {} open crisis alert{}",
            open_alerts,
            if open_alerts == 1 { "" } else { "s" }
        ));
    }
    match current_risk {
        RiskLevel::Crisis => out.push("Contact the patient directly as soon as possible".to_string()),
        RiskLevel::High => out.push("Schedule an earlier check-in".to_string()),
        _ => {}
    }
    if total_messages > LONG_CONVERSATION {
        out.push("High chat volume since last review; consider discussing in session".to_string());
    }
    if themes.iter().any(|t| t == "trauma") {
        out.push("Trauma-related content mentioned; follow up in session".to_string());
    }
    if out.is_empty() {
        out.push("No action needed".to_string());
    }
    out
}
