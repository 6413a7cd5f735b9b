//! Keyword screening for crisis language and the crisis protocol response.
//!
//! This is a first-line filter, not an assessment: a match short-circuits the
//! model call and hands the patient emergency contacts straight away.

use regex::Regex;

use crate::config::CrisisSettings;
use crate::models::alert::AlertType;
use crate::models::chat::{EmergencyResources, Hotline};
use crate::models::chatbot::BotInstructions;

const SUICIDE_MARKERS: &[&str] = &[
    "suicid",
    "kill myself",
    "end my life",
    "want to die",
    "better off dead",
    "end it all",
    "take my own life",
];
const SELF_HARM_MARKERS: &[&str] = &["cut myself", "hurt myself", "self harm", "self-harm", "burning myself", "punish myself"];
const PSYCHOSIS_MARKERS: &[&str] = &["voices", "paranoid", "conspiracy", "watching", "not real", "hallucinat"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrisisMatch {
    pub alert_type: AlertType,
    /// Number of distinct keywords found. The text itself is never retained.
    pub keyword_hits: usize,
}

pub struct CrisisDetector {
    pattern: Option<Regex>,
}

impl CrisisDetector {
    pub fn new(keywords: &[String]) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = keywords
            .iter()
            .map(|k| normalize(k))
            .filter(|k| !k.is_empty())
            .map(|k| regex::escape(&k))
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = Regex::new(&format!(r"\b(?:{})\b", alternatives.join("|")))?;
        Ok(Self { pattern: Some(pattern) })
    }

    pub fn screen(&self, message: &str) -> Option<CrisisMatch> {
        let pattern = self.pattern.as_ref()?;
        let normalized = normalize(message);

        let mut hits: Vec<&str> = pattern.find_iter(&normalized).map(|m| m.as_str()).collect();
        if hits.is_empty() {
            return None;
        }
        hits.sort_unstable();
        hits.dedup();

        Some(CrisisMatch {
            alert_type: classify(&hits),
            keyword_hits: hits.len(),
        })
    }

    /// Category for a message the model rated as elevated risk. When no
    /// configured keyword matches, the whole message is checked against the
    /// category markers.
    pub fn categorize(&self, message: &str) -> AlertType {
        match self.screen(message) {
            Some(found) => found.alert_type,
            None => classify(&[normalize(message).as_str()]),
        }
    }
}

/// Lowercases, folds typographic apostrophes and collapses whitespace.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .replace(['\u{2019}', '\u{2018}'], "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn classify(hits: &[&str]) -> AlertType {
    let any = |markers: &[&str]| hits.iter().any(|hit| markers.iter().any(|m| hit.contains(m)));
    if any(SUICIDE_MARKERS) {
        AlertType::SuicideIdeation
    } else if any(SELF_HARM_MARKERS) {
        AlertType::SelfHarm
    } else if any(PSYCHOSIS_MARKERS) {
        AlertType::PsychosisIndicators
    } else {
        AlertType::GeneralCrisis
    }
}

fn hotline_for(number: &str) -> Hotline {
    let (name, description) = match number {
        "988" => ("988 Suicide & Crisis Lifeline", "24/7 crisis support - call or text"),
        "1-800-273-8255" => ("National Suicide Prevention Lifeline", "24/7 crisis support by phone"),
        "741741" => ("Crisis Text Line", "Text HOME for 24/7 crisis support"),
        "911" => ("Emergency Services", "For immediate life-threatening emergencies"),
        _ => ("Crisis Hotline", "Crisis support line"),
    };
    Hotline {
        name: name.to_string(),
        number: number.to_string(),
        description: description.to_string(),
    }
}

/// Emergency contact information from configuration, plus the therapist's
/// own emergency script when one is configured.
pub fn emergency_resources(settings: &CrisisSettings, instructions: Option<&BotInstructions>) -> EmergencyResources {
    let mut hotlines: Vec<Hotline> = settings.hotline_numbers.iter().map(|n| hotline_for(n)).collect();
    if !settings.hotline_numbers.iter().any(|n| n == "911") {
        hotlines.push(hotline_for("911"));
    }

    EmergencyResources {
        message: "If you are in crisis or thinking about harming yourself, please reach out now. You are not alone."
            .to_string(),
        hotlines,
        emergency_contact_email: settings.emergency_contact_email.clone(),
        therapist_instructions: instructions.map(|i| i.emergency_instructions.clone()),
        safety_plan: vec![
            "Reach out to a crisis line or emergency services".to_string(),
            "Contact someone you trust".to_string(),
            "Remove anything you could use to hurt yourself".to_string(),
            "Go to a safe place".to_string(),
            "Stay with someone until the crisis passes".to_string(),
        ],
    }
}

/// The reply sent instead of a model response when crisis language is detected.
pub fn crisis_reply(resources: &EmergencyResources) -> String {
    let mut reply = String::from(
        "I'm very concerned about what you've shared. Your safety is the most important thing right now.\n\nImmediate resources:\n",
    );
    for hotline in &resources.hotlines {
        reply.push_str(&format!("- {}: {}\n", hotline.name, hotline.number));
    }
    if let Some(script) = &resources.therapist_instructions {
        reply.push('\n');
        reply.push_str(script);
        reply.push('\n');
    }
    reply.push_str(
        "\nI'm notifying your therapist so they can follow up with you. Is there someone safe you can be with right now?",
    );
    reply
}
