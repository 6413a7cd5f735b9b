//! Gateway configuration, loaded once from environment variables at startup.
//!
//! `main` calls [`Config::from_env`] after `dotenvy` has populated the process
//! environment; tests build a [`Config`] from a plain map through
//! [`Config::from_lookup`] so nothing reads globals behind their back.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const MIN_SECRET_LEN: usize = 32;
/// Upper bounds keep every derived timestamp inside chrono's range.
const MAX_DAYS: i64 = 36_500;
const MAX_MINUTES: i64 = 525_600;
const MAX_SWEEP_INTERVAL_SECS: u64 = 7 * 24 * 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(format!(
                "'{}' is not one of development, staging, production",
                other
            )),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiProviderKind {
    Anthropic,
    OpenAi,
}

/// Settings for the hosted model providers.
#[derive(Debug, Clone)]
pub struct AiSettings {
    pub provider: AiProviderKind,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_conversation_history: usize,
    pub timeout_secs: u64,
}

/// Settings for the CRM bridge (GoHighLevel over its MCP server).
#[derive(Debug, Clone)]
pub struct CrmSettings {
    pub mcp_server_url: String,
    pub api_key: Option<String>,
    pub location_id: Option<String>,
    pub timeout_secs: u64,
}

impl CrmSettings {
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.location_id.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
}

#[derive(Debug, Clone)]
pub struct CrisisSettings {
    pub hotline_numbers: Vec<String>,
    pub keywords: Vec<String>,
    pub emergency_contact_email: Option<String>,
}

/// Runtime configuration for the gateway.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    /// TCP address to bind (default: `"0.0.0.0:8000"`).
    pub bind_address: String,
    pub database_url: Option<String>,
    pub database_pool_size: u32,
    /// Only reported by the detailed health check.
    pub redis_url: Option<String>,
    pub store_backend: StoreBackend,

    pub secret_key: String,
    pub access_token_expire_minutes: i64,
    pub refresh_token_expire_days: i64,
    pub bcrypt_cost: u32,
    pub patient_data_encryption_key: String,
    pub anonymization_salt: String,

    pub ai: AiSettings,
    pub crm: CrmSettings,
    pub rate_limits: RateLimitSettings,
    pub crisis: CrisisSettings,

    pub patient_consent_required: bool,
    pub data_retention_days: i64,
    pub audit_log_retention_days: i64,
    pub retention_sweep_interval_secs: u64,

    /// Empty means permissive CORS (development only).
    pub cors_allowed_origins: Vec<String>,
}

impl Config {
    /// Build [`Config`] from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build [`Config`] from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };

        let environment = env.parse_or("ENVIRONMENT", Environment::Development)?;

        let store_backend = match env.string_or("STORE_BACKEND", "postgres").as_str() {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    key: "STORE_BACKEND",
                    reason: format!("'{}' is not one of postgres, memory", other),
                })
            }
        };

        let database_url = env.optional("DATABASE_URL");
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let secret_key = env.secret("SECRET_KEY")?;
        let bcrypt_cost: u32 = env.parse_or("BCRYPT_COST", bcrypt::DEFAULT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                key: "BCRYPT_COST",
                reason: "must be between 4 and 31".to_string(),
            });
        }
        let patient_data_encryption_key = env.secret("PATIENT_DATA_ENCRYPTION_KEY")?;

        let provider = match env.string_or("AI_PROVIDER", "anthropic").as_str() {
            "anthropic" => AiProviderKind::Anthropic,
            "openai" => AiProviderKind::OpenAi,
            other => {
                return Err(ConfigError::Invalid {
                    key: "AI_PROVIDER",
                    reason: format!("'{}' is not one of anthropic, openai", other),
                })
            }
        };
        let default_model = match provider {
            AiProviderKind::Anthropic => "claude-3-5-sonnet-20241022",
            AiProviderKind::OpenAi => "gpt-4o",
        };

        let temperature: f32 = env.parse_or("MENTAL_HEALTH_MODEL_TEMPERATURE", 0.3)?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::Invalid {
                key: "MENTAL_HEALTH_MODEL_TEMPERATURE",
                reason: "must be between 0.0 and 2.0".to_string(),
            });
        }

        let ai = AiSettings {
            provider,
            anthropic_api_key: env.optional("ANTHROPIC_API_KEY"),
            openai_api_key: env.optional("OPENAI_API_KEY"),
            openai_base_url: env.string_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            model: env.string_or("DEFAULT_AI_MODEL", default_model),
            temperature,
            max_conversation_history: env.positive_or("MAX_CONVERSATION_HISTORY", 50)?,
            timeout_secs: env.positive_or("AI_TIMEOUT_SECS", 30)?,
        };

        let crm = CrmSettings {
            mcp_server_url: env
                .string_or("GHL_MCP_SERVER_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            api_key: env.optional("GHL_API_KEY"),
            location_id: env.optional("GHL_LOCATION_ID"),
            timeout_secs: env.positive_or("CRM_TIMEOUT_SECS", 15)?,
        };

        let rate_limits = RateLimitSettings {
            per_minute: env.positive_or("RATE_LIMIT_PER_MINUTE", 60)?,
            per_hour: env.positive_or("RATE_LIMIT_PER_HOUR", 1000)?,
            per_day: env.positive_or("RATE_LIMIT_PER_DAY", 5000)?,
        };

        let keywords = match env.optional("CRISIS_KEYWORDS") {
            Some(raw) => split_list(&raw),
            None => DEFAULT_CRISIS_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        };
        let crisis = CrisisSettings {
            hotline_numbers: split_list(&env.string_or("CRISIS_HOTLINE_NUMBERS", "988,1-800-273-8255")),
            keywords,
            emergency_contact_email: env.optional("EMERGENCY_CONTACT_EMAIL"),
        };
        if crisis.hotline_numbers.is_empty() {
            return Err(ConfigError::Invalid {
                key: "CRISIS_HOTLINE_NUMBERS",
                reason: "at least one hotline number is required".to_string(),
            });
        }

        Ok(Self {
            environment,
            bind_address: env.string_or("BIND_ADDRESS", "0.0.0.0:8000"),
            database_url,
            database_pool_size: env.positive_or("DATABASE_POOL_SIZE", 10)?,
            redis_url: env.optional("REDIS_URL"),
            store_backend,
            secret_key,
            access_token_expire_minutes: env.bounded_or("ACCESS_TOKEN_EXPIRE_MINUTES", 30, MAX_MINUTES)?,
            refresh_token_expire_days: env.bounded_or("REFRESH_TOKEN_EXPIRE_DAYS", 7, MAX_DAYS)?,
            bcrypt_cost,
            patient_data_encryption_key,
            anonymization_salt: env.string_or("ANONYMIZATION_SALT", "patient_anonymization_salt_v1"),
            ai,
            crm,
            rate_limits,
            crisis,
            patient_consent_required: env.parse_or("PATIENT_CONSENT_REQUIRED", true)?,
            data_retention_days: env.bounded_or("DATA_RETENTION_POLICY_DAYS", 2555, MAX_DAYS)?,
            audit_log_retention_days: env.bounded_or("AUDIT_LOG_RETENTION_DAYS", 2555, MAX_DAYS)?,
            retention_sweep_interval_secs: env.bounded_or("RETENTION_SWEEP_INTERVAL_SECS", 3600, MAX_SWEEP_INTERVAL_SECS)?,
            cors_allowed_origins: env
                .optional("CORS_ALLOWED_ORIGINS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Convenience for tests and local tooling.
    pub fn from_map(map: &HashMap<&str, &str>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| map.get(key).map(|v| v.to_string()))
    }
}

pub const DEFAULT_CRISIS_KEYWORDS: &[&str] = &[
    // suicide
    "suicide",
    "suicidal",
    "kill myself",
    "end my life",
    "want to die",
    "better off dead",
    "suicide plan",
    "end it all",
    "take my own life",
    // self-harm
    "cut myself",
    "hurt myself",
    "self harm",
    "self-harm",
    "burning myself",
    "punish myself",
    // acute distress
    "can't go on",
    "no way out",
    "losing control",
    // psychosis
    "hearing voices",
    "voices telling me",
    "they're watching",
];

// ── private helpers ──────────────────────────────────────────────────────────

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<'a, F: Fn(&str) -> Option<String>> Env<'a, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_owned())
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn positive_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default,
        T::Err: fmt::Display,
    {
        let value = self.parse_or(key, default)?;
        if value <= T::default() {
            return Err(ConfigError::Invalid {
                key,
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    fn bounded_or<T>(&self, key: &'static str, default: T, max: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default + fmt::Display + Copy,
        T::Err: fmt::Display,
    {
        let value = self.positive_or(key, default)?;
        if value > max {
            return Err(ConfigError::Invalid {
                key,
                reason: format!("must be at most {}", max),
            });
        }
        Ok(value)
    }

    fn secret(&self, key: &'static str) -> Result<String, ConfigError> {
        let value = self.optional(key).ok_or(ConfigError::Missing(key))?;
        if value.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                key,
                reason: format!("must be at least {} characters long", MIN_SECRET_LEN),
            });
        }
        Ok(value)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(|item| item.to_string())
        .collect()
}
