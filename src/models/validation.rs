use regex::Regex;

use crate::error::ApiError;

lazy_static::lazy_static! {
    /// Local part, `@`, then at least two dot-separated domain labels.
    static ref EMAIL_PATTERN: Option<Regex> = Regex::new(r"^[^\s@]+@[^\s@.]+(\.[^\s@.]+)+$").ok();
}

/// Request schemas validate themselves before a handler touches them.
pub trait Validate {
    fn validate(&self) -> Result<(), ApiError>;
}

pub fn require_text(field: &str, value: &str, max_len: usize) -> Result<(), ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::Validation(format!("{} is required", field)));
    }
    if trimmed.chars().count() > max_len {
        return Err(ApiError::Validation(format!(
            "{} must be at most {} characters",
            field, max_len
        )));
    }
    Ok(())
}

pub fn optional_text(field: &str, value: Option<&str>, max_len: usize) -> Result<(), ApiError> {
    match value {
        Some(v) if v.chars().count() > max_len => Err(ApiError::Validation(format!(
            "{} must be at most {} characters",
            field, max_len
        ))),
        _ => Ok(()),
    }
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    let email = email.trim();
    let valid = email.len() <= 254 && EMAIL_PATTERN.as_ref().map_or(false, |re| re.is_match(email));
    if valid {
        Ok(())
    } else {
        Err(ApiError::Validation("A valid email address is required".to_string()))
    }
}

/// Colours are stored as `#RRGGBB`.
pub fn validate_hex_color(field: &str, value: &str) -> Result<(), ApiError> {
    let valid = value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(())
    } else {
        Err(ApiError::Validation(format!("{} must be a #RRGGBB colour", field)))
    }
}

/// Therapist passwords: at least 12 characters with upper, lower, digit and symbol.
pub fn validate_password(password: &str) -> Result<(), ApiError> {
    let long_enough = password.chars().count() >= 12;
    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace());

    if long_enough && has_upper && has_lower && has_digit && has_special {
        Ok(())
    } else {
        Err(ApiError::Validation(
            "Password must be at least 12 characters and include upper and lower case letters, a digit and a special character"
                .to_string(),
        ))
    }
}
