use sha2::{Digest, Sha256};

pub const ANON_PREFIX: &str = "anon_";
const ANON_HASH_CHARS: usize = 16;

/// Stable anonymized identifier for a patient within one therapist's practice.
///
/// The raw reference never leaves this function; only the salted digest does.
pub fn anonymize_patient_id(therapist_id: &str, patient_ref: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(therapist_id.as_bytes());
    hasher.update(b":");
    hasher.update(patient_ref.trim().as_bytes());
    hasher.update(salt.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}{}", ANON_PREFIX, &digest[..ANON_HASH_CHARS])
}

pub fn is_anonymized_id(id: &str) -> bool {
    id.strip_prefix(ANON_PREFIX)
        .map(|rest| rest.len() == ANON_HASH_CHARS && rest.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

/// "Jane", "Doe" -> "J.D."; falls back to "XX" when either name is missing.
pub fn initials(first_name: Option<&str>, last_name: Option<&str>) -> String {
    let first = first_name.and_then(|n| n.trim().chars().next());
    let last = last_name.and_then(|n| n.trim().chars().next());
    match (first, last) {
        (Some(f), Some(l)) => format!(
            "{}.{}.",
            f.to_uppercase().collect::<String>(),
            l.to_uppercase().collect::<String>()
        ),
        _ => "XX".to_string(),
    }
}
