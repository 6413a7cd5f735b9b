pub mod anonymize;
pub mod cipher;
pub mod tokens;

pub use anonymize::{anonymize_patient_id, initials};
pub use cipher::FieldCipher;
pub use tokens::{TokenError, TokenService};
