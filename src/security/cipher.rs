use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const KEY_LENGTH: usize = 32; // AES-256
const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;
const KEY_SALT: &[u8] = b"mental_health_chatbot_salt_v1";

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("stored value is not valid ciphertext")]
    Corrupted,

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Field-level cipher for patient data at rest.
///
/// Values are sealed with AES-256-GCM under a fresh random nonce and stored as
/// URL-safe base64 of `[12-byte nonce][ciphertext + tag]`.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct FieldCipher {
    key_bytes: [u8; KEY_LENGTH],
}

impl FieldCipher {
    /// Derive the field key from the configured secret using PBKDF2-SHA256.
    pub fn derive(secret: &str) -> Self {
        let mut key_bytes = [0u8; KEY_LENGTH];
        pbkdf2_hmac::<Sha256>(secret.as_bytes(), KEY_SALT, PBKDF2_ITERATIONS, &mut key_bytes);
        Self { key_bytes }
    }

    pub fn encrypt_str(&self, plaintext: &str) -> Result<String, CipherError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key_bytes));

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    pub fn decrypt_str(&self, encoded: &str) -> Result<String, CipherError> {
        let sealed = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| CipherError::Corrupted)?;
        if sealed.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(CipherError::Corrupted);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LENGTH);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key_bytes));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CipherError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::Corrupted)
    }

    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> Result<String, CipherError> {
        let json = serde_json::to_string(value)?;
        self.encrypt_str(&json)
    }

    pub fn decrypt_json<T: DeserializeOwned>(&self, encoded: &str) -> Result<T, CipherError> {
        let json = self.decrypt_str(encoded)?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}
