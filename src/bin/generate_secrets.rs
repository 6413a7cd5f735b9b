use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

/// 256 bits each; both comfortably clear the minimum secret length enforced at startup.
fn random_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

fn main() {
    println!("🔐 Gateway Secret Generator");
    println!("===========================");

    let signing_key = random_key();
    let encryption_key = random_key();

    println!();
    println!("Token signing key (hex):     {}", hex::encode(signing_key));
    println!("Patient data key (base64):   {}", URL_SAFE_NO_PAD.encode(encryption_key));
    println!();
    println!("📝 Copy these lines to your .env file:");
    println!("SECRET_KEY={}", hex::encode(signing_key));
    println!("PATIENT_DATA_ENCRYPTION_KEY={}", URL_SAFE_NO_PAD.encode(encryption_key));
    println!();
    println!("⚠️  Rotating PATIENT_DATA_ENCRYPTION_KEY makes previously stored patient data unreadable.");
}
