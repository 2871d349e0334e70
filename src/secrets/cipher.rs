//! AES-256-GCM sealing of individual secret values

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use sha2::{Digest, Sha256};

use super::SecretError;

const SALT_SEED: &str = "EYn7OBDGQ0DKTyWe2I9XoGMeSWEUEoYL";
const NONCE_SIZE: usize = 12;
pub(crate) const PASSPHRASE_SIZE: usize = 64;

/// Fresh random passphrase, base64 encoded for the passphrase file
pub(crate) fn generate_passphrase() -> String {
    let mut bytes = [0u8; PASSPHRASE_SIZE];
    OsRng.fill_bytes(&mut bytes);
    B64.encode(bytes)
}

/// Cipher bound to one entry: every key name gets its own AES key
fn cipher_for(passphrase: &[u8], key: &str) -> Result<Aes256Gcm, SecretError> {
    let mut hasher = Sha256::new();
    hasher.update(passphrase);
    hasher.update(SALT_SEED.as_bytes());
    hasher.update(key.as_bytes());
    let derived = hasher.finalize();

    Aes256Gcm::new_from_slice(&derived).map_err(|e| SecretError::Crypto(e.to_string()))
}

/// Encrypt `plaintext` and return base64(nonce || ciphertext)
pub(crate) fn seal(passphrase: &[u8], key: &str, plaintext: &str) -> Result<String, SecretError> {
    let cipher = cipher_for(passphrase, key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| SecretError::Crypto(e.to_string()))?;

    let mut sealed = nonce.to_vec();
    sealed.extend_from_slice(&ciphertext);
    Ok(B64.encode(sealed))
}

pub(crate) fn open(passphrase: &[u8], key: &str, sealed: &str) -> Result<String, SecretError> {
    let raw = B64
        .decode(sealed.trim())
        .map_err(|e| SecretError::Corrupt(format!("entry '{key}' is not base64: {e}")))?;
    if raw.len() <= NONCE_SIZE {
        return Err(SecretError::Corrupt(format!("entry '{key}' is truncated")));
    }

    let (nonce, ciphertext) = raw.split_at(NONCE_SIZE);
    let cipher = cipher_for(passphrase, key)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| SecretError::Decryption(key.to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|e| SecretError::Corrupt(format!("entry '{key}' is not UTF-8: {e}")))
}
