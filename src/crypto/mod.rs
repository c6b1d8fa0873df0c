//! Encryption of upstream API keys at rest (AES-256-GCM).

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// Build from a base64 encoded 32 byte key.
    pub fn from_base64_key(key_b64: &str) -> Result<Self> {
        let key = BASE64
            .decode(key_b64.trim())
            .map_err(|e| anyhow!("Invalid base64 key: {}", e))?;

        if key.len() != KEY_SIZE {
            return Err(anyhow!(
                "Encryption key must be {} bytes, got {}",
                KEY_SIZE,
                key.len()
            ));
        }

        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|e| anyhow!("Failed to create cipher: {}", e))?;
        Ok(Self { cipher })
    }

    /// A fresh random key, base64 encoded, for first-time setup.
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        BASE64.encode(key)
    }

    /// Returns `(ciphertext_b64, nonce_b64)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<(String, String)> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok((BASE64.encode(ciphertext), BASE64.encode(nonce_bytes)))
    }

    pub fn decrypt(&self, encrypted_b64: &str, nonce_b64: &str) -> Result<String> {
        let ciphertext = BASE64
            .decode(encrypted_b64)
            .map_err(|e| anyhow!("Invalid encrypted data: {}", e))?;
        let nonce_bytes = BASE64
            .decode(nonce_b64)
            .map_err(|e| anyhow!("Invalid nonce: {}", e))?;

        if nonce_bytes.len() != NONCE_SIZE {
            return Err(anyhow!(
                "Invalid nonce length: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            ));
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow!("Invalid UTF-8 in decrypted data: {}", e))
    }
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("cipher", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypts_what_it_encrypted_with_fresh_nonces() {
        let cipher = CredentialCipher::from_base64_key(&CredentialCipher::generate_key()).unwrap();

        let (first, nonce_a) = cipher.encrypt("jellyfin-api-key").unwrap();
        let (second, nonce_b) = cipher.encrypt("jellyfin-api-key").unwrap();
        assert_ne!(nonce_a, nonce_b);
        assert_ne!(first, second);
        assert_eq!(cipher.decrypt(&first, &nonce_a).unwrap(), "jellyfin-api-key");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let a = CredentialCipher::from_base64_key(&CredentialCipher::generate_key()).unwrap();
        let b = CredentialCipher::from_base64_key(&CredentialCipher::generate_key()).unwrap();

        let (data, nonce) = a.encrypt("secret").unwrap();
        assert!(b.decrypt(&data, &nonce).is_err());
    }

    #[test]
    fn short_keys_are_rejected() {
        assert!(CredentialCipher::from_base64_key(&BASE64.encode([1u8; 16])).is_err());
        assert!(CredentialCipher::from_base64_key("not base64!").is_err());
    }
}
