//! At-rest encryption of provider API keys stored in the settings table.
//! Payload format: `enc:<salt>:<nonce>:<ciphertext>`, all base64.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use ring::{aead, pbkdf2, rand::{SecureRandom, SystemRandom}};
use std::num::NonZeroU32;

const PBKDF2_ITERATIONS: u32 = 100_000;
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;
const PREFIX: &str = "enc";

#[derive(Clone)]
pub struct CryptoService {
    secret: Vec<u8>,
}

impl CryptoService {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self> {
        let secret = secret.into();
        if secret.len() < 8 {
            return Err(anyhow!("Encryption secret must have at least 8 bytes"));
        }
        Ok(CryptoService { secret })
    }

    /// Reads the secret from the named environment variable.
    pub fn from_env(var: &str) -> Option<Self> {
        let value = std::env::var(var).ok()?;
        match Self::new(value) {
            Ok(service) => Some(service),
            Err(err) => {
                tracing::warn!(var, error = %err, "Ignoring encryption secret");
                None
            }
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let rng = SystemRandom::new();
        let mut salt = [0u8; SALT_LEN];
        rng.fill(&mut salt)
            .map_err(|_| anyhow!("Failed to generate salt"))?;

        let key = self.derive_key(&salt)?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill(&mut nonce_bytes)
            .map_err(|_| anyhow!("Failed to generate nonce"))?;

        let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);
        let mut in_out = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
            .map_err(|_| anyhow!("Encryption failed"))?;

        Ok(format!(
            "{PREFIX}:{}:{}:{}",
            general_purpose::STANDARD.encode(salt),
            general_purpose::STANDARD.encode(nonce_bytes),
            general_purpose::STANDARD.encode(in_out)
        ))
    }

    pub fn decrypt(&self, payload: &str) -> Result<String> {
        let parts: Vec<&str> = payload.split(':').collect();
        if parts.len() != 4 || parts[0] != PREFIX {
            return Err(anyhow!("Invalid encrypted payload"));
        }
        let salt = general_purpose::STANDARD
            .decode(parts[1])
            .map_err(|e| anyhow!("Decode salt: {}", e))?;
        let nonce_bytes = general_purpose::STANDARD
            .decode(parts[2])
            .map_err(|e| anyhow!("Decode nonce: {}", e))?;
        let mut data = general_purpose::STANDARD
            .decode(parts[3])
            .map_err(|e| anyhow!("Decode ciphertext: {}", e))?;

        let key = self.derive_key(&salt)?;
        let nonce = aead::Nonce::assume_unique_for_key(
            nonce_bytes
                .as_slice()
                .try_into()
                .map_err(|_| anyhow!("Invalid nonce length"))?,
        );

        let decrypted = key
            .open_in_place(nonce, aead::Aad::empty(), &mut data)
            .map_err(|_| anyhow!("Decryption failed"))?;
        Ok(String::from_utf8(decrypted.to_vec())?)
    }

    fn derive_key(&self, salt: &[u8]) -> Result<aead::LessSafeKey> {
        let mut key_bytes = [0u8; 32];
        let iterations =
            NonZeroU32::new(PBKDF2_ITERATIONS).ok_or_else(|| anyhow!("Invalid iterations"))?;
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            salt,
            &self.secret,
            &mut key_bytes,
        );
        let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key_bytes)
            .map_err(|_| anyhow!("Invalid key material"))?;
        Ok(aead::LessSafeKey::new(unbound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt() {
        let crypto = CryptoService::new("a-long-enough-secret").unwrap();
        let payload = crypto.encrypt("sk-test-1234").unwrap();
        assert!(payload.starts_with("enc:"));
        assert!(!payload.contains("sk-test"));
        assert_eq!(crypto.decrypt(&payload).unwrap(), "sk-test-1234");
    }

    #[test]
    fn wrong_secret_fails() {
        let payload = CryptoService::new("first-secret").unwrap().encrypt("key").unwrap();
        assert!(CryptoService::new("second-secret").unwrap().decrypt(&payload).is_err());
        assert!(CryptoService::new("short").is_err());
    }
}
