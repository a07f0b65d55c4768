//! Token encryption at rest
//!
//! OAuth access/refresh tokens are encrypted with AES-256-GCM before they
//! touch the database. The key is derived from the `MAILSPEND_TOKEN_KEY`
//! passphrase via Argon2id with a fixed application salt, so the same
//! passphrase always produces the same key and the database can be moved
//! between hosts freely.
//!
//! Wire format: base64(nonce || ciphertext).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

use crate::error::{Error, Result};

/// Environment variable holding the token encryption passphrase
pub const TOKEN_KEY_ENV: &str = "MAILSPEND_TOKEN_KEY";

/// Fixed application salt - changing this would invalidate all stored tokens
const APP_SALT: &[u8; 16] = b"mailspend-tok-v1";

/// Nonce size for AES-GCM (96 bits)
const NONCE_SIZE: usize = 12;

/// Encrypt/decrypt boundary for token material
///
/// Lives at the edge of the token lifecycle manager, decoupled from the
/// storage layer: the database only ever sees opaque base64 blobs.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Create a cipher from the `MAILSPEND_TOKEN_KEY` environment variable
    pub fn from_env() -> Result<Self> {
        let passphrase = std::env::var(TOKEN_KEY_ENV).map_err(|_| {
            Error::Encryption(format!(
                "Token encryption required. Set {} environment variable with your passphrase.",
                TOKEN_KEY_ENV
            ))
        })?;
        Self::from_passphrase(&passphrase)
    }

    /// Create a cipher from an explicit passphrase
    pub fn from_passphrase(passphrase: &str) -> Result<Self> {
        let key = derive_key(passphrase)?;
        Ok(Self {
            cipher: Aes256Gcm::new(&key.into()),
        })
    }

    /// Encrypt a token; output is base64(nonce || ciphertext)
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::Encryption(format!("Failed to encrypt token: {}", e)))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Decrypt a base64(nonce || ciphertext) blob
    ///
    /// Failures here are treated like authorization failures by callers: the
    /// token material is unusable and the account needs re-authorization.
    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let blob = BASE64
            .decode(encrypted)
            .map_err(|e| Error::Encryption(format!("Invalid encrypted token encoding: {}", e)))?;

        if blob.len() <= NONCE_SIZE {
            return Err(Error::Encryption(
                "Encrypted token blob too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| Error::Encryption(format!("Failed to decrypt token: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| Error::Encryption(format!("Decrypted token is not UTF-8: {}", e)))
    }
}

/// Derive a 32-byte key from a passphrase using Argon2id
fn derive_key(passphrase: &str) -> Result<[u8; 32]> {
    use argon2::Argon2;

    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), APP_SALT, &mut key)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;
    Ok(key)
}

/// Generate an alphanumeric OAuth state nonce
pub fn random_state(len: usize) -> String {
    use rand::Rng;
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// Mask sensitive data for logging
pub fn mask(data: &str) -> String {
    if data.len() <= 4 {
        return "****".to_string();
    }
    format!("{}****{}", &data[..2], &data[data.len() - 2..])
}
