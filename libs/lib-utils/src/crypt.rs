//! Symmetric encryption for stored OAuth tokens.
//!
//! Ciphertext is base64 encoded for storage in text columns. The key is
//! taken from `APP_ENCRYPTION_KEY`.

use base64::prelude::{Engine, BASE64_STANDARD};

const KEY_ENV_VAR: &str = "APP_ENCRYPTION_KEY";

#[derive(Debug)]
pub enum Error {
    EncryptFailed(String),
    DecryptFailed(String),
    DecodeFailed(String),
    StringConversionFailed(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::EncryptFailed(e) => write!(f, "encrypt failed: {e}"),
            Error::DecryptFailed(e) => write!(f, "decrypt failed: {e}"),
            Error::DecodeFailed(e) => write!(f, "base64 decode failed: {e}"),
            Error::StringConversionFailed(e) => write!(f, "utf8 conversion failed: {e}"),
        }
    }
}

impl std::error::Error for Error {}

fn key() -> Result<String, Error> {
    std::env::var(KEY_ENV_VAR)
        .map_err(|_| Error::EncryptFailed(format!("{KEY_ENV_VAR} is not set")))
}

pub fn encrypt(plaintext: &str) -> Result<String, Error> {
    let key = key()?;
    let encrypted = simple_crypt::encrypt(plaintext.as_bytes(), key.as_bytes())
        .map_err(|e| Error::EncryptFailed(e.to_string()))?;

    Ok(BASE64_STANDARD.encode(encrypted))
}

pub fn decrypt(encoded: &str) -> Result<String, Error> {
    let key = key()?;
    let encrypted = BASE64_STANDARD
        .decode(encoded)
        .map_err(|e| Error::DecodeFailed(e.to_string()))?;
    let decrypted = simple_crypt::decrypt(&encrypted, key.as_bytes())
        .map_err(|e| Error::DecryptFailed(e.to_string()))?;

    String::from_utf8(decrypted).map_err(|e| Error::StringConversionFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        std::env::set_var(KEY_ENV_VAR, "test-key-for-crypt-round-trip");

        let token = "ya29.a0AfH6SMBexample-token";
        let encoded = encrypt(token).unwrap();
        assert_ne!(encoded, token);

        let decoded = decrypt(&encoded).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn test_decrypt_garbage_fails() {
        std::env::set_var(KEY_ENV_VAR, "test-key-for-crypt-round-trip");

        assert!(decrypt("not base64 at all!!").is_err());
        assert!(decrypt(&BASE64_STANDARD.encode(b"valid base64, not ciphertext")).is_err());
    }
}
