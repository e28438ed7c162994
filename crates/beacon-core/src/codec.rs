//! Reversible obfuscation for sensitive fields at rest.
//!
//! This is NOT encryption. The transform is a repeating-key XOR followed by
//! base64, deterministic and without a nonce: the same plaintext and key
//! always produce the same ciphertext. It keeps phone numbers out of casual
//! inspection of the database file and nothing more.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{Error, Result};

/// Marks values written by this codec
const PREFIX: &str = "enc1:";

#[derive(Clone)]
pub struct FieldCodec {
    key: Vec<u8>,
}

impl std::fmt::Debug for FieldCodec {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("FieldCodec")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl FieldCodec {
    pub fn new(key: impl AsRef<str>) -> Result<Self> {
        let key = key.as_ref().as_bytes().to_vec();
        if key.is_empty() {
            return Err(Error::InvalidInput("codec key must not be empty".into()));
        }
        Ok(Self { key })
    }

    pub fn encode(&self, plaintext: &str) -> String {
        format!("{PREFIX}{}", STANDARD.encode(self.xor(plaintext.as_bytes())))
    }

    /// Decode a stored value, returning the input unchanged when it cannot
    /// be decoded so one bad record never hides the rest of a list.
    pub fn decode(&self, ciphertext: &str) -> String {
        match self.try_decode(ciphertext) {
            Ok(plaintext) => plaintext,
            Err(error) => {
                tracing::warn!("Field decode failed, returning stored value: {error}");
                ciphertext.to_string()
            }
        }
    }

    /// Strict variant of [`FieldCodec::decode`].
    ///
    /// Values without the codec prefix predate obfuscation and are returned
    /// as-is.
    pub fn try_decode(&self, ciphertext: &str) -> Result<String> {
        let Some(encoded) = ciphertext.strip_prefix(PREFIX) else {
            return Ok(ciphertext.to_string());
        };
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|error| Error::DecodeCorruption(error.to_string()))?;
        String::from_utf8(self.xor(&bytes))
            .map_err(|error| Error::DecodeCorruption(error.to_string()))
    }

    fn xor(&self, input: &[u8]) -> Vec<u8> {
        input
            .iter()
            .zip(self.key.iter().cycle())
            .map(|(byte, key)| byte ^ key)
            .collect()
    }
}
