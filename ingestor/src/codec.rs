//! Device frame obfuscation.
//!
//! A frame is `base64(plaintext XOR key)` with the key repeated over the
//! plaintext. This hides the record from casual inspection only: there is no
//! integrity check and nothing stops a replayed or forged frame.

use crate::errors::{DecodeError, Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};

#[derive(Clone)]
pub struct FrameCodec {
    key: Vec<u8>,
}

impl std::fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("key_len", &self.key.len())
            .finish()
    }
}

impl FrameCodec {
    pub fn new(key: &str) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::Config("frame key cannot be empty".to_string()));
        }
        Ok(Self {
            key: key.as_bytes().to_vec(),
        })
    }

    /// Reverse the device-side obfuscation, yielding the CSV record.
    pub fn decode(&self, payload: &[u8]) -> std::result::Result<String, DecodeError> {
        let text = String::from_utf8_lossy(payload);
        let ciphertext = STANDARD
            .decode(text.trim())
            .map_err(|source| DecodeError::Base64 {
                payload: text.to_string(),
                source,
            })?;

        String::from_utf8(self.apply(ciphertext)).map_err(|_| DecodeError::NotText {
            payload: text.to_string(),
        })
    }

    /// What a device does before publishing.
    pub fn encode(&self, plaintext: &str) -> String {
        STANDARD.encode(self.apply(plaintext.as_bytes().to_vec()))
    }

    fn apply(&self, mut bytes: Vec<u8>) -> Vec<u8> {
        for (byte, k) in bytes.iter_mut().zip(self.key.iter().cycle()) {
            *byte ^= k;
        }
        bytes
    }
}
