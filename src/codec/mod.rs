//! # Reading Codec
//!
//! Turns a [`SensorReading`] into wire bytes and back. The base encoding is
//! compact JSON; when sealing is enabled the JSON is additionally encrypted
//! with RSA-OAEP (SHA-256) under the receiver's public key. OAEP padding is
//! randomized, so the same reading never produces the same ciphertext twice.
//!
//! A serialized reading is well under the ~190-byte OAEP limit of a 2048-bit
//! key, so a single RSA block carries the whole payload and no hybrid scheme
//! is needed.
//!
//! Decoding is strict in both modes: a payload that does not decrypt, or
//! that is not exactly the four numeric fields of a reading, fails with a
//! [`CodecError`] instead of producing a partial value.

pub mod keys;

use crate::reading::SensorReading;
use keys::KeyMaterial;
use rsa::Oaep;
use sha2::Sha256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload is not a valid serialized reading.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Sealing under the public key failed.
    #[error("encryption failed: {0}")]
    Encrypt(rsa::Error),

    /// Ciphertext did not decrypt under the private key.
    #[error("decryption failed: {0}")]
    Decrypt(rsa::Error),
}

/// Encoder/decoder shared by publisher and ingestor.
///
/// Both ends of the channel must be built in the same mode; a sealed
/// publisher talking to a plaintext ingestor fails per message, not
/// silently.
#[derive(Clone)]
pub enum ReadingCodec {
    Plaintext,
    Sealed(KeyMaterial),
}

impl ReadingCodec {
    pub fn plaintext() -> Self {
        Self::Plaintext
    }

    pub fn sealed(keys: KeyMaterial) -> Self {
        Self::Sealed(keys)
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self, Self::Sealed(_))
    }

    /// Serializes a reading, encrypting the result in sealed mode.
    pub fn encode(&self, reading: &SensorReading) -> Result<Vec<u8>, CodecError> {
        let json = serde_json::to_vec(reading)?;
        match self {
            Self::Plaintext => Ok(json),
            Self::Sealed(keys) => {
                let mut rng = rand::thread_rng();
                keys.public()
                    .encrypt(&mut rng, Oaep::new::<Sha256>(), &json)
                    .map_err(CodecError::Encrypt)
            }
        }
    }

    /// Inverse of [`encode`](Self::encode): decrypts in sealed mode, then
    /// deserializes into the fixed reading shape.
    pub fn decode(&self, payload: &[u8]) -> Result<SensorReading, CodecError> {
        let json = match self {
            Self::Plaintext => payload.to_vec(),
            Self::Sealed(keys) => keys
                .private()
                .decrypt(Oaep::new::<Sha256>(), payload)
                .map_err(CodecError::Decrypt)?,
        };
        Ok(serde_json::from_slice(&json)?)
    }
}
