//! RSA key pair loading and generation.
//!
//! The daemon only ever *loads* keys; generating and writing a pair is the
//! job of the separate `keygen` binary, run once before the first encrypted
//! deployment.

use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// File name of the PEM-encoded private key inside the key directory.
pub const PRIVATE_KEY_FILE: &str = "private_key.pem";
/// File name of the PEM-encoded public key inside the key directory.
pub const PUBLIC_KEY_FILE: &str = "public_key.pem";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key material: {0}")]
    Parse(String),

    #[error("key generation failed: {0}")]
    Generate(String),
}

/// An RSA key pair held in memory for the lifetime of the process.
///
/// Loaded once at startup and read-only afterwards; the sealing codec clones
/// it freely because both halves are plain value types.
#[derive(Clone)]
pub struct KeyMaterial {
    public: RsaPublicKey,
    private: RsaPrivateKey,
}

impl KeyMaterial {
    /// Loads `private_key.pem` and `public_key.pem` from `dir`.
    ///
    /// The private key may be PKCS#1 ("RSA PRIVATE KEY") or PKCS#8
    /// ("PRIVATE KEY"); the public key must be SPKI ("PUBLIC KEY").
    pub fn load(dir: &Path) -> Result<Self, KeyError> {
        let private_pem = std::fs::read_to_string(dir.join(PRIVATE_KEY_FILE))?;
        let private = RsaPrivateKey::from_pkcs1_pem(&private_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&private_pem))
            .map_err(|e| KeyError::Parse(format!("{}: {}", PRIVATE_KEY_FILE, e)))?;

        let public_pem = std::fs::read_to_string(dir.join(PUBLIC_KEY_FILE))?;
        let public = RsaPublicKey::from_public_key_pem(&public_pem)
            .map_err(|e| KeyError::Parse(format!("{}: {}", PUBLIC_KEY_FILE, e)))?;

        info!("loaded RSA key pair from {}", dir.display());
        Ok(Self { public, private })
    }

    /// Generates a fresh pair with the common public exponent 65537.
    pub fn generate(bits: usize) -> Result<Self, KeyError> {
        let mut rng = rand::thread_rng();
        let private =
            RsaPrivateKey::new(&mut rng, bits).map_err(|e| KeyError::Generate(e.to_string()))?;
        let public = private.to_public_key();
        Ok(Self { public, private })
    }

    /// Writes both halves as PEM files into `dir`, creating it if needed.
    pub fn write(&self, dir: &Path) -> Result<(), KeyError> {
        std::fs::create_dir_all(dir)?;

        let private_pem = self
            .private
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| KeyError::Generate(e.to_string()))?;
        std::fs::write(dir.join(PRIVATE_KEY_FILE), private_pem.as_bytes())?;

        let public_pem = self
            .public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyError::Generate(e.to_string()))?;
        std::fs::write(dir.join(PUBLIC_KEY_FILE), public_pem.as_bytes())?;

        Ok(())
    }

    pub fn public(&self) -> &RsaPublicKey {
        &self.public
    }

    pub fn private(&self) -> &RsaPrivateKey {
        &self.private
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::traits::PublicKeyParts;
    use std::path::PathBuf;

    fn fixture_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
    }

    #[test]
    fn loads_fixture_pair() {
        let keys = KeyMaterial::load(&fixture_dir()).expect("fixture keys must load");
        // 2048-bit modulus
        assert_eq!(keys.public().size(), 256);
    }

    #[test]
    fn load_fails_on_missing_directory() {
        // Matched without unwrapping: KeyMaterial stays non-Debug so key
        // material never has a printable form.
        let result = KeyMaterial::load(Path::new("does/not/exist"));
        assert!(matches!(result, Err(KeyError::Io(_))));
    }

    #[test]
    fn written_pair_loads_back() {
        let keys = KeyMaterial::load(&fixture_dir()).expect("fixture keys must load");
        let dir = tempfile::tempdir().expect("tempdir");
        keys.write(dir.path()).expect("write pair");

        let reloaded = KeyMaterial::load(dir.path()).expect("reload pair");
        assert_eq!(reloaded.public().size(), keys.public().size());
    }

    #[test]
    fn load_fails_on_garbage_pem() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(PRIVATE_KEY_FILE), "not a key").expect("write");
        std::fs::write(dir.path().join(PUBLIC_KEY_FILE), "not a key").expect("write");

        let result = KeyMaterial::load(dir.path());
        assert!(matches!(result, Err(KeyError::Parse(_))));
    }
}
