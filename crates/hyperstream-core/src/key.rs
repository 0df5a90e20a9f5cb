//! Topic key generation, display-form parsing, and AEAD key derivation (C1).
//!
//! Pure functions, no I/O. The topic key is the only secret a human ever
//! copies around; the AEAD key is always derived from it and never
//! transmitted or displayed.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{HyperstreamError, Result};

const TOPIC_KEY_LEN: usize = 32;
const AEAD_KEY_LEN: usize = 32;
const HKDF_SALT: &[u8] = b"hyperstream-v1";
const HKDF_INFO: &[u8] = b"aes-256-gcm";

/// The 32-byte secret shared out-of-band between sender and receiver.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct TopicKey([u8; TOPIC_KEY_LEN]);

impl TopicKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOPIC_KEY_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Decodes a 43-character base64url (no padding) display form.
    pub fn parse(display: &str) -> Result<Self> {
        let decoded = URL_SAFE_NO_PAD
            .decode(display)
            .map_err(|_| HyperstreamError::InvalidKeyLength)?;
        let bytes: [u8; TOPIC_KEY_LEN] = decoded
            .try_into()
            .map_err(|_| HyperstreamError::InvalidKeyLength)?;
        Ok(Self(bytes))
    }

    /// Base64url (no padding) display form, always 43 characters.
    pub fn display(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; TOPIC_KEY_LEN] {
        &self.0
    }

    /// Derives the AEAD key for this session via HKDF-SHA256.
    pub fn derive(&self) -> AeadKey {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &self.0);
        let mut out = [0u8; AEAD_KEY_LEN];
        hk.expand(HKDF_INFO, &mut out)
            .expect("32-byte okm is a valid HKDF-SHA256 output length");
        AeadKey(out)
    }
}

/// The key actually fed to AES-256-GCM. Never equal to the `TopicKey` bytes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AeadKey([u8; AEAD_KEY_LEN]);

impl AeadKey {
    pub fn as_bytes(&self) -> &[u8; AEAD_KEY_LEN] {
        &self.0
    }
}
