use super::FieldCipher;
use crate::error::{OrmError, OrmResult};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const FORMAT_VERSION: u8 = 1;
const ALGORITHM: &str = "aes-256-gcm";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Metadata stored in front of every ciphertext.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    v: u8,
    a: String,
    k: String,
}

struct KeyEntry {
    digest: String,
    cipher: Aes256Gcm,
}

impl KeyEntry {
    fn new(key: &[u8]) -> OrmResult<Self> {
        if key.len() != KEY_LEN {
            return Err(OrmError::configuration(format!(
                "encryption key must be {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| OrmError::configuration(format!("invalid encryption key: {e}")))?;
        Ok(Self {
            digest: key_digest(key),
            cipher,
        })
    }
}

/// Short hex SHA-256 digest identifying a key inside ciphertext metadata.
fn key_digest(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    hex::encode(&digest[..8])
}

/// AES-256-GCM field cipher.
///
/// Output format: `base64(envelope-json).base64(nonce || ciphertext)`. The
/// envelope records the format version, the algorithm and a digest of the key
/// used, so values written under a rotated-out key can still be decrypted with
/// one of the `decryption_keys`.
pub struct AesGcmCipher {
    encryption: KeyEntry,
    decryption: Vec<KeyEntry>,
}

impl AesGcmCipher {
    /// Cipher encrypting with `key`; decryption also tries `key`.
    pub fn new(key: &[u8]) -> OrmResult<Self> {
        Ok(Self {
            encryption: KeyEntry::new(key)?,
            decryption: Vec::new(),
        })
    }

    /// Add an extra key accepted for decryption.
    pub fn with_decryption_key(mut self, key: &[u8]) -> OrmResult<Self> {
        self.decryption.push(KeyEntry::new(key)?);
        Ok(self)
    }

    fn find_key(&self, digest: &str) -> Option<&KeyEntry> {
        std::iter::once(&self.encryption)
            .chain(self.decryption.iter())
            .find(|entry| entry.digest == digest)
    }
}

impl FieldCipher for AesGcmCipher {
    fn encrypt(&self, _model: &str, _field: &str, plain: &str) -> OrmResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .encryption
            .cipher
            .encrypt(&nonce, plain.as_bytes())
            .map_err(|e| OrmError::crypto(format!("encryption failed: {e}")))?;

        let envelope = serde_json::to_vec(&Envelope {
            v: FORMAT_VERSION,
            a: ALGORITHM.to_string(),
            k: self.encryption.digest.clone(),
        })?;
        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        Ok(format!(
            "{}.{}",
            STANDARD.encode(envelope),
            STANDARD.encode(payload)
        ))
    }

    fn decrypt(&self, _model: &str, _field: &str, cipher: &str) -> OrmResult<String> {
        let (envelope, payload) = cipher
            .split_once('.')
            .ok_or_else(|| OrmError::crypto("malformed encrypted value"))?;
        let envelope = STANDARD
            .decode(envelope)
            .map_err(|e| OrmError::crypto(format!("malformed metadata: {e}")))?;
        let envelope: Envelope = serde_json::from_slice(&envelope)?;
        if envelope.v != FORMAT_VERSION || envelope.a != ALGORITHM {
            return Err(OrmError::crypto(format!(
                "unsupported format v{} / {}",
                envelope.v, envelope.a
            )));
        }
        let key = self
            .find_key(&envelope.k)
            .ok_or_else(|| OrmError::crypto("no decryption key matches the stored digest"))?;

        let payload = STANDARD
            .decode(payload)
            .map_err(|e| OrmError::crypto(format!("malformed ciphertext: {e}")))?;
        if payload.len() < NONCE_LEN {
            return Err(OrmError::crypto("ciphertext too short"));
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plain = key
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| OrmError::crypto(format!("decryption failed: {e}")))?;
        String::from_utf8(plain).map_err(|e| OrmError::crypto(format!("invalid utf-8: {e}")))
    }
}
