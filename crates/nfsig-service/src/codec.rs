//! AES-256-GCM encryption of certificate secrets at rest.
//!
//! Output is `base64(nonce || ciphertext || tag)`. The owner id is bound
//! as associated data, so a ciphertext copied into another owner's
//! record does not decrypt.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use zeroize::Zeroizing;

use crate::error::ServiceError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Clone)]
pub struct SecretCodec {
    cipher: Aes256Gcm,
}

impl SecretCodec {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypt `plaintext` for `owner_id` under a fresh random nonce.
    pub fn encode(&self, owner_id: i64, plaintext: &[u8]) -> Result<String, ServiceError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let aad = owner_id.to_be_bytes();

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| ServiceError::Crypto(format!("AES-GCM encrypt: {e}")))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(combined))
    }

    /// Decrypt a value produced by [`SecretCodec::encode`] for the same owner.
    pub fn decode(&self, owner_id: i64, encoded: &str) -> Result<Zeroizing<Vec<u8>>, ServiceError> {
        let failed = || ServiceError::DecryptionFailed { owner_id };

        let combined = STANDARD.decode(encoded).map_err(|_| failed())?;
        if combined.len() < NONCE_LEN + TAG_LEN {
            return Err(failed());
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let aad = owner_id.to_be_bytes();
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| failed())
    }
}

impl std::fmt::Debug for SecretCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCodec").finish_non_exhaustive()
    }
}
