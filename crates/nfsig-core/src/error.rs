//! Error types for the NFSIG system.
//!
//! Messages never carry passphrases, key material or container bytes.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Boxed cause kept behind [`NfsigError::SigningFailed`].
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum NfsigError {
    #[error("Invalid certificate passphrase")]
    InvalidPassphrase,

    #[error("Malformed PKCS#12 container: {0}")]
    MalformedContainer(String),

    #[error("No certificate found in container")]
    NoCertificateFound,

    #[error("No private key found in container")]
    NoPrivateKeyFound,

    #[error("Certificate is not valid before {not_before}")]
    CertificateNotYetValid { not_before: DateTime<Utc> },

    #[error("Certificate expired at {not_after}")]
    CertificateExpired { not_after: DateTime<Utc> },

    #[error("No certificate configured for owner {owner_id}")]
    CertificateNotConfigured { owner_id: i64 },

    #[error("Certificate subject does not carry a tax id: {reason}")]
    UnrecognizedSubject { reason: String },

    #[error("No signable element found in document")]
    SignableElementNotFound,

    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    #[error("Signing failed: {message}")]
    SigningFailed {
        message: String,
        #[source]
        source: Option<BoxedCause>,
    },

    #[error("Signature verification failed: {0}")]
    VerificationFailed(String),

    #[error("Secret decryption failed for owner {owner_id}")]
    DecryptionFailed { owner_id: i64 },

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type NfsigResult<T> = Result<T, NfsigError>;
