//! Service error types.

use nfsig_core::error::NfsigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no certificate configured for owner {owner_id}")]
    NotConfigured { owner_id: i64 },

    #[error("secret decryption failed for owner {owner_id}")]
    DecryptionFailed { owner_id: i64 },

    #[error("container rejected: {0}")]
    ContainerRejected(String),

    #[error("certificate subject does not carry a tax id: {0}")]
    UnrecognizedSubject(String),

    #[error("cryptography error: {0}")]
    Crypto(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("expiry window of {within_days} days is out of range")]
    WindowOutOfRange { within_days: i64 },
}

impl From<ServiceError> for NfsigError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotConfigured { owner_id } => {
                NfsigError::CertificateNotConfigured { owner_id }
            }
            ServiceError::DecryptionFailed { owner_id } => NfsigError::DecryptionFailed { owner_id },
            ServiceError::ContainerRejected(msg) => NfsigError::MalformedContainer(msg),
            ServiceError::UnrecognizedSubject(reason) => NfsigError::UnrecognizedSubject { reason },
            ServiceError::Crypto(msg) => NfsigError::PersistenceFailed(msg),
            ServiceError::Configuration(msg) => NfsigError::Configuration(msg),
            err @ ServiceError::WindowOutOfRange { .. } => {
                NfsigError::InvalidRequest(err.to_string())
            }
        }
    }
}
