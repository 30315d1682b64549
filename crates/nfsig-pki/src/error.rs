//! PKI error types.

use chrono::{DateTime, Utc};
use nfsig_core::error::NfsigError;
use openssl::error::ErrorStack;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PkiError {
    #[error("invalid passphrase")]
    InvalidPassphrase,

    #[error("malformed container: {0}")]
    MalformedContainer(String),

    #[error("no certificate found in container")]
    NoCertificateFound,

    #[error("no private key found in container")]
    NoPrivateKeyFound,

    #[error("certificate is not valid before {not_before}")]
    CertificateNotYetValid { not_before: DateTime<Utc> },

    #[error("certificate expired at {not_after}")]
    CertificateExpired { not_after: DateTime<Utc> },

    #[error("no signable element found in document")]
    SignableElementNotFound,

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("signing failed: {context}")]
    SigningFailed {
        context: &'static str,
        #[source]
        source: ErrorStack,
    },

    #[error("signature verification failed: {0}")]
    VerificationFailed(String),
}

impl PkiError {
    pub(crate) fn signing(context: &'static str, source: ErrorStack) -> Self {
        Self::SigningFailed { context, source }
    }

    pub(crate) fn container(err: ErrorStack) -> Self {
        Self::MalformedContainer(err.to_string())
    }

    pub(crate) fn document(err: impl std::fmt::Display) -> Self {
        Self::MalformedDocument(err.to_string())
    }
}

impl From<PkiError> for NfsigError {
    fn from(err: PkiError) -> Self {
        match err {
            PkiError::InvalidPassphrase => NfsigError::InvalidPassphrase,
            PkiError::MalformedContainer(msg) => NfsigError::MalformedContainer(msg),
            PkiError::NoCertificateFound => NfsigError::NoCertificateFound,
            PkiError::NoPrivateKeyFound => NfsigError::NoPrivateKeyFound,
            PkiError::CertificateNotYetValid { not_before } => {
                NfsigError::CertificateNotYetValid { not_before }
            }
            PkiError::CertificateExpired { not_after } => {
                NfsigError::CertificateExpired { not_after }
            }
            PkiError::SignableElementNotFound => NfsigError::SignableElementNotFound,
            PkiError::MalformedDocument(msg) => NfsigError::MalformedDocument(msg),
            PkiError::SigningFailed { context, source } => NfsigError::SigningFailed {
                message: context.to_string(),
                source: Some(Box::new(source)),
            },
            PkiError::VerificationFailed(msg) => NfsigError::VerificationFailed(msg),
        }
    }
}
