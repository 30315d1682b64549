//! NFSIG Service: certificate upload, status, removal and document
//! signing on behalf of an owning business entity.

pub mod codec;
pub mod config;
pub mod error;
pub mod service;

pub use codec::SecretCodec;
pub use config::SigningConfig;
pub use error::ServiceError;
pub use service::{
    CertificateInfo, CertificateService, CertificateStatus, UploadInput, UploadOutput,
};
