//! NFSIG PKI: PKCS#12 identity bundles, canonical XML and enveloped
//! XML-DSig signing of fiscal documents.

pub mod bundle;
pub mod c14n;
pub mod error;
pub mod identity;
pub(crate) mod xml;
pub mod xmldsig;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use bundle::CertificateBundle;
pub use error::PkiError;
pub use identity::Identity;
pub use xml::XMLDSIG_NS;
pub use xmldsig::{CanonicalSigner, DEFAULT_SIGNABLE_ELEMENTS, SignedDocument, VerifiedSignature, verify};
