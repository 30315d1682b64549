//! SurrealDB repository implementations.

mod certificate;

pub use certificate::SurrealCertificateRepository;
