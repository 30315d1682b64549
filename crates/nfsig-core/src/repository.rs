//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Certificate records are scoped
//! by `owner_id`; each owner has at most one record.

use chrono::{DateTime, Utc};

use crate::error::NfsigResult;
use crate::models::certificate::{CertificateRecord, CertificateSlot, UpsertCertificate};

pub trait CertificateRepository: Send + Sync {
    /// Create or replace the owner's record in a single atomic write.
    ///
    /// Clears any previous revocation.
    fn upsert(
        &self,
        input: UpsertCertificate,
    ) -> impl Future<Output = NfsigResult<CertificateRecord>> + Send;

    /// `None` when nothing was ever stored for the owner.
    fn find_by_owner(
        &self,
        owner_id: i64,
    ) -> impl Future<Output = NfsigResult<Option<CertificateSlot>>> + Send;

    /// Null every cryptographic and identity field of the owner's record
    /// and stamp `revoked_at`. A no-op when no record exists.
    fn revoke(&self, owner_id: i64) -> impl Future<Output = NfsigResult<()>> + Send;

    /// Active records whose `not_after` is at or before `before`,
    /// soonest first.
    fn list_expiring(
        &self,
        before: DateTime<Utc>,
    ) -> impl Future<Output = NfsigResult<Vec<CertificateRecord>>> + Send;
}
