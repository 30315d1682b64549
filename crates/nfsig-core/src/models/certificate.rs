//! Signing certificate domain models.
//!
//! Each owning business entity (company) has at most one signing
//! certificate. The PKCS#12 container and its passphrase are stored
//! encrypted; identity fields are denormalized from the certificate at
//! upload time for cheap listing and expiry queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-time classification of an owner's certificate.
///
/// Never stored: always derived from `not_after` and the current time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CertificateState {
    /// No certificate was ever uploaded for the owner.
    Absent,
    Valid,
    /// Valid, but fewer than the configured threshold of days remain.
    ExpiringSoon,
    Expired,
    /// The certificate was removed; its secrets are gone.
    Revoked,
}

impl CertificateState {
    /// Classify an active certificate by its remaining days.
    pub fn classify(days_remaining: i64, expiring_threshold_days: i64) -> Self {
        if days_remaining <= 0 {
            Self::Expired
        } else if days_remaining < expiring_threshold_days {
            Self::ExpiringSoon
        } else {
            Self::Valid
        }
    }
}

/// Whole days from `now` until `not_after`, rounded up.
///
/// Zero or negative once `not_after` has passed.
pub fn days_remaining(not_after: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    const DAY_SECS: i64 = 86_400;
    let secs = (not_after - now).num_seconds();
    if secs > 0 {
        (secs + DAY_SECS - 1) / DAY_SECS
    } else {
        secs / DAY_SECS
    }
}

/// An active signing certificate record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// The owning business entity.
    pub owner_id: i64,
    /// Encrypted PKCS#12 container, `base64(nonce || ciphertext || tag)`.
    #[serde(skip_serializing)]
    pub encrypted_pfx: String,
    /// Encrypted container passphrase, same envelope as `encrypted_pfx`.
    #[serde(skip_serializing)]
    pub encrypted_passphrase: String,
    /// 14-digit tax id (CNPJ), empty if the subject did not carry one.
    pub subject_tax_id: String,
    pub subject_legal_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Issuer common name.
    pub issuer_name: String,
    /// Certificate serial number (uppercase hex).
    pub serial_number: String,
    /// SHA-256 fingerprint of the leaf certificate (lowercase hex).
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written when a certificate is uploaded.
///
/// Replaces any previous record of the same owner.
#[derive(Debug, Clone)]
pub struct UpsertCertificate {
    pub owner_id: i64,
    pub encrypted_pfx: String,
    pub encrypted_passphrase: String,
    pub subject_tax_id: String,
    pub subject_legal_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub issuer_name: String,
    pub serial_number: String,
    pub fingerprint: String,
}

/// What the store holds for an owner.
#[derive(Debug, Clone)]
pub enum CertificateSlot {
    Active(CertificateRecord),
    /// The record was revoked and its cryptographic fields nulled.
    Revoked {
        owner_id: i64,
        revoked_at: DateTime<Utc>,
    },
}
