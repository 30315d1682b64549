//! Certificate service: upload, status, signing and removal.
//!
//! Secrets are decrypted and the PKCS#12 container re-parsed on every
//! signing call; nothing decrypted outlives the call.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use nfsig_core::clock::{Clock, SystemClock};
use nfsig_core::error::{NfsigError, NfsigResult};
use nfsig_core::models::certificate::{
    CertificateRecord, CertificateSlot, CertificateState, UpsertCertificate, days_remaining,
};
use nfsig_core::repository::CertificateRepository;
use nfsig_pki::{CanonicalSigner, CertificateBundle, Identity, PkiError, SignedDocument, identity};
use serde::Serialize;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::codec::SecretCodec;
use crate::config::SigningConfig;
use crate::error::ServiceError;

/// A PKCS#12 upload for one owner.
pub struct UploadInput {
    pub owner_id: i64,
    /// Raw `.pfx` / `.p12` bytes.
    pub pfx: Vec<u8>,
    pub passphrase: String,
}

impl std::fmt::Debug for UploadInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadInput")
            .field("owner_id", &self.owner_id)
            .field("pfx_len", &self.pfx.len())
            .finish_non_exhaustive()
    }
}

/// Summary of an accepted upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutput {
    pub owner_id: i64,
    pub tax_id: String,
    pub legal_name: String,
    pub issuer_name: String,
    pub serial_number: String,
    pub fingerprint: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub days_remaining: i64,
    pub state: CertificateState,
}

/// A container that passed every upload check, without being stored.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateInfo {
    pub tax_id: String,
    pub legal_name: String,
    pub issuer_name: String,
    pub serial_number: String,
    pub fingerprint: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub days_remaining: i64,
    pub state: CertificateState,
}

/// What an owner's certificate looks like right now.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateStatus {
    pub owner_id: i64,
    /// `true` only when an active certificate is stored, expired or not.
    pub configured: bool,
    pub tax_id: Option<String>,
    pub legal_name: Option<String>,
    pub not_after: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    pub state: CertificateState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Certificate lifecycle and signing service.
///
/// Generic over the repository so that the service has no dependency
/// on the database crate.
pub struct CertificateService<R: CertificateRepository> {
    repo: R,
    config: SigningConfig,
    codec: SecretCodec,
    signer: CanonicalSigner,
    clock: Arc<dyn Clock>,
}

impl<R: CertificateRepository> CertificateService<R> {
    /// Fails with a configuration error when no secret key is set.
    pub fn new(repo: R, config: SigningConfig) -> NfsigResult<Self> {
        Self::with_clock(repo, config, Arc::new(SystemClock))
    }

    pub fn with_clock(repo: R, config: SigningConfig, clock: Arc<dyn Clock>) -> NfsigResult<Self> {
        let key = config
            .secret_key
            .ok_or_else(|| ServiceError::Configuration("secret key is not configured".into()))?;
        let codec = SecretCodec::new(&key);
        let signer = CanonicalSigner::new(config.signable_elements.iter().cloned());
        Ok(Self {
            repo,
            config,
            codec,
            signer,
            clock,
        })
    }

    pub fn config(&self) -> &SigningConfig {
        &self.config
    }

    /// Validate and store a certificate, replacing any previous one.
    ///
    /// Nothing is written unless the container parses, is inside its
    /// validity window and its identity is acceptable.
    pub async fn upload(&self, input: UploadInput) -> NfsigResult<UploadOutput> {
        let owner_id = input.owner_id;
        self.store(input)
            .await
            .inspect_err(|e| warn!(owner_id, error = %e, "certificate upload rejected"))
    }

    /// Run the upload checks on a container without storing anything.
    pub fn inspect(&self, pfx: &[u8], passphrase: &str) -> NfsigResult<CertificateInfo> {
        let now = self.clock.now();
        let (bundle, identity) = self
            .validate(pfx, passphrase, now)
            .inspect_err(|e| warn!(error = %e, "certificate inspection rejected"))?;

        let days = days_remaining(bundle.not_after(), now);
        Ok(CertificateInfo {
            tax_id: identity.tax_id,
            legal_name: identity.legal_name,
            issuer_name: identity.issuer_name,
            serial_number: identity.serial_number,
            fingerprint: bundle.fingerprint()?,
            not_before: bundle.not_before(),
            not_after: bundle.not_after(),
            days_remaining: days,
            state: CertificateState::classify(days, self.config.expiring_threshold_days),
        })
    }

    /// Size limit, container parse at `now` and tax-id policy.
    fn validate(
        &self,
        pfx: &[u8],
        passphrase: &str,
        now: DateTime<Utc>,
    ) -> NfsigResult<(CertificateBundle, Identity)> {
        if pfx.is_empty() {
            return Err(ServiceError::ContainerRejected("empty upload".into()).into());
        }
        if pfx.len() > self.config.max_container_bytes {
            return Err(ServiceError::ContainerRejected(format!(
                "{} bytes exceeds the {} byte limit",
                pfx.len(),
                self.config.max_container_bytes
            ))
            .into());
        }

        let bundle = CertificateBundle::parse_at(pfx, passphrase, now)?;
        let identity = identity::extract(&bundle);
        if self.config.require_tax_id && !identity.has_tax_id() {
            return Err(ServiceError::UnrecognizedSubject(
                "subject common name has no 14-digit tax id".into(),
            )
            .into());
        }
        Ok((bundle, identity))
    }

    async fn store(&self, input: UploadInput) -> NfsigResult<UploadOutput> {
        let owner_id = input.owner_id;
        let pfx = Zeroizing::new(input.pfx);
        let passphrase = Zeroizing::new(input.passphrase);

        let now = self.clock.now();
        let (bundle, identity) = self.validate(&pfx, &passphrase, now)?;

        let record = self
            .repo
            .upsert(UpsertCertificate {
                owner_id,
                encrypted_pfx: self.codec.encode(owner_id, &pfx)?,
                encrypted_passphrase: self.codec.encode(owner_id, passphrase.as_bytes())?,
                subject_tax_id: identity.tax_id.clone(),
                subject_legal_name: identity.legal_name.clone(),
                not_before: bundle.not_before(),
                not_after: bundle.not_after(),
                issuer_name: identity.issuer_name.clone(),
                serial_number: identity.serial_number.clone(),
                fingerprint: bundle.fingerprint()?,
            })
            .await?;

        let days = days_remaining(record.not_after, now);
        let state = CertificateState::classify(days, self.config.expiring_threshold_days);
        if state == CertificateState::ExpiringSoon {
            warn!(owner_id, days_remaining = days, "uploaded certificate expires soon");
        }
        info!(
            owner_id,
            serial_number = %record.serial_number,
            days_remaining = days,
            "signing certificate uploaded"
        );

        Ok(UploadOutput {
            owner_id,
            tax_id: record.subject_tax_id,
            legal_name: record.subject_legal_name,
            issuer_name: record.issuer_name,
            serial_number: record.serial_number,
            fingerprint: record.fingerprint,
            not_before: record.not_before,
            not_after: record.not_after,
            days_remaining: days,
            state,
        })
    }

    /// Current state of the owner's certificate. An absent or revoked
    /// certificate is reported, not treated as an error.
    pub async fn status(&self, owner_id: i64) -> NfsigResult<CertificateStatus> {
        let status = match self.repo.find_by_owner(owner_id).await? {
            None => CertificateStatus {
                owner_id,
                configured: false,
                tax_id: None,
                legal_name: None,
                not_after: None,
                days_remaining: None,
                state: CertificateState::Absent,
                revoked_at: None,
            },
            Some(CertificateSlot::Revoked { revoked_at, .. }) => CertificateStatus {
                owner_id,
                configured: false,
                tax_id: None,
                legal_name: None,
                not_after: None,
                days_remaining: None,
                state: CertificateState::Revoked,
                revoked_at: Some(revoked_at),
            },
            Some(CertificateSlot::Active(record)) => self.active_status(record, self.clock.now()),
        };
        Ok(status)
    }

    /// Sign the first configured signable element of `xml`.
    pub async fn sign(&self, owner_id: i64, xml: &str) -> NfsigResult<SignedDocument> {
        self.sign_with(owner_id, |bundle| self.signer.sign(xml, bundle))
            .await
    }

    /// Sign the first element named `local_name` of `xml`.
    pub async fn sign_element(
        &self,
        owner_id: i64,
        xml: &str,
        local_name: &str,
    ) -> NfsigResult<SignedDocument> {
        self.sign_with(owner_id, |bundle| {
            self.signer.sign_element(xml, local_name, bundle)
        })
        .await
    }

    async fn sign_with<F>(&self, owner_id: i64, sign: F) -> NfsigResult<SignedDocument>
    where
        F: FnOnce(&CertificateBundle) -> Result<SignedDocument, PkiError>,
    {
        let result = async {
            let bundle = self.load_bundle(owner_id).await?;
            sign(&bundle).map_err(NfsigError::from)
        }
        .await;

        match &result {
            Ok(signed) => info!(
                owner_id,
                reference_id = %signed.reference_id,
                "document signed"
            ),
            Err(e) => warn!(owner_id, error = %e, "document signing refused"),
        }
        result
    }

    /// Decrypt the stored secrets and re-parse the container, re-checking
    /// the validity window at the current time.
    async fn load_bundle(&self, owner_id: i64) -> NfsigResult<CertificateBundle> {
        let record = match self.repo.find_by_owner(owner_id).await? {
            Some(CertificateSlot::Active(record)) => record,
            _ => return Err(ServiceError::NotConfigured { owner_id }.into()),
        };

        let passphrase = self.codec.decode(owner_id, &record.encrypted_passphrase)?;
        let pfx = self.codec.decode(owner_id, &record.encrypted_pfx)?;
        let passphrase = std::str::from_utf8(&passphrase)
            .map_err(|_| ServiceError::DecryptionFailed { owner_id })?;

        Ok(CertificateBundle::parse_at(&pfx, passphrase, self.clock.now())?)
    }

    /// Revoke the owner's certificate. Removing an absent certificate
    /// succeeds.
    pub async fn remove(&self, owner_id: i64) -> NfsigResult<()> {
        self.repo.revoke(owner_id).await?;
        info!(owner_id, "signing certificate removed");
        Ok(())
    }

    /// Active certificates that expire within `within_days`, soonest first.
    pub async fn list_expiring(&self, within_days: i64) -> NfsigResult<Vec<CertificateStatus>> {
        let now = self.clock.now();
        let before = TimeDelta::try_days(within_days)
            .and_then(|window| now.checked_add_signed(window))
            .ok_or(ServiceError::WindowOutOfRange { within_days })?;
        let records = self.repo.list_expiring(before).await?;
        Ok(records
            .into_iter()
            .map(|record| self.active_status(record, now))
            .collect())
    }

    fn active_status(&self, record: CertificateRecord, now: DateTime<Utc>) -> CertificateStatus {
        let days = days_remaining(record.not_after, now);
        CertificateStatus {
            owner_id: record.owner_id,
            configured: true,
            tax_id: Some(record.subject_tax_id),
            legal_name: Some(record.subject_legal_name),
            not_after: Some(record.not_after),
            days_remaining: Some(days),
            state: CertificateState::classify(days, self.config.expiring_threshold_days),
            revoked_at: None,
        }
    }
}
