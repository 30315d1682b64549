//! PKCS#12 identity bundles.
//!
//! A [`CertificateBundle`] only exists for a certificate whose validity
//! window contains the instant it was parsed at. The private key never
//! leaves the bundle; callers sign through it.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{Id, PKey, Private};
use openssl::sign::Signer;
use openssl::x509::{X509, X509NameRef, X509Ref};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::PkiError;

/// Reasons the crypto library reports when the container MAC or the bag
/// encryption does not accept the passphrase.
const PASSPHRASE_FAILURE_REASONS: &[&str] = &["mac verify failure", "bad decrypt"];

/// A decoded PKCS#12 container: leaf certificate, issuer chain and the
/// matching RSA private key.
pub struct CertificateBundle {
    certificate: X509,
    chain: Vec<X509>,
    private_key: PKey<Private>,
    serial_number: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl CertificateBundle {
    /// Decode and validate a container against the current time.
    pub fn parse(pfx: &[u8], passphrase: &str) -> Result<Self, PkiError> {
        Self::parse_at(pfx, passphrase, Utc::now())
    }

    /// Decode a container and check that `now` lies inside the leaf
    /// certificate's validity window.
    pub fn parse_at(pfx: &[u8], passphrase: &str, now: DateTime<Utc>) -> Result<Self, PkiError> {
        let container = Pkcs12::from_der(pfx).map_err(PkiError::container)?;
        let parsed = container.parse2(passphrase).map_err(classify_parse_error)?;

        let private_key = parsed.pkey.ok_or(PkiError::NoPrivateKeyFound)?;
        let certificate = parsed.cert.ok_or(PkiError::NoCertificateFound)?;

        if private_key.id() != Id::RSA {
            return Err(PkiError::MalformedContainer(
                "private key is not an RSA key".into(),
            ));
        }
        let public_key = certificate.public_key().map_err(PkiError::container)?;
        if !public_key.public_eq(&*private_key) {
            return Err(PkiError::MalformedContainer(
                "private key does not match the certificate".into(),
            ));
        }

        let not_before = asn1_to_utc(certificate.not_before())?;
        let not_after = asn1_to_utc(certificate.not_after())?;
        if now < not_before {
            return Err(PkiError::CertificateNotYetValid { not_before });
        }
        if now > not_after {
            return Err(PkiError::CertificateExpired { not_after });
        }

        let serial_number = certificate
            .serial_number()
            .to_bn()
            .and_then(|bn| bn.to_hex_str().map(|hex| hex.to_string()))
            .map_err(PkiError::container)?;

        let chain: Vec<X509> = parsed
            .ca
            .map(|stack| stack.into_iter().collect())
            .unwrap_or_default();

        debug!(chain_len = chain.len(), %not_after, "PKCS#12 container decoded");

        Ok(Self {
            certificate,
            chain,
            private_key,
            serial_number,
            not_before,
            not_after,
        })
    }

    pub fn certificate(&self) -> &X509Ref {
        &self.certificate
    }

    /// Issuer certificates shipped in the container, in container order.
    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn subject_common_name(&self) -> Option<String> {
        common_name(self.certificate.subject_name())
    }

    pub fn issuer_common_name(&self) -> Option<String> {
        common_name(self.certificate.issuer_name())
    }

    /// Serial number as uppercase hex.
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// DER encoding of the leaf certificate, base64 without PEM armour.
    pub fn certificate_base64(&self) -> Result<String, PkiError> {
        let der = self.certificate.to_der().map_err(PkiError::container)?;
        Ok(STANDARD.encode(der))
    }

    /// SHA-256 fingerprint of the leaf certificate, hex-encoded.
    pub fn fingerprint(&self) -> Result<String, PkiError> {
        let der = self.certificate.to_der().map_err(PkiError::container)?;
        Ok(hex::encode(Sha256::digest(&der)))
    }

    /// RSA PKCS#1 v1.5 signature over the SHA-1 digest of `data`.
    pub(crate) fn sign_sha1(&self, data: &[u8]) -> Result<Vec<u8>, PkiError> {
        let mut signer = Signer::new(MessageDigest::sha1(), &self.private_key)
            .map_err(|e| PkiError::signing("initialise RSA-SHA1 signer", e))?;
        signer
            .update(data)
            .map_err(|e| PkiError::signing("digest SignedInfo", e))?;
        signer
            .sign_to_vec()
            .map_err(|e| PkiError::signing("compute RSA signature", e))
    }
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("subject", &self.subject_common_name())
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

fn classify_parse_error(err: ErrorStack) -> PkiError {
    let wrong_passphrase = err.errors().iter().any(|e| {
        e.reason().is_some_and(|reason| {
            let reason = reason.to_ascii_lowercase();
            PASSPHRASE_FAILURE_REASONS
                .iter()
                .any(|known| reason.contains(known))
        })
    });
    if wrong_passphrase {
        PkiError::InvalidPassphrase
    } else {
        PkiError::container(err)
    }
}

fn common_name(name: &X509NameRef) -> Option<String> {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| std::str::from_utf8(entry.data().as_slice()).ok())
        .map(|cn| cn.to_string())
}

fn asn1_to_utc(time: &Asn1TimeRef) -> Result<DateTime<Utc>, PkiError> {
    let epoch = Asn1Time::from_unix(0).map_err(PkiError::container)?;
    let diff = epoch.diff(time).map_err(PkiError::container)?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| PkiError::MalformedContainer("certificate validity out of range".into()))
}
