//! On-the-fly PKCS#12 containers for tests.
//!
//! Containers are built relative to a caller-chosen instant so they
//! never expire under the test suite. Helpers panic on failure.

use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::x509::{X509, X509Builder, X509Name, X509NameBuilder};

pub const PASSPHRASE: &str = "test1234";
pub const SUBJECT_CN: &str = "ACME INDUSTRIA E COMERCIO LTDA:12345678000195";
pub const SUBJECT_TAX_ID: &str = "12345678000195";
pub const SUBJECT_LEGAL_NAME: &str = "ACME INDUSTRIA E COMERCIO LTDA";
pub const ISSUER_CN: &str = "AC TESTE RFB v5";
pub const SERIAL: u32 = 0x0A1B_2C3D;

/// Shape of the container to build.
#[derive(Debug, Clone)]
pub struct FixtureOptions {
    pub subject_cn: String,
    pub issuer_cn: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub passphrase: String,
    pub include_key: bool,
    pub include_certificate: bool,
    /// Ship a separate issuer certificate in the CA bag.
    pub include_chain: bool,
}

impl FixtureOptions {
    /// A certificate valid from a day before `now` for a year.
    pub fn valid_around(now: DateTime<Utc>) -> Self {
        Self {
            subject_cn: SUBJECT_CN.into(),
            issuer_cn: ISSUER_CN.into(),
            not_before: now - Duration::days(1),
            not_after: now + Duration::days(365),
            passphrase: PASSPHRASE.into(),
            include_key: true,
            include_certificate: true,
            include_chain: true,
        }
    }
}

fn cached_key(slot: &'static OnceLock<Vec<u8>>) -> PKey<Private> {
    let der = slot.get_or_init(|| {
        let rsa = Rsa::generate(2048).expect("RSA key generation");
        PKey::from_rsa(rsa)
            .and_then(|key| key.private_key_to_pkcs8())
            .expect("PKCS#8 export")
    });
    PKey::private_key_from_pkcs8(der).expect("PKCS#8 import")
}

/// The RSA key every leaf fixture is issued for.
pub fn leaf_key() -> PKey<Private> {
    static LEAF: OnceLock<Vec<u8>> = OnceLock::new();
    cached_key(&LEAF)
}

fn issuer_key() -> PKey<Private> {
    static ISSUER: OnceLock<Vec<u8>> = OnceLock::new();
    cached_key(&ISSUER)
}

fn name(cn: &str) -> X509Name {
    let mut builder = X509NameBuilder::new().expect("name builder");
    builder.append_entry_by_text("C", "BR").expect("C entry");
    builder.append_entry_by_text("O", "ICP-Brasil").expect("O entry");
    builder
        .append_entry_by_nid(Nid::COMMONNAME, cn)
        .expect("CN entry");
    builder.build()
}

fn certificate(
    subject_cn: &str,
    issuer_cn: &str,
    subject_key: &PKey<Private>,
    signing_key: &PKey<Private>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    serial: u32,
) -> X509 {
    let mut builder = X509Builder::new().expect("x509 builder");
    builder.set_version(2).expect("version");
    let serial = BigNum::from_u32(serial)
        .and_then(|bn| bn.to_asn1_integer())
        .expect("serial");
    builder.set_serial_number(&serial).expect("set serial");
    builder
        .set_subject_name(&name(subject_cn))
        .expect("subject");
    builder.set_issuer_name(&name(issuer_cn)).expect("issuer");
    builder.set_pubkey(subject_key).expect("pubkey");
    let not_before = Asn1Time::from_unix(not_before.timestamp()).expect("not_before");
    let not_after = Asn1Time::from_unix(not_after.timestamp()).expect("not_after");
    builder.set_not_before(&not_before).expect("set not_before");
    builder.set_not_after(&not_after).expect("set not_after");
    builder
        .sign(signing_key, MessageDigest::sha256())
        .expect("sign certificate");
    builder.build()
}

/// The leaf certificate a container built from `options` would carry.
pub fn leaf_certificate(options: &FixtureOptions) -> X509 {
    certificate(
        &options.subject_cn,
        &options.issuer_cn,
        &leaf_key(),
        &issuer_key(),
        options.not_before,
        options.not_after,
        SERIAL,
    )
}

/// Build a DER-encoded PKCS#12 container.
pub fn build_pfx(options: &FixtureOptions) -> Vec<u8> {
    let key = leaf_key();
    let leaf = leaf_certificate(options);

    let mut builder = Pkcs12::builder();
    builder.name("nfsig-test");
    if options.include_key {
        builder.pkey(&key);
    }
    if options.include_certificate {
        builder.cert(&leaf);
    }
    if options.include_chain {
        let issuer = issuer_key();
        let ca = certificate(
            &options.issuer_cn,
            &options.issuer_cn,
            &issuer,
            &issuer,
            options.not_before - Duration::days(365),
            options.not_after + Duration::days(365),
            1,
        );
        let mut stack = Stack::new().expect("stack");
        stack.push(ca).expect("push ca");
        builder.ca(stack);
    }
    builder
        .build2(&options.passphrase)
        .and_then(|p12| p12.to_der())
        .expect("PKCS#12 build")
}
