//! Integration tests for the signing certificate repository using
//! in-memory SurrealDB.

use chrono::{DateTime, Duration, TimeZone, Utc};
use nfsig_core::models::certificate::{CertificateSlot, UpsertCertificate};
use nfsig_core::repository::CertificateRepository;
use nfsig_db::SurrealCertificateRepository;
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use surrealdb_types::SurrealValue;

/// The stored columns a revocation must clear, read without the
/// repository's mapping.
#[derive(Debug, SurrealValue)]
struct StoredSecrets {
    encrypted_pfx: Option<String>,
    encrypted_passphrase: Option<String>,
    subject_tax_id: Option<String>,
    subject_legal_name: Option<String>,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
    issuer_name: Option<String>,
    serial_number: Option<String>,
    fingerprint: Option<String>,
    revoked_at: Option<DateTime<Utc>>,
}

async fn migrated_db() -> Surreal<Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    nfsig_db::run_migrations(&db).await.unwrap();
    db
}

async fn setup() -> SurrealCertificateRepository<Db> {
    SurrealCertificateRepository::new(migrated_db().await)
}

async fn stored_secrets(db: &Surreal<Db>, owner_id: i64) -> StoredSecrets {
    let mut result = db
        .query(
            "SELECT encrypted_pfx, encrypted_passphrase, subject_tax_id, \
             subject_legal_name, not_before, not_after, issuer_name, \
             serial_number, fingerprint, revoked_at \
             FROM type::record('signing_certificate', $owner_id)",
        )
        .bind(("owner_id", owner_id))
        .await
        .unwrap();
    let rows: Vec<StoredSecrets> = result.take(0).unwrap();
    rows.into_iter().next().expect("row should exist")
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
}

fn upload(owner_id: i64, not_after: DateTime<Utc>) -> UpsertCertificate {
    UpsertCertificate {
        owner_id,
        encrypted_pfx: format!("pfx-ciphertext-{owner_id}"),
        encrypted_passphrase: format!("pass-ciphertext-{owner_id}"),
        subject_tax_id: "12345678000195".into(),
        subject_legal_name: "ACME INDUSTRIA LTDA".into(),
        not_before: base_time() - Duration::days(30),
        not_after,
        issuer_name: "AC TESTE RFB v5".into(),
        serial_number: "0A1B2C3D".into(),
        fingerprint: "ab".repeat(32),
    }
}

#[tokio::test]
async fn upsert_and_find() {
    let repo = setup().await;
    let not_after = base_time() + Duration::days(200);

    let stored = repo.upsert(upload(42, not_after)).await.unwrap();
    assert_eq!(stored.owner_id, 42);
    assert_eq!(stored.not_after, not_after);

    match repo.find_by_owner(42).await.unwrap() {
        Some(CertificateSlot::Active(record)) => {
            assert_eq!(record.encrypted_pfx, "pfx-ciphertext-42");
            assert_eq!(record.encrypted_passphrase, "pass-ciphertext-42");
            assert_eq!(record.subject_tax_id, "12345678000195");
            assert_eq!(record.subject_legal_name, "ACME INDUSTRIA LTDA");
            assert_eq!(record.issuer_name, "AC TESTE RFB v5");
            assert_eq!(record.serial_number, "0A1B2C3D");
            assert_eq!(record.not_after, not_after);
        }
        other => panic!("expected an active record, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_owner_has_no_slot() {
    let repo = setup().await;
    assert!(repo.find_by_owner(404).await.unwrap().is_none());
}

#[tokio::test]
async fn second_upload_replaces_the_first() {
    let repo = setup().await;
    repo.upsert(upload(42, base_time() + Duration::days(10)))
        .await
        .unwrap();

    let mut replacement = upload(42, base_time() + Duration::days(400));
    replacement.encrypted_pfx = "replacement".into();
    repo.upsert(replacement).await.unwrap();

    let Some(CertificateSlot::Active(record)) = repo.find_by_owner(42).await.unwrap() else {
        panic!("expected an active record");
    };
    assert_eq!(record.encrypted_pfx, "replacement");
    assert_eq!(record.not_after, base_time() + Duration::days(400));

    let all = repo
        .list_expiring(base_time() + Duration::days(1000))
        .await
        .unwrap();
    assert_eq!(all.len(), 1, "exactly one record per owner");
}

#[tokio::test]
async fn revoke_clears_secrets() {
    let db = migrated_db().await;
    let repo = SurrealCertificateRepository::new(db.clone());
    repo.upsert(upload(42, base_time() + Duration::days(100)))
        .await
        .unwrap();

    let before = stored_secrets(&db, 42).await;
    assert!(before.encrypted_pfx.is_some());
    assert!(before.revoked_at.is_none());

    repo.revoke(42).await.unwrap();

    let after = stored_secrets(&db, 42).await;
    assert_eq!(after.encrypted_pfx, None);
    assert_eq!(after.encrypted_passphrase, None);
    assert_eq!(after.subject_tax_id, None);
    assert_eq!(after.subject_legal_name, None);
    assert_eq!(after.not_before, None);
    assert_eq!(after.not_after, None);
    assert_eq!(after.issuer_name, None);
    assert_eq!(after.serial_number, None);
    assert_eq!(after.fingerprint, None);
    assert!(after.revoked_at.is_some());

    match repo.find_by_owner(42).await.unwrap() {
        Some(CertificateSlot::Revoked { owner_id, .. }) => assert_eq!(owner_id, 42),
        other => panic!("expected a revoked slot, got {other:?}"),
    }
}

#[tokio::test]
async fn revoke_is_idempotent_and_tolerates_missing_owner() {
    let repo = setup().await;
    repo.revoke(7).await.unwrap();
    assert!(repo.find_by_owner(7).await.unwrap().is_none());

    repo.upsert(upload(8, base_time() + Duration::days(100)))
        .await
        .unwrap();
    repo.revoke(8).await.unwrap();
    repo.revoke(8).await.unwrap();
    assert!(matches!(
        repo.find_by_owner(8).await.unwrap(),
        Some(CertificateSlot::Revoked { .. })
    ));
}

#[tokio::test]
async fn upload_after_revoke_reactivates() {
    let repo = setup().await;
    repo.upsert(upload(42, base_time() + Duration::days(100)))
        .await
        .unwrap();
    repo.revoke(42).await.unwrap();
    repo.upsert(upload(42, base_time() + Duration::days(300)))
        .await
        .unwrap();

    assert!(matches!(
        repo.find_by_owner(42).await.unwrap(),
        Some(CertificateSlot::Active(_))
    ));
}

#[tokio::test]
async fn list_expiring_orders_by_expiry_and_skips_revoked() {
    let repo = setup().await;
    repo.upsert(upload(1, base_time() + Duration::days(20)))
        .await
        .unwrap();
    repo.upsert(upload(2, base_time() + Duration::days(5)))
        .await
        .unwrap();
    repo.upsert(upload(3, base_time() + Duration::days(90)))
        .await
        .unwrap();
    repo.upsert(upload(4, base_time() + Duration::days(1)))
        .await
        .unwrap();
    repo.revoke(4).await.unwrap();

    let expiring = repo
        .list_expiring(base_time() + Duration::days(30))
        .await
        .unwrap();
    let owners: Vec<i64> = expiring.iter().map(|r| r.owner_id).collect();
    assert_eq!(owners, vec![2, 1]);
}
