//! SurrealDB implementation of [`CertificateRepository`].
//!
//! Records are keyed `signing_certificate:<owner_id>`, so an upload is a
//! single `UPSERT` and a concurrent reader sees the old or the new row.

use chrono::{DateTime, Utc};
use nfsig_core::error::NfsigResult;
use nfsig_core::models::certificate::{CertificateRecord, CertificateSlot, UpsertCertificate};
use nfsig_core::repository::CertificateRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::debug;

use crate::error::DbError;

const ENTITY: &str = "signing_certificate";

#[derive(Debug, SurrealValue)]
struct CertificateRow {
    owner_id: i64,
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
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CertificateRow {
    fn try_into_slot(self) -> Result<CertificateSlot, DbError> {
        if let Some(revoked_at) = self.revoked_at {
            return Ok(CertificateSlot::Revoked {
                owner_id: self.owner_id,
                revoked_at,
            });
        }
        self.try_into_record().map(CertificateSlot::Active)
    }

    fn try_into_record(self) -> Result<CertificateRecord, DbError> {
        let owner_id = self.owner_id;
        let missing = |field: &str| DbError::Corrupt {
            entity: ENTITY,
            id: owner_id.to_string(),
            reason: format!("active record without {field}"),
        };
        Ok(CertificateRecord {
            owner_id,
            encrypted_pfx: self.encrypted_pfx.ok_or_else(|| missing("encrypted_pfx"))?,
            encrypted_passphrase: self
                .encrypted_passphrase
                .ok_or_else(|| missing("encrypted_passphrase"))?,
            subject_tax_id: self.subject_tax_id.unwrap_or_default(),
            subject_legal_name: self.subject_legal_name.unwrap_or_default(),
            not_before: self.not_before.ok_or_else(|| missing("not_before"))?,
            not_after: self.not_after.ok_or_else(|| missing("not_after"))?,
            issuer_name: self.issuer_name.unwrap_or_default(),
            serial_number: self.serial_number.unwrap_or_default(),
            fingerprint: self.fingerprint.unwrap_or_default(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SurrealDB implementation of the certificate repository.
#[derive(Clone)]
pub struct SurrealCertificateRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealCertificateRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> CertificateRepository for SurrealCertificateRepository<C> {
    async fn upsert(&self, input: UpsertCertificate) -> NfsigResult<CertificateRecord> {
        let owner_id = input.owner_id;

        let result = self
            .db
            .query(
                "UPSERT type::record('signing_certificate', $owner_id) SET \
                 owner_id = $owner_id, \
                 encrypted_pfx = $encrypted_pfx, \
                 encrypted_passphrase = $encrypted_passphrase, \
                 subject_tax_id = $subject_tax_id, \
                 subject_legal_name = $subject_legal_name, \
                 not_before = $not_before, \
                 not_after = $not_after, \
                 issuer_name = $issuer_name, \
                 serial_number = $serial_number, \
                 fingerprint = $fingerprint, \
                 revoked_at = NONE, \
                 created_at = time::now(), \
                 updated_at = time::now()",
            )
            .bind(("owner_id", owner_id))
            .bind(("encrypted_pfx", input.encrypted_pfx))
            .bind(("encrypted_passphrase", input.encrypted_passphrase))
            .bind(("subject_tax_id", input.subject_tax_id))
            .bind(("subject_legal_name", input.subject_legal_name))
            .bind(("not_before", input.not_before))
            .bind(("not_after", input.not_after))
            .bind(("issuer_name", input.issuer_name))
            .bind(("serial_number", input.serial_number))
            .bind(("fingerprint", input.fingerprint))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<CertificateRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: ENTITY.into(),
            id: owner_id.to_string(),
        })?;

        debug!(owner_id, "signing certificate stored");
        Ok(row.try_into_record()?)
    }

    async fn find_by_owner(&self, owner_id: i64) -> NfsigResult<Option<CertificateSlot>> {
        let mut result = self
            .db
            .query("SELECT * FROM type::record('signing_certificate', $owner_id)")
            .bind(("owner_id", owner_id))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CertificateRow> = result.take(0).map_err(DbError::from)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(row.try_into_slot()?)),
            None => Ok(None),
        }
    }

    async fn revoke(&self, owner_id: i64) -> NfsigResult<()> {
        let result = self
            .db
            .query(
                "UPDATE type::record('signing_certificate', $owner_id) SET \
                 encrypted_pfx = NONE, \
                 encrypted_passphrase = NONE, \
                 subject_tax_id = NONE, \
                 subject_legal_name = NONE, \
                 not_before = NONE, \
                 not_after = NONE, \
                 issuer_name = NONE, \
                 serial_number = NONE, \
                 fingerprint = NONE, \
                 revoked_at = time::now(), \
                 updated_at = time::now() \
                 WHERE revoked_at = NONE",
            )
            .bind(("owner_id", owner_id))
            .await
            .map_err(DbError::from)?;

        result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        debug!(owner_id, "signing certificate revoked");
        Ok(())
    }

    async fn list_expiring(&self, before: DateTime<Utc>) -> NfsigResult<Vec<CertificateRecord>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM signing_certificate \
                 WHERE revoked_at = NONE \
                 AND not_after != NONE \
                 AND not_after <= $before \
                 ORDER BY not_after ASC",
            )
            .bind(("before", before))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CertificateRow> = result.take(0).map_err(DbError::from)?;
        let records = rows
            .into_iter()
            .map(CertificateRow::try_into_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}
