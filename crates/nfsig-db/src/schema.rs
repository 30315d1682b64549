//! Schema definitions and migration runner for SurrealDB.
//!
//! Tables are SCHEMAFULL. Encrypted secrets are stored as base64 strings;
//! every field a revocation clears is an `option<>`.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
    #[allow(dead_code)]
    name: String,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "signing_certificate",
    sql: SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Schema v1: signing certificates
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
DEFINE TABLE signing_certificate SCHEMAFULL;
DEFINE FIELD owner_id ON TABLE signing_certificate TYPE int;
DEFINE FIELD encrypted_pfx ON TABLE signing_certificate \
    TYPE option<string>;
DEFINE FIELD encrypted_passphrase ON TABLE signing_certificate \
    TYPE option<string>;
DEFINE FIELD subject_tax_id ON TABLE signing_certificate \
    TYPE option<string>;
DEFINE FIELD subject_legal_name ON TABLE signing_certificate \
    TYPE option<string>;
DEFINE FIELD not_before ON TABLE signing_certificate \
    TYPE option<datetime>;
DEFINE FIELD not_after ON TABLE signing_certificate \
    TYPE option<datetime>;
DEFINE FIELD issuer_name ON TABLE signing_certificate \
    TYPE option<string>;
DEFINE FIELD serial_number ON TABLE signing_certificate \
    TYPE option<string>;
DEFINE FIELD fingerprint ON TABLE signing_certificate \
    TYPE option<string>;
DEFINE FIELD revoked_at ON TABLE signing_certificate \
    TYPE option<datetime>;
DEFINE FIELD created_at ON TABLE signing_certificate TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE signing_certificate TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_signing_certificate_owner ON TABLE signing_certificate \
    COLUMNS owner_id UNIQUE;
DEFINE INDEX idx_signing_certificate_not_after \
    ON TABLE signing_certificate COLUMNS not_after;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Run all pending migrations against the given SurrealDB client.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum.
/// All DEFINE statements are idempotent so re-running is safe.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    // Tracking table first; its DDL is idempotent.
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    // Highest applied version, 0 on a fresh database.
    let mut result = db
        .query("SELECT * FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS
        .iter()
        .filter(|m| m.version > current_version)
    {
        info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        db.query(migration.sql).await?.check().map_err(|e| {
            DbError::Migration(format!(
                "Migration v{} '{}' failed: {}",
                migration.version, migration.name, e,
            ))
        })?;

        db.query(
            "CREATE _migration SET version = $version, \
             name = $name",
        )
        .bind(("version", migration.version))
        .bind(("name", migration.name))
        .await?
        .check()
        .map_err(|e| {
            DbError::Migration(format!(
                "Failed to record migration v{}: {}",
                migration.version, e,
            ))
        })?;

        info!(
            version = migration.version,
            "Migration applied successfully"
        );
    }

    Ok(())
}

/// Returns the raw schema DDL for version 1.
///
/// Exposed for testing with in-memory SurrealDB instances that
/// bypass the migration runner.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_v1_defines_owner_uniqueness() {
        assert!(SCHEMA_V1.contains("DEFINE TABLE signing_certificate SCHEMAFULL"));
        assert!(SCHEMA_V1.contains("COLUMNS owner_id UNIQUE"));
    }

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(
                window[0].version < window[1].version,
                "Migrations must be in ascending version order"
            );
        }
    }
}
