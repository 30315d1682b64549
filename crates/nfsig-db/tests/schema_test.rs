//! Integration tests for schema initialization using in-memory SurrealDB.

use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};

async fn migrated() -> Surreal<Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    nfsig_db::run_migrations(&db).await.unwrap();
    db
}

#[tokio::test]
async fn schema_migration_applies_successfully() {
    let db = migrated().await;

    let mut result = db.query("INFO FOR DB").await.unwrap();
    let info: Option<surrealdb_types::Value> = result.take(0).unwrap();
    let info = info.expect("INFO FOR DB should return a value");
    let info_str = format!("{:?}", info);

    assert!(
        info_str.contains("signing_certificate"),
        "missing signing_certificate table"
    );
    assert!(info_str.contains("_migration"), "missing _migration table");
}

#[tokio::test]
async fn migration_is_idempotent() {
    let db = migrated().await;
    nfsig_db::run_migrations(&db).await.unwrap();

    let mut result = db.query("SELECT * FROM _migration").await.unwrap();
    let records: Vec<surrealdb_types::Value> = result.take(0).unwrap();
    assert_eq!(records.len(), 1, "expected exactly one migration record");
}

#[tokio::test]
async fn unique_index_prevents_two_rows_per_owner() {
    let db = migrated().await;

    db.query("CREATE signing_certificate SET owner_id = 7")
        .await
        .unwrap()
        .check()
        .unwrap();

    let result = db
        .query("CREATE signing_certificate SET owner_id = 7")
        .await
        .unwrap()
        .check();

    assert!(result.is_err(), "second row for the same owner should be rejected");
}

#[tokio::test]
async fn schemafull_table_rejects_wrong_types() {
    let db = migrated().await;

    let result = db
        .query("CREATE signing_certificate SET owner_id = 'not-a-number'")
        .await
        .unwrap()
        .check();

    assert!(result.is_err(), "owner_id must be an int");
}
