//! NFSIG Database: SurrealDB connection management, migrations and the
//! signing certificate repository.

mod connection;
mod error;
pub mod repository;
mod schema;

pub use connection::{DbConfig, DbManager};
pub use error::DbError;
pub use repository::SurrealCertificateRepository;
pub use schema::{run_migrations, schema_v1};
