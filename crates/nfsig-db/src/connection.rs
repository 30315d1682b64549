//! Connection to the SurrealDB instance holding the certificate store.

use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tracing::info;

use crate::error::DbError;
use crate::repository::SurrealCertificateRepository;

/// Where the certificate store lives and how to sign in to it.
///
/// Read from `NFSIG_DB_URL`, `NFSIG_DB_NAMESPACE`, `NFSIG_DB_DATABASE`,
/// `NFSIG_DB_USER` and `NFSIG_DB_PASSWORD`; unset variables keep the
/// local development defaults.
#[derive(Clone)]
pub struct DbConfig {
    /// `host:port` of the WebSocket endpoint.
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "127.0.0.1:8000".into(),
            namespace: "nfsig".into(),
            database: "main".into(),
            username: "root".into(),
            password: "root".into(),
        }
    }
}

impl DbConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            url: lookup("NFSIG_DB_URL").unwrap_or(defaults.url),
            namespace: lookup("NFSIG_DB_NAMESPACE").unwrap_or(defaults.namespace),
            database: lookup("NFSIG_DB_DATABASE").unwrap_or(defaults.database),
            username: lookup("NFSIG_DB_USER").unwrap_or(defaults.username),
            password: lookup("NFSIG_DB_PASSWORD").unwrap_or(defaults.password),
        }
    }
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("url", &self.url)
            .field("namespace", &self.namespace)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// An authenticated session on the certificate store.
#[derive(Clone)]
pub struct DbManager {
    db: Surreal<Client>,
}

impl DbManager {
    /// Sign in as root and select the configured namespace and database.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            url = %config.url,
            namespace = %config.namespace,
            database = %config.database,
            "Opening certificate store"
        );

        let db = Surreal::new::<Ws>(&config.url).await?;
        db.signin(Root {
            username: config.username.clone(),
            password: config.password.clone(),
        })
        .await?;
        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;

        info!("Certificate store ready");
        Ok(Self { db })
    }

    pub fn client(&self) -> &Surreal<Client> {
        &self.db
    }

    /// Certificate repository sharing this session.
    pub fn certificates(&self) -> SurrealCertificateRepository<Client> {
        SurrealCertificateRepository::new(self.db.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("NFSIG_DB_URL", "db.internal:8000"),
            ("NFSIG_DB_PASSWORD", "s3cret"),
        ]);
        let config = DbConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.url, "db.internal:8000");
        assert_eq!(config.password, "s3cret");
        assert_eq!(config.namespace, "nfsig");
        assert_eq!(config.database, "main");
    }

    #[test]
    fn debug_hides_password() {
        let config = DbConfig {
            password: "s3cret".into(),
            ..DbConfig::default()
        };
        assert!(!format!("{config:?}").contains("s3cret"));
    }
}
