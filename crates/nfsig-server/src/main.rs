//! NFSIG Server: configuration, logging, database bootstrap and the
//! certificate expiry report.

use nfsig_core::error::NfsigError;
use nfsig_core::models::certificate::CertificateState;
use nfsig_core::repository::CertificateRepository;
use nfsig_db::{DbConfig, DbManager};
use nfsig_service::{CertificateService, SigningConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), NfsigError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nfsig=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .init();

    info!("Starting NFSIG signing engine");

    let signing = SigningConfig::from_env()?;
    let db_config = DbConfig::from_env();
    info!(?signing, ?db_config, "Configuration loaded");

    let db = DbManager::connect(&db_config).await?;
    nfsig_db::run_migrations(db.client()).await?;

    let service = CertificateService::new(db.certificates(), signing)?;

    report_expiring(&service).await?;

    info!("NFSIG ready; waiting for shutdown signal");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }

    info!("NFSIG stopped");
    Ok(())
}

/// Log every active certificate inside the expiring window.
async fn report_expiring<R: CertificateRepository>(
    service: &CertificateService<R>,
) -> Result<(), NfsigError> {
    let window = service.config().expiring_threshold_days;
    let expiring = service.list_expiring(window).await?;
    for status in &expiring {
        match status.state {
            CertificateState::Expired => warn!(
                owner_id = status.owner_id,
                not_after = ?status.not_after,
                "Signing certificate has expired"
            ),
            _ => warn!(
                owner_id = status.owner_id,
                days_remaining = ?status.days_remaining,
                "Signing certificate expires soon"
            ),
        }
    }
    info!(count = expiring.len(), window_days = window, "Expiry report complete");
    Ok(())
}
