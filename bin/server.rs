// Parcel Intake - Web Server
// REST API with Axum

use anyhow::{Context, Result};
use parcel_intake::api::{self, AppState};
use parcel_intake::config::{self, IntakeConfig};
use parcel_intake::{open_database, LocalDriveStorage, RuleEngine};
use std::sync::{Arc, Mutex};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // .env may carry RUST_LOG, so load it before tracing starts
    let cfg = IntakeConfig::from_env().context("Failed to load configuration")?;
    config::init_tracing();
    cfg.log_loaded();

    let conn = open_database(&cfg.db_path)
        .with_context(|| format!("Failed to open database {}", cfg.db_path.display()))?;
    let rules = RuleEngine::standard().context("Failed to compile courier rules")?;

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        storage: Arc::new(LocalDriveStorage::new(&cfg.drive_dir)),
        rules: Arc::new(rules),
        auth: Arc::new(cfg.build_authenticator()),
        folder_id: Arc::from(cfg.folder_id.as_str()),
    };

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(cfg.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", cfg.bind))?;

    info!(
        addr = %cfg.bind,
        version = parcel_intake::VERSION,
        drive = %cfg.drive_dir.display(),
        "🚀 intake server running"
    );

    axum::serve(listener, app).await.context("Server stopped")?;

    Ok(())
}
