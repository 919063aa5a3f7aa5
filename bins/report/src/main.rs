//! Timebank settlement report.
//!
//! Prints the balance and the interim settlement chain of one license as
//! JSON.
//!
//! Usage: report <license-id>

use anyhow::Context;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use timebank_core::maintenance::{MaintenanceBalance, Settlement};
use timebank_db::MaintenanceRepository;
use timebank_db::connect_with_config;
use timebank_shared::AppConfig;
use timebank_shared::types::LicenseId;

#[derive(Serialize)]
struct Report<'a> {
    license_id: LicenseId,
    balance: MaintenanceBalance,
    settlements: &'a [Settlement],
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "timebank=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let license_id: LicenseId = std::env::args()
        .nth(1)
        .context("usage: report <license-id>")?
        .parse()
        .context("license id must be a UUID")?;

    let config = AppConfig::load().context("failed to load configuration")?;
    let db = connect_with_config(&config.database).await?;
    info!("Connected to database");

    let repo = MaintenanceRepository::with_config(db, &config.maintenance);
    let balance = repo.calculate_maintenance_balance(license_id).await?;
    let settlements = repo.calculate_interim_settlements(license_id).await?;
    info!(
        %license_id,
        periods = settlements.len(),
        "Calculated interim settlements"
    );

    let report = Report {
        license_id,
        balance,
        settlements: settlements.as_slice(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
