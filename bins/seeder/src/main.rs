//! Database seeder for Timebank development and testing.
//!
//! Seeds a demo license with two quarterly credits and a few expenditures,
//! one of which runs into debt before the second quarter is granted.
//!
//! Usage: cargo run --bin seeder

use chrono::NaiveDate;
use timebank_core::maintenance::{CreateTimeCreditInput, CreateTimeExpenditureInput};
use timebank_db::MaintenanceRepository;
use timebank_shared::AppConfig;
use timebank_shared::types::{Hours, LicenseId};
use uuid::Uuid;

/// Demo license ID (consistent for all seeds)
const DEMO_LICENSE_ID: &str = "00000000-0000-0000-0000-000000000001";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().expect("Failed to load configuration");

    println!("Connecting to database...");
    let db = timebank_db::connect_with_config(&config.database)
        .await
        .expect("Failed to connect to database");
    let repo = MaintenanceRepository::with_config(db, &config.maintenance);

    let license_id = demo_license_id();

    println!("Seeding demo license...");
    repo.register_license(license_id)
        .await
        .expect("Failed to register demo license");

    let ledger = repo
        .load_ledger(license_id)
        .await
        .expect("Failed to load demo license");
    if !ledger.credits().is_empty() || !ledger.expenditures().is_empty() {
        println!("  Demo license already has entries, skipping...");
        return;
    }

    println!("Seeding Q1 credit...");
    seed_credit(&repo, license_id, date(2024, 1, 1), date(2024, 3, 31), 5).await;

    println!("Seeding expenditures...");
    seed_expenditure(&repo, license_id, date(2024, 2, 1), 3, "Quarterly inspection").await;
    seed_expenditure(&repo, license_id, date(2024, 3, 15), 4, "Emergency repair").await;

    println!("Seeding Q2 credit...");
    seed_credit(&repo, license_id, date(2024, 4, 1), date(2024, 6, 30), 10).await;

    let balance = repo
        .calculate_maintenance_balance(license_id)
        .await
        .expect("Failed to calculate balance");
    println!(
        "  Balance: {} credited, {} spent, {} remaining",
        balance.total_credits, balance.total_expenditures, balance.current_balance
    );

    println!("Seeding complete! License: {license_id}");
}

fn demo_license_id() -> LicenseId {
    LicenseId::from_uuid(Uuid::parse_str(DEMO_LICENSE_ID).unwrap())
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

async fn seed_credit(
    repo: &MaintenanceRepository,
    license_id: LicenseId,
    start_date: NaiveDate,
    end_date: NaiveDate,
    hours: i64,
) {
    let credit = repo
        .create_credit(CreateTimeCreditInput {
            license_id,
            start_date,
            end_date,
            credit_hours: Hours::from_whole(hours),
        })
        .await
        .expect("Failed to seed credit");
    println!(
        "  Credit {} ({start_date} to {end_date}): {} remaining",
        credit.id, credit.remaining_hours
    );
}

async fn seed_expenditure(
    repo: &MaintenanceRepository,
    license_id: LicenseId,
    date: NaiveDate,
    hours: i64,
    description: &str,
) {
    let expenditure = repo
        .create_expenditure(CreateTimeExpenditureInput {
            license_id,
            date,
            hours_spent: Hours::from_whole(hours),
            description: Some(description.to_string()),
            task_type: Some("maintenance".to_string()),
        })
        .await
        .expect("Failed to seed expenditure");
    println!(
        "  Expenditure {} on {date}: {} spent, {} debt",
        expenditure.id, expenditure.hours_spent, expenditure.created_debt
    );
}
