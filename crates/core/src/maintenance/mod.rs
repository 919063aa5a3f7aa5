//! Maintenance time-credit ledger.
//!
//! This module implements the hour accounting of support licenses:
//! - Credits, expenditures and the deductions linking them
//! - The per-license ledger aggregate and its invariants
//! - FIFO allocation, debt backfill and reversal
//! - Settlement periods and the lifetime balance
//! - Settlement result caching

pub mod allocation;
pub mod cache;
pub mod error;
pub mod ledger;
pub mod settlement;
pub mod types;


#[cfg(test)]
mod allocation_props;
#[cfg(test)]
mod settlement_props;

pub use allocation::AllocationEngine;
pub use cache::SettlementCache;
pub use error::MaintenanceError;
pub use ledger::{LedgerChanges, LicenseLedger};
pub use settlement::{
    CreditSettlement, DebtOnlySettlement, Settlement, SettlementCalculator, SettlementFigures,
    SettlementLine,
};
pub use types::{
    CoverageState, CreateTimeCreditInput, CreateTimeExpenditureInput, Deduction,
    MaintenanceBalance, TimeCredit, TimeExpenditure,
};
