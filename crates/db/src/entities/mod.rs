//! `SeaORM` entities for the maintenance ledger tables.

pub mod prelude;

pub mod licenses;
pub mod time_credits;
pub mod time_deductions;
pub mod time_expenditures;
