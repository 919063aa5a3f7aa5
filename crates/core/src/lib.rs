//! Core business logic for Timebank.
//!
//! This crate contains pure business logic with ZERO web or database dependencies.
//! All domain types, invariants and calculations of the maintenance ledger live here.
//!
//! # Modules
//!
//! - `maintenance` - Time-credit allocation, debt tracking and settlements

pub mod maintenance;
