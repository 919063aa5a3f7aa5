//! Shared types, errors, and configuration for Timebank.
//!
//! This crate provides common types used across all other crates:
//! - Hour quantities with decimal precision
//! - Typed IDs for type-safe entity references
//! - Application-wide error types
//! - Configuration management

pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, ReallocationPolicy};
pub use error::{AppError, AppResult};
pub use types::{DeductionId, Hours, LicenseId, TimeCreditId, TimeExpenditureId};
