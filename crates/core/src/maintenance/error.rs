//! Maintenance ledger error types.
//!
//! Validation errors reject a write outright. Invariant violations are
//! fatal: the enclosing database transaction must be rolled back.

use chrono::NaiveDate;
use thiserror::Error;
use timebank_shared::AppError;
use timebank_shared::types::{Hours, LicenseId, TimeCreditId, TimeExpenditureId};

/// Errors that can occur during maintenance ledger operations.
#[derive(Debug, Error)]
pub enum MaintenanceError {
    // ========== Validation Errors ==========
    /// Credit or expenditure hours must be positive.
    #[error("Hours must be positive, got {0}")]
    InvalidAmount(Hours),

    /// Credit validity window ends before it starts.
    #[error("Credit window is inverted: {start} is after {end}")]
    InvalidDateRange {
        /// Requested first day.
        start: NaiveDate,
        /// Requested last day.
        end: NaiveDate,
    },

    // ========== Not Found Errors ==========
    /// License not found.
    #[error("License not found: {0}")]
    LicenseNotFound(LicenseId),

    /// Time credit not found.
    #[error("Time credit not found: {0}")]
    CreditNotFound(TimeCreditId),

    /// Time expenditure not found.
    #[error("Time expenditure not found: {0}")]
    ExpenditureNotFound(TimeExpenditureId),

    // ========== Invariant Errors ==========
    /// A deduction would link rows of two different licenses.
    #[error("Credit {credit_id} and expenditure {expenditure_id} belong to different licenses")]
    CrossLicenseReference {
        /// The credit side of the edge.
        credit_id: TimeCreditId,
        /// The expenditure side of the edge.
        expenditure_id: TimeExpenditureId,
    },

    /// A row was loaded into the ledger of another license.
    #[error("Row belongs to license {actual}, expected {expected}")]
    LicenseMismatch {
        /// The license of the ledger.
        expected: LicenseId,
        /// The license of the offending row.
        actual: LicenseId,
    },

    /// An accounting invariant does not hold.
    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),

    // ========== Concurrency Errors ==========
    /// A counter changed between read and write.
    #[error("Concurrent modification detected, please retry")]
    ConcurrentModification,

    // ========== Internal Errors ==========
    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MaintenanceError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::InvalidDateRange { .. } => "INVALID_DATE_RANGE",
            Self::LicenseNotFound(_) => "LICENSE_NOT_FOUND",
            Self::CreditNotFound(_) => "CREDIT_NOT_FOUND",
            Self::ExpenditureNotFound(_) => "EXPENDITURE_NOT_FOUND",
            Self::CrossLicenseReference { .. } => "CROSS_LICENSE_REFERENCE",
            Self::LicenseMismatch { .. } => "LICENSE_MISMATCH",
            Self::InvariantViolation(_) => "INVARIANT_VIOLATION",
            Self::ConcurrentModification => "CONCURRENT_MODIFICATION",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - validation errors
            Self::InvalidAmount(_) | Self::InvalidDateRange { .. } => 400,

            // 404 Not Found
            Self::LicenseNotFound(_) | Self::CreditNotFound(_) | Self::ExpenditureNotFound(_) => {
                404
            }

            // 409 Conflict - concurrency errors
            Self::ConcurrentModification => 409,

            // 500 Internal Server Error
            Self::CrossLicenseReference { .. }
            | Self::LicenseMismatch { .. }
            | Self::InvariantViolation(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification)
    }

    /// Returns true if the ledger is inconsistent and the operation must abort.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CrossLicenseReference { .. }
                | Self::LicenseMismatch { .. }
                | Self::InvariantViolation(_)
        )
    }
}

impl From<MaintenanceError> for AppError {
    fn from(err: MaintenanceError) -> Self {
        let message = err.to_string();
        match err {
            MaintenanceError::InvalidAmount(_) | MaintenanceError::InvalidDateRange { .. } => {
                Self::Validation(message)
            }
            MaintenanceError::LicenseNotFound(_)
            | MaintenanceError::CreditNotFound(_)
            | MaintenanceError::ExpenditureNotFound(_) => Self::NotFound(message),
            MaintenanceError::ConcurrentModification => Self::Conflict(message),
            MaintenanceError::CrossLicenseReference { .. }
            | MaintenanceError::LicenseMismatch { .. }
            | MaintenanceError::InvariantViolation(_) => Self::InvariantViolation(message),
            MaintenanceError::Internal(_) => Self::Internal(message),
        }
    }
}
