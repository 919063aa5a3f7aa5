//! Maintenance ledger domain types.
//!
//! A license owns a pool of time credits (granted hours valid over a date
//! window) and time expenditures (logged support effort). Deductions are the
//! weighted edges between the two: the audit record of how many hours of one
//! credit paid for one expenditure.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use timebank_shared::types::{DeductionId, Hours, LicenseId, TimeCreditId, TimeExpenditureId};

use super::error::MaintenanceError;

/// A grant of support hours valid over a date window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeCredit {
    /// The credit ID.
    pub id: TimeCreditId,
    /// The license this credit belongs to.
    pub license_id: LicenseId,
    /// First day the credit is valid.
    pub start_date: NaiveDate,
    /// Last day the credit is valid (inclusive).
    pub end_date: NaiveDate,
    /// The original grant. Never changes after creation.
    pub credit_hours: Hours,
    /// Hours not yet consumed by deductions.
    pub remaining_hours: Hours,
    /// When the credit was created.
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency version of the persisted row.
    pub version: i64,
}

impl TimeCredit {
    /// Creates a validated, unconsumed credit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` if `credit_hours <= 0` and `InvalidDateRange`
    /// if the window ends before it starts.
    pub fn new(input: CreateTimeCreditInput) -> Result<Self, MaintenanceError> {
        if !input.credit_hours.is_positive() {
            return Err(MaintenanceError::InvalidAmount(input.credit_hours));
        }
        if input.start_date > input.end_date {
            return Err(MaintenanceError::InvalidDateRange {
                start: input.start_date,
                end: input.end_date,
            });
        }

        Ok(Self {
            id: TimeCreditId::new(),
            license_id: input.license_id,
            start_date: input.start_date,
            end_date: input.end_date,
            credit_hours: input.credit_hours,
            remaining_hours: input.credit_hours,
            created_at: Utc::now(),
            version: 0,
        })
    }

    /// Hours already handed out to expenditures.
    #[must_use]
    pub fn consumed_hours(&self) -> Hours {
        self.credit_hours - self.remaining_hours
    }

    /// Returns true if `date` lies inside the validity window.
    #[must_use]
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    /// Returns true if the credit can still pay for work done on `date`.
    ///
    /// Only the end of the window matters: a credit granted late may pay
    /// for earlier work, but never for work after it expired.
    #[must_use]
    pub fn can_pay_for(&self, date: NaiveDate) -> bool {
        self.end_date >= date && self.remaining_hours.is_positive()
    }

    /// Sort key for oldest-validity-window-first consumption.
    #[must_use]
    pub fn allocation_key(&self) -> (NaiveDate, NaiveDate, TimeCreditId) {
        (self.start_date, self.end_date, self.id)
    }
}

/// A logged support activity consuming hours against a license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeExpenditure {
    /// The expenditure ID.
    pub id: TimeExpenditureId,
    /// The license this expenditure belongs to.
    pub license_id: LicenseId,
    /// Day the work was done.
    pub date: NaiveDate,
    /// Hours logged. Immutable after creation.
    pub hours_spent: Hours,
    /// Hours not covered by any credit.
    pub created_debt: Hours,
    /// Activity description shown on invoices.
    pub description: Option<String>,
    /// Task type shown on invoices.
    pub task_type: Option<String>,
    /// When the expenditure was logged.
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency version of the persisted row.
    pub version: i64,
}

impl TimeExpenditure {
    /// Creates a validated, not yet allocated expenditure.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` if `hours_spent <= 0`.
    pub fn new(input: CreateTimeExpenditureInput) -> Result<Self, MaintenanceError> {
        if !input.hours_spent.is_positive() {
            return Err(MaintenanceError::InvalidAmount(input.hours_spent));
        }

        Ok(Self {
            id: TimeExpenditureId::new(),
            license_id: input.license_id,
            date: input.date,
            hours_spent: input.hours_spent,
            created_debt: Hours::ZERO,
            description: input.description,
            task_type: input.task_type,
            created_at: Utc::now(),
            version: 0,
        })
    }

    /// Sort key for oldest-debt-first backfilling.
    #[must_use]
    pub fn backfill_key(&self) -> (NaiveDate, TimeExpenditureId) {
        (self.date, self.id)
    }
}

/// Hours taken from one credit to cover one expenditure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    /// The deduction ID.
    pub id: DeductionId,
    /// The credit the hours were taken from.
    pub credit_id: TimeCreditId,
    /// The expenditure the hours paid for.
    pub expenditure_id: TimeExpenditureId,
    /// Hours moved along this edge (always positive).
    pub hours_deducted: Hours,
    /// When the deduction was recorded.
    pub created_at: DateTime<Utc>,
}

/// Input for granting a new time credit.
#[derive(Debug, Clone)]
pub struct CreateTimeCreditInput {
    /// The license receiving the credit.
    pub license_id: LicenseId,
    /// First day of validity.
    pub start_date: NaiveDate,
    /// Last day of validity (inclusive).
    pub end_date: NaiveDate,
    /// Granted hours (must be positive).
    pub credit_hours: Hours,
}

/// Input for logging a new time expenditure.
#[derive(Debug, Clone)]
pub struct CreateTimeExpenditureInput {
    /// The license the work was done for.
    pub license_id: LicenseId,
    /// Day the work was done.
    pub date: NaiveDate,
    /// Hours spent (must be positive).
    pub hours_spent: Hours,
    /// Optional activity description.
    pub description: Option<String>,
    /// Optional task type.
    pub task_type: Option<String>,
}

/// How much of an expenditure is paid for by credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageState {
    /// Logged but not yet run through allocation.
    Unallocated,
    /// Some hours covered by credits, the rest is debt.
    PartiallyCovered,
    /// Every hour covered by credits.
    FullyCovered,
    /// No credit covers any hour.
    FullyDebt,
}

impl CoverageState {
    /// Derives the state from the covered hours and the recorded debt.
    #[must_use]
    pub fn from_amounts(covered: Hours, debt: Hours) -> Self {
        match (covered.is_positive(), debt.is_positive()) {
            (false, false) => Self::Unallocated,
            (true, true) => Self::PartiallyCovered,
            (true, false) => Self::FullyCovered,
            (false, true) => Self::FullyDebt,
        }
    }
}

/// Lifetime aggregate of a license's hours.
///
/// Ignores per-period forfeiture, so it is not the same figure as the
/// final settlement balance once any credit expired unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceBalance {
    /// Sum of all granted hours.
    pub total_credits: Hours,
    /// Sum of all logged hours.
    pub total_expenditures: Hours,
    /// `total_credits - total_expenditures`.
    pub current_balance: Hours,
}
