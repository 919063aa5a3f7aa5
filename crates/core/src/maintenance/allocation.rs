//! Allocation engine keeping the ledger invariants after every mutation.
//!
//! Consumption is FIFO by validity window: an expenditure draws from the
//! credit whose window started first, ties broken by end date and then id so
//! the outcome never depends on row order. Late credits pay off existing
//! debt oldest first.

use std::collections::BTreeMap;

use timebank_shared::config::ReallocationPolicy;
use timebank_shared::types::{Hours, TimeCreditId, TimeExpenditureId};
use tracing::debug;

use super::error::MaintenanceError;
use super::ledger::{LedgerChanges, LicenseLedger};
use super::types::{
    CreateTimeCreditInput, CreateTimeExpenditureInput, TimeCredit, TimeExpenditure,
};

/// Stateless engine operating on a [`LicenseLedger`].
///
/// Every public operation either succeeds and bumps the ledger version once,
/// or fails. A failed operation may leave the in-memory ledger half-applied;
/// callers discard it together with the enclosing database transaction.
pub struct AllocationEngine;

impl AllocationEngine {
    /// Logs a new expenditure and allocates it against the license's credits.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` for non-positive hours, `LicenseMismatch` if
    /// the input targets another license.
    pub fn record_expenditure(
        ledger: &mut LicenseLedger,
        input: CreateTimeExpenditureInput,
    ) -> Result<(TimeExpenditureId, LedgerChanges), MaintenanceError> {
        let expenditure = TimeExpenditure::new(input)?;
        let id = expenditure.id;
        ledger.push_expenditure(expenditure)?;

        let mut changes = LedgerChanges::default();
        changes.expenditures_created.insert(id);
        changes.merge(Self::allocate(ledger, id)?);

        Ok((id, Self::finish(ledger, changes)))
    }

    /// Grants a new credit and backfills existing debt with it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount`/`InvalidDateRange` for invalid input,
    /// `LicenseMismatch` if the input targets another license.
    pub fn record_credit(
        ledger: &mut LicenseLedger,
        input: CreateTimeCreditInput,
    ) -> Result<(TimeCreditId, LedgerChanges), MaintenanceError> {
        let credit = TimeCredit::new(input)?;
        let id = credit.id;
        ledger.push_credit(credit)?;

        let mut changes = LedgerChanges::default();
        changes.credits_created.insert(id);
        changes.merge(Self::backfill(ledger, id)?);

        Ok((id, Self::finish(ledger, changes)))
    }

    /// Allocates the unaccounted hours of an expenditure.
    ///
    /// Eligible credits end on or after the expenditure date and still have
    /// hours left; they are consumed oldest window first. Whatever no credit
    /// covers becomes `created_debt`. Calling it again on an allocated
    /// expenditure does nothing.
    ///
    /// # Errors
    ///
    /// Returns `ExpenditureNotFound`, `InvalidAmount` for non-positive hours,
    /// or a fatal invariant error.
    pub fn allocate_expenditure(
        ledger: &mut LicenseLedger,
        expenditure_id: TimeExpenditureId,
    ) -> Result<LedgerChanges, MaintenanceError> {
        let changes = Self::allocate(ledger, expenditure_id)?;
        Ok(Self::finish(ledger, changes))
    }

    /// Pays off existing debt with a newly added credit, oldest debt first.
    ///
    /// Only expenditures dated on or before the credit's end date qualify.
    /// Idempotent: once the credit or the debt is exhausted nothing moves.
    ///
    /// # Errors
    ///
    /// Returns `CreditNotFound`, `InvalidAmount` for non-positive hours,
    /// or a fatal invariant error.
    pub fn backfill_credit(
        ledger: &mut LicenseLedger,
        credit_id: TimeCreditId,
    ) -> Result<LedgerChanges, MaintenanceError> {
        let changes = Self::backfill(ledger, credit_id)?;
        Ok(Self::finish(ledger, changes))
    }

    /// Turns a credit's deductions back into debt and removes the credit.
    ///
    /// No re-allocation against the remaining credits takes place.
    ///
    /// # Errors
    ///
    /// Returns `CreditNotFound` or a fatal invariant error.
    pub fn reverse_credit(
        ledger: &mut LicenseLedger,
        credit_id: TimeCreditId,
    ) -> Result<(TimeCredit, LedgerChanges), MaintenanceError> {
        let (credit, changes) = Self::reverse_credit_inner(ledger, credit_id)?;
        Ok((credit, Self::finish(ledger, changes)))
    }

    /// Gives an expenditure's hours back to the credits it drew from and
    /// removes the expenditure.
    ///
    /// # Errors
    ///
    /// Returns `ExpenditureNotFound` or a fatal invariant error.
    pub fn reverse_expenditure(
        ledger: &mut LicenseLedger,
        expenditure_id: TimeExpenditureId,
    ) -> Result<(TimeExpenditure, LedgerChanges), MaintenanceError> {
        let (expenditure, changes) = Self::reverse_expenditure_inner(ledger, expenditure_id)?;
        Ok((expenditure, Self::finish(ledger, changes)))
    }

    /// Deletes a credit according to the configured policy.
    ///
    /// # Errors
    ///
    /// See [`Self::reverse_credit`] and [`Self::replay`].
    pub fn delete_credit(
        ledger: &mut LicenseLedger,
        credit_id: TimeCreditId,
        policy: ReallocationPolicy,
    ) -> Result<(TimeCredit, LedgerChanges), MaintenanceError> {
        let (credit, mut changes) = Self::reverse_credit_inner(ledger, credit_id)?;
        if policy == ReallocationPolicy::Replay {
            changes.merge(Self::replay_inner(ledger)?);
        }
        Ok((credit, Self::finish(ledger, changes)))
    }

    /// Deletes an expenditure according to the configured policy.
    ///
    /// # Errors
    ///
    /// See [`Self::reverse_expenditure`] and [`Self::replay`].
    pub fn delete_expenditure(
        ledger: &mut LicenseLedger,
        expenditure_id: TimeExpenditureId,
        policy: ReallocationPolicy,
    ) -> Result<(TimeExpenditure, LedgerChanges), MaintenanceError> {
        let (expenditure, mut changes) = Self::reverse_expenditure_inner(ledger, expenditure_id)?;
        if policy == ReallocationPolicy::Replay {
            changes.merge(Self::replay_inner(ledger)?);
        }
        Ok((expenditure, Self::finish(ledger, changes)))
    }

    /// Rebuilds every deduction of the license from scratch.
    ///
    /// All deductions are dropped, credits are refilled and every expenditure
    /// is allocated again in `(date, id)` order. The result is true FIFO
    /// consistency at the cost of new deduction ids and timestamps.
    ///
    /// # Errors
    ///
    /// Returns a fatal invariant error if the ledger is structurally broken.
    pub fn replay(ledger: &mut LicenseLedger) -> Result<LedgerChanges, MaintenanceError> {
        let changes = Self::replay_inner(ledger)?;
        Ok(Self::finish(ledger, changes))
    }

    fn finish(ledger: &mut LicenseLedger, changes: LedgerChanges) -> LedgerChanges {
        if !changes.is_empty() {
            ledger.bump_version();
        }
        changes
    }

    fn allocate(
        ledger: &mut LicenseLedger,
        expenditure_id: TimeExpenditureId,
    ) -> Result<LedgerChanges, MaintenanceError> {
        let expenditure = ledger
            .expenditure(expenditure_id)
            .ok_or(MaintenanceError::ExpenditureNotFound(expenditure_id))?;
        if !expenditure.hours_spent.is_positive() {
            return Err(MaintenanceError::InvalidAmount(expenditure.hours_spent));
        }

        let date = expenditure.date;
        let mut owed = expenditure.hours_spent
            - expenditure.created_debt
            - ledger.covered_hours(expenditure_id);
        if owed.is_negative() {
            return Err(MaintenanceError::InvariantViolation(format!(
                "expenditure {expenditure_id} is over-covered by {}",
                -owed
            )));
        }

        let candidates: Vec<TimeCreditId> = ledger
            .credits_in_allocation_order()
            .into_iter()
            .filter(|c| c.can_pay_for(date))
            .map(|c| c.id)
            .collect();

        let mut changes = LedgerChanges::default();
        let mut covered = Hours::ZERO;

        for credit_id in candidates {
            if !owed.is_positive() {
                break;
            }
            let remaining = ledger
                .credit(credit_id)
                .map_or(Hours::ZERO, |c| c.remaining_hours);
            let amount = remaining.min(owed);
            if !amount.is_positive() {
                continue;
            }

            let deduction_id = ledger.push_deduction(credit_id, expenditure_id, amount)?;
            ledger.credit_mut(credit_id)?.remaining_hours -= amount;
            owed -= amount;
            covered += amount;

            changes.deductions_created.push(deduction_id);
            changes.credits_updated.insert(credit_id);
        }

        if owed.is_positive() {
            ledger.expenditure_mut(expenditure_id)?.created_debt += owed;
            changes.expenditures_updated.insert(expenditure_id);
        }

        debug!(
            license_id = %ledger.license_id(),
            expenditure_id = %expenditure_id,
            covered = %covered,
            debt = %owed.max_zero(),
            "Allocated time expenditure"
        );

        Ok(changes)
    }

    fn backfill(
        ledger: &mut LicenseLedger,
        credit_id: TimeCreditId,
    ) -> Result<LedgerChanges, MaintenanceError> {
        let credit = ledger
            .credit(credit_id)
            .ok_or(MaintenanceError::CreditNotFound(credit_id))?;
        if !credit.credit_hours.is_positive() {
            return Err(MaintenanceError::InvalidAmount(credit.credit_hours));
        }

        let end_date = credit.end_date;
        let candidates: Vec<TimeExpenditureId> = ledger
            .expenditures_in_date_order()
            .into_iter()
            .filter(|e| e.created_debt.is_positive() && e.date <= end_date)
            .map(|e| e.id)
            .collect();

        let mut changes = LedgerChanges::default();
        let mut repaid = Hours::ZERO;

        for expenditure_id in candidates {
            let remaining = ledger.credit_mut(credit_id)?.remaining_hours;
            if !remaining.is_positive() {
                break;
            }
            let debt = ledger.expenditure_mut(expenditure_id)?.created_debt;
            let amount = remaining.min(debt);
            if !amount.is_positive() {
                continue;
            }

            let deduction_id = ledger.push_deduction(credit_id, expenditure_id, amount)?;
            ledger.credit_mut(credit_id)?.remaining_hours -= amount;
            ledger.expenditure_mut(expenditure_id)?.created_debt -= amount;
            repaid += amount;

            changes.deductions_created.push(deduction_id);
            changes.credits_updated.insert(credit_id);
            changes.expenditures_updated.insert(expenditure_id);
        }

        debug!(
            license_id = %ledger.license_id(),
            credit_id = %credit_id,
            repaid = %repaid,
            "Backfilled debt with time credit"
        );

        Ok(changes)
    }

    fn reverse_credit_inner(
        ledger: &mut LicenseLedger,
        credit_id: TimeCreditId,
    ) -> Result<(TimeCredit, LedgerChanges), MaintenanceError> {
        if ledger.credit(credit_id).is_none() {
            return Err(MaintenanceError::CreditNotFound(credit_id));
        }

        let mut changes = LedgerChanges::default();
        let mut restored_debt = Hours::ZERO;

        for deduction in ledger.take_deductions(|d| d.credit_id == credit_id) {
            ledger
                .expenditure_mut(deduction.expenditure_id)?
                .created_debt += deduction.hours_deducted;
            restored_debt += deduction.hours_deducted;

            changes.expenditures_updated.insert(deduction.expenditure_id);
            changes.deductions_deleted.push(deduction.id);
        }

        let credit = ledger.remove_credit(credit_id)?;
        changes.credits_deleted.insert(credit_id);

        debug!(
            license_id = %ledger.license_id(),
            credit_id = %credit_id,
            restored_debt = %restored_debt,
            "Reversed time credit"
        );

        Ok((credit, changes))
    }

    fn reverse_expenditure_inner(
        ledger: &mut LicenseLedger,
        expenditure_id: TimeExpenditureId,
    ) -> Result<(TimeExpenditure, LedgerChanges), MaintenanceError> {
        if ledger.expenditure(expenditure_id).is_none() {
            return Err(MaintenanceError::ExpenditureNotFound(expenditure_id));
        }

        let mut changes = LedgerChanges::default();

        for deduction in ledger.take_deductions(|d| d.expenditure_id == expenditure_id) {
            let credit = ledger.credit_mut(deduction.credit_id)?;
            credit.remaining_hours += deduction.hours_deducted;
            if credit.remaining_hours > credit.credit_hours {
                return Err(MaintenanceError::InvariantViolation(format!(
                    "restoring {} hours overfills credit {}",
                    deduction.hours_deducted, credit.id
                )));
            }

            changes.credits_updated.insert(deduction.credit_id);
            changes.deductions_deleted.push(deduction.id);
        }

        let expenditure = ledger.remove_expenditure(expenditure_id)?;
        changes.expenditures_deleted.insert(expenditure_id);

        debug!(
            license_id = %ledger.license_id(),
            expenditure_id = %expenditure_id,
            hours = %expenditure.hours_spent,
            "Reversed time expenditure"
        );

        Ok((expenditure, changes))
    }

    fn replay_inner(ledger: &mut LicenseLedger) -> Result<LedgerChanges, MaintenanceError> {
        let remaining_before: BTreeMap<TimeCreditId, Hours> = ledger
            .credits()
            .iter()
            .map(|c| (c.id, c.remaining_hours))
            .collect();
        let debt_before: BTreeMap<TimeExpenditureId, Hours> = ledger
            .expenditures()
            .iter()
            .map(|e| (e.id, e.created_debt))
            .collect();

        let deductions_deleted = ledger
            .take_deductions(|_| true)
            .into_iter()
            .map(|d| d.id)
            .collect();
        let mut changes = LedgerChanges {
            deductions_deleted,
            ..LedgerChanges::default()
        };

        for &credit_id in remaining_before.keys() {
            let credit = ledger.credit_mut(credit_id)?;
            credit.remaining_hours = credit.credit_hours;
        }
        for &expenditure_id in debt_before.keys() {
            ledger.expenditure_mut(expenditure_id)?.created_debt = Hours::ZERO;
        }

        let order: Vec<TimeExpenditureId> = ledger
            .expenditures_in_date_order()
            .into_iter()
            .map(|e| e.id)
            .collect();
        for expenditure_id in order {
            let allocated = Self::allocate(ledger, expenditure_id)?;
            changes.deductions_created.extend(allocated.deductions_created);
        }

        for credit in ledger.credits() {
            if remaining_before.get(&credit.id) != Some(&credit.remaining_hours) {
                changes.credits_updated.insert(credit.id);
            }
        }
        for expenditure in ledger.expenditures() {
            if debt_before.get(&expenditure.id) != Some(&expenditure.created_debt) {
                changes.expenditures_updated.insert(expenditure.id);
            }
        }

        debug!(
            license_id = %ledger.license_id(),
            deductions = changes.deductions_created.len(),
            "Replayed license ledger"
        );

        Ok(changes)
    }
}
