//! The per-license ledger aggregate.
//!
//! `LicenseLedger` holds every credit, expenditure and deduction of one
//! license. The allocation engine mutates it in place and reports what it
//! touched through `LedgerChanges`, which the persistence layer replays as
//! row writes inside the license's transaction.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use timebank_shared::types::{DeductionId, Hours, LicenseId, TimeCreditId, TimeExpenditureId};

use super::error::MaintenanceError;
use super::types::{CoverageState, Deduction, MaintenanceBalance, TimeCredit, TimeExpenditure};

/// Row-level summary of one engine operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerChanges {
    /// Credits inserted by the operation.
    pub credits_created: BTreeSet<TimeCreditId>,
    /// Credits whose `remaining_hours` changed.
    pub credits_updated: BTreeSet<TimeCreditId>,
    /// Credits removed from the ledger.
    pub credits_deleted: BTreeSet<TimeCreditId>,
    /// Expenditures inserted by the operation.
    pub expenditures_created: BTreeSet<TimeExpenditureId>,
    /// Expenditures whose `created_debt` changed.
    pub expenditures_updated: BTreeSet<TimeExpenditureId>,
    /// Expenditures removed from the ledger.
    pub expenditures_deleted: BTreeSet<TimeExpenditureId>,
    /// Deductions created, in creation order.
    pub deductions_created: Vec<DeductionId>,
    /// Deductions deleted, in deletion order.
    pub deductions_deleted: Vec<DeductionId>,
}

impl LedgerChanges {
    /// Returns true if the operation touched nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credits_created.is_empty()
            && self.credits_updated.is_empty()
            && self.credits_deleted.is_empty()
            && self.expenditures_created.is_empty()
            && self.expenditures_updated.is_empty()
            && self.expenditures_deleted.is_empty()
            && self.deductions_created.is_empty()
            && self.deductions_deleted.is_empty()
    }

    /// Folds the changes of a later operation into this one.
    ///
    /// Rows created and later updated stay "created"; rows created and
    /// later deleted disappear from both sets.
    pub fn merge(&mut self, later: Self) {
        for id in later.credits_updated {
            if !self.credits_created.contains(&id) {
                self.credits_updated.insert(id);
            }
        }
        for id in later.credits_deleted {
            self.credits_updated.remove(&id);
            if !self.credits_created.remove(&id) {
                self.credits_deleted.insert(id);
            }
        }
        self.credits_created.extend(later.credits_created);

        for id in later.expenditures_updated {
            if !self.expenditures_created.contains(&id) {
                self.expenditures_updated.insert(id);
            }
        }
        for id in later.expenditures_deleted {
            self.expenditures_updated.remove(&id);
            if !self.expenditures_created.remove(&id) {
                self.expenditures_deleted.insert(id);
            }
        }
        self.expenditures_created.extend(later.expenditures_created);

        for id in later.deductions_deleted {
            if let Some(pos) = self.deductions_created.iter().position(|d| *d == id) {
                self.deductions_created.remove(pos);
            } else {
                self.deductions_deleted.push(id);
            }
        }
        self.deductions_created.extend(later.deductions_created);
    }
}

/// Every credit, expenditure and deduction of one license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseLedger {
    license_id: LicenseId,
    version: i64,
    credits: Vec<TimeCredit>,
    expenditures: Vec<TimeExpenditure>,
    deductions: Vec<Deduction>,
}

impl LicenseLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new(license_id: LicenseId) -> Self {
        Self {
            license_id,
            version: 0,
            credits: Vec::new(),
            expenditures: Vec::new(),
            deductions: Vec::new(),
        }
    }

    /// Rebuilds a ledger from persisted rows.
    ///
    /// Only structural consistency is checked here (license ownership and
    /// dangling edges); call [`Self::verify`] for the accounting invariants.
    ///
    /// # Errors
    ///
    /// Returns `LicenseMismatch` for rows of another license,
    /// `CrossLicenseReference`/`InvariantViolation` for broken edges.
    pub fn from_parts(
        license_id: LicenseId,
        version: i64,
        credits: Vec<TimeCredit>,
        expenditures: Vec<TimeExpenditure>,
        deductions: Vec<Deduction>,
    ) -> Result<Self, MaintenanceError> {
        let ledger = Self {
            license_id,
            version,
            credits,
            expenditures,
            deductions,
        };

        for credit in &ledger.credits {
            ledger.check_license(credit.license_id)?;
        }
        for expenditure in &ledger.expenditures {
            ledger.check_license(expenditure.license_id)?;
        }
        for deduction in &ledger.deductions {
            ledger.check_edge(deduction.credit_id, deduction.expenditure_id)?;
        }

        Ok(ledger)
    }

    /// The license owning this ledger.
    #[must_use]
    pub fn license_id(&self) -> LicenseId {
        self.license_id
    }

    /// Ledger version; bumped by every mutating engine operation.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// All credits, in insertion order.
    #[must_use]
    pub fn credits(&self) -> &[TimeCredit] {
        &self.credits
    }

    /// All expenditures, in insertion order.
    #[must_use]
    pub fn expenditures(&self) -> &[TimeExpenditure] {
        &self.expenditures
    }

    /// All deductions, in creation order.
    #[must_use]
    pub fn deductions(&self) -> &[Deduction] {
        &self.deductions
    }

    /// Looks up a credit.
    #[must_use]
    pub fn credit(&self, id: TimeCreditId) -> Option<&TimeCredit> {
        self.credits.iter().find(|c| c.id == id)
    }

    /// Looks up an expenditure.
    #[must_use]
    pub fn expenditure(&self, id: TimeExpenditureId) -> Option<&TimeExpenditure> {
        self.expenditures.iter().find(|e| e.id == id)
    }

    /// Looks up a deduction.
    #[must_use]
    pub fn deduction(&self, id: DeductionId) -> Option<&Deduction> {
        self.deductions.iter().find(|d| d.id == id)
    }

    /// Deductions taken from a credit.
    pub fn deductions_for_credit(&self, id: TimeCreditId) -> impl Iterator<Item = &Deduction> {
        self.deductions.iter().filter(move |d| d.credit_id == id)
    }

    /// Deductions paying for an expenditure.
    pub fn deductions_for_expenditure(
        &self,
        id: TimeExpenditureId,
    ) -> impl Iterator<Item = &Deduction> {
        self.deductions.iter().filter(move |d| d.expenditure_id == id)
    }

    /// Hours of an expenditure covered by credits.
    #[must_use]
    pub fn covered_hours(&self, id: TimeExpenditureId) -> Hours {
        self.deductions_for_expenditure(id)
            .map(|d| d.hours_deducted)
            .sum()
    }

    /// Coverage state of an expenditure.
    ///
    /// # Errors
    ///
    /// Returns `ExpenditureNotFound` for an unknown id.
    pub fn coverage_state(&self, id: TimeExpenditureId) -> Result<CoverageState, MaintenanceError> {
        let expenditure = self
            .expenditure(id)
            .ok_or(MaintenanceError::ExpenditureNotFound(id))?;
        Ok(CoverageState::from_amounts(
            self.covered_hours(id),
            expenditure.created_debt,
        ))
    }

    /// Credits ordered oldest validity window first, ties broken by id.
    #[must_use]
    pub fn credits_in_allocation_order(&self) -> Vec<&TimeCredit> {
        let mut credits: Vec<&TimeCredit> = self.credits.iter().collect();
        credits.sort_by_key(|c| c.allocation_key());
        credits
    }

    /// Expenditures ordered by date, ties broken by id.
    #[must_use]
    pub fn expenditures_in_date_order(&self) -> Vec<&TimeExpenditure> {
        let mut expenditures: Vec<&TimeExpenditure> = self.expenditures.iter().collect();
        expenditures.sort_by_key(|e| e.backfill_key());
        expenditures
    }

    /// Lifetime totals for the license.
    #[must_use]
    pub fn balance(&self) -> MaintenanceBalance {
        let total_credits: Hours = self.credits.iter().map(|c| c.credit_hours).sum();
        let total_expenditures: Hours = self.expenditures.iter().map(|e| e.hours_spent).sum();

        MaintenanceBalance {
            total_credits,
            total_expenditures,
            current_balance: total_credits - total_expenditures,
        }
    }

    /// Checks every accounting invariant of the ledger.
    ///
    /// - `0 <= remaining_hours <= credit_hours` for every credit
    /// - `credit_hours - remaining_hours == sum(deductions of credit)`
    /// - `sum(deductions of expenditure) + created_debt == hours_spent`
    /// - every deduction is positive and links rows of this license
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn verify(&self) -> Result<(), MaintenanceError> {
        let mut per_credit: BTreeMap<TimeCreditId, Hours> = BTreeMap::new();
        let mut per_expenditure: BTreeMap<TimeExpenditureId, Hours> = BTreeMap::new();

        for deduction in &self.deductions {
            self.check_edge(deduction.credit_id, deduction.expenditure_id)?;
            if !deduction.hours_deducted.is_positive() {
                return Err(MaintenanceError::InvariantViolation(format!(
                    "deduction {} moves {} hours",
                    deduction.id, deduction.hours_deducted
                )));
            }
            *per_credit.entry(deduction.credit_id).or_default() += deduction.hours_deducted;
            *per_expenditure.entry(deduction.expenditure_id).or_default() +=
                deduction.hours_deducted;
        }

        for credit in &self.credits {
            if credit.remaining_hours.is_negative() || credit.remaining_hours > credit.credit_hours
            {
                return Err(MaintenanceError::InvariantViolation(format!(
                    "credit {} has {} of {} hours remaining",
                    credit.id, credit.remaining_hours, credit.credit_hours
                )));
            }
            let deducted = per_credit.get(&credit.id).copied().unwrap_or_default();
            if credit.consumed_hours() != deducted {
                return Err(MaintenanceError::InvariantViolation(format!(
                    "credit {} consumed {} hours but its deductions sum to {}",
                    credit.id,
                    credit.consumed_hours(),
                    deducted
                )));
            }
        }

        for expenditure in &self.expenditures {
            let deducted = per_expenditure
                .get(&expenditure.id)
                .copied()
                .unwrap_or_default();
            if expenditure.created_debt.is_negative()
                || deducted + expenditure.created_debt != expenditure.hours_spent
            {
                return Err(MaintenanceError::InvariantViolation(format!(
                    "expenditure {} spent {} hours but deductions {} + debt {} disagree",
                    expenditure.id, expenditure.hours_spent, deducted, expenditure.created_debt
                )));
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Mutation primitives used by the allocation engine
    // ------------------------------------------------------------------

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    pub(crate) fn push_credit(&mut self, credit: TimeCredit) -> Result<(), MaintenanceError> {
        self.check_license(credit.license_id)?;
        self.credits.push(credit);
        Ok(())
    }

    pub(crate) fn push_expenditure(
        &mut self,
        expenditure: TimeExpenditure,
    ) -> Result<(), MaintenanceError> {
        self.check_license(expenditure.license_id)?;
        self.expenditures.push(expenditure);
        Ok(())
    }

    pub(crate) fn credit_mut(
        &mut self,
        id: TimeCreditId,
    ) -> Result<&mut TimeCredit, MaintenanceError> {
        self.credits
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(MaintenanceError::CreditNotFound(id))
    }

    pub(crate) fn expenditure_mut(
        &mut self,
        id: TimeExpenditureId,
    ) -> Result<&mut TimeExpenditure, MaintenanceError> {
        self.expenditures
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(MaintenanceError::ExpenditureNotFound(id))
    }

    /// Records a deduction edge. Counters are the caller's responsibility.
    pub(crate) fn push_deduction(
        &mut self,
        credit_id: TimeCreditId,
        expenditure_id: TimeExpenditureId,
        hours: Hours,
    ) -> Result<DeductionId, MaintenanceError> {
        self.check_edge(credit_id, expenditure_id)?;

        let id = DeductionId::new();
        self.deductions.push(Deduction {
            id,
            credit_id,
            expenditure_id,
            hours_deducted: hours,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    /// Removes and returns every deduction matching the predicate.
    pub(crate) fn take_deductions(
        &mut self,
        mut predicate: impl FnMut(&Deduction) -> bool,
    ) -> Vec<Deduction> {
        let (taken, kept): (Vec<Deduction>, Vec<Deduction>) = std::mem::take(&mut self.deductions)
            .into_iter()
            .partition(|d| predicate(d));
        self.deductions = kept;
        taken
    }

    /// Removes a credit that no longer has deductions.
    pub(crate) fn remove_credit(
        &mut self,
        id: TimeCreditId,
    ) -> Result<TimeCredit, MaintenanceError> {
        if self.deductions.iter().any(|d| d.credit_id == id) {
            return Err(MaintenanceError::InvariantViolation(format!(
                "credit {id} still has deductions"
            )));
        }
        let pos = self
            .credits
            .iter()
            .position(|c| c.id == id)
            .ok_or(MaintenanceError::CreditNotFound(id))?;
        Ok(self.credits.remove(pos))
    }

    /// Removes an expenditure that no longer has deductions.
    pub(crate) fn remove_expenditure(
        &mut self,
        id: TimeExpenditureId,
    ) -> Result<TimeExpenditure, MaintenanceError> {
        if self.deductions.iter().any(|d| d.expenditure_id == id) {
            return Err(MaintenanceError::InvariantViolation(format!(
                "expenditure {id} still has deductions"
            )));
        }
        let pos = self
            .expenditures
            .iter()
            .position(|e| e.id == id)
            .ok_or(MaintenanceError::ExpenditureNotFound(id))?;
        Ok(self.expenditures.remove(pos))
    }

    fn check_license(&self, actual: LicenseId) -> Result<(), MaintenanceError> {
        if actual == self.license_id {
            Ok(())
        } else {
            Err(MaintenanceError::LicenseMismatch {
                expected: self.license_id,
                actual,
            })
        }
    }

    fn check_edge(
        &self,
        credit_id: TimeCreditId,
        expenditure_id: TimeExpenditureId,
    ) -> Result<(), MaintenanceError> {
        let credit = self.credit(credit_id).ok_or_else(|| {
            MaintenanceError::InvariantViolation(format!(
                "deduction references unknown credit {credit_id}"
            ))
        })?;
        let expenditure = self.expenditure(expenditure_id).ok_or_else(|| {
            MaintenanceError::InvariantViolation(format!(
                "deduction references unknown expenditure {expenditure_id}"
            ))
        })?;

        if credit.license_id != expenditure.license_id || credit.license_id != self.license_id {
            return Err(MaintenanceError::CrossLicenseReference {
                credit_id,
                expenditure_id,
            });
        }
        Ok(())
    }
}
