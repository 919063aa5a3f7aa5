//! Settlement calculator.
//!
//! Replays a license ledger into billing periods, one per credit in
//! allocation order, plus a trailing debt-only period when debt cannot be
//! attributed to any credit. Negative balances carry into the next period;
//! positive balances are forfeited.
//!
//! Attribution of expenditure hours:
//! - hours of a deduction belong to the period of its credit
//! - debt belongs to the last period the expenditure has a deduction in,
//!   else to the first period whose window covers its date, else to the
//!   trailing debt-only period

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use timebank_shared::types::{Hours, TimeCreditId, TimeExpenditureId};

use super::ledger::LicenseLedger;
use super::types::{MaintenanceBalance, TimeExpenditure};

/// One expenditure row in a settlement's sub-table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementLine {
    /// The expenditure.
    pub expenditure_id: TimeExpenditureId,
    /// Day the work was done.
    pub date: NaiveDate,
    /// Activity description.
    pub description: Option<String>,
    /// Task type.
    pub task_type: Option<String>,
    /// Full hours of the expenditure, for reference.
    pub hours_spent: Hours,
    /// Hours paid by this period's credit.
    pub hours_deducted: Hours,
    /// Debt attributed to this period.
    pub debt_hours: Hours,
}

impl SettlementLine {
    fn new(expenditure: &TimeExpenditure) -> Self {
        Self {
            expenditure_id: expenditure.id,
            date: expenditure.date,
            description: expenditure.description.clone(),
            task_type: expenditure.task_type.clone(),
            hours_spent: expenditure.hours_spent,
            hours_deducted: Hours::ZERO,
            debt_hours: Hours::ZERO,
        }
    }

    /// Hours this line contributes to the period's expenditure total.
    #[must_use]
    pub fn hours(&self) -> Hours {
        self.hours_deducted + self.debt_hours
    }
}

/// The figures printed for one billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementFigures {
    /// The credit's original grant; zero for the debt-only period.
    pub credit_amount: Hours,
    /// Debt carried in from the previous period (always `<= 0`).
    pub carry_over_in: Hours,
    /// Sum of the hours attributed to this period.
    pub expenditure_total: Hours,
    /// `carry_over_in + credit_amount - expenditure_total`.
    pub balance: Hours,
    /// Debt carried into the next period (always `<= 0`).
    pub carry_over_out: Hours,
    /// Surplus dropped at the end of a non-final period.
    pub forfeited_hours: Hours,
    /// True only for the last settlement.
    pub is_final: bool,
}

/// A billing period backed by a credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditSettlement {
    /// The credit of this period.
    pub credit_id: TimeCreditId,
    /// First day of the credit window.
    pub start_date: NaiveDate,
    /// Last day of the credit window.
    pub end_date: NaiveDate,
    /// Period figures.
    pub figures: SettlementFigures,
    /// Expenditure lines, ordered by date.
    pub expenditures: Vec<SettlementLine>,
}

/// Trailing period for debt no credit can absorb.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtOnlySettlement {
    /// Period figures; `credit_amount` is always zero.
    pub figures: SettlementFigures,
    /// Expenditure lines, ordered by date.
    pub expenditures: Vec<SettlementLine>,
}

/// One billing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Settlement {
    /// Period backed by a credit.
    Credit(CreditSettlement),
    /// Trailing debt-only period.
    DebtOnly(DebtOnlySettlement),
}

impl Settlement {
    /// Period figures.
    #[must_use]
    pub fn figures(&self) -> &SettlementFigures {
        match self {
            Self::Credit(s) => &s.figures,
            Self::DebtOnly(s) => &s.figures,
        }
    }

    /// Expenditure lines of the period.
    #[must_use]
    pub fn expenditures(&self) -> &[SettlementLine] {
        match self {
            Self::Credit(s) => &s.expenditures,
            Self::DebtOnly(s) => &s.expenditures,
        }
    }

    /// The backing credit, if any.
    #[must_use]
    pub fn credit_id(&self) -> Option<TimeCreditId> {
        match self {
            Self::Credit(s) => Some(s.credit_id),
            Self::DebtOnly(_) => None,
        }
    }

    /// Returns true for the last settlement.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.figures().is_final
    }
}

/// Stateless calculator over a [`LicenseLedger`].
pub struct SettlementCalculator;

impl SettlementCalculator {
    /// Computes the ordered billing periods of a license.
    ///
    /// Pure: the same ledger always yields the same settlements. An empty
    /// ledger yields no settlements.
    #[must_use]
    pub fn calculate_interim_settlements(ledger: &LicenseLedger) -> Vec<Settlement> {
        let credits = ledger.credits_in_allocation_order();
        let position: BTreeMap<TimeCreditId, usize> = credits
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id, i))
            .collect();

        // Per period, lines keyed by (date, id) so they come out ordered.
        let mut lines: Vec<BTreeMap<(NaiveDate, TimeExpenditureId), SettlementLine>> =
            vec![BTreeMap::new(); credits.len()];
        let mut debt_lines: BTreeMap<(NaiveDate, TimeExpenditureId), SettlementLine> =
            BTreeMap::new();

        for expenditure in ledger.expenditures_in_date_order() {
            let key = expenditure.backfill_key();
            let mut last_period = None;

            for deduction in ledger.deductions_for_expenditure(expenditure.id) {
                let Some(&period) = position.get(&deduction.credit_id) else {
                    continue;
                };
                lines[period]
                    .entry(key)
                    .or_insert_with(|| SettlementLine::new(expenditure))
                    .hours_deducted += deduction.hours_deducted;
                last_period = last_period.max(Some(period));
            }

            // Computed rather than read from created_debt so that hours of a
            // never-allocated expenditure still show up somewhere.
            let debt = expenditure.hours_spent - ledger.covered_hours(expenditure.id);
            if !debt.is_positive() {
                continue;
            }

            let period =
                last_period.or_else(|| credits.iter().position(|c| c.covers(expenditure.date)));
            let target = match period {
                Some(period) => &mut lines[period],
                None => &mut debt_lines,
            };
            target
                .entry(key)
                .or_insert_with(|| SettlementLine::new(expenditure))
                .debt_hours += debt;
        }

        let has_debt_only = !debt_lines.is_empty();
        let count = credits.len() + usize::from(has_debt_only);
        let mut settlements = Vec::with_capacity(count);
        let mut carry_over = Hours::ZERO;

        for (index, (credit, period_lines)) in credits.iter().zip(lines).enumerate() {
            let expenditures: Vec<SettlementLine> = period_lines.into_values().collect();
            let figures = Self::figures(
                credit.credit_hours,
                carry_over,
                &expenditures,
                index + 1 == count,
            );
            carry_over = figures.carry_over_out;

            settlements.push(Settlement::Credit(CreditSettlement {
                credit_id: credit.id,
                start_date: credit.start_date,
                end_date: credit.end_date,
                figures,
                expenditures,
            }));
        }

        if has_debt_only {
            let expenditures: Vec<SettlementLine> = debt_lines.into_values().collect();
            let figures = Self::figures(Hours::ZERO, carry_over, &expenditures, true);
            settlements.push(Settlement::DebtOnly(DebtOnlySettlement {
                figures,
                expenditures,
            }));
        }

        settlements
    }

    /// Lifetime totals of a license, ignoring per-period forfeiture.
    #[must_use]
    pub fn calculate_maintenance_balance(ledger: &LicenseLedger) -> MaintenanceBalance {
        ledger.balance()
    }

    /// Sum of the hours forfeited across all periods.
    ///
    /// `final.balance + total_forfeited == current_balance` always holds.
    #[must_use]
    pub fn total_forfeited(settlements: &[Settlement]) -> Hours {
        settlements.iter().map(|s| s.figures().forfeited_hours).sum()
    }

    fn figures(
        credit_amount: Hours,
        carry_over_in: Hours,
        lines: &[SettlementLine],
        is_final: bool,
    ) -> SettlementFigures {
        let expenditure_total: Hours = lines.iter().map(SettlementLine::hours).sum();
        let balance = carry_over_in + credit_amount - expenditure_total;

        let (carry_over_out, forfeited_hours) = if balance.is_positive() {
            (Hours::ZERO, if is_final { Hours::ZERO } else { balance })
        } else {
            (balance, Hours::ZERO)
        };

        SettlementFigures {
            credit_amount,
            carry_over_in,
            expenditure_total,
            balance,
            carry_over_out,
            forfeited_hours,
            is_final,
        }
    }
}
