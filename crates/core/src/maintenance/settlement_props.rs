//! Property-based tests for SettlementCalculator.

use chrono::{Days, NaiveDate};
use proptest::prelude::*;
use rust_decimal::Decimal;
use timebank_shared::types::{Hours, LicenseId};

use super::allocation::AllocationEngine;
use super::ledger::LicenseLedger;
use super::settlement::SettlementCalculator;
use super::types::{CreateTimeCreditInput, CreateTimeExpenditureInput};

/// Strategy to generate a credit as (start offset, length in days, cents).
fn credit_strategy() -> impl Strategy<Value = (u64, u64, i64)> {
    (0u64..365, 0u64..120, 1i64..4_000i64)
}

/// Strategy to generate an expenditure as (day offset, cents).
fn expenditure_strategy() -> impl Strategy<Value = (u64, i64)> {
    (0u64..500, 1i64..2_000i64)
}

fn day(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Days::new(offset)
}

/// Builds a ledger, interleaving credits and expenditures by index.
fn build_ledger(credits: &[(u64, u64, i64)], expenditures: &[(u64, i64)]) -> LicenseLedger {
    let mut ledger = LicenseLedger::new(LicenseId::new());
    let rounds = credits.len().max(expenditures.len());

    for i in 0..rounds {
        if let Some(&(offset, cents)) = expenditures.get(i) {
            let input = CreateTimeExpenditureInput {
                license_id: ledger.license_id(),
                date: day(offset),
                hours_spent: Hours::new(Decimal::new(cents, 2)),
                description: None,
                task_type: None,
            };
            AllocationEngine::record_expenditure(&mut ledger, input).unwrap();
        }
        if let Some(&(start, length, cents)) = credits.get(i) {
            let input = CreateTimeCreditInput {
                license_id: ledger.license_id(),
                start_date: day(start),
                end_date: day(start + length),
                credit_hours: Hours::new(Decimal::new(cents, 2)),
            };
            AllocationEngine::record_credit(&mut ledger, input).unwrap();
        }
    }

    ledger
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Final balance plus forfeited hours equals the lifetime balance.
    #[test]
    fn prop_final_balance_reconciles_with_lifetime_balance(
        credits in prop::collection::vec(credit_strategy(), 0..8),
        expenditures in prop::collection::vec(expenditure_strategy(), 0..15),
    ) {
        let ledger = build_ledger(&credits, &expenditures);
        let settlements = SettlementCalculator::calculate_interim_settlements(&ledger);
        let balance = SettlementCalculator::calculate_maintenance_balance(&ledger);

        if let Some(last) = settlements.last() {
            prop_assert_eq!(
                last.figures().balance + SettlementCalculator::total_forfeited(&settlements),
                balance.current_balance
            );
        } else {
            prop_assert_eq!(balance.current_balance, Hours::ZERO);
        }
    }

    /// Every logged hour is attributed to exactly one period.
    #[test]
    fn prop_every_hour_is_attributed(
        credits in prop::collection::vec(credit_strategy(), 0..8),
        expenditures in prop::collection::vec(expenditure_strategy(), 0..15),
    ) {
        let ledger = build_ledger(&credits, &expenditures);
        let settlements = SettlementCalculator::calculate_interim_settlements(&ledger);

        let attributed: Hours = settlements.iter().map(|s| s.figures().expenditure_total).sum();
        let spent: Hours = ledger.expenditures().iter().map(|e| e.hours_spent).sum();
        prop_assert_eq!(attributed, spent);
    }

    /// Carry-over is never positive and exactly the last period is final.
    #[test]
    fn prop_chain_shape(
        credits in prop::collection::vec(credit_strategy(), 0..8),
        expenditures in prop::collection::vec(expenditure_strategy(), 0..15),
    ) {
        let ledger = build_ledger(&credits, &expenditures);
        let settlements = SettlementCalculator::calculate_interim_settlements(&ledger);

        let mut previous_out = Hours::ZERO;
        for (i, settlement) in settlements.iter().enumerate() {
            let figures = settlement.figures();
            prop_assert!(!figures.carry_over_in.is_positive());
            prop_assert!(!figures.carry_over_out.is_positive());
            prop_assert_eq!(figures.carry_over_in, previous_out);
            prop_assert!(!figures.forfeited_hours.is_negative());
            prop_assert_eq!(figures.is_final, i + 1 == settlements.len());
            previous_out = figures.carry_over_out;
        }

        // One period per credit plus at most one debt-only period.
        let credit_periods = settlements.iter().filter(|s| s.credit_id().is_some()).count();
        prop_assert_eq!(credit_periods, ledger.credits().len());
        prop_assert!(settlements.len() <= ledger.credits().len() + 1);
    }

    /// Two calculations over the same ledger are identical.
    #[test]
    fn prop_calculation_is_pure(
        credits in prop::collection::vec(credit_strategy(), 0..6),
        expenditures in prop::collection::vec(expenditure_strategy(), 0..10),
    ) {
        let ledger = build_ledger(&credits, &expenditures);
        prop_assert_eq!(
            SettlementCalculator::calculate_interim_settlements(&ledger),
            SettlementCalculator::calculate_interim_settlements(&ledger)
        );
    }
}
