//! Property-based tests for AllocationEngine.
//!
//! - Expenditure accounting: deductions + debt == hours spent
//! - Credit accounting: consumed hours == deductions, within bounds
//! - Replay is deterministic

use chrono::{Days, NaiveDate};
use proptest::prelude::*;
use rust_decimal::Decimal;
use timebank_shared::config::ReallocationPolicy;
use timebank_shared::types::{Hours, LicenseId};

use super::allocation::AllocationEngine;
use super::ledger::LicenseLedger;
use super::types::{CreateTimeCreditInput, CreateTimeExpenditureInput};

/// One step of a random license history.
#[derive(Debug, Clone)]
enum Op {
    Credit { start: u64, length: u64, cents: i64 },
    Spend { day: u64, cents: i64 },
    DeleteCredit { pick: usize, replay: bool },
    DeleteExpenditure { pick: usize, replay: bool },
    Replay,
}

/// Strategy to generate hour amounts (0.01 to 50.00) as cents.
fn cents() -> impl Strategy<Value = i64> {
    1i64..5_000i64
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u64..365, 0u64..180, cents())
            .prop_map(|(start, length, cents)| Op::Credit { start, length, cents }),
        5 => (0u64..540, cents()).prop_map(|(day, cents)| Op::Spend { day, cents }),
        1 => (any::<usize>(), any::<bool>())
            .prop_map(|(pick, replay)| Op::DeleteCredit { pick, replay }),
        1 => (any::<usize>(), any::<bool>())
            .prop_map(|(pick, replay)| Op::DeleteExpenditure { pick, replay }),
        1 => Just(Op::Replay),
    ]
}

fn day(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Days::new(offset)
}

fn policy(replay: bool) -> ReallocationPolicy {
    if replay {
        ReallocationPolicy::Replay
    } else {
        ReallocationPolicy::ReverseOnly
    }
}

fn apply(ledger: &mut LicenseLedger, op: &Op) {
    match *op {
        Op::Credit { start, length, cents } => {
            let input = CreateTimeCreditInput {
                license_id: ledger.license_id(),
                start_date: day(start),
                end_date: day(start + length),
                credit_hours: Hours::new(Decimal::new(cents, 2)),
            };
            AllocationEngine::record_credit(ledger, input).unwrap();
        }
        Op::Spend { day: offset, cents } => {
            let input = CreateTimeExpenditureInput {
                license_id: ledger.license_id(),
                date: day(offset),
                hours_spent: Hours::new(Decimal::new(cents, 2)),
                description: None,
                task_type: None,
            };
            AllocationEngine::record_expenditure(ledger, input).unwrap();
        }
        Op::DeleteCredit { pick, replay } => {
            if !ledger.credits().is_empty() {
                let id = ledger.credits()[pick % ledger.credits().len()].id;
                AllocationEngine::delete_credit(ledger, id, policy(replay)).unwrap();
            }
        }
        Op::DeleteExpenditure { pick, replay } => {
            if !ledger.expenditures().is_empty() {
                let id = ledger.expenditures()[pick % ledger.expenditures().len()].id;
                AllocationEngine::delete_expenditure(ledger, id, policy(replay)).unwrap();
            }
        }
        Op::Replay => {
            AllocationEngine::replay(ledger).unwrap();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Every intermediate ledger state satisfies the accounting invariants.
    #[test]
    fn prop_invariants_hold_after_every_operation(
        ops in prop::collection::vec(op_strategy(), 1..40),
    ) {
        let mut ledger = LicenseLedger::new(LicenseId::new());

        for op in &ops {
            apply(&mut ledger, op);
            prop_assert!(ledger.verify().is_ok(), "invariants broken after {:?}", op);
        }
    }

    /// Every logged hour is either deducted or recorded as debt.
    #[test]
    fn prop_debt_is_bounded_by_hours_spent(
        ops in prop::collection::vec(op_strategy(), 1..40),
    ) {
        let mut ledger = LicenseLedger::new(LicenseId::new());
        for op in &ops {
            apply(&mut ledger, op);
        }

        let spent: Hours = ledger.expenditures().iter().map(|e| e.hours_spent).sum();
        let debt: Hours = ledger.expenditures().iter().map(|e| e.created_debt).sum();
        let deducted: Hours = ledger.deductions().iter().map(|d| d.hours_deducted).sum();

        prop_assert!(debt <= spent);
        prop_assert_eq!(deducted + debt, spent);
    }

    /// Allocating an already allocated expenditure changes nothing.
    #[test]
    fn prop_allocation_is_idempotent(
        ops in prop::collection::vec(op_strategy(), 1..30),
    ) {
        let mut ledger = LicenseLedger::new(LicenseId::new());
        for op in &ops {
            apply(&mut ledger, op);
        }
        let snapshot = ledger.clone();

        let expenditure_ids: Vec<_> = ledger.expenditures().iter().map(|e| e.id).collect();
        for id in expenditure_ids {
            let changes = AllocationEngine::allocate_expenditure(&mut ledger, id).unwrap();
            prop_assert!(changes.is_empty());
        }

        prop_assert_eq!(ledger, snapshot);
    }

    /// Replaying twice yields the same counters as replaying once.
    #[test]
    fn prop_replay_is_deterministic(
        ops in prop::collection::vec(op_strategy(), 1..30),
    ) {
        let mut ledger = LicenseLedger::new(LicenseId::new());
        for op in &ops {
            apply(&mut ledger, op);
        }

        AllocationEngine::replay(&mut ledger).unwrap();
        let once = ledger.clone();
        let changes = AllocationEngine::replay(&mut ledger).unwrap();

        prop_assert!(changes.credits_updated.is_empty());
        prop_assert!(changes.expenditures_updated.is_empty());
        prop_assert_eq!(ledger.credits(), once.credits());
        prop_assert_eq!(ledger.expenditures(), once.expenditures());
    }
}
