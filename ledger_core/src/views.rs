//! Filtered views over classified rows. Each view keeps the gas fee rows
//! belonging to the transactions it selects.

use std::collections::HashSet;

use crate::{ClassifiedTransaction, LedgerAction};

fn select(rows: &[ClassifiedTransaction], actions: &[LedgerAction]) -> Vec<ClassifiedTransaction> {
    let hashes: HashSet<&str> = rows
        .iter()
        .filter(|row| actions.contains(&row.action))
        .map(|row| row.hash.as_str())
        .collect();

    rows.iter()
        .filter(|row| {
            actions.contains(&row.action)
                || (row.action == LedgerAction::GasFee && hashes.contains(row.hash.as_str()))
        })
        .cloned()
        .collect()
}

pub fn deposits_and_withdrawals(rows: &[ClassifiedTransaction]) -> Vec<ClassifiedTransaction> {
    select(
        rows,
        &[
            LedgerAction::Deposit,
            LedgerAction::WithdrawPrincipal,
            LedgerAction::WithdrawInterest,
        ],
    )
}

pub fn borrows_and_repayments(rows: &[ClassifiedTransaction]) -> Vec<ClassifiedTransaction> {
    select(
        rows,
        &[
            LedgerAction::Borrow,
            LedgerAction::RepayPrincipal,
            LedgerAction::RepayInterest,
        ],
    )
}

/// Rows produced by splitting, plus their synthetic mirrors
pub fn split_transactions(rows: &[ClassifiedTransaction]) -> Vec<ClassifiedTransaction> {
    select(
        rows,
        &[
            LedgerAction::RepayPrincipal,
            LedgerAction::RepayInterest,
            LedgerAction::DummyIncome,
            LedgerAction::WithdrawPrincipal,
            LedgerAction::WithdrawInterest,
        ],
    )
}
