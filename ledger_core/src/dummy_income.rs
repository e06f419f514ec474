use tracing::debug;

use crate::{balance_tracker::TokenRules, ClassifiedTransaction, LedgerAction};

/// Appended to the source hash so synthetic rows stay unique
pub const DUMMY_HASH_SUFFIX: &str = "-dummy";

/// Mirror every debt-side interest payment on a variable-debt or receipt
/// token as income on the asset side. Returns only the synthetic rows.
pub fn synthesize_dummy_income(
    rows: &[ClassifiedTransaction],
    rules: &TokenRules,
) -> Vec<ClassifiedTransaction> {
    let dummies: Vec<ClassifiedTransaction> = rows
        .iter()
        .filter(|row| row.action == LedgerAction::RepayInterest)
        .filter(|row| {
            rules.is_variable_debt(&row.token_symbol) || rules.is_receipt_token(&row.token_symbol)
        })
        .map(|row| {
            let mut dummy = row.clone();
            dummy.action = LedgerAction::DummyIncome;
            dummy.category = LedgerAction::DummyIncome.category();
            dummy.hash = format!("{}{}", row.hash, DUMMY_HASH_SUFFIX);
            std::mem::swap(&mut dummy.transfer_from, &mut dummy.transfer_to);
            dummy
        })
        .collect();

    debug!("Synthesized {} dummy income rows", dummies.len());
    dummies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::{Category, RunningTotals};

    fn rules() -> TokenRules {
        TokenRules::new(["amUSDC"], "^variableDebt").unwrap()
    }

    fn row(token: &str, action: LedgerAction) -> ClassifiedTransaction {
        let mut burn = outgoing("0xabc", 0, "repay", token, "5");
        burn.transfer_to = "0x0000000000000000000000000000000000000000".to_string();
        ClassifiedTransaction::from_transfer(&burn, action, dec("5"), Some(RunningTotals::default()))
    }

    #[test]
    fn mirrors_variable_debt_interest() {
        let source = row("variableDebtUSDC", LedgerAction::RepayInterest);
        let dummies = synthesize_dummy_income(&[source.clone()], &rules());

        assert_eq!(dummies.len(), 1);
        let dummy = &dummies[0];
        assert_eq!(dummy.action, LedgerAction::DummyIncome);
        assert_eq!(dummy.category, Category::Synthetic);
        assert_eq!(dummy.amount, source.amount);
        assert_eq!(dummy.datetime, source.datetime);
        assert_eq!(dummy.hash, "0xabc-dummy");
        assert_eq!(dummy.transfer_from, source.transfer_to);
        assert_eq!(dummy.transfer_to, source.transfer_from);
    }

    #[test]
    fn mirrors_receipt_token_interest() {
        let dummies = synthesize_dummy_income(&[row("amUSDC", LedgerAction::RepayInterest)], &rules());
        assert_eq!(dummies.len(), 1);
    }

    #[test]
    fn ignores_everything_else() {
        let rows = vec![
            row("variableDebtUSDC", LedgerAction::RepayPrincipal),
            row("variableDebtUSDC", LedgerAction::Borrow),
            row("amUSDC", LedgerAction::WithdrawInterest),
            row("USDC", LedgerAction::RepayInterest),
            row("stableDebtUSDC", LedgerAction::RepayInterest),
        ];
        assert!(synthesize_dummy_income(&rows, &rules()).is_empty());
    }
}
