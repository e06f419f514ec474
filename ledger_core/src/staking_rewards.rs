use tracing::debug;

use crate::balance_tracker::{Accumulator, Side};
use crate::{ClassifiedTransaction, LedgerAction, LedgerError, Result, Transfer};

/// Replay one (wallet, contract, token) group of a yield or staking contract.
///
/// Method names on these contracts are not reliable, so only the flow is
/// used: anything landing in the wallet closes the position, everything else
/// opens it. Amounts are taken as given.
pub fn track_rewards_group(transfers: &[Transfer]) -> Result<Vec<ClassifiedTransaction>> {
    let mut position = Accumulator::new();
    let mut rows = Vec::with_capacity(transfers.len());

    for (i, transfer) in transfers.iter().enumerate() {
        if i > 0 && transfer.datetime < transfers[i - 1].datetime {
            return Err(LedgerError::UnorderedGroup {
                hash: transfer.hash.clone(),
            });
        }

        let amount = transfer.amount_fixed;
        if transfer.is_received_by_wallet() {
            for (action, leg_amount, totals) in position.close(Side::Collateral, amount) {
                rows.push(ClassifiedTransaction::from_transfer(
                    transfer,
                    action,
                    leg_amount,
                    Some(totals),
                ));
            }
        } else {
            let totals = position.open(amount);
            rows.push(ClassifiedTransaction::from_transfer(
                transfer,
                LedgerAction::Deposit,
                amount,
                Some(totals),
            ));
        }
    }

    debug!(
        "Replayed {} staking transfers into {} rows ({:?})",
        transfers.len(),
        rows.len(),
        position.totals()
    );

    Ok(rows)
}
