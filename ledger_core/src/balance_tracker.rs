use config_manager::TokenConfig;
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::HashSet;
use tracing::{debug, trace, warn};

use crate::{
    ClassifiedTransaction, LedgerAction, LedgerError, Result, RunningTotals, Transfer,
    TransferAction,
};

/// Which accumulator a transfer moves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// deposits vs withdrawals
    Collateral,
    /// borrows vs repayments
    Debt,
}

impl Side {
    fn open_action(self) -> LedgerAction {
        match self {
            Side::Collateral => LedgerAction::Deposit,
            Side::Debt => LedgerAction::Borrow,
        }
    }

    fn principal_action(self) -> LedgerAction {
        match self {
            Side::Collateral => LedgerAction::WithdrawPrincipal,
            Side::Debt => LedgerAction::RepayPrincipal,
        }
    }

    fn interest_action(self) -> LedgerAction {
        match self {
            Side::Collateral => LedgerAction::WithdrawInterest,
            Side::Debt => LedgerAction::RepayInterest,
        }
    }
}

/// How a closing amount divides between principal and interest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Principal(Decimal),
    Interest(Decimal),
    Straddle { principal: Decimal, interest: Decimal },
}

/// Two-sided running balance for one side of one group
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Accumulator {
    opened: Decimal,
    closed: Decimal,
    interest: Decimal,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(&self) -> RunningTotals {
        RunningTotals {
            opened: self.opened,
            closed: self.closed,
            interest: self.interest,
        }
    }

    /// `0 <= interest <= closed` and principal recovered never exceeds principal opened
    pub fn holds_invariants(&self) -> bool {
        self.interest >= Decimal::ZERO
            && self.interest <= self.closed
            && self.closed - self.interest <= self.opened
    }

    /// Deposits and borrows are never split
    pub fn open(&mut self, amount: Decimal) -> RunningTotals {
        self.opened += amount;
        self.totals()
    }

    /// Interest is only recognized on the strict excess over the principal
    /// boundary `opened + interest - closed`.
    pub fn split(&self, amount: Decimal) -> Split {
        if self.closed < self.opened {
            let boundary = self.opened + self.interest - self.closed;
            if amount > boundary {
                Split::Straddle {
                    principal: boundary,
                    interest: amount - boundary,
                }
            } else {
                Split::Principal(amount)
            }
        } else if self.closed + amount > self.opened {
            Split::Interest(amount)
        } else if self.closed == self.opened {
            // reversal with nothing recognized past the principal
            Split::Principal(amount)
        } else {
            // reversal reaching back below the principal: the part above it
            // unwinds interest, the rest is principal
            let interest = self.opened - self.closed;
            Split::Straddle {
                principal: amount - interest,
                interest,
            }
        }
    }

    /// Apply a withdrawal/repayment, returning one (action, amount, totals)
    /// leg per emitted row. Totals accumulate across legs.
    pub fn close(&mut self, side: Side, amount: Decimal) -> Vec<(LedgerAction, Decimal, RunningTotals)> {
        let split = self.split(amount);
        trace!("Closing {} on {:?} as {:?}", amount, side, split);

        let mut legs = Vec::with_capacity(2);
        match split {
            Split::Principal(principal) => {
                self.closed += principal;
                legs.push((side.principal_action(), principal, self.totals()));
            }
            Split::Interest(interest) => {
                self.closed += interest;
                self.interest += interest;
                legs.push((side.interest_action(), interest, self.totals()));
            }
            Split::Straddle { principal, interest } => {
                self.closed += principal;
                legs.push((side.principal_action(), principal, self.totals()));
                self.closed += interest;
                self.interest += interest;
                legs.push((side.interest_action(), interest, self.totals()));
            }
        }

        legs
    }
}

/// Token naming rules from configuration
#[derive(Debug, Clone)]
pub struct TokenRules {
    receipt_tokens: HashSet<String>,
    variable_debt: Regex,
}

impl TokenRules {
    pub fn new<I, S>(receipt_tokens: I, variable_debt_pattern: &str) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let variable_debt = Regex::new(variable_debt_pattern).map_err(|e| {
            LedgerError::Configuration(format!("Invalid variable debt pattern: {}", e))
        })?;

        Ok(Self {
            receipt_tokens: receipt_tokens.into_iter().map(Into::into).collect(),
            variable_debt,
        })
    }

    pub fn from_config(config: &TokenConfig) -> Result<Self> {
        Self::new(config.receipt_tokens.iter().cloned(), &config.variable_debt_pattern)
    }

    pub fn is_receipt_token(&self, symbol: &str) -> bool {
        self.receipt_tokens.contains(symbol)
    }

    pub fn is_variable_debt(&self, symbol: &str) -> bool {
        self.variable_debt.is_match(symbol)
    }
}

/// Which party the amount is positive for
#[derive(Debug, Clone, Copy)]
enum Flow {
    /// positive when the wallet sent the transaction
    Outgoing,
    /// positive when the wallet received the token
    Incoming,
}

fn signed_amount(transfer: &Transfer, flow: Flow) -> Result<Decimal> {
    let sent = transfer.is_sent_by_wallet();
    let received = transfer.is_received_by_wallet();
    let amount = transfer.amount_fixed;

    let (primary, secondary) = match flow {
        Flow::Outgoing => (sent, received),
        Flow::Incoming => (received, sent),
    };

    if primary {
        Ok(amount)
    } else if secondary {
        Ok(-amount)
    } else {
        Err(LedgerError::DirectionAmbiguity {
            hash: transfer.hash.clone(),
            wallet: transfer.wallet.clone(),
        })
    }
}

/// Replay one (wallet, pool, token) group in chronological order and emit
/// the classified rows. Transfers must already be sorted by datetime.
pub fn process_group(transfers: &[Transfer], rules: &TokenRules) -> Result<Vec<ClassifiedTransaction>> {
    let mut collateral = Accumulator::new();
    let mut debt = Accumulator::new();
    let mut rows = Vec::with_capacity(transfers.len());

    for (i, transfer) in transfers.iter().enumerate() {
        if i > 0 && transfer.datetime < transfers[i - 1].datetime {
            return Err(LedgerError::UnorderedGroup {
                hash: transfer.hash.clone(),
            });
        }

        let action = TransferAction::of(transfer)?;
        let receipt = rules.is_receipt_token(&transfer.token_symbol);

        // Receipt tokens move opposite to the underlying: minting one on a
        // deposit opens the debt side, burning one on a withdraw closes it.
        let (side, opening, flow) = match (action, receipt) {
            (TransferAction::Deposit, false) => (Side::Collateral, true, Flow::Outgoing),
            (TransferAction::Withdraw, false) => (Side::Collateral, false, Flow::Incoming),
            (TransferAction::Deposit, true) | (TransferAction::Borrow, _) => {
                (Side::Debt, true, Flow::Incoming)
            }
            (TransferAction::Withdraw, true) | (TransferAction::Repay, _) => {
                (Side::Debt, false, Flow::Outgoing)
            }
        };

        let amount = signed_amount(transfer, flow)?;
        // totals follow the method called, not the side the row is booked on
        let accumulator = match action {
            TransferAction::Deposit | TransferAction::Withdraw => &mut collateral,
            TransferAction::Borrow | TransferAction::Repay => &mut debt,
        };

        if opening {
            let totals = accumulator.open(amount);
            rows.push(ClassifiedTransaction::from_transfer(
                transfer,
                side.open_action(),
                amount,
                Some(totals),
            ));
        } else {
            for (leg_action, leg_amount, totals) in accumulator.close(side, amount) {
                rows.push(ClassifiedTransaction::from_transfer(
                    transfer,
                    leg_action,
                    leg_amount,
                    Some(totals),
                ));
            }
        }

        if !accumulator.holds_invariants() {
            warn!(
                "Balance invariants broken after {} on {:?} side: {:?}",
                transfer.hash,
                side,
                accumulator.totals()
            );
        }
    }

    debug!(
        "Replayed {} transfers into {} rows (collateral {:?}, debt {:?})",
        transfers.len(),
        rows.len(),
        collateral.totals(),
        debt.totals()
    );

    Ok(rows)
}
