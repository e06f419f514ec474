pub mod account_splitter;
pub mod balance_tracker;
pub mod dummy_income;
pub mod gas_fees;
pub mod ledger_engine;
pub mod pool_filter;
pub mod staking_rewards;
pub mod views;

pub use account_splitter::{partition_by_account, AccountBatch};
pub use balance_tracker::{process_group, Accumulator, Side, Split, TokenRules};
pub use dummy_income::synthesize_dummy_income;
pub use gas_fees::{extract_gas_fees, GasFeeExtraction};
pub use ledger_engine::{GroupFailure, LedgerEngine, LedgerReport, ReportMetadata};
pub use pool_filter::PoolFilter;
pub use staking_rewards::track_rewards_group;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Transfer {hash} is neither to nor from wallet {wallet}")]
    DirectionAmbiguity { hash: String, wallet: String },
    #[error("Transfer {hash} has unrecognized action '{action}'")]
    UnclassifiedAction { hash: String, action: String },
    #[error("Transfer {hash} is earlier than the transfer before it in its group")]
    UnorderedGroup { hash: String },
    #[error("Unknown chain: {0}")]
    UnknownChain(String),
    #[error("Partitioned {actual} rows but expected {expected}")]
    PartitionMismatch { expected: usize, actual: usize },
    #[error("Calculation error: {0}")]
    Calculation(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Worker error: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// One normalized on-chain value movement involving a tracked wallet, as
/// produced by the transfer normalizer. Field names follow the feed columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transfer {
    /// Transaction hash
    pub hash: String,

    /// Block time, the chronological key
    #[serde(with = "feed_datetime")]
    pub datetime: DateTime<Utc>,

    /// Wallet whose activity is tracked
    pub wallet: String,

    /// Account name of the wallet (may be blank in the feed)
    #[serde(default)]
    pub wallet_name: String,

    /// Counterparty pool or contract (the transaction's `to`)
    pub to: String,

    #[serde(rename = "tokenSymbol")]
    pub token_symbol: String,

    pub chain: String,

    /// Decimal-adjusted amount, unsigned as it comes from the feed
    pub amount_fixed: Decimal,

    /// Transaction sender
    pub from: String,

    /// Token leg sender
    #[serde(rename = "transferFrom")]
    pub transfer_from: String,

    /// Token leg recipient
    #[serde(rename = "transferTo")]
    pub transfer_to: String,

    /// Method name parsed from call data
    pub action: String,

    #[serde(rename = "gasPrice", default)]
    pub gas_price: Option<Decimal>,

    #[serde(rename = "gasUsed", default)]
    pub gas_used: Option<Decimal>,
}

impl Transfer {
    /// Lower-cased counterparty address
    pub fn pool(&self) -> String {
        self.to.to_lowercase()
    }

    pub fn is_sent_by_wallet(&self) -> bool {
        addresses_match(&self.from, &self.wallet)
    }

    pub fn is_received_by_wallet(&self) -> bool {
        addresses_match(&self.transfer_to, &self.wallet)
    }
}

/// Raw lending method recognized on a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferAction {
    Deposit,
    Withdraw,
    Borrow,
    Repay,
}

impl TransferAction {
    /// Accepts a bare method name or a full signature like `deposit(address,uint256)`
    pub fn from_function_name(name: &str) -> Option<Self> {
        let method = name.split('(').next().unwrap_or_default().trim();
        match method {
            "deposit" | "depositETH" | "supply" | "supplyETH" => Some(Self::Deposit),
            "withdraw" | "withdrawETH" => Some(Self::Withdraw),
            "borrow" | "borrowETH" => Some(Self::Borrow),
            "repay" | "repayETH" => Some(Self::Repay),
            _ => None,
        }
    }

    pub fn of(transfer: &Transfer) -> Result<Self> {
        Self::from_function_name(&transfer.action).ok_or_else(|| LedgerError::UnclassifiedAction {
            hash: transfer.hash.clone(),
            action: transfer.action.clone(),
        })
    }
}

/// Refined action carried by an output row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    Deposit,
    Borrow,
    WithdrawPrincipal,
    WithdrawInterest,
    RepayPrincipal,
    RepayInterest,
    DummyIncome,
    GasFee,
}

impl LedgerAction {
    pub fn category(&self) -> Category {
        match self {
            Self::Deposit | Self::WithdrawPrincipal | Self::WithdrawInterest => Category::Collateral,
            Self::Borrow | Self::RepayPrincipal | Self::RepayInterest => Category::Debt,
            Self::DummyIncome | Self::GasFee => Category::Synthetic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Borrow => "borrow",
            Self::WithdrawPrincipal => "withdraw_principal",
            Self::WithdrawInterest => "withdraw_interest",
            Self::RepayPrincipal => "repay_principal",
            Self::RepayInterest => "repay_interest",
            Self::DummyIncome => "dummy_income",
            Self::GasFee => "gas_fee",
        }
    }
}

impl fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presentation bucket; serialized as 0, 1, 2
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Collateral,
    Debt,
    Synthetic,
}

impl Category {
    pub fn code(&self) -> u8 {
        match self {
            Self::Collateral => 0,
            Self::Debt => 1,
            Self::Synthetic => 2,
        }
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Snapshot of one side's accumulators at emission time. `opened` is total
/// deposits (or borrows), `closed` total withdrawals (or repayments).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunningTotals {
    pub opened: Decimal,
    pub closed: Decimal,
    pub interest: Decimal,
}

/// Output row; created once, never mutated after emission
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedTransaction {
    pub token_symbol: String,
    pub hash: String,
    pub datetime: DateTime<Utc>,
    pub action: LedgerAction,
    pub from: String,
    pub transfer_from: String,
    pub transfer_to: String,
    pub amount: Decimal,
    /// None for gas fee rows
    pub totals: Option<RunningTotals>,
    pub wallet: String,
    pub wallet_name: String,
    pub pool: String,
    pub chain: String,
    pub category: Category,
    /// Method name the row was derived from
    pub source_action: String,
}

impl ClassifiedTransaction {
    /// Column names of the running totals, by the side the row was booked on.
    /// Dummy income mirrors a repayment and keeps its debt columns.
    pub fn totals_columns(&self) -> [&'static str; 3] {
        match self.action {
            LedgerAction::Deposit | LedgerAction::WithdrawPrincipal | LedgerAction::WithdrawInterest => {
                ["total_deposits", "total_withdraws", "total_deposit_interest"]
            }
            _ => ["total_borrows", "total_repayments", "total_borrow_interest"],
        }
    }

    pub fn from_transfer(
        transfer: &Transfer,
        action: LedgerAction,
        amount: Decimal,
        totals: Option<RunningTotals>,
    ) -> Self {
        Self {
            token_symbol: transfer.token_symbol.clone(),
            hash: transfer.hash.clone(),
            datetime: transfer.datetime,
            action,
            from: transfer.from.clone(),
            transfer_from: transfer.transfer_from.clone(),
            transfer_to: transfer.transfer_to.clone(),
            amount,
            totals,
            wallet: transfer.wallet.clone(),
            wallet_name: transfer.wallet_name.clone(),
            pool: transfer.pool(),
            chain: transfer.chain.clone(),
            category: action.category(),
            source_action: transfer.action.clone(),
        }
    }
}

/// Flat row as handed to the report formatter. Gas fee rows carry no totals.
impl Serialize for ClassifiedTransaction {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut row = serializer.serialize_map(None)?;
        row.serialize_entry("tokenSymbol", &self.token_symbol)?;
        row.serialize_entry("hash", &self.hash)?;
        row.serialize_entry("datetime", &self.datetime.to_rfc3339())?;
        row.serialize_entry("action", &self.action)?;
        row.serialize_entry("from", &self.from)?;
        row.serialize_entry("transfer_from", &self.transfer_from)?;
        row.serialize_entry("transfer_to", &self.transfer_to)?;
        row.serialize_entry("amount", &self.amount)?;

        if let Some(totals) = &self.totals {
            let [opened, closed, interest] = self.totals_columns();
            row.serialize_entry(opened, &totals.opened)?;
            row.serialize_entry(closed, &totals.closed)?;
            row.serialize_entry(interest, &totals.interest)?;
        }

        row.serialize_entry("wallet", &self.wallet)?;
        row.serialize_entry("wallet_name", &self.wallet_name)?;
        row.serialize_entry("pool", &self.pool)?;
        row.serialize_entry("chain", &self.chain)?;
        row.serialize_entry("category", &self.category)?;
        row.end()
    }
}

/// Unit of balance isolation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub wallet: String,
    pub pool: String,
    pub token_symbol: String,
}

impl GroupKey {
    pub fn of(transfer: &Transfer) -> Self {
        Self {
            wallet: transfer.wallet.to_lowercase(),
            pool: transfer.pool(),
            token_symbol: transfer.token_symbol.clone(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.wallet, self.pool, self.token_symbol)
    }
}

pub fn addresses_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Order rows by (wallet, chain, pool, tokenSymbol, category, datetime).
/// The sort is stable, so rows with equal keys keep emission order.
pub fn sort_for_presentation(rows: &mut [ClassifiedTransaction]) {
    rows.sort_by(|a, b| {
        a.wallet
            .cmp(&b.wallet)
            .then_with(|| a.chain.cmp(&b.chain))
            .then_with(|| a.pool.cmp(&b.pool))
            .then_with(|| a.token_symbol.cmp(&b.token_symbol))
            .then_with(|| a.category.cmp(&b.category))
            .then_with(|| a.datetime.cmp(&b.datetime))
    });
}

/// Feed timestamps: RFC 3339, `YYYY-MM-DD HH:MM:SS` (taken as UTC) or unix seconds
pub mod feed_datetime {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }

        for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return Some(Utc.from_utc_datetime(&naive));
            }
        }

        raw.parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    pub fn serialize<S: Serializer>(
        dt: &DateTime<Utc>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("unrecognized datetime: {}", raw)))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::str::FromStr;

    pub const WALLET: &str = "0x00000000000000000000000000000000000000aa";
    pub const POOL: &str = "0x794a61358d6845594f94dc1db02a252b5b4814ad";

    pub fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    pub fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_650_000_000 + secs, 0).unwrap()
    }

    /// Transfer from the wallet into the pool
    pub fn outgoing(hash: &str, secs: i64, action: &str, token: &str, amount: &str) -> Transfer {
        Transfer {
            hash: hash.to_string(),
            datetime: at(secs),
            wallet: WALLET.to_string(),
            wallet_name: "ops".to_string(),
            to: POOL.to_string(),
            token_symbol: token.to_string(),
            chain: "polygon".to_string(),
            amount_fixed: dec(amount),
            from: WALLET.to_string(),
            transfer_from: WALLET.to_string(),
            transfer_to: POOL.to_string(),
            action: action.to_string(),
            gas_price: Some(dec("30000000000")),
            gas_used: Some(dec("200000")),
        }
    }

    /// Transfer sent by the wallet that lands back in the wallet
    pub fn incoming(hash: &str, secs: i64, action: &str, token: &str, amount: &str) -> Transfer {
        Transfer {
            transfer_from: POOL.to_string(),
            transfer_to: WALLET.to_string(),
            ..outgoing(hash, secs, action, token, amount)
        }
    }
}
