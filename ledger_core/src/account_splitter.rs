use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use crate::dummy_income::DUMMY_HASH_SUFFIX;
use crate::{ClassifiedTransaction, LedgerError, Result};

/// Hashes per entry of an account's hash list
pub const HASH_GROUP_SIZE: usize = 20;

/// Rows of one (wallet_name, chain) account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountBatch {
    pub wallet_name: String,
    pub chain: String,
    pub rows: Vec<ClassifiedTransaction>,
    /// Distinct real transaction hashes, comma-joined in chunks
    pub hash_groups: Vec<String>,
}

fn hash_groups(rows: &[ClassifiedTransaction]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut hashes: Vec<&str> = Vec::new();
    for row in rows {
        if row.hash.ends_with(DUMMY_HASH_SUFFIX) || !seen.insert(&row.hash) {
            continue;
        }
        hashes.push(&row.hash);
    }

    hashes
        .chunks(HASH_GROUP_SIZE)
        .map(|chunk| chunk.join(","))
        .collect()
}

/// Split rows into per-account batches, wallet names and chains taken in
/// order of first appearance. Row order inside a batch is preserved.
pub fn partition_by_account(rows: &[ClassifiedTransaction]) -> Result<Vec<AccountBatch>> {
    let mut wallet_names: Vec<&str> = Vec::new();
    let mut chains: Vec<&str> = Vec::new();
    for row in rows {
        if !wallet_names.contains(&row.wallet_name.as_str()) {
            wallet_names.push(&row.wallet_name);
        }
        if !chains.contains(&row.chain.as_str()) {
            chains.push(&row.chain);
        }
    }

    let mut batches = Vec::new();
    for wallet_name in &wallet_names {
        for chain in &chains {
            let account_rows: Vec<ClassifiedTransaction> = rows
                .iter()
                .filter(|row| row.wallet_name == *wallet_name && row.chain == *chain)
                .cloned()
                .collect();

            if account_rows.is_empty() {
                continue;
            }

            debug!("Account {} on {}: {} rows", wallet_name, chain, account_rows.len());
            batches.push(AccountBatch {
                wallet_name: wallet_name.to_string(),
                chain: chain.to_string(),
                hash_groups: hash_groups(&account_rows),
                rows: account_rows,
            });
        }
    }

    let actual: usize = batches.iter().map(|b| b.rows.len()).sum();
    if actual != rows.len() {
        return Err(LedgerError::PartitionMismatch {
            expected: rows.len(),
            actual,
        });
    }

    Ok(batches)
}
