use std::collections::HashSet;
use tracing::debug;

use crate::Transfer;

/// Case-insensitive set of pool / contract addresses
#[derive(Debug, Clone, Default)]
pub struct PoolFilter {
    pools: HashSet<String>,
}

impl PoolFilter {
    pub fn new<I, S>(pools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            pools: pools
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .collect(),
        }
    }

    pub fn contains(&self, address: &str) -> bool {
        self.pools.contains(&address.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Keep the transfers whose counterparty is one of the pools, in input order
    pub fn filter(&self, transfers: &[Transfer]) -> Vec<Transfer> {
        let kept: Vec<Transfer> = transfers
            .iter()
            .filter(|t| self.contains(&t.to))
            .cloned()
            .collect();

        debug!(
            "Pool filter kept {} of {} transfers ({} pools)",
            kept.len(),
            transfers.len(),
            self.pools.len()
        );

        kept
    }
}
