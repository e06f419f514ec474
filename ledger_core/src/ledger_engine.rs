use chrono::{DateTime, Utc};
use config_manager::{ChainConfig, SystemConfig};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    balance_tracker::{process_group, TokenRules},
    dummy_income::synthesize_dummy_income,
    gas_fees::extract_gas_fees,
    pool_filter::PoolFilter,
    sort_for_presentation,
    staking_rewards::track_rewards_group,
    ClassifiedTransaction, GroupKey, LedgerError, Result, Transfer,
};

/// A group whose replay failed; its rows are absent from the report
#[derive(Debug, Clone, PartialEq)]
pub struct GroupFailure {
    pub group: GroupKey,
    pub error: LedgerError,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub generated_at: DateTime<Utc>,
    pub transfers_received: usize,
    pub pool_transfers: usize,
    pub groups_processed: usize,
    pub rows_emitted: usize,
    pub analysis_duration_seconds: f64,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LedgerReport {
    /// Classified rows in presentation order
    pub rows: Vec<ClassifiedTransaction>,
    pub failures: Vec<GroupFailure>,
    pub metadata: ReportMetadata,
}

impl LedgerReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

type GroupOutcome = (GroupKey, Result<Vec<ClassifiedTransaction>>);

/// Splits lending and staking transfers into classified ledger rows
pub struct LedgerEngine {
    pools: PoolFilter,
    staking: PoolFilter,
    rules: Arc<TokenRules>,
    chains: BTreeMap<String, ChainConfig>,
    /// lower-cased wallet address -> account name
    wallet_names: HashMap<String, String>,
}

impl LedgerEngine {
    pub fn from_config(config: &SystemConfig) -> Result<Self> {
        Ok(Self {
            pools: PoolFilter::new(config.all_pool_addresses()),
            staking: PoolFilter::new(&config.staking.contracts),
            rules: Arc::new(TokenRules::from_config(&config.tokens)?),
            chains: config.chains.clone(),
            wallet_names: config
                .wallets
                .iter()
                .map(|w| (w.address.to_lowercase(), w.name.clone()))
                .collect(),
        })
    }

    /// Classify the lending pool transfers of a feed
    pub fn run(&self, transfers: &[Transfer]) -> Result<LedgerReport> {
        let start_time = Instant::now();
        info!("Starting ledger run over {} transfers", transfers.len());

        let (pool_transfers, mut warnings) = self.prepare(transfers, &self.pools);
        let gas = extract_gas_fees(&pool_transfers, &self.chains)?;
        warnings.extend(gas.warnings);

        let outcomes: Vec<GroupOutcome> = group_by_key(&pool_transfers)
            .into_iter()
            .map(|(key, group)| {
                let result = process_group(&group, &self.rules);
                (key, result)
            })
            .collect();

        Ok(self.assemble(
            start_time,
            transfers.len(),
            pool_transfers.len(),
            gas.rows,
            outcomes,
            warnings,
            true,
        ))
    }

    /// Same as [`run`](Self::run), replaying each group on a blocking worker.
    /// Groups share no state, so the output is identical.
    pub async fn run_parallel(&self, transfers: Vec<Transfer>) -> Result<LedgerReport> {
        let start_time = Instant::now();
        info!("Starting parallel ledger run over {} transfers", transfers.len());

        let (pool_transfers, mut warnings) = self.prepare(&transfers, &self.pools);
        let gas = extract_gas_fees(&pool_transfers, &self.chains)?;
        warnings.extend(gas.warnings);

        let (keys, handles): (Vec<_>, Vec<_>) = group_by_key(&pool_transfers)
            .into_iter()
            .map(|(key, group)| {
                let rules = Arc::clone(&self.rules);
                let handle = tokio::task::spawn_blocking(move || process_group(&group, &rules));
                (key, handle)
            })
            .unzip();

        let mut outcomes = Vec::with_capacity(keys.len());
        for (key, joined) in keys.into_iter().zip(join_all(handles).await) {
            let result = joined.map_err(|e| LedgerError::Worker(e.to_string()))?;
            outcomes.push((key, result));
        }

        Ok(self.assemble(
            start_time,
            transfers.len(),
            pool_transfers.len(),
            gas.rows,
            outcomes,
            warnings,
            true,
        ))
    }

    /// Classify the yield and staking contract transfers of a feed
    pub fn run_rewards(&self, transfers: &[Transfer]) -> Result<LedgerReport> {
        let start_time = Instant::now();
        info!("Starting rewards run over {} transfers", transfers.len());

        let (staking_transfers, mut warnings) = self.prepare(transfers, &self.staking);
        let gas = extract_gas_fees(&staking_transfers, &self.chains)?;
        warnings.extend(gas.warnings);

        let outcomes: Vec<GroupOutcome> = group_by_key(&staking_transfers)
            .into_iter()
            .map(|(key, group)| {
                let result = track_rewards_group(&group);
                (key, result)
            })
            .collect();

        Ok(self.assemble(
            start_time,
            transfers.len(),
            staking_transfers.len(),
            gas.rows,
            outcomes,
            warnings,
            false,
        ))
    }

    /// Filter to the given contracts and fill in missing account names
    fn prepare(&self, transfers: &[Transfer], filter: &PoolFilter) -> (Vec<Transfer>, Vec<String>) {
        let mut kept = filter.filter(transfers);
        let mut unnamed = BTreeSet::new();

        for transfer in kept.iter_mut().filter(|t| t.wallet_name.trim().is_empty()) {
            match self.wallet_names.get(&transfer.wallet.to_lowercase()) {
                Some(name) => transfer.wallet_name = name.clone(),
                None => {
                    unnamed.insert(transfer.wallet.to_lowercase());
                }
            }
        }

        let warnings = unnamed
            .into_iter()
            .map(|wallet| {
                let warning = format!("No account name configured for wallet {}", wallet);
                warn!("{}", warning);
                warning
            })
            .collect();

        (kept, warnings)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        start_time: Instant,
        transfers_received: usize,
        matched_transfers: usize,
        gas_rows: Vec<ClassifiedTransaction>,
        outcomes: Vec<GroupOutcome>,
        mut warnings: Vec<String>,
        with_dummy_income: bool,
    ) -> LedgerReport {
        let groups_processed = outcomes.len();
        let mut rows = gas_rows;
        let mut failures = Vec::new();
        let mut group_rows = Vec::new();

        for (key, result) in outcomes {
            match result {
                Ok(classified) => {
                    debug!("Group {} produced {} rows", key, classified.len());
                    group_rows.extend(classified);
                }
                Err(error) => {
                    let warning = format!("Failed to replay group {}: {}", key, error);
                    warn!("{}", warning);
                    warnings.push(warning);
                    failures.push(GroupFailure { group: key, error });
                }
            }
        }

        let dummies = if with_dummy_income {
            synthesize_dummy_income(&group_rows, &self.rules)
        } else {
            Vec::new()
        };

        rows.extend(group_rows);
        rows.extend(dummies);
        sort_for_presentation(&mut rows);

        let analysis_duration = start_time.elapsed().as_secs_f64();
        info!(
            "Ledger run complete: {} transfers in, {} matched, {} groups, {} rows out, {} failures in {:.2}s",
            transfers_received,
            matched_transfers,
            groups_processed,
            rows.len(),
            failures.len(),
            analysis_duration
        );

        LedgerReport {
            metadata: ReportMetadata {
                generated_at: Utc::now(),
                transfers_received,
                pool_transfers: matched_transfers,
                groups_processed,
                rows_emitted: rows.len(),
                analysis_duration_seconds: analysis_duration,
                warnings,
            },
            rows,
            failures,
        }
    }
}

/// Groups in first-appearance order of their key; each group is stably
/// sorted by datetime so feed order breaks ties.
fn group_by_key(transfers: &[Transfer]) -> Vec<(GroupKey, Vec<Transfer>)> {
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut groups: Vec<(GroupKey, Vec<Transfer>)> = Vec::new();

    for transfer in transfers {
        let key = GroupKey::of(transfer);
        match index.get(&key) {
            Some(&i) => groups[i].1.push(transfer.clone()),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![transfer.clone()]));
            }
        }
    }

    for (_, group) in groups.iter_mut() {
        group.sort_by_key(|t| t.datetime);
    }

    groups
}
