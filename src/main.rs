use anyhow::{bail, Context, Result};
use config_manager::ConfigManager;
use ledger_core::{partition_by_account, AccountBatch, LedgerEngine, LedgerReport, Transfer};
use std::fs::{self, File};
use std::path::Path;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConfigManager::new()
        .context("Failed to load configuration")?
        .into_config();

    let default_filter = if config.system.debug_mode {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    info!("Starting lending ledger split");
    debug!("Configuration: {}", config.to_json_value());

    let transfers = read_transfers(&config.io.transfers_path)?;
    let engine = LedgerEngine::from_config(&config).context("Failed to build ledger engine")?;

    let lending = if config.system.parallel_groups {
        engine.run_parallel(transfers.clone()).await?
    } else {
        engine.run(&transfers)?
    };
    ensure_complete(&lending)?;

    let rewards = engine.run_rewards(&transfers)?;
    ensure_complete(&rewards)?;

    let output_dir = Path::new(&config.io.output_dir);
    write_accounts(output_dir, &partition_by_account(&lending.rows)?)?;
    write_accounts(&output_dir.join("rewards"), &partition_by_account(&rewards.rows)?)?;

    info!(
        "Wrote {} lending rows and {} reward rows to {}",
        lending.rows.len(),
        rewards.rows.len(),
        output_dir.display()
    );

    Ok(())
}

fn read_transfers(path: &str) -> Result<Vec<Transfer>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("Failed to open transfer feed {}", path))?;

    let mut transfers = Vec::new();
    for (line, record) in reader.deserialize().enumerate() {
        let transfer: Transfer =
            record.with_context(|| format!("Malformed transfer on row {} of {}", line + 1, path))?;
        transfers.push(transfer);
    }

    info!("Loaded {} transfers from {}", transfers.len(), path);
    Ok(transfers)
}

/// Partial output would silently misstate balances
fn ensure_complete(report: &LedgerReport) -> Result<()> {
    if report.is_complete() {
        return Ok(());
    }

    for failure in &report.failures {
        error!("Group {} failed: {}", failure.group, failure.error);
    }
    bail!("{} transaction groups could not be classified", report.failures.len())
}

fn write_accounts(dir: &Path, batches: &[AccountBatch]) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    for batch in batches {
        let path = dir.join(format!("{}_{}.json", batch.wallet_name, batch.chain));
        let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, &batch.rows)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("{}: {} rows", path.display(), batch.rows.len());
    }

    let hash_lists: Vec<_> = batches
        .iter()
        .map(|batch| {
            serde_json::json!({
                "wallet_name": batch.wallet_name,
                "chain": batch.chain,
                "hashes": batch.hash_groups,
            })
        })
        .collect();
    let path = dir.join("hash_list.json");
    let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, &hash_lists)?;

    Ok(())
}
