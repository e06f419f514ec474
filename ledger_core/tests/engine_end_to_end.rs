//! Drives the ledger engine over a small two-account feed as the normalizer
//! writes it.

use config_manager::{SystemConfig, WalletConfig};
use ledger_core::views::split_transactions;
use ledger_core::{partition_by_account, LedgerAction, LedgerEngine, LedgerError, Transfer};
use rust_decimal::Decimal;
use std::str::FromStr;

const OPS: &str = "0x1000000000000000000000000000000000000001";
const TREASURY: &str = "0x2000000000000000000000000000000000000002";
const POLYGON_GATEWAY: &str = "0xbeadf48d62acc944a06eeae0a9054a90e5a7dc97";
const MAINNET_POOL: &str = "0x7d2768de32b0b80b7a3454c06bdac94a69ddc7a9";
const ZERO: &str = "0x0000000000000000000000000000000000000000";

fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

#[allow(clippy::too_many_arguments)]
fn leg(
    hash: &str,
    datetime: &str,
    wallet: &str,
    to: &str,
    chain: &str,
    token: &str,
    amount: &str,
    transfer_from: &str,
    transfer_to: &str,
    action: &str,
) -> serde_json::Value {
    serde_json::json!({
        "hash": hash,
        "datetime": datetime,
        "wallet": wallet,
        "wallet_name": "",
        "to": to,
        "tokenSymbol": token,
        "chain": chain,
        "amount_fixed": amount,
        "from": wallet,
        "transferFrom": transfer_from,
        "transferTo": transfer_to,
        "action": action,
        "gasPrice": "30000000000",
        "gasUsed": "200000",
    })
}

fn feed() -> Vec<Transfer> {
    let legs = vec![
        // depositETH: native in, receipt token minted back
        leg("0xa1", "2022-04-15 05:20:00", OPS, POLYGON_GATEWAY, "polygon", "MATIC", "100", OPS, POLYGON_GATEWAY, "depositETH(address,address,uint16)"),
        leg("0xa1", "2022-04-15 05:20:00", OPS, POLYGON_GATEWAY, "polygon", "amWMATIC", "100", ZERO, OPS, "depositETH(address,address,uint16)"),
        leg("0xb1", "2022-05-01 10:00:00", TREASURY, MAINNET_POOL, "mainnet", "USDC", "500", TREASURY, MAINNET_POOL, "deposit"),
        // unrelated router call, filtered out
        leg("0xc1", "2022-05-02 10:00:00", OPS, "0x3333333333333333333333333333333333333333", "polygon", "USDC", "7", OPS, "0x3333333333333333333333333333333333333333", "swapExactTokensForTokens"),
        // withdrawETH: native back with interest, receipt token burned
        leg("0xa2", "2022-06-01 08:00:00", OPS, POLYGON_GATEWAY, "polygon", "MATIC", "103", POLYGON_GATEWAY, OPS, "withdrawETH"),
        leg("0xa2", "2022-06-01 08:00:00", OPS, POLYGON_GATEWAY, "polygon", "amWMATIC", "103", OPS, ZERO, "withdrawETH"),
        leg("0xb2", "2022-06-02 09:30:00", TREASURY, MAINNET_POOL, "mainnet", "USDC", "200", MAINNET_POOL, TREASURY, "withdraw"),
    ];

    legs.into_iter()
        .map(|leg| serde_json::from_value(leg).unwrap())
        .collect()
}

fn config() -> SystemConfig {
    let mut config = SystemConfig::default();
    config.wallets = vec![
        WalletConfig {
            name: "ops".to_string(),
            address: OPS.to_string(),
        },
        WalletConfig {
            name: "treasury".to_string(),
            address: TREASURY.to_string(),
        },
    ];
    config
}

#[test]
fn test_full_feed_is_split_per_account() {
    let engine = LedgerEngine::from_config(&config()).unwrap();
    let report = engine.run(&feed()).unwrap();

    assert!(report.is_complete());
    assert_eq!(report.metadata.transfers_received, 7);
    assert_eq!(report.metadata.pool_transfers, 6);
    assert_eq!(report.metadata.groups_processed, 3);
    assert_eq!(report.rows.len(), 13);

    // one gas row per transaction even when it has several legs
    let gas_hashes: Vec<_> = report
        .rows
        .iter()
        .filter(|r| r.action == LedgerAction::GasFee)
        .map(|r| r.hash.as_str())
        .collect();
    assert_eq!(gas_hashes, vec!["0xa1", "0xa2", "0xb1", "0xb2"]);

    let ops: Vec<_> = report
        .rows
        .iter()
        .filter(|r| r.wallet == OPS)
        .map(|r| (r.token_symbol.as_str(), r.action, r.amount))
        .collect();
    assert_eq!(
        ops,
        vec![
            ("MATIC", LedgerAction::Deposit, dec("100")),
            ("MATIC", LedgerAction::WithdrawPrincipal, dec("100")),
            ("MATIC", LedgerAction::WithdrawInterest, dec("3")),
            ("MATIC", LedgerAction::GasFee, dec("0.006")),
            ("MATIC", LedgerAction::GasFee, dec("0.006")),
            ("amWMATIC", LedgerAction::Borrow, dec("100")),
            ("amWMATIC", LedgerAction::RepayPrincipal, dec("100")),
            ("amWMATIC", LedgerAction::RepayInterest, dec("3")),
            ("amWMATIC", LedgerAction::DummyIncome, dec("3")),
        ]
    );

    // blank names were filled from the wallet directory
    assert!(report.rows.iter().all(|r| !r.wallet_name.is_empty()));
    assert!(report.metadata.warnings.is_empty());
}

#[test]
fn test_accounts_partition_the_rows() {
    let engine = LedgerEngine::from_config(&config()).unwrap();
    let report = engine.run(&feed()).unwrap();
    let batches = partition_by_account(&report.rows).unwrap();

    let accounts: Vec<_> = batches
        .iter()
        .map(|b| (b.wallet_name.as_str(), b.chain.as_str(), b.rows.len()))
        .collect();
    assert_eq!(accounts, vec![("ops", "polygon", 9), ("treasury", "mainnet", 4)]);
    assert_eq!(batches[0].hash_groups, vec!["0xa1,0xa2".to_string()]);
    assert_eq!(batches[1].hash_groups, vec!["0xb1,0xb2".to_string()]);
}

#[test]
fn test_split_view_keeps_gas_of_split_transactions() {
    let engine = LedgerEngine::from_config(&config()).unwrap();
    let report = engine.run(&feed()).unwrap();
    let split = split_transactions(&report.rows);

    assert_eq!(split.len(), 8);
    let gas: Vec<_> = split
        .iter()
        .filter(|r| r.action == LedgerAction::GasFee)
        .map(|r| r.hash.as_str())
        .collect();
    assert_eq!(gas, vec!["0xa2", "0xb2"]);
}

#[test]
fn test_bad_group_is_reported_not_fatal() {
    let mut transfers = feed();
    let mut stray: Transfer = serde_json::from_value(leg(
        "0xd1",
        "2022-06-03 00:00:00",
        OPS,
        POLYGON_GATEWAY,
        "polygon",
        "DAI",
        "1",
        POLYGON_GATEWAY,
        TREASURY,
        "withdraw",
    ))
    .unwrap();
    // neither sent by nor delivered to the tracked wallet
    stray.from = TREASURY.to_string();
    transfers.push(stray);

    let engine = LedgerEngine::from_config(&config()).unwrap();
    let report = engine.run(&transfers).unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(
        report.failures[0].error,
        LedgerError::DirectionAmbiguity {
            hash: "0xd1".to_string(),
            wallet: OPS.to_string(),
        }
    );
    assert_eq!(report.metadata.warnings.len(), 1);
    // everything else still classified, plus the stray transaction's gas row
    assert_eq!(report.rows.len(), 14);
}

#[tokio::test]
async fn test_parallel_run_is_identical() {
    let engine = LedgerEngine::from_config(&config()).unwrap();

    let sequential = engine.run(&feed()).unwrap();
    let parallel = engine.run_parallel(feed()).await.unwrap();

    assert_eq!(sequential.rows, parallel.rows);
    assert_eq!(sequential.metadata.groups_processed, parallel.metadata.groups_processed);
}
