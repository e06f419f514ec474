use config_manager::{ChainConfig, MAX_TOKEN_DECIMALS};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::{ClassifiedTransaction, LedgerAction, LedgerError, Result, Transfer};

/// Gas is booked as sent to this address; it is not a real burn
pub const GAS_SINK_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Debug, Clone, Default)]
pub struct GasFeeExtraction {
    pub rows: Vec<ClassifiedTransaction>,
    pub warnings: Vec<String>,
}

/// `raw / 10^decimals`
pub fn scale_down(raw: Decimal, decimals: u32) -> Result<Decimal> {
    if decimals > MAX_TOKEN_DECIMALS {
        return Err(LedgerError::Calculation(format!(
            "Cannot scale by 10^{}, at most {} decimals",
            decimals, MAX_TOKEN_DECIMALS
        )));
    }

    let divisor = Decimal::from_i128_with_scale(10i128.pow(decimals), 0);
    raw.checked_div(divisor)
        .ok_or_else(|| LedgerError::Calculation(format!("Cannot scale {} by 10^{}", raw, decimals)))
}

fn fee_for(transfer: &Transfer, chain: &ChainConfig) -> Result<Option<Decimal>> {
    match (transfer.gas_price, transfer.gas_used) {
        (Some(price), Some(used)) => {
            let raw = price.checked_mul(used).ok_or_else(|| {
                LedgerError::Calculation(format!(
                    "Gas overflow for {}: {} * {}",
                    transfer.hash, price, used
                ))
            })?;
            scale_down(raw, chain.base_token_decimals).map(Some)
        }
        _ => Ok(None),
    }
}

/// One `gas_fee` row per distinct transaction hash, in first-appearance
/// order. The fee comes from the first leg of the hash that carries gas data.
pub fn extract_gas_fees(
    transfers: &[Transfer],
    chains: &BTreeMap<String, ChainConfig>,
) -> Result<GasFeeExtraction> {
    let mut order: Vec<&Transfer> = Vec::new();
    let mut fees: HashMap<&str, Option<Decimal>> = HashMap::new();

    for transfer in transfers {
        let chain = chains
            .get(&transfer.chain)
            .ok_or_else(|| LedgerError::UnknownChain(transfer.chain.clone()))?;

        match fees.get(transfer.hash.as_str()) {
            None => {
                order.push(transfer);
                fees.insert(&transfer.hash, fee_for(transfer, chain)?);
            }
            Some(None) => {
                fees.insert(&transfer.hash, fee_for(transfer, chain)?);
            }
            Some(Some(_)) => {}
        }
    }

    let mut extraction = GasFeeExtraction::default();
    for first_leg in order {
        // chains were resolved above for every transfer
        let Some(chain) = chains.get(&first_leg.chain) else {
            continue;
        };

        let fee = match fees.get(first_leg.hash.as_str()).copied().flatten() {
            Some(fee) => fee,
            None => {
                let warning = format!("No gas data for transaction {}, booking zero fee", first_leg.hash);
                warn!("{}", warning);
                extraction.warnings.push(warning);
                Decimal::ZERO
            }
        };

        let mut row = ClassifiedTransaction::from_transfer(first_leg, LedgerAction::GasFee, fee, None);
        row.token_symbol = chain.base_token_symbol.clone();
        row.transfer_from = first_leg.from.clone();
        row.transfer_to = GAS_SINK_ADDRESS.to_string();
        extraction.rows.push(row);
    }

    debug!(
        "Extracted {} gas fee rows from {} transfers",
        extraction.rows.len(),
        transfers.len()
    );

    Ok(extraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use config_manager::SystemConfig;

    fn chains() -> BTreeMap<String, ChainConfig> {
        SystemConfig::default().chains
    }

    #[test]
    fn one_row_per_hash() {
        // native leg and token leg of the same transaction
        let native = outgoing("0xfee", 0, "depositETH", "MATIC", "10");
        let token = incoming("0xfee", 0, "depositETH", "amWMATIC", "10");
        let other = outgoing("0xother", 30, "deposit", "USDC", "1");

        let extraction = extract_gas_fees(&[native, token, other], &chains()).unwrap();

        assert_eq!(extraction.rows.len(), 2);
        let fee = &extraction.rows[0];
        assert_eq!(fee.hash, "0xfee");
        assert_eq!(fee.action, LedgerAction::GasFee);
        assert_eq!(fee.token_symbol, "MATIC");
        // 30 gwei * 200k gas
        assert_eq!(fee.amount, dec("0.006"));
        assert_eq!(fee.transfer_from, WALLET);
        assert_eq!(fee.transfer_to, GAS_SINK_ADDRESS);
        assert_eq!(fee.pool, POOL);
        assert!(fee.totals.is_none());
        assert!(extraction.warnings.is_empty());
    }

    #[test]
    fn takes_gas_from_first_leg_with_data() {
        let mut internal = incoming("0xabc", 0, "withdrawETH", "MATIC", "1");
        internal.gas_price = None;
        internal.gas_used = None;
        let mut token = outgoing("0xabc", 0, "withdrawETH", "amWMATIC", "1");
        token.gas_price = Some(dec("1000000000"));
        token.gas_used = Some(dec("21000"));

        let extraction = extract_gas_fees(&[internal, token], &chains()).unwrap();

        assert_eq!(extraction.rows.len(), 1);
        assert_eq!(extraction.rows[0].amount, dec("0.000021"));
        // row identity still comes from the first leg
        assert_eq!(extraction.rows[0].source_action, "withdrawETH");
    }

    #[test]
    fn missing_gas_books_zero_with_warning() {
        let mut leg = outgoing("0xnogas", 0, "deposit", "USDC", "1");
        leg.gas_used = None;

        let extraction = extract_gas_fees(&[leg], &chains()).unwrap();
        assert_eq!(extraction.rows[0].amount, Decimal::ZERO);
        assert_eq!(extraction.warnings.len(), 1);
    }

    #[test]
    fn unknown_chain_is_an_error() {
        let mut leg = outgoing("0x1", 0, "deposit", "USDC", "1");
        leg.chain = "harmony".to_string();

        assert_eq!(
            extract_gas_fees(&[leg], &chains()).unwrap_err(),
            LedgerError::UnknownChain("harmony".to_string())
        );
    }

    #[test]
    fn scales_by_decimals() {
        assert_eq!(scale_down(dec("1500000"), 6).unwrap(), dec("1.5"));
        assert_eq!(scale_down(dec("1"), 18).unwrap(), dec("0.000000000000000001"));
        assert!(scale_down(dec("1"), 29).is_err());
    }
}
