use config::{Config, ConfigError, Environment, File};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration loading error: {0}")]
    ConfigLoad(#[from] ConfigError),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;

/// Largest power of ten a `rust_decimal::Decimal` can represent as a divisor.
pub const MAX_TOKEN_DECIMALS: u32 = 28;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// General system settings
    pub system: SystemSettings,

    /// Chain table keyed by chain name (e.g. "polygon")
    pub chains: BTreeMap<String, ChainConfig>,

    /// Tracked wallets
    #[serde(default)]
    pub wallets: Vec<WalletConfig>,

    /// Receipt / debt token naming rules
    pub tokens: TokenConfig,

    /// Yield and staking contracts tracked by flow direction
    pub staking: StakingConfig,

    /// Batch runner input and output locations
    pub io: IoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettings {
    /// Enable debug logging
    pub debug_mode: bool,

    /// Fan out per-group replay across blocking worker tasks
    pub parallel_groups: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// EVM chain id
    pub chain_id: u64,

    /// Native asset name (e.g. "Ether")
    pub base_token_name: String,

    /// Native asset symbol used for gas fee rows
    pub base_token_symbol: String,

    /// Native asset decimals used to scale gasPrice * gasUsed
    pub base_token_decimals: u32,

    /// Lending pool and gateway contracts on this chain
    #[serde(default)]
    pub pools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Human readable account name
    pub name: String,

    /// Wallet address
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Pool receipt tokens whose mint/burn direction is inverse to the
    /// economic deposit/withdraw direction
    #[serde(default)]
    pub receipt_tokens: Vec<String>,

    /// Regex matched against token symbols of variable-rate debt tokens
    pub variable_debt_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingConfig {
    /// Staking / farming contract addresses
    #[serde(default)]
    pub contracts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    /// Normalized transfer feed (CSV)
    pub transfers_path: String,

    /// Directory receiving one JSON document per account
    pub output_dir: String,
}

fn chain(
    chain_id: u64,
    base_token_name: &str,
    base_token_symbol: &str,
    pools: &[&str],
) -> ChainConfig {
    ChainConfig {
        chain_id,
        base_token_name: base_token_name.to_string(),
        base_token_symbol: base_token_symbol.to_string(),
        base_token_decimals: 18,
        pools: pools.iter().map(|p| p.to_string()).collect(),
    }
}

// AAVE v3 uses the same pool address on every chain it is deployed to
const AAVE_V3_POOL: &str = "0x794a61358D6845594F94dc1DB02A252b5b4814aD";

impl Default for SystemConfig {
    fn default() -> Self {
        let mut chains = BTreeMap::new();
        chains.insert(
            "mainnet".to_string(),
            chain(1, "Ether", "ETH", &["0x7d2768de32b0b80b7a3454c06bdac94a69ddc7a9"]),
        );
        chains.insert(
            "polygon".to_string(),
            chain(
                137,
                "Polygon",
                "MATIC",
                &[
                    AAVE_V3_POOL,
                    "0x8dFf5E27EA6b7AC08EbFdf9eB090F32ee9a30fcf", // v2 pool
                    "0xbEadf48d62aCC944a06EEaE0A9054A90E5A7dc97", // v2 WETH gateway
                ],
            ),
        );
        chains.insert(
            "avalanche".to_string(),
            chain(
                43114,
                "Avalanche",
                "AVAX",
                &[
                    AAVE_V3_POOL,
                    "0x4F01AeD16D97E3aB5ab2B501154DC9bb0F1A5A2C", // v2 pool
                    "0x56d0fed06d2e0b5ac80d7a9ed0387694bdf90c33", // Blizz gateway
                ],
            ),
        );
        chains.insert(
            "arbitrum".to_string(),
            chain(42161, "Ether", "ETH", &[AAVE_V3_POOL]),
        );
        chains.insert(
            "optimism".to_string(),
            chain(10, "Optimism", "OP", &[AAVE_V3_POOL]),
        );
        chains.insert(
            "fantom".to_string(),
            chain(
                250,
                "Fantom",
                "FTM",
                &[
                    AAVE_V3_POOL,
                    "0x47102245fea0f8d35a6b28e54505e9ffd83d0704", // Geist gateway
                ],
            ),
        );
        chains.insert("binance".to_string(), chain(56, "Binance Coin", "BNB", &[]));
        chains.insert("gnosis".to_string(), chain(100, "Gnosis", "xDai", &[]));
        chains.insert("aurora".to_string(), chain(1313161554, "Ether", "ETH", &[]));

        Self {
            system: SystemSettings {
                debug_mode: false,
                parallel_groups: false,
            },
            chains,
            wallets: Vec::new(), // Must be set in config.toml
            tokens: TokenConfig {
                receipt_tokens: [
                    "bAVAX", "gFTM", "amAAVE", "amDAI", "amUSDC", "amUSDT", "amWBTC",
                    "amWMATIC", "aCRV", "aLINK", "aUSDC", "aUSDT", "aXSUSHI", "aYFI", "amWETH",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
                variable_debt_pattern: "variableDebt".to_string(),
            },
            staking: StakingConfig {
                contracts: vec![
                    "0x37cf490255082ee50845ea4ff783eb9b6d1622ce".to_string(), // SpookySwap
                    "0xfcd73006121333c92d770662745146338e419556".to_string(), // Lithium
                    "0x9dd1fe32aff4060c12e2b42961548876053187c6".to_string(), // Arcadium
                    "0xef0881ec094552b2e128cf945ef17a6752b4ec5d".to_string(), // SushiSwap MasterChef
                    "0x4645d1cF3f4cE59b06008642E74E60e8F80c8b58".to_string(), // FIAT DAO
                ],
            },
            io: IoConfig {
                transfers_path: "output_files/all_transfers.csv".to_string(),
                output_dir: "output_files/split_txs".to_string(),
            },
        }
    }
}

impl ChainConfig {
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.base_token_symbol.is_empty() {
            return Err(ConfigurationError::InvalidValue(format!(
                "Chain '{}' has no base token symbol",
                name
            )));
        }

        if self.base_token_decimals > MAX_TOKEN_DECIMALS {
            return Err(ConfigurationError::InvalidValue(format!(
                "Chain '{}' base token decimals {} exceed {}",
                name, self.base_token_decimals, MAX_TOKEN_DECIMALS
            )));
        }

        for pool in &self.pools {
            validate_address(pool)?;
        }

        Ok(())
    }
}

impl TokenConfig {
    pub fn validate(&self) -> Result<()> {
        if self.variable_debt_pattern.is_empty() {
            return Err(ConfigurationError::InvalidValue(
                "Variable debt pattern cannot be empty".to_string(),
            ));
        }

        Regex::new(&self.variable_debt_pattern).map_err(|e| {
            ConfigurationError::InvalidValue(format!("Invalid variable debt pattern: {}", e))
        })?;

        Ok(())
    }
}

impl SystemConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config_builder = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&SystemConfig::default())?);

        if config_path.as_ref().exists() {
            info!(
                "Loading configuration from: {}",
                config_path.as_ref().display()
            );
            config_builder = config_builder.add_source(File::from(config_path.as_ref()));
        } else {
            debug!("Config file not found, using defaults and environment variables");
        }

        config_builder = config_builder.add_source(
            Environment::with_prefix("LEDGER")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("tokens.receipt_tokens")
                .with_list_parse_key("staking.contracts"),
        );

        let config = config_builder.build()?;
        let mut system_config: SystemConfig = config.try_deserialize()?;

        system_config.normalize();
        system_config.validate()?;

        Ok(system_config)
    }

    /// Lower-case every configured address so lookups can compare directly
    pub fn normalize(&mut self) {
        for chain in self.chains.values_mut() {
            for pool in chain.pools.iter_mut() {
                *pool = normalize_address(pool);
            }
        }

        for wallet in self.wallets.iter_mut() {
            let normalized = normalize_address(&wallet.address);
            if normalized != wallet.address {
                debug!("Normalized wallet '{}' address", wallet.name);
            }
            wallet.address = normalized;
        }

        for contract in self.staking.contracts.iter_mut() {
            *contract = normalize_address(contract);
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        for (name, chain) in &self.chains {
            chain.validate(name)?;
        }

        self.tokens.validate()?;

        for wallet in &self.wallets {
            if wallet.name.trim().is_empty() {
                return Err(ConfigurationError::InvalidValue(format!(
                    "Wallet {} has an empty name",
                    wallet.address
                )));
            }
            validate_address(&wallet.address)?;
        }

        for contract in &self.staking.contracts {
            validate_address(contract)?;
        }

        if self.wallets.is_empty() {
            warn!("No wallets configured; every transfer must carry its wallet name");
        }

        Ok(())
    }

    /// Every lending pool address across all chains, lower-cased
    pub fn all_pool_addresses(&self) -> Vec<String> {
        self.chains
            .values()
            .flat_map(|chain| chain.pools.iter().map(|p| normalize_address(p)))
            .collect()
    }

    pub fn chain(&self, name: &str) -> Option<&ChainConfig> {
        self.chains.get(name)
    }

    pub fn chain_name_for_id(&self, chain_id: u64) -> Option<&str> {
        self.chains
            .iter()
            .find(|(_, chain)| chain.chain_id == chain_id)
            .map(|(name, _)| name.as_str())
    }

    /// Look up the configured account name of a wallet address
    pub fn wallet_name(&self, address: &str) -> Option<&str> {
        self.wallets
            .iter()
            .find(|w| w.address.eq_ignore_ascii_case(address))
            .map(|w| w.name.as_str())
    }

    /// Get configuration as a JSON value
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

pub fn normalize_address(input: &str) -> String {
    input.trim().to_lowercase()
}

/// Accepts a 20-byte hex address with `0x` prefix, any case
pub fn validate_address(address: &str) -> Result<()> {
    let valid = address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit());

    if !valid {
        return Err(ConfigurationError::InvalidValue(format!(
            "Invalid address: '{}'",
            address
        )));
    }

    Ok(())
}

/// Configuration manager for loading and holding system configuration
#[derive(Debug)]
pub struct ConfigManager {
    config: SystemConfig,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config = SystemConfig::load()?;
        info!("Configuration loaded successfully");
        debug!("Configuration: {:#?}", config);

        Ok(Self { config })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = SystemConfig::load_from_path(path)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn into_config(self) -> SystemConfig {
        self.config
    }
}
