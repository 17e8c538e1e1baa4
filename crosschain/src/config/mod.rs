//! Configuration Management Module
//!
//! This module handles loading the crosschain node configuration: API
//! settings, block timing, and the genesis state the keeper starts from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::keeper::Keeper;
use crate::store::Store;
use crate::types::{
    BallotThreshold, Chain, ChainKind, ChainNonces, CrosschainFlags, ForeignCoin, GasPrice, Keygen,
    NodeAccount, PendingNonces, Tss,
};

/// Signer name under which genesis gas prices are recorded.
pub const GENESIS_GAS_PRICE_SIGNER: &str = "genesis";

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all node settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Block production settings
    pub node: NodeConfig,
    /// API server configuration (host, port, CORS settings)
    pub api: ApiConfig,
    /// Initial replicated state
    pub genesis: GenesisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Interval between blocks in milliseconds
    pub block_time_ms: u64,
    /// Capacity of the submission queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    1024
}

/// API server configuration for external communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host address to bind the API server to
    pub host: String,
    /// Port number to bind the API server to
    pub port: u16,
    /// Allowed CORS origins for cross-origin requests
    pub cors_origins: Vec<String>,
}

/// Initial median gas price of a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisGasPrice {
    pub chain_id: i64,
    pub price: u128,
}

/// Initial gas stability pool balance of a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisPoolBalance {
    pub chain_id: i64,
    pub balance: u128,
}

/// Genesis state. Every list is optional in TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// Address allowed to run admin messages
    pub admin: String,
    /// Fraction of observers needed to finalize a ballot ("0.67")
    pub ballot_threshold: BallotThreshold,
    #[serde(default)]
    pub observers: Vec<String>,
    #[serde(default)]
    pub node_accounts: Vec<NodeAccount>,
    #[serde(default)]
    pub chains: Vec<Chain>,
    #[serde(default)]
    pub flags: CrosschainFlags,
    #[serde(default)]
    pub gas_prices: Vec<GenesisGasPrice>,
    #[serde(default)]
    pub stability_pools: Vec<GenesisPoolBalance>,
    #[serde(default)]
    pub foreign_coins: Vec<ForeignCoin>,
    #[serde(default)]
    pub chain_nonces: Vec<ChainNonces>,
    /// Explicit pending windows; opened from the chain counters when empty
    #[serde(default)]
    pub pending_nonces: Vec<PendingNonces>,
    #[serde(default)]
    pub tss: Option<Tss>,
    #[serde(default)]
    pub keygen: Option<Keygen>,
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Validates the configuration.
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Configuration is valid
    /// - `Err(anyhow::Error)` - Zero block time or invalid genesis
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node.block_time_ms == 0 {
            anyhow::bail!("Configuration error: node.block_time_ms must be greater than zero");
        }
        self.genesis.validate()
    }

    /// Loads configuration from the TOML file.
    ///
    /// The path is taken from `CROSSCHAIN_CONFIG_PATH`, falling back to
    /// `config/crosschain.toml`.
    ///
    /// # Returns
    ///
    /// - `Ok(Config)` - Successfully loaded and validated configuration
    /// - `Err(anyhow::Error)` - File missing, unparsable or invalid
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("CROSSCHAIN_CONFIG_PATH")
            .unwrap_or_else(|_| "config/crosschain.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/crosschain.template.toml config/crosschain.toml\n\
                Then edit config/crosschain.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Creates a default configuration for local development and tests.
    #[allow(dead_code)]
    pub fn default() -> Self {
        Self {
            node: NodeConfig {
                block_time_ms: 1000,
                queue_capacity: default_queue_capacity(),
            },
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 3340,
                cors_origins: vec!["http://localhost:3340".to_string()],
            },
            genesis: GenesisConfig {
                admin: "admin".to_string(),
                ballot_threshold: BallotThreshold::from_basis_points(6700)
                    .unwrap_or(BallotThreshold::UNANIMOUS),
                observers: vec!["observer-1".to_string()],
                node_accounts: Vec::new(),
                chains: vec![
                    Chain {
                        chain_id: 1337,
                        chain_name: "goerli_localnet".to_string(),
                        kind: ChainKind::Evm,
                    },
                    Chain {
                        chain_id: 18444,
                        chain_name: "btc_regtest".to_string(),
                        kind: ChainKind::Utxo,
                    },
                ],
                flags: CrosschainFlags::default(),
                gas_prices: Vec::new(),
                stability_pools: Vec::new(),
                foreign_coins: Vec::new(),
                chain_nonces: Vec::new(),
                pending_nonces: Vec::new(),
                tss: None,
                keygen: None,
            },
        }
    }
}

impl GenesisConfig {
    /// Checks the genesis records against each other.
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Genesis is consistent
    /// - `Err(anyhow::Error)` - Duplicate chain ids or names, or a record pointing at an unknown chain
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.admin.is_empty() {
            anyhow::bail!("Configuration error: genesis.admin must not be empty");
        }

        let mut ids = BTreeSet::new();
        let mut names = BTreeSet::new();
        for chain in &self.chains {
            if !ids.insert(chain.chain_id) {
                anyhow::bail!(
                    "Configuration error: chain ID {} is configured more than once. Each chain must have a unique chain ID.",
                    chain.chain_id
                );
            }
            if !names.insert(chain.chain_name.as_str()) {
                anyhow::bail!(
                    "Configuration error: chain name '{}' is configured more than once.",
                    chain.chain_name
                );
            }
        }

        for gp in &self.gas_prices {
            if !ids.contains(&gp.chain_id) {
                anyhow::bail!("Unknown chain_id {} in genesis gas prices", gp.chain_id);
            }
        }
        for pool in &self.stability_pools {
            if !ids.contains(&pool.chain_id) {
                anyhow::bail!("Unknown chain_id {} in genesis stability pools", pool.chain_id);
            }
        }
        for coin in &self.foreign_coins {
            if !ids.contains(&coin.foreign_chain_id) {
                anyhow::bail!(
                    "Unknown chain_id {} for foreign coin {}",
                    coin.foreign_chain_id,
                    coin.zrc20_contract_address
                );
            }
        }
        for n in &self.chain_nonces {
            if !names.contains(n.chain_name.as_str()) || !ids.contains(&n.chain_id) {
                anyhow::bail!(
                    "Chain nonces for '{}' (chain {}) do not match a configured chain",
                    n.chain_name,
                    n.chain_id
                );
            }
        }
        for p in &self.pending_nonces {
            if !ids.contains(&p.chain_id) {
                anyhow::bail!("Unknown chain_id {} in genesis pending nonces", p.chain_id);
            }
            if p.nonce_low > p.nonce_high {
                anyhow::bail!(
                    "Pending nonces for chain {}: low {} is above high {}",
                    p.chain_id,
                    p.nonce_low,
                    p.nonce_high
                );
            }
        }
        Ok(())
    }

    /// Builds the keeper holding this genesis state.
    ///
    /// A genesis TSS becomes current. Its pending windows are taken from
    /// `pending_nonces` when given, otherwise opened at the chain counters.
    pub fn build_keeper(&self) -> Keeper {
        let mut store = Store::new(self.admin.clone(), self.ballot_threshold);
        store.set_observers(self.observers.clone());
        for account in &self.node_accounts {
            store.set_node_account(account.clone());
        }
        for chain in &self.chains {
            store.set_chain(chain.clone());
        }
        store.set_flags(self.flags.clone());
        for gp in &self.gas_prices {
            let mut gas_price = GasPrice {
                chain_id: gp.chain_id,
                ..Default::default()
            };
            gas_price.upsert(GENESIS_GAS_PRICE_SIGNER, gp.price, 0);
            store.set_gas_price(gas_price);
        }
        for pool in &self.stability_pools {
            store.set_gas_stability_pool_balance(pool.chain_id, pool.balance);
        }
        for coin in &self.foreign_coins {
            store.set_foreign_coin(coin.clone());
        }
        for n in &self.chain_nonces {
            store.set_chain_nonces(n.clone());
        }
        for p in &self.pending_nonces {
            store.set_pending_nonces(p.clone());
        }
        if let Some(keygen) = &self.keygen {
            store.set_keygen(keygen.clone());
        }

        let mut keeper = Keeper::new(store);
        if let Some(tss) = &self.tss {
            keeper.store_mut().set_tss_history(tss.clone());
            if self.pending_nonces.is_empty() {
                keeper.set_tss_and_update_nonce(tss.clone());
            } else {
                keeper.store_mut().set_tss(tss.clone());
            }
        }
        keeper
    }
}
