//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the observer
//! service. Configuration includes the ledger endpoint, the watched chains,
//! threshold signing settings, outbound broadcast policy and API settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crosschain::types::{Chain, ChainKind};

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Ledger (crosschain node) connection
    pub ledger: LedgerConfig,
    /// External chains this node observes and signs for
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    /// Threshold signing settings
    pub tss: TssConfig,
    /// Outbound broadcast policy
    #[serde(default)]
    pub outbound: OutboundConfig,
    /// API server configuration (host, port, CORS settings)
    pub api: ApiConfig,
}

/// Connection to the crosschain node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Base URL of the crosschain node API
    pub url: String,
    /// Operator address this node submits messages as
    pub operator: String,
    /// Pubkey this node holds TSS shares under (as listed in TSS participant lists)
    #[serde(default)]
    pub node_pubkey: String,
}

/// RPC credentials for a chain node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcCredentials {
    pub username: String,
    pub password: String,
}

/// Configuration for one watched chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain identifier, as registered on the ledger
    pub chain_id: i64,
    /// Human-readable name for the chain
    pub name: String,
    /// Chain family; selects the signer implementation
    pub kind: ChainKind,
    /// RPC endpoint URL for chain communication
    pub rpc_url: String,
    /// Interval between two polls of the ledger's pending outbounds
    pub polling_interval_ms: u64,
    /// Optional RPC basic-auth credentials
    #[serde(default)]
    pub credentials: Option<RpcCredentials>,
}

impl ChainConfig {
    pub fn chain(&self) -> Chain {
        Chain {
            chain_id: self.chain_id,
            chain_name: self.name.clone(),
            kind: self.kind,
        }
    }
}

/// Threshold signing configuration.
///
/// The local dev key is only used by the `local` keysign backend and must
/// never be set on a production node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TssConfig {
    /// Directory holding `localstate-<pubkey>.json` keyshare files
    pub keyshare_dir: String,
    /// Pubkey (hex, compressed) of the TSS currently used for signing
    pub current_pubkey: String,
    /// Upper bound on one signing round in milliseconds
    #[serde(default = "default_round_timeout_ms")]
    pub round_timeout_ms: u64,
    /// Environment variable holding a hex secp256k1 key for the local keysign backend
    #[serde(default)]
    pub local_key_env: Option<String>,
}

fn default_round_timeout_ms() -> u64 {
    30_000
}

impl TssConfig {
    /// Loads the local dev signing key from its environment variable.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(String))` - Hex encoded key
    /// * `Ok(None)` - No local key configured
    /// * `Err(anyhow::Error)` - Variable named but not set
    pub fn local_key(&self) -> anyhow::Result<Option<String>> {
        match &self.local_key_env {
            None => Ok(None),
            Some(name) => std::env::var(name).map(Some).map_err(|_| {
                anyhow::anyhow!(
                    "Environment variable '{}' not set. Please set it with the hex encoded local signing key.",
                    name
                )
            }),
        }
    }
}

/// Outbound broadcast policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Broadcast attempts per signed transaction
    #[serde(default = "default_broadcast_attempts")]
    pub broadcast_attempts: u32,
    /// Upper bound of the random delay before each attempt in milliseconds
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
    /// Pending CCTXs fetched per poll
    #[serde(default = "default_pending_limit")]
    pub pending_limit: u64,
}

fn default_broadcast_attempts() -> u32 {
    5
}

fn default_max_jitter_ms() -> u64 {
    1500
}

fn default_pending_limit() -> u64 {
    100
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            broadcast_attempts: default_broadcast_attempts(),
            max_jitter_ms: default_max_jitter_ms(),
            pending_limit: default_pending_limit(),
        }
    }
}

/// API server configuration for external communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host address to bind the API server to
    pub host: String,
    /// Port number to bind the API server to
    pub port: u16,
    /// Allowed CORS origins for cross-origin requests
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn validate_url(field: &str, value: &str) -> anyhow::Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| anyhow::anyhow!("Configuration error: {} '{}' is not a valid URL: {}", field, value, e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("Configuration error: {} must use http or https, got '{}'", field, parsed.scheme());
    }
    Ok(())
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Validates the configuration.
    ///
    /// This function ensures that:
    /// - The ledger and chain RPC URLs are http(s) URLs
    /// - Chain IDs and names are unique
    /// - Polling intervals are positive
    /// - At least one broadcast attempt is made
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Configuration is valid
    /// - `Err(anyhow::Error)` - Duplicate chain or invalid setting
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ledger.operator.is_empty() {
            anyhow::bail!("Configuration error: ledger.operator must not be empty");
        }
        validate_url("ledger.url", &self.ledger.url)?;

        let mut ids = BTreeSet::new();
        let mut names = BTreeSet::new();
        for chain in &self.chains {
            if !ids.insert(chain.chain_id) {
                anyhow::bail!(
                    "Configuration error: chain ID {} is configured more than once. Each chain must have a unique chain ID.",
                    chain.chain_id
                );
            }
            if !names.insert(chain.name.as_str()) {
                anyhow::bail!(
                    "Configuration error: chain name '{}' is configured more than once.",
                    chain.name
                );
            }
            validate_url(&format!("chain '{}' rpc_url", chain.name), &chain.rpc_url)?;
            if chain.polling_interval_ms == 0 {
                anyhow::bail!(
                    "Configuration error: chain '{}' has a zero polling interval",
                    chain.name
                );
            }
        }

        if self.outbound.broadcast_attempts == 0 {
            anyhow::bail!("Configuration error: outbound.broadcast_attempts must be at least 1");
        }
        if self.tss.round_timeout_ms == 0 {
            anyhow::bail!("Configuration error: tss.round_timeout_ms must be greater than zero");
        }

        Ok(())
    }

    /// Loads configuration from the TOML file.
    ///
    /// The path is taken from `OBSERVER_CONFIG_PATH`, falling back to
    /// `config/observer.toml`.
    ///
    /// # Returns
    ///
    /// - `Ok(Config)` - Successfully loaded and validated configuration
    /// - `Err(anyhow::Error)` - File missing, unparsable or invalid
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("OBSERVER_CONFIG_PATH")
            .unwrap_or_else(|_| "config/observer.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/observer.template.toml config/observer.toml\n\
                Then edit config/observer.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Creates a default configuration with placeholder values.
    ///
    /// Suitable for local development against a regtest node. For production
    /// use, the ledger URL, operator and keyshare settings must be replaced.
    #[allow(dead_code)]
    pub fn default() -> Self {
        Self {
            ledger: LedgerConfig {
                url: "http://127.0.0.1:3340".to_string(),
                operator: "observer-1".to_string(),
                node_pubkey: String::new(),
            },
            chains: vec![ChainConfig {
                chain_id: 18444,
                name: "btc_regtest".to_string(),
                kind: ChainKind::Utxo,
                rpc_url: "http://127.0.0.1:18443".to_string(),
                polling_interval_ms: 2000,
                credentials: None,
            }],
            tss: TssConfig {
                keyshare_dir: "keyshares".to_string(),
                current_pubkey: String::new(),
                round_timeout_ms: default_round_timeout_ms(),
                local_key_env: None,
            },
            outbound: OutboundConfig::default(),
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 3341,
                cors_origins: vec!["http://localhost:3341".to_string()],
            },
        }
    }
}
