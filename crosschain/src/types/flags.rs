//! Admin-controlled policy snapshot
//!
//! Flags are read once per operation and passed down; the state machine never
//! mutates them on its own.

use serde::{Deserialize, Serialize};

/// Parameters of the periodic gas price escalation sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasPriceIncreaseFlags {
    /// Sweep runs when `block_height % epoch_length == 0`
    pub epoch_length: i64,
    /// Minimum seconds between two escalations of the same CCTX
    pub retry_interval_secs: i64,
    /// Increase applied per escalation, as a percent of the median gas price
    pub gas_price_increase_percent: u32,
    /// Upper bound on pending CCTXs examined per chain per sweep
    pub max_pending_cctxs: u32,
}

impl Default for GasPriceIncreaseFlags {
    fn default() -> Self {
        Self {
            epoch_length: 100,
            retry_interval_secs: 600,
            gas_price_increase_percent: 100,
            max_pending_cctxs: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrosschainFlags {
    pub is_inbound_enabled: bool,
    pub is_outbound_enabled: bool,
    #[serde(default)]
    pub gas_price_increase_flags: Option<GasPriceIncreaseFlags>,
}

impl Default for CrosschainFlags {
    fn default() -> Self {
        Self {
            is_inbound_enabled: true,
            is_outbound_enabled: true,
            gas_price_increase_flags: Some(GasPriceIncreaseFlags::default()),
        }
    }
}
