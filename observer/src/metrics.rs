//! Observer metrics
//!
//! Prometheus counters kept in a per-process registry: blame counts per
//! TSS participant, outbound outcomes per chain and signing failures.
//! Signing and broadcast errors surface here instead of stopping a worker.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

pub struct Metrics {
    registry: Registry,
    blame: IntCounterVec,
    outbound: IntCounterVec,
    keysign_failures: IntCounterVec,
}

impl Metrics {
    /// Creates and registers all counters.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let blame = IntCounterVec::new(
            Opts::new("tss_node_blame_total", "tss node blame counter"),
            &["pubkey"],
        )?;
        let outbound = IntCounterVec::new(
            Opts::new("outbound_outcomes_total", "outbound attempts by chain and outcome"),
            &["chain", "outcome"],
        )?;
        let keysign_failures = IntCounterVec::new(
            Opts::new("keysign_failures_total", "failed signing rounds by reason"),
            &["reason"],
        )?;

        registry.register(Box::new(blame.clone()))?;
        registry.register(Box::new(outbound.clone()))?;
        registry.register(Box::new(keysign_failures.clone()))?;

        Ok(Self {
            registry,
            blame,
            outbound,
            keysign_failures,
        })
    }

    /// Registers a blame counter for each known participant so it is exported at zero.
    pub fn register_blame_counters<'a>(&self, pubkeys: impl IntoIterator<Item = &'a String>) {
        for pubkey in pubkeys {
            self.blame.with_label_values(&[pubkey.as_str()]);
        }
    }

    pub fn inc_blame(&self, pubkey: &str) {
        self.blame.with_label_values(&[pubkey]).inc();
    }

    pub fn blame_count(&self, pubkey: &str) -> u64 {
        self.blame.with_label_values(&[pubkey]).get()
    }

    pub fn inc_outbound(&self, chain: &str, outcome: &str) {
        self.outbound.with_label_values(&[chain, outcome]).inc();
    }

    pub fn outbound_count(&self, chain: &str, outcome: &str) -> u64 {
        self.outbound.with_label_values(&[chain, outcome]).get()
    }

    pub fn inc_keysign_failure(&self, reason: &str) {
        self.keysign_failures.with_label_values(&[reason]).inc();
    }

    pub fn keysign_failure_count(&self, reason: &str) -> u64 {
        self.keysign_failures.with_label_values(&[reason]).get()
    }

    /// Renders every counter in the Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            error!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}
