//! Keyed Store Module
//!
//! In-memory store holding every namespace of the replicated state. Each
//! namespace is an ordered map so iteration order is identical on every
//! replica. Cross-namespace invariants are enforced by the keeper operations
//! that write here, never by the store itself.
//!
//! While a checkpoint is open every write records the previous value of the
//! key it touches, so a failed operation is undone in proportion to what it
//! wrote rather than to the size of the store.

use std::collections::BTreeMap;

use crate::types::{
    Ballot, BallotThreshold, Blame, Chain, ChainNonces, CrossChainTx, CrosschainFlags,
    ForeignCoin, GasPrice, Keygen, NodeAccount, OutTxTracker, PendingNonces, Tss,
};

/// Observer-set parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverParams {
    pub ballot_threshold: BallotThreshold,
}

/// Previous value of one written key.
#[derive(Debug, Clone)]
enum Undo {
    Cctx(String, Option<CrossChainTx>),
    CctxByNonce((String, i64, u64), Option<String>),
    Ballot(String, Option<Ballot>),
    ChainNonces(String, Option<ChainNonces>),
    PendingNonces((String, i64), Option<PendingNonces>),
    Tss(Option<Tss>),
    TssHistory(String, Option<Tss>),
    Keygen(Option<Keygen>),
    NodeAccount(String, Option<NodeAccount>),
    Observers(Vec<String>),
    Flags(CrosschainFlags),
    Chain(i64, Option<Chain>),
    GasPrice(i64, Option<GasPrice>),
    StabilityPool(i64, Option<u128>),
    OutTxTracker((i64, u64), Option<OutTxTracker>),
    ForeignCoin(String, Option<ForeignCoin>),
    Refund((String, String), Option<u128>),
    Blame(String, Option<Blame>),
}

fn restore<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}

/// Position in the write journal returned by [`Store::checkpoint`].
#[must_use]
#[derive(Debug)]
pub struct Checkpoint(usize);

/// All replicated namespaces.
#[derive(Debug, Clone)]
pub struct Store {
    cctxs: BTreeMap<String, CrossChainTx>,
    /// (tss, chain_id, nonce) -> cctx index
    cctx_by_nonce: BTreeMap<(String, i64, u64), String>,
    ballots: BTreeMap<String, Ballot>,
    /// chain name -> counter
    chain_nonces: BTreeMap<String, ChainNonces>,
    /// (tss, chain_id) -> window
    pending_nonces: BTreeMap<(String, i64), PendingNonces>,
    tss: Option<Tss>,
    /// pubkey -> record
    tss_history: BTreeMap<String, Tss>,
    keygen: Option<Keygen>,
    flags: CrosschainFlags,
    params: ObserverParams,
    chains: BTreeMap<i64, Chain>,
    observers: Vec<String>,
    /// operator -> account
    node_accounts: BTreeMap<String, NodeAccount>,
    admin: String,
    gas_prices: BTreeMap<i64, GasPrice>,
    gas_stability_pool: BTreeMap<i64, u128>,
    /// (chain_id, nonce) -> tracker
    out_tx_trackers: BTreeMap<(i64, u64), OutTxTracker>,
    /// zrc20 address -> coin
    foreign_coins: BTreeMap<String, ForeignCoin>,
    /// (zrc20 address, receiver) -> refunded balance
    refunds: BTreeMap<(String, String), u128>,
    blames: BTreeMap<String, Blame>,
    journal: Vec<Undo>,
    open_checkpoints: usize,
}

impl Store {
    /// Creates an empty store with the given admin and ballot threshold.
    pub fn new(admin: impl Into<String>, ballot_threshold: BallotThreshold) -> Self {
        Self {
            cctxs: BTreeMap::new(),
            cctx_by_nonce: BTreeMap::new(),
            ballots: BTreeMap::new(),
            chain_nonces: BTreeMap::new(),
            pending_nonces: BTreeMap::new(),
            tss: None,
            tss_history: BTreeMap::new(),
            keygen: None,
            flags: CrosschainFlags::default(),
            params: ObserverParams { ballot_threshold },
            chains: BTreeMap::new(),
            observers: Vec::new(),
            node_accounts: BTreeMap::new(),
            admin: admin.into(),
            gas_prices: BTreeMap::new(),
            gas_stability_pool: BTreeMap::new(),
            out_tx_trackers: BTreeMap::new(),
            foreign_coins: BTreeMap::new(),
            refunds: BTreeMap::new(),
            blames: BTreeMap::new(),
            journal: Vec::new(),
            open_checkpoints: 0,
        }
    }

    // ------------------------------------------------------------------------
    // JOURNAL
    // ------------------------------------------------------------------------

    /// Opens a checkpoint. Checkpoints nest; each must be closed by exactly
    /// one `commit` or `rollback`, innermost first.
    pub fn checkpoint(&mut self) -> Checkpoint {
        self.open_checkpoints += 1;
        Checkpoint(self.journal.len())
    }

    /// Keeps every write since `checkpoint`. An enclosing checkpoint can still undo them.
    pub fn commit(&mut self, checkpoint: Checkpoint) {
        debug_assert!(checkpoint.0 <= self.journal.len());
        self.close_checkpoint();
    }

    /// Undoes every write since `checkpoint`, newest first.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        while self.journal.len() > checkpoint.0 {
            if let Some(undo) = self.journal.pop() {
                self.undo(undo);
            }
        }
        self.close_checkpoint();
    }

    /// Number of journaled writes not yet released by the outermost commit.
    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    fn close_checkpoint(&mut self) {
        self.open_checkpoints = self.open_checkpoints.saturating_sub(1);
        if self.open_checkpoints == 0 {
            self.journal.clear();
        }
    }

    fn record(&mut self, undo: Undo) {
        if self.open_checkpoints > 0 {
            self.journal.push(undo);
        }
    }

    fn undo(&mut self, undo: Undo) {
        match undo {
            Undo::Cctx(key, prev) => restore(&mut self.cctxs, key, prev),
            Undo::CctxByNonce(key, prev) => restore(&mut self.cctx_by_nonce, key, prev),
            Undo::Ballot(key, prev) => restore(&mut self.ballots, key, prev),
            Undo::ChainNonces(key, prev) => restore(&mut self.chain_nonces, key, prev),
            Undo::PendingNonces(key, prev) => restore(&mut self.pending_nonces, key, prev),
            Undo::Tss(prev) => self.tss = prev,
            Undo::TssHistory(key, prev) => restore(&mut self.tss_history, key, prev),
            Undo::Keygen(prev) => self.keygen = prev,
            Undo::NodeAccount(key, prev) => restore(&mut self.node_accounts, key, prev),
            Undo::Observers(prev) => self.observers = prev,
            Undo::Flags(prev) => self.flags = prev,
            Undo::Chain(key, prev) => restore(&mut self.chains, key, prev),
            Undo::GasPrice(key, prev) => restore(&mut self.gas_prices, key, prev),
            Undo::StabilityPool(key, prev) => restore(&mut self.gas_stability_pool, key, prev),
            Undo::OutTxTracker(key, prev) => restore(&mut self.out_tx_trackers, key, prev),
            Undo::ForeignCoin(key, prev) => restore(&mut self.foreign_coins, key, prev),
            Undo::Refund(key, prev) => restore(&mut self.refunds, key, prev),
            Undo::Blame(key, prev) => restore(&mut self.blames, key, prev),
        }
    }

    // ------------------------------------------------------------------------
    // CCTX
    // ------------------------------------------------------------------------

    pub fn get_cctx(&self, index: &str) -> Option<&CrossChainTx> {
        self.cctxs.get(index)
    }

    /// Saves the CCTX and indexes its current outbound by (tss, chain, nonce).
    pub fn set_cctx(&mut self, cctx: CrossChainTx) {
        if let Some(outbound) = cctx.current_outbound() {
            if !outbound.tss_pubkey.is_empty() {
                let key = (
                    outbound.tss_pubkey.clone(),
                    outbound.receiver_chain_id,
                    outbound.out_tx_tss_nonce,
                );
                let prev = self.cctx_by_nonce.insert(key.clone(), cctx.index.clone());
                self.record(Undo::CctxByNonce(key, prev));
            }
        }
        let key = cctx.index.clone();
        let prev = self.cctxs.insert(key.clone(), cctx);
        self.record(Undo::Cctx(key, prev));
    }

    pub fn cctxs(&self) -> &BTreeMap<String, CrossChainTx> {
        &self.cctxs
    }

    pub fn get_cctx_by_nonce(&self, tss: &str, chain_id: i64, nonce: u64) -> Option<&CrossChainTx> {
        self.cctx_by_nonce
            .get(&(tss.to_string(), chain_id, nonce))
            .and_then(|index| self.cctxs.get(index))
    }

    // ------------------------------------------------------------------------
    // BALLOTS
    // ------------------------------------------------------------------------

    pub fn get_ballot(&self, identifier: &str) -> Option<&Ballot> {
        self.ballots.get(identifier)
    }

    pub fn set_ballot(&mut self, ballot: Ballot) {
        let key = ballot.ballot_identifier.clone();
        let prev = self.ballots.insert(key.clone(), ballot);
        self.record(Undo::Ballot(key, prev));
    }

    // ------------------------------------------------------------------------
    // NONCES
    // ------------------------------------------------------------------------

    pub fn get_chain_nonces(&self, chain_name: &str) -> Option<&ChainNonces> {
        self.chain_nonces.get(chain_name)
    }

    pub fn set_chain_nonces(&mut self, nonces: ChainNonces) {
        let key = nonces.chain_name.clone();
        let prev = self.chain_nonces.insert(key.clone(), nonces);
        self.record(Undo::ChainNonces(key, prev));
    }

    pub fn all_chain_nonces(&self) -> Vec<ChainNonces> {
        self.chain_nonces.values().cloned().collect()
    }

    pub fn get_pending_nonces(&self, tss: &str, chain_id: i64) -> Option<&PendingNonces> {
        self.pending_nonces.get(&(tss.to_string(), chain_id))
    }

    pub fn set_pending_nonces(&mut self, pending: PendingNonces) {
        let key = (pending.tss.clone(), pending.chain_id);
        let prev = self.pending_nonces.insert(key.clone(), pending);
        self.record(Undo::PendingNonces(key, prev));
    }

    pub fn all_pending_nonces(&self) -> Vec<PendingNonces> {
        self.pending_nonces.values().cloned().collect()
    }

    // ------------------------------------------------------------------------
    // TSS / KEYGEN / ACCOUNTS
    // ------------------------------------------------------------------------

    pub fn get_tss(&self) -> Option<&Tss> {
        self.tss.as_ref()
    }

    pub fn set_tss(&mut self, tss: Tss) {
        let prev = self.tss.replace(tss);
        self.record(Undo::Tss(prev));
    }

    pub fn get_tss_history(&self, pubkey: &str) -> Option<&Tss> {
        self.tss_history.get(pubkey)
    }

    pub fn set_tss_history(&mut self, tss: Tss) {
        let key = tss.tss_pubkey.clone();
        let prev = self.tss_history.insert(key.clone(), tss);
        self.record(Undo::TssHistory(key, prev));
    }

    pub fn all_tss_history(&self) -> Vec<Tss> {
        self.tss_history.values().cloned().collect()
    }

    pub fn get_keygen(&self) -> Option<&Keygen> {
        self.keygen.as_ref()
    }

    pub fn set_keygen(&mut self, keygen: Keygen) {
        let prev = self.keygen.replace(keygen);
        self.record(Undo::Keygen(prev));
    }

    pub fn get_node_account(&self, operator: &str) -> Option<&NodeAccount> {
        self.node_accounts.get(operator)
    }

    pub fn set_node_account(&mut self, account: NodeAccount) {
        let key = account.operator.clone();
        let prev = self.node_accounts.insert(key.clone(), account);
        self.record(Undo::NodeAccount(key, prev));
    }

    pub fn all_node_accounts(&self) -> Vec<NodeAccount> {
        self.node_accounts.values().cloned().collect()
    }

    pub fn observers(&self) -> &[String] {
        &self.observers
    }

    pub fn set_observers(&mut self, mut observers: Vec<String>) {
        observers.sort();
        observers.dedup();
        let prev = std::mem::replace(&mut self.observers, observers);
        self.record(Undo::Observers(prev));
    }

    pub fn admin(&self) -> &str {
        &self.admin
    }

    // ------------------------------------------------------------------------
    // POLICY
    // ------------------------------------------------------------------------

    pub fn flags(&self) -> &CrosschainFlags {
        &self.flags
    }

    pub fn set_flags(&mut self, flags: CrosschainFlags) {
        let prev = std::mem::replace(&mut self.flags, flags);
        self.record(Undo::Flags(prev));
    }

    pub fn params(&self) -> &ObserverParams {
        &self.params
    }

    pub fn get_chain(&self, chain_id: i64) -> Option<&Chain> {
        self.chains.get(&chain_id)
    }

    pub fn set_chain(&mut self, chain: Chain) {
        let key = chain.chain_id;
        let prev = self.chains.insert(key, chain);
        self.record(Undo::Chain(key, prev));
    }

    /// Supported chains in ascending chain id order.
    pub fn supported_chains(&self) -> Vec<Chain> {
        self.chains.values().cloned().collect()
    }

    // ------------------------------------------------------------------------
    // GAS
    // ------------------------------------------------------------------------

    pub fn get_gas_price(&self, chain_id: i64) -> Option<&GasPrice> {
        self.gas_prices.get(&chain_id)
    }

    pub fn set_gas_price(&mut self, gas_price: GasPrice) {
        let key = gas_price.chain_id;
        let prev = self.gas_prices.insert(key, gas_price);
        self.record(Undo::GasPrice(key, prev));
    }

    pub fn gas_stability_pool_balance(&self, chain_id: i64) -> u128 {
        self.gas_stability_pool.get(&chain_id).copied().unwrap_or(0)
    }

    pub fn set_gas_stability_pool_balance(&mut self, chain_id: i64, balance: u128) {
        let prev = self.gas_stability_pool.insert(chain_id, balance);
        self.record(Undo::StabilityPool(chain_id, prev));
    }

    // ------------------------------------------------------------------------
    // TRACKERS / COINS / REFUNDS / BLAME
    // ------------------------------------------------------------------------

    pub fn get_out_tx_tracker(&self, chain_id: i64, nonce: u64) -> Option<&OutTxTracker> {
        self.out_tx_trackers.get(&(chain_id, nonce))
    }

    pub fn set_out_tx_tracker(&mut self, tracker: OutTxTracker) {
        let key = (tracker.chain_id, tracker.nonce);
        let prev = self.out_tx_trackers.insert(key, tracker);
        self.record(Undo::OutTxTracker(key, prev));
    }

    pub fn remove_out_tx_tracker(&mut self, chain_id: i64, nonce: u64) -> Option<OutTxTracker> {
        let removed = self.out_tx_trackers.remove(&(chain_id, nonce));
        self.record(Undo::OutTxTracker((chain_id, nonce), removed.clone()));
        removed
    }

    pub fn all_out_tx_trackers(&self) -> Vec<OutTxTracker> {
        self.out_tx_trackers.values().cloned().collect()
    }

    pub fn set_foreign_coin(&mut self, coin: ForeignCoin) {
        let key = coin.zrc20_contract_address.clone();
        let prev = self.foreign_coins.insert(key.clone(), coin);
        self.record(Undo::ForeignCoin(key, prev));
    }

    /// Finds the foreign coin for `asset` on `chain_id` (case-insensitive asset match).
    pub fn get_foreign_coin_from_asset(&self, asset: &str, chain_id: i64) -> Option<&ForeignCoin> {
        self.foreign_coins
            .values()
            .find(|c| c.foreign_chain_id == chain_id && c.asset.eq_ignore_ascii_case(asset))
    }

    pub fn refund_balance(&self, zrc20: &str, receiver: &str) -> u128 {
        self.refunds
            .get(&(zrc20.to_string(), receiver.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_refund_balance(&mut self, zrc20: &str, receiver: &str, balance: u128) {
        let key = (zrc20.to_string(), receiver.to_string());
        let prev = self.refunds.insert(key.clone(), balance);
        self.record(Undo::Refund(key, prev));
    }

    pub fn get_blame(&self, index: &str) -> Option<&Blame> {
        self.blames.get(index)
    }

    pub fn set_blame(&mut self, blame: Blame) {
        let key = blame.index.clone();
        let prev = self.blames.insert(key.clone(), blame);
        self.record(Undo::Blame(key, prev));
    }
}
