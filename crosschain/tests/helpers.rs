//! Shared test helpers
//!
//! The module is organized into several categories:
//! - **Constants**: Addresses, chains and keys used across tests
//! - **Keeper Builders**: Genesis states ready for voting
//! - **Message Builders**: Default inbound/outbound votes
//! - **Voting Helpers**: Drive a ballot to finalization

#![allow(dead_code)]

use crosschain::config::{GenesisConfig, GenesisGasPrice, GenesisPoolBalance};
use crosschain::msg::{MsgResponse, MsgVoteOnObservedInboundTx, MsgVoteOnObservedOutboundTx, ReceiveStatus};
use crosschain::types::{
    BallotThreshold, Chain, ChainKind, CoinType, CrossChainTx, CrosschainFlags, ForeignCoin, Tss,
};
use crosschain::{BlockContext, Keeper};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Admin address of every test genesis
pub const ADMIN: &str = "zeta1admin0000000000000000000000000000000";

/// Current TSS pubkey of every test genesis
pub const TSS_PUBKEY: &str = "zetapub1tss000000000000000000000000000000001";

/// Source chain of test inbounds (EVM)
pub const EVM_CHAIN_ID: i64 = 1337;
pub const EVM_CHAIN_NAME: &str = "goerli_localnet";

/// Destination chain of test inbounds (UTXO)
pub const BTC_CHAIN_ID: i64 = 18444;
pub const BTC_CHAIN_NAME: &str = "btc_regtest";

/// Genesis median gas prices
pub const EVM_GAS_PRICE: u128 = 20;
pub const BTC_GAS_PRICE: u128 = 100;

/// Genesis stability pool balance of each chain
pub const POOL_BALANCE: u128 = 1_000_000;

/// Dummy sender on the EVM chain
pub const SENDER_EVM: &str = "0x00000000000000000000000000000000000000a1";

/// Dummy receiver on the UTXO chain
pub const RECEIVER_BTC: &str = "bcrt1qreceiver0000000000000000000000000000";

/// Dummy ERC20 asset and its ledger token
pub const ERC20_ASSET: &str = "0x00000000000000000000000000000000000000e2";
pub const ERC20_ZRC20: &str = "0x00000000000000000000000000000000000000f3";

/// Dummy inbound hash
pub const IN_TX_HASH: &str = "0x0000000000000000000000000000000000000000000000000000000000000bb1";

/// Ballot threshold used by default ("0.67")
pub const THRESHOLD_BPS: u32 = 6700;

// ============================================================================
// KEEPER BUILDERS
// ============================================================================

/// Observer addresses `observer-01` .. `observer-NN`
pub fn observers(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("observer-{:02}", i)).collect()
}

/// Block context at `height` with a timestamp derived from it.
pub fn block(height: i64) -> BlockContext {
    BlockContext {
        height,
        timestamp: 1_700_000_000 + height * 6,
    }
}

/// Genesis with two chains, `observer_count` observers, a current TSS and funded pools.
pub fn genesis(observer_count: usize) -> GenesisConfig {
    GenesisConfig {
        admin: ADMIN.to_string(),
        ballot_threshold: BallotThreshold::from_basis_points(THRESHOLD_BPS).unwrap(),
        observers: observers(observer_count),
        node_accounts: Vec::new(),
        chains: vec![
            Chain {
                chain_id: EVM_CHAIN_ID,
                chain_name: EVM_CHAIN_NAME.to_string(),
                kind: ChainKind::Evm,
            },
            Chain {
                chain_id: BTC_CHAIN_ID,
                chain_name: BTC_CHAIN_NAME.to_string(),
                kind: ChainKind::Utxo,
            },
        ],
        flags: CrosschainFlags::default(),
        gas_prices: vec![
            GenesisGasPrice {
                chain_id: EVM_CHAIN_ID,
                price: EVM_GAS_PRICE,
            },
            GenesisGasPrice {
                chain_id: BTC_CHAIN_ID,
                price: BTC_GAS_PRICE,
            },
        ],
        stability_pools: vec![
            GenesisPoolBalance {
                chain_id: EVM_CHAIN_ID,
                balance: POOL_BALANCE,
            },
            GenesisPoolBalance {
                chain_id: BTC_CHAIN_ID,
                balance: POOL_BALANCE,
            },
        ],
        foreign_coins: vec![ForeignCoin {
            zrc20_contract_address: ERC20_ZRC20.to_string(),
            asset: ERC20_ASSET.to_string(),
            foreign_chain_id: EVM_CHAIN_ID,
            decimals: 18,
            name: "USDT".to_string(),
            symbol: "USDT".to_string(),
            coin_type: CoinType::Erc20,
        }],
        chain_nonces: Vec::new(),
        pending_nonces: Vec::new(),
        tss: Some(Tss {
            tss_pubkey: TSS_PUBKEY.to_string(),
            tss_participant_list: Vec::new(),
            operator_address_list: observers(observer_count),
            finalized_height: 0,
            keygen_height: 0,
        }),
        keygen: None,
    }
}

/// Keeper built from `genesis(observer_count)`.
pub fn build_keeper(observer_count: usize) -> Keeper {
    genesis(observer_count).build_keeper()
}

// ============================================================================
// MESSAGE BUILDERS
// ============================================================================

/// Inbound vote: EVM sender to UTXO receiver, gas coin.
pub fn inbound_msg(creator: &str) -> MsgVoteOnObservedInboundTx {
    MsgVoteOnObservedInboundTx {
        creator: creator.to_string(),
        sender: SENDER_EVM.to_string(),
        sender_chain_id: EVM_CHAIN_ID,
        tx_origin: SENDER_EVM.to_string(),
        receiver: RECEIVER_BTC.to_string(),
        receiver_chain: BTC_CHAIN_ID,
        amount: 50_000,
        message: String::new(),
        in_tx_hash: IN_TX_HASH.to_string(),
        in_block_height: 42,
        gas_limit: 250,
        coin_type: CoinType::Gas,
        asset: String::new(),
        event_index: 0,
    }
}

/// Inbound vote carrying an ERC20 asset that has a ledger mapping.
pub fn erc20_inbound_msg(creator: &str) -> MsgVoteOnObservedInboundTx {
    MsgVoteOnObservedInboundTx {
        coin_type: CoinType::Erc20,
        asset: ERC20_ASSET.to_string(),
        ..inbound_msg(creator)
    }
}

/// Outbound vote for the current outbound of `cctx`.
pub fn outbound_msg(creator: &str, cctx: &CrossChainTx, status: ReceiveStatus) -> MsgVoteOnObservedOutboundTx {
    let current = cctx.current_outbound().cloned().unwrap_or_default();
    MsgVoteOnObservedOutboundTx {
        creator: creator.to_string(),
        cctx_hash: cctx.index.clone(),
        observed_outtx_hash: "0xoutbound".to_string(),
        observed_outtx_block_height: 77,
        observed_outtx_gas_used: 90,
        observed_outtx_effective_gas_price: 100,
        observed_outtx_effective_gas_limit: 100,
        value_received: current.amount,
        status,
        outtx_chain: current.receiver_chain_id,
        outtx_tss_nonce: current.out_tx_tss_nonce,
        coin_type: current.coin_type,
    }
}

// ============================================================================
// VOTING HELPERS
// ============================================================================

/// Casts the same inbound claim from each voter in order; returns the last response.
pub fn vote_inbound(
    keeper: &mut Keeper,
    ctx: &BlockContext,
    msg: &MsgVoteOnObservedInboundTx,
    voters: &[String],
) -> MsgResponse {
    let mut last = MsgResponse::default();
    for voter in voters {
        let vote = MsgVoteOnObservedInboundTx {
            creator: voter.clone(),
            ..msg.clone()
        };
        last = keeper.vote_on_observed_inbound_tx(ctx, &vote).unwrap();
    }
    last
}

/// Casts the same outbound claim from each voter in order; returns the last response.
pub fn vote_outbound(
    keeper: &mut Keeper,
    ctx: &BlockContext,
    msg: &MsgVoteOnObservedOutboundTx,
    voters: &[String],
) -> MsgResponse {
    let mut last = MsgResponse::default();
    for voter in voters {
        let vote = MsgVoteOnObservedOutboundTx {
            creator: voter.clone(),
            ..msg.clone()
        };
        last = keeper.vote_on_observed_outbound_tx(ctx, &vote).unwrap();
    }
    last
}

/// Finalizes `msg` with a 7-of-10 quorum and returns the created CCTX.
pub fn create_cctx(keeper: &mut Keeper, ctx: &BlockContext, msg: &MsgVoteOnObservedInboundTx) -> CrossChainTx {
    let voters = observers(10);
    let response = vote_inbound(keeper, ctx, msg, &voters[..7]);
    let index = response.cctx_index.expect("finalizing vote creates the cctx");
    keeper.store().get_cctx(&index).cloned().unwrap()
}
