//! Unit tests for outbound trackers

use crosschain::msg::{MsgAddToOutTxTracker, MsgRemoveFromOutTxTracker, ReceiveStatus};
use crosschain::CrosschainError;

#[path = "helpers.rs"]
mod test_helpers;
use test_helpers::{
    block, build_keeper, create_cctx, inbound_msg, observers, outbound_msg, vote_outbound, ADMIN,
    BTC_CHAIN_ID, EVM_CHAIN_ID,
};

fn track(creator: &str, nonce: u64, hash: &str) -> MsgAddToOutTxTracker {
    MsgAddToOutTxTracker {
        creator: creator.to_string(),
        chain_id: BTC_CHAIN_ID,
        nonce,
        tx_hash: hash.to_string(),
        proof: None,
        blame_index: None,
        vote_index: None,
    }
}

/// What is tested: The same hash from several observers is stored once
/// Why: Every observer reports the broadcast; duplicates are expected
#[test]
fn test_duplicate_hash_is_ignored() {
    let mut keeper = build_keeper(3);
    keeper.add_to_out_tx_tracker(&track("observer-01", 4, "0xAAA")).unwrap();
    keeper.add_to_out_tx_tracker(&track("observer-02", 4, "0xaaa")).unwrap();

    let tracker = keeper.query_out_tx_tracker(BTC_CHAIN_ID, 4).unwrap();
    assert_eq!(tracker.index, format!("{}-4", BTC_CHAIN_ID));
    assert_eq!(tracker.hash_list.len(), 1);
    assert_eq!(tracker.hash_list[0].tx_signer, "observer-01");
    assert!(!tracker.hash_list[0].proved);
}

/// What is tested: A third distinct hash is rejected
/// Why: The tracker is bounded per (chain, nonce)
#[test]
fn test_max_hashes_per_tracker() {
    let mut keeper = build_keeper(3);
    keeper.add_to_out_tx_tracker(&track("observer-01", 4, "0x01")).unwrap();
    keeper.add_to_out_tx_tracker(&track("observer-02", 4, "0x02")).unwrap();
    let err = keeper
        .add_to_out_tx_tracker(&track("observer-03", 4, "0x03"))
        .unwrap_err();
    assert_eq!(
        err,
        CrosschainError::MaxTxOutTrackerHashesReached {
            chain_id: BTC_CHAIN_ID,
            nonce: 4
        }
    );
    // a known hash is still accepted as a duplicate
    keeper.add_to_out_tx_tracker(&track("observer-03", 4, "0x02")).unwrap();
}

/// What is tested: Strangers and empty hashes are rejected; the admin may report
/// Why: Only the observer set and the admin feed the tracker
#[test]
fn test_tracker_authorization() {
    let mut keeper = build_keeper(3);
    let err = keeper.add_to_out_tx_tracker(&track("stranger", 1, "0x01")).unwrap_err();
    assert_eq!(err, CrosschainError::NotAuthorized("stranger".to_string()));

    let err = keeper.add_to_out_tx_tracker(&track("observer-01", 1, "")).unwrap_err();
    assert!(matches!(err, CrosschainError::InvalidRequest(_)));

    keeper.add_to_out_tx_tracker(&track(ADMIN, 1, "0x01")).unwrap();
    assert!(keeper.query_out_tx_tracker(BTC_CHAIN_ID, 1).is_ok());
}

/// What is tested: Finalizing the outbound drops its tracker and later reports are discarded
/// Why: Trackers exist only for outbounds still in flight
#[test]
fn test_tracker_dropped_after_finalization() {
    let mut keeper = build_keeper(10);
    let cctx = create_cctx(&mut keeper, &block(1), &inbound_msg("observer-01"));
    keeper.add_to_out_tx_tracker(&track("observer-01", 0, "0xbeef")).unwrap();
    assert!(keeper.query_out_tx_tracker(BTC_CHAIN_ID, 0).is_ok());

    let voters = observers(10);
    let msg = outbound_msg("observer-01", &cctx, ReceiveStatus::Success);
    vote_outbound(&mut keeper, &block(2), &msg, &voters[..7]);
    assert!(keeper.query_out_tx_tracker(BTC_CHAIN_ID, 0).is_err());

    keeper.add_to_out_tx_tracker(&track("observer-09", 0, "0xbeef")).unwrap();
    assert!(keeper.query_out_tx_tracker(BTC_CHAIN_ID, 0).is_err());
}

/// What is tested: Reports for the failed forward leg of a reverting CCTX are dropped
/// Why: Only the current outbound can still be in flight
#[test]
fn test_tracker_for_superseded_forward_leg_dropped() {
    let mut keeper = build_keeper(10);
    let cctx = create_cctx(&mut keeper, &block(1), &inbound_msg("observer-01"));
    let failed = outbound_msg("observer-01", &cctx, ReceiveStatus::Failed);
    vote_outbound(&mut keeper, &block(2), &failed, &observers(10)[..7]);

    keeper.add_to_out_tx_tracker(&track("observer-02", 0, "0xstale")).unwrap();
    assert!(keeper.query_out_tx_tracker(BTC_CHAIN_ID, 0).is_err());

    let revert_leg = MsgAddToOutTxTracker {
        chain_id: EVM_CHAIN_ID,
        ..track("observer-02", 0, "0xrevert")
    };
    keeper.add_to_out_tx_tracker(&revert_leg).unwrap();
    let tracker = keeper.query_out_tx_tracker(EVM_CHAIN_ID, 0).unwrap();
    assert_eq!(tracker.hash_list.len(), 1);
    assert_eq!(tracker.hash_list[0].tx_hash, "0xrevert");
}

/// What is tested: Only the admin removes trackers
/// Why: Removal can hide a stuck outbound from signers
#[test]
fn test_remove_tracker_admin_only() {
    let mut keeper = build_keeper(3);
    keeper.add_to_out_tx_tracker(&track("observer-01", 2, "0x01")).unwrap();

    let remove = |creator: &str| MsgRemoveFromOutTxTracker {
        creator: creator.to_string(),
        chain_id: BTC_CHAIN_ID,
        nonce: 2,
    };
    let err = keeper.remove_from_out_tx_tracker(&remove("observer-01")).unwrap_err();
    assert!(matches!(err, CrosschainError::NotAuthorized(_)));
    assert!(keeper.query_out_tx_tracker(BTC_CHAIN_ID, 2).is_ok());

    keeper.remove_from_out_tx_tracker(&remove(ADMIN)).unwrap();
    let err = keeper.query_out_tx_tracker(BTC_CHAIN_ID, 2).unwrap_err();
    assert!(err.is_not_found());
}
