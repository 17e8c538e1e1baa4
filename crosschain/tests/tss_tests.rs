//! Unit tests for TSS bookkeeping: keygen votes, key rotation and blame

use crosschain::msg::{MsgAddBlameVote, MsgCreateTssVoter, MsgUpdateTssAddress, ReceiveStatus};
use crosschain::types::{Blame, BlameNode, Event, Keygen, KeygenStatus, NodeAccount};
use crosschain::{CrosschainError, Keeper};

#[path = "helpers.rs"]
mod test_helpers;
use test_helpers::{block, genesis, observers, ADMIN, BTC_CHAIN_ID, EVM_CHAIN_ID, TSS_PUBKEY};

const NEW_TSS: &str = "zetapub1tss000000000000000000000000000000002";

fn operators() -> Vec<String> {
    vec!["operator-a".to_string(), "operator-b".to_string(), "operator-c".to_string()]
}

/// Keeper with three node accounts, a pending keygen and, optionally, no TSS yet.
fn keygen_keeper(with_tss: bool) -> Keeper {
    let mut config = genesis(10);
    if !with_tss {
        config.tss = None;
    }
    config.node_accounts = operators()
        .into_iter()
        .enumerate()
        .map(|(i, operator)| NodeAccount {
            operator,
            granted_pubkey: format!("zetapub1node{}", i),
        })
        .collect();
    config.keygen = Some(Keygen {
        status: KeygenStatus::Pending,
        granted_pubkeys: (0..3).map(|i| format!("zetapub1node{}", i)).collect(),
        block_number: 50,
    });
    config.build_keeper()
}

fn tss_vote(creator: &str, pubkey: &str, status: ReceiveStatus) -> MsgCreateTssVoter {
    MsgCreateTssVoter {
        creator: creator.to_string(),
        tss_pubkey: pubkey.to_string(),
        keygen_height: 50,
        status,
    }
}

// ============================================================================
// KEYGEN VOTES
// ============================================================================

/// What is tested: Unanimous success stores the key and makes it current when none exists
/// Why: The first TSS must open nonce windows so outbounds can be numbered
#[test]
fn test_keygen_success_creates_first_tss() {
    let mut keeper = keygen_keeper(false);
    let ctx = block(60);
    let ops = operators();

    for op in &ops[..2] {
        let response = keeper.create_tss_voter(&ctx, &tss_vote(op, NEW_TSS, ReceiveStatus::Success)).unwrap();
        assert!(!response.finalized);
    }
    let response = keeper
        .create_tss_voter(&ctx, &tss_vote(&ops[2], NEW_TSS, ReceiveStatus::Success))
        .unwrap();
    assert!(response.finalized);

    let tss = keeper.store().get_tss().unwrap();
    assert_eq!(tss.tss_pubkey, NEW_TSS);
    assert_eq!(tss.finalized_height, 60);
    assert_eq!(tss.keygen_height, 50);
    assert_eq!(tss.tss_participant_list.len(), 3);
    assert!(keeper.store().get_tss_history(NEW_TSS).is_some());

    let keygen = keeper.store().get_keygen().unwrap();
    assert_eq!(keygen.status, KeygenStatus::Success);
    assert_eq!(keygen.block_number, 60);
    for chain_id in [EVM_CHAIN_ID, BTC_CHAIN_ID] {
        assert!(keeper.store().get_pending_nonces(NEW_TSS, chain_id).is_some());
    }
    assert!(keeper
        .events()
        .iter()
        .any(|e| matches!(e, Event::TssCreated { tss_pubkey } if tss_pubkey == NEW_TSS)));

    let err = keeper
        .create_tss_voter(&ctx, &tss_vote(&ops[0], NEW_TSS, ReceiveStatus::Success))
        .unwrap_err();
    assert_eq!(err, CrosschainError::KeygenCompleted);
}

/// What is tested: Unanimous failure marks the keygen failed with block i64::MAX
/// Why: A failed ceremony must not be retried at its old height
#[test]
fn test_keygen_failure() {
    let mut keeper = keygen_keeper(false);
    let ctx = block(60);
    for op in operators() {
        keeper
            .create_tss_voter(&ctx, &tss_vote(&op, NEW_TSS, ReceiveStatus::Failed))
            .unwrap();
    }
    let keygen = keeper.store().get_keygen().unwrap();
    assert_eq!(keygen.status, KeygenStatus::Failed);
    assert_eq!(keygen.block_number, i64::MAX);
    assert!(keeper.store().get_tss().is_none());
}

/// What is tested: Keygen votes need a node account and a scheduled keygen
/// Why: Only key holders may vote a key in
#[test]
fn test_keygen_vote_preconditions() {
    let mut keeper = keygen_keeper(false);
    let err = keeper
        .create_tss_voter(&block(1), &tss_vote("observer-01", NEW_TSS, ReceiveStatus::Success))
        .unwrap_err();
    assert_eq!(err, CrosschainError::NotAuthorized("observer-01".to_string()));

    let mut config = genesis(3);
    config.node_accounts = vec![NodeAccount {
        operator: "operator-a".to_string(),
        granted_pubkey: "zetapub1node0".to_string(),
    }];
    let mut no_keygen = config.build_keeper();
    let err = no_keygen
        .create_tss_voter(&block(1), &tss_vote("operator-a", NEW_TSS, ReceiveStatus::Success))
        .unwrap_err();
    assert_eq!(err, CrosschainError::KeygenNotFound);
}

// ============================================================================
// KEY ROTATION
// ============================================================================

/// What is tested: A second key enters history only; the admin switches to it
/// Why: Rotation is an explicit admin step after migration
#[test]
fn test_second_key_and_update_tss_address() {
    let mut keeper = keygen_keeper(true);
    let ctx = block(60);
    for op in operators() {
        keeper
            .create_tss_voter(&ctx, &tss_vote(&op, NEW_TSS, ReceiveStatus::Success))
            .unwrap();
    }
    assert_eq!(keeper.store().get_tss().unwrap().tss_pubkey, TSS_PUBKEY);
    assert!(keeper.store().get_tss_history(NEW_TSS).is_some());

    let err = keeper
        .update_tss_address(&MsgUpdateTssAddress {
            creator: "observer-01".to_string(),
            tss_pubkey: NEW_TSS.to_string(),
        })
        .unwrap_err();
    assert!(matches!(err, CrosschainError::NotAuthorized(_)));

    let err = keeper
        .update_tss_address(&MsgUpdateTssAddress {
            creator: ADMIN.to_string(),
            tss_pubkey: "unknown".to_string(),
        })
        .unwrap_err();
    assert_eq!(err, CrosschainError::TssNotGenerated("unknown".to_string()));

    keeper
        .update_tss_address(&MsgUpdateTssAddress {
            creator: ADMIN.to_string(),
            tss_pubkey: NEW_TSS.to_string(),
        })
        .unwrap();
    assert_eq!(keeper.store().get_tss().unwrap().tss_pubkey, NEW_TSS);
    assert!(keeper.store().get_pending_nonces(NEW_TSS, BTC_CHAIN_ID).is_some());
}

// ============================================================================
// BLAME
// ============================================================================

/// What is tested: A blame record is stored once its ballot reaches quorum
/// Why: Misbehaving signers are recorded only on agreement
#[test]
fn test_blame_vote_quorum() {
    let mut keeper = keygen_keeper(true);
    let blame = Blame {
        index: format!("{}-7-abcd-120", BTC_CHAIN_ID),
        failure_reason: "keysign timeout".to_string(),
        nodes: vec![BlameNode {
            pubkey: "zetapub1node2".to_string(),
            ..Default::default()
        }],
    };
    let voters = observers(10);
    for (i, voter) in voters[..7].iter().enumerate() {
        let response = keeper
            .add_blame_vote(
                &block(120),
                &MsgAddBlameVote {
                    creator: voter.clone(),
                    chain_id: BTC_CHAIN_ID,
                    blame_info: blame.clone(),
                },
            )
            .unwrap();
        assert_eq!(response.finalized, i == 6);
        assert_eq!(keeper.store().get_blame(&blame.index).is_some(), i == 6);
    }
    assert_eq!(keeper.store().get_blame(&blame.index), Some(&blame));
}
