//! Unit tests for the UTXO signer
//!
//! Covers the fee and output rules of a withdrawal, the transaction encoding
//! and the full try-process flow against in-memory ledger, chain and keysign
//! mocks.

use std::sync::Arc;

use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature, VerifyingKey};

use crosschain::types::CoinType;
use observer::outbound::tx::{der_signature, p2wpkh_script, witness_program, OutPoint, Transaction};
use observer::outbound::utxo::{
    build_withdraw_tx, clamp_tx_size, estimate_fee, estimate_tx_size, nonce_mark_amount, parse_receiver,
    select_utxos, withdraw_target, OUT_TX_BYTES_CAP, OUT_TX_BYTES_MIN,
};
use observer::outbound::{ChainSigner, OutTxProcessorManager, OutboundError, OutboundOutcome};
use observer::tss::TssKey;

#[path = "helpers.rs"]
mod test_helpers;
use test_helpers::{
    pending_cctx, tss_pubkey, tss_utxo, utxo_signer, KeysignMode, MockBridge, MockKeysignServer, MockUtxoClient,
    BTC_CHAIN_ID, RECEIVER,
};

fn own_program() -> [u8; 20] {
    TssKey::new(&tss_pubkey()).unwrap().witness_program()
}

fn receiver_program() -> [u8; 20] {
    parse_receiver(RECEIVER).unwrap()
}

// ============================================================================
// FEES AND SIZE
// ============================================================================

/// What is tested: Nonce mark and fee estimate follow their fixed formulas
/// Why: Every observer must build the same transaction for the same outbound
#[test]
fn test_nonce_mark_and_fee_estimate() {
    assert_eq!(nonce_mark_amount(0), 2000);
    assert_eq!(nonce_mark_amount(5), 2005);
    // 10 sats/kB over 4000 bytes
    assert_eq!(estimate_fee(10), 40);
}

/// What is tested: The estimated size is clamped into [min, cap] whatever the size limit
/// Why: The size limit only decides whether the shortfall is logged
#[test]
fn test_clamp_tx_size() {
    assert_eq!(clamp_tx_size(100, 1000), OUT_TX_BYTES_MIN);
    assert_eq!(clamp_tx_size(20_000, 1000), OUT_TX_BYTES_CAP);
    assert_eq!(clamp_tx_size(1000, 1000), 1000);
    // above the limit is only logged
    assert_eq!(clamp_tx_size(3000, 400), 3000);
}

/// What is tested: Input targets that overflow u64 are rejected
/// Why: A wrapped target would pass selection with a tiny input set
#[test]
fn test_withdraw_target_overflow() {
    assert_eq!(withdraw_target(50_000, 10, 5).unwrap(), 50_000 + 40 + 2005);
    assert!(matches!(
        withdraw_target(u64::MAX, 10, 5),
        Err(OutboundError::InvalidAmount(_))
    ));
    assert!(matches!(
        withdraw_target(u64::MAX - 2005, 0, 5),
        Ok(u64::MAX)
    ));
}

// ============================================================================
// INPUT SELECTION
// ============================================================================

/// What is tested: Smallest outputs are taken first until the target is covered
/// Why: Spending dust first keeps the UTXO set small
#[test]
fn test_select_smallest_first() {
    let utxos = vec![tss_utxo(1, 1000), tss_utxo(2, 2000), tss_utxo(3, 5000), tss_utxo(4, 100_000)];
    let (selected, total) = select_utxos(&utxos, 2500).unwrap();
    assert_eq!(selected.len(), 2);
    assert_eq!(total, 3000);
}

/// What is tested: The window slides to larger outputs once it holds the maximum inputs
/// Why: A transaction never has more than 20 inputs
#[test]
fn test_select_sliding_window() {
    let mut utxos: Vec<_> = (0..25u8).map(|i| tss_utxo(i, 1000)).collect();
    utxos.push(tss_utxo(100, 100_000));

    let (selected, total) = select_utxos(&utxos, 50_000).unwrap();
    assert_eq!(selected.len(), 20);
    assert_eq!(total, 19 * 1000 + 100_000);
    assert_eq!(selected.last().unwrap().value_sats(), 100_000);
}

/// What is tested: Not enough value or no outputs at all are typed errors
/// Why: Insufficient funds is a hard stop for this attempt
#[test]
fn test_select_insufficient() {
    let utxos = vec![tss_utxo(1, 1000), tss_utxo(2, 2000)];
    assert_eq!(
        select_utxos(&utxos, 10_000).unwrap_err(),
        OutboundError::InsufficientFunds {
            needed: 10_000,
            available: 3000
        }
    );
    assert_eq!(select_utxos(&[], 1).unwrap_err(), OutboundError::NoUtxos);
}

// ============================================================================
// TRANSACTION SHAPE
// ============================================================================

/// What is tested: Outputs are nonce mark, payment, then remainder
/// Why: Observers detect processed nonces by the nonce mark output
#[test]
fn test_withdraw_outputs() {
    let inputs = vec![tss_utxo(1, 100_000)];
    let plan = build_withdraw_tx(&inputs, 100_000, &own_program(), &receiver_program(), 50_000, 25, 1000, 5).unwrap();

    // one input estimates under the minimum size: 400 bytes at 25 sats/kB
    assert_eq!(plan.fees, 10);
    assert_eq!(plan.remainder, 100_000 - 50_000 - 10 - 2005);
    let outputs = &plan.tx.outputs;
    assert_eq!(outputs.len(), 3);
    assert_eq!(outputs[0].value, 2005);
    assert_eq!(outputs[0].script_pubkey, p2wpkh_script(&own_program()));
    assert_eq!(outputs[1].value, 50_000);
    assert_eq!(outputs[1].script_pubkey, p2wpkh_script(&receiver_program()));
    assert_eq!(outputs[2].value, plan.remainder);
    assert_eq!(outputs[2].script_pubkey, p2wpkh_script(&own_program()));
}

/// What is tested: A remainder equal to the nonce mark is decremented by one
/// Why: The remainder must never look like a second nonce mark
#[test]
fn test_remainder_equal_to_nonce_mark_is_decremented() {
    let total = 50_000 + 10 + 2 * 2005;
    let inputs = vec![tss_utxo(1, total)];
    let plan = build_withdraw_tx(&inputs, total, &own_program(), &receiver_program(), 50_000, 25, 1000, 5).unwrap();
    assert_eq!(plan.remainder, 2004);
    assert_eq!(plan.tx.outputs[2].value, 2004);
}

/// What is tested: A zero remainder drops the change output and a negative one fails
/// Why: Insufficient funds after fees aborts the attempt
#[test]
fn test_zero_and_negative_remainder() {
    let exact = 50_000 + 10 + 2005;
    let plan = build_withdraw_tx(&[tss_utxo(1, exact)], exact, &own_program(), &receiver_program(), 50_000, 25, 1000, 5)
        .unwrap();
    assert_eq!(plan.tx.outputs.len(), 2);

    let short = exact - 1;
    let err = build_withdraw_tx(&[tss_utxo(1, short)], short, &own_program(), &receiver_program(), 50_000, 25, 1000, 5)
        .unwrap_err();
    assert_eq!(err, OutboundError::NegativeRemainder(-1));
}

/// What is tested: Fees use the clamped size
/// Why: A tiny size limit cannot push fees under the minimum size
#[test]
fn test_fees_use_clamped_size() {
    let plan = build_withdraw_tx(&[tss_utxo(1, 100_000)], 100_000, &own_program(), &receiver_program(), 1000, 10, 50, 0)
        .unwrap();
    assert_eq!(plan.fees, 4);
}

/// What is tested: A 20-input withdrawal pays for its own estimated size, not the size limit
/// Why: Fees from the gas limit alone would underpay large transactions
#[test]
fn test_fees_follow_transaction_size() {
    let inputs: Vec<_> = (1u8..=20).map(|seed| tss_utxo(seed, 10_000)).collect();
    let plan = build_withdraw_tx(&inputs, 200_000, &own_program(), &receiver_program(), 50_000, 1000, 400, 0).unwrap();

    // 923 non-witness bytes, 2 marker bytes, 20 * 108 witness bytes
    assert_eq!(plan.tx.serialize_no_witness().len(), 923);
    assert_eq!(estimate_tx_size(&plan.tx), 3085);
    assert_eq!(plan.fees, 3085);
    assert_eq!(plan.remainder, 200_000 - 50_000 - 3085 - 2000);
}

/// What is tested: An amount near u64::MAX fails the attempt instead of overflowing
/// Why: Ledger amounts are untrusted input to the signer
#[test]
fn test_withdraw_amount_overflow() {
    let err = build_withdraw_tx(&[tss_utxo(1, 100_000)], 100_000, &own_program(), &receiver_program(), u64::MAX, 10, 1000, 0)
        .unwrap_err();
    assert!(matches!(err, OutboundError::InvalidAmount(_)));
}

/// What is tested: Receivers must be 20-byte hex witness programs
/// Why: Paying to a malformed script would burn the funds
#[test]
fn test_parse_receiver() {
    assert_eq!(parse_receiver(&format!("0x{}", RECEIVER)).unwrap(), receiver_program());
    assert!(matches!(parse_receiver("0011"), Err(OutboundError::InvalidReceiver(_))));
    assert!(matches!(parse_receiver("bcrt1qxyz"), Err(OutboundError::InvalidReceiver(_))));
}

// ============================================================================
// ENCODING
// ============================================================================

/// What is tested: The BIP143 sighash of a P2WPKH input matches the published vector
/// Why: A wrong sighash produces signatures the chain rejects
#[test]
fn test_bip143_native_p2wpkh_vector() {
    let mut tx = Transaction::new();
    tx.lock_time = 0x11;
    let mut txid0 = [0u8; 32];
    txid0.copy_from_slice(&hex::decode("fff7f7881a8099afa6940d42d1e7f6362bec38171ea3edf433541db4e4ad969f").unwrap());
    let mut txid1 = [0u8; 32];
    txid1.copy_from_slice(&hex::decode("ef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a").unwrap());
    tx.add_input(OutPoint { txid: txid0, vout: 0 });
    tx.inputs[0].sequence = 0xffff_ffee;
    tx.add_input(OutPoint { txid: txid1, vout: 1 });
    tx.add_output(
        112_340_000,
        hex::decode("76a9148280b37df378db99f66f85c95a783a76ac7a6d5988ac").unwrap(),
    );
    tx.add_output(
        223_450_000,
        hex::decode("76a9143bde42dbee7e4dbe6a21b2d50ce2f0167faa815988ac").unwrap(),
    );

    assert_eq!(
        hex::encode(tx.serialize_no_witness()),
        "0100000002fff7f7881a8099afa6940d42d1e7f6362bec38171ea3edf433541db4e4ad969f0000000000eeffffffef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a0100000000ffffffff02202cb206000000001976a9148280b37df378db99f66f85c95a783a76ac7a6d5988ac9093510d000000001976a9143bde42dbee7e4dbe6a21b2d50ce2f0167faa815988ac11000000"
    );

    let mut program = [0u8; 20];
    program.copy_from_slice(&hex::decode("1d0f172a0ecb48aee1be1f2687d2963ae33f71a1").unwrap());
    let sighash = tx.witness_sighash(1, &program, 600_000_000).unwrap();
    assert_eq!(
        hex::encode(sighash),
        "c37af31116d1b27caf68aae9e3ac82f1477929014d5b917657d0eb49478cb670"
    );
    assert!(tx.witness_sighash(2, &program, 0).is_none());
}

/// What is tested: Display txids are byte-reversed and P2WPKH scripts round-trip their program
/// Why: RPC reports txids reversed relative to the wire order
#[test]
fn test_outpoint_and_script_helpers() {
    let display = format!("{}{}", "00".repeat(31), "01");
    let outpoint = OutPoint::from_display(&display, 3).unwrap();
    assert_eq!(outpoint.txid[0], 0x01);
    assert_eq!(outpoint.vout, 3);
    assert!(OutPoint::from_display("abcd", 0).is_err());

    let script = p2wpkh_script(&own_program());
    assert_eq!(witness_program(&script), Some(own_program()));
    assert_eq!(witness_program(&script[1..]), None);
}

/// What is tested: DER encoding normalizes high S values
/// Why: The chain's standardness rules reject high-S signatures
#[test]
fn test_der_signature_low_s() {
    let mut sig = [0u8; 65];
    sig[31] = 0x01;
    // S = n - 1, the largest valid scalar
    sig[32..64].copy_from_slice(
        &hex::decode("fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364140").unwrap(),
    );
    let der = der_signature(&sig).unwrap();
    let parsed = Signature::from_der(&der).unwrap();
    assert!(parsed.normalize_s().is_none());
    assert_eq!(parsed.split_bytes().1[31], 0x01);
}

// ============================================================================
// SIGNING FLOW
// ============================================================================

/// What is tested: Every input carries a low-S DER signature over its sighash and the TSS pubkey
/// Why: The witness must satisfy P2WPKH spending rules
#[tokio::test]
async fn test_sign_withdraw_tx_witnesses() {
    let server = Arc::new(MockKeysignServer::new(KeysignMode::Honest));
    let client = MockUtxoClient::with_utxos(vec![tss_utxo(1, 30_000), tss_utxo(2, 40_000)]);
    let signer = utxo_signer(server.clone(), MockBridge::new(), client);

    let tx = signer
        .sign_withdraw_tx(&receiver_program(), 50_000, 10, 1000, 42, 0)
        .await
        .unwrap();
    assert_eq!(tx.inputs.len(), 2);
    assert_eq!(server.request_count(), 1);
    assert_eq!(server.requests.lock().unwrap()[0].messages.len(), 2);

    let key = TssKey::new(&tss_pubkey()).unwrap();
    let verifying_key = VerifyingKey::from_sec1_bytes(&key.compressed).unwrap();
    let values = [30_000u64, 40_000];
    for (ix, input) in tx.inputs.iter().enumerate() {
        assert_eq!(input.witness.len(), 2);
        assert_eq!(input.witness[1], key.compressed);
        let (sighash_type, der) = input.witness[0].split_last().unwrap();
        assert_eq!(*sighash_type, 0x01);
        let sig = Signature::from_der(der).unwrap();
        assert!(sig.normalize_s().is_none());
        let digest = tx.witness_sighash(ix, &own_program(), values[ix]).unwrap();
        verifying_key.verify_prehash(&digest, &sig).unwrap();
    }

    let raw = tx.serialize();
    assert_eq!(&raw[4..6], &[0x00, 0x01]);
    assert_eq!(tx.txid_hex().len(), 64);
}

/// What is tested: Outputs paying other scripts are ignored when refreshing
/// Why: Only outputs the TSS key can spend may be selected
#[tokio::test]
async fn test_refresh_filters_foreign_outputs() {
    let mut foreign = tss_utxo(9, 1_000_000);
    foreign.script_pub_key = hex::encode(p2wpkh_script(&receiver_program()));
    let client = MockUtxoClient::with_utxos(vec![tss_utxo(2, 5000), foreign, tss_utxo(1, 1000)]);
    let signer = utxo_signer(Arc::new(MockKeysignServer::new(KeysignMode::Honest)), MockBridge::new(), client);

    assert_eq!(signer.refresh_unspent_utxos().await.unwrap(), 2);
    let values: Vec<u64> = signer.utxos().await.iter().map(|u| u.value_sats()).collect();
    assert_eq!(values, vec![1000, 5000]);
}

/// What is tested: A failed refresh keeps signing with the previous set
/// Why: A flaky RPC must not stall outbounds that the known set can pay
#[tokio::test]
async fn test_refresh_failure_uses_stale_set() {
    let client = MockUtxoClient::with_utxos(vec![tss_utxo(1, 100_000)]);
    let signer = utxo_signer(
        Arc::new(MockKeysignServer::new(KeysignMode::Honest)),
        MockBridge::new(),
        client.clone(),
    );
    signer.refresh_unspent_utxos().await.unwrap();
    client.state.lock().unwrap().fail_list_unspent = true;

    let tx = signer
        .sign_withdraw_tx(&receiver_program(), 50_000, 10, 1000, 42, 0)
        .await
        .unwrap();
    assert_eq!(tx.inputs.len(), 1);
}

// ============================================================================
// TRY PROCESS
// ============================================================================

/// What is tested: A pending outbound is signed, broadcast, reported and recorded
/// Why: This is the whole outbound path of one observer
#[tokio::test]
async fn test_try_process_broadcasts_and_reports() {
    let bridge = MockBridge::new();
    let client = MockUtxoClient::with_utxos(vec![tss_utxo(1, 100_000)]);
    let signer = utxo_signer(
        Arc::new(MockKeysignServer::new(KeysignMode::Honest)),
        bridge.clone(),
        client.clone(),
    );
    let manager = OutTxProcessorManager::new();
    let guard = manager.start_try_process("18444-0").unwrap();

    let outcome = signer.try_process_out_tx(pending_cctx(0, 50_000), guard, 42).await;
    let OutboundOutcome::Broadcast { tx_hash } = outcome else {
        panic!("expected broadcast, got {:?}", outcome);
    };

    assert_eq!(client.broadcasted().len(), 1);
    assert_eq!(bridge.submitted_hashes(), vec![(BTC_CHAIN_ID, 0, tx_hash.clone())]);
    assert_eq!(signer.broadcasted_tx(0).await, Some(tx_hash));
    assert!(!manager.is_out_tx_active("18444-0"));
}

/// What is tested: An outbound already broadcast locally is skipped on the next attempt
/// Why: A processed outbound is never signed twice
#[tokio::test]
async fn test_try_process_skips_locally_processed() {
    let server = Arc::new(MockKeysignServer::new(KeysignMode::Honest));
    let client = MockUtxoClient::with_utxos(vec![tss_utxo(1, 100_000)]);
    let signer = utxo_signer(server.clone(), MockBridge::new(), client.clone());
    let manager = OutTxProcessorManager::new();

    let first = signer
        .try_process_out_tx(pending_cctx(0, 50_000), manager.start_try_process("a").unwrap(), 42)
        .await;
    assert_eq!(first.label(), "broadcast");
    let second = signer
        .try_process_out_tx(pending_cctx(0, 50_000), manager.start_try_process("a").unwrap(), 42)
        .await;
    assert_eq!(second.label(), "skipped");
    assert_eq!(server.request_count(), 1);
    assert_eq!(client.broadcast_attempts(), 1);
}

/// What is tested: An outbound whose tracker already holds a hash is skipped before signing
/// Why: Another observer already broadcast it
#[tokio::test]
async fn test_try_process_skips_tracked() {
    let server = Arc::new(MockKeysignServer::new(KeysignMode::Honest));
    let bridge = MockBridge::new();
    bridge.set_tracker(BTC_CHAIN_ID, 0, "feedbeef");
    let signer = utxo_signer(server.clone(), bridge, MockUtxoClient::with_utxos(vec![tss_utxo(1, 100_000)]));

    let outcome = signer
        .try_process_out_tx(pending_cctx(0, 50_000), OutTxProcessorManager::new().start_try_process("x").unwrap(), 42)
        .await;
    assert_eq!(outcome.label(), "skipped");
    assert_eq!(server.request_count(), 0);
}

/// What is tested: Disabled outbound flags skip the attempt
/// Why: The admin can halt all outbound signing
#[tokio::test]
async fn test_try_process_skips_when_outbound_disabled() {
    let server = Arc::new(MockKeysignServer::new(KeysignMode::Honest));
    let bridge = MockBridge::new();
    bridge.set_outbound_enabled(false);
    let signer = utxo_signer(server.clone(), bridge, MockUtxoClient::with_utxos(vec![tss_utxo(1, 100_000)]));

    let outcome = signer
        .try_process_out_tx(pending_cctx(0, 50_000), OutTxProcessorManager::new().start_try_process("x").unwrap(), 42)
        .await;
    assert_eq!(
        outcome,
        OutboundOutcome::Skipped {
            reason: "outbound is disabled".to_string()
        }
    );
    assert_eq!(server.request_count(), 0);
}

/// What is tested: Failed broadcasts are retried and the first success wins
/// Why: Transient RPC errors must not lose a signed transaction
#[tokio::test]
async fn test_try_process_retries_broadcast() {
    let client = MockUtxoClient::with_utxos(vec![tss_utxo(1, 100_000)]);
    client.fail_broadcasts(2);
    let bridge = MockBridge::new();
    let signer = utxo_signer(
        Arc::new(MockKeysignServer::new(KeysignMode::Honest)),
        bridge.clone(),
        client.clone(),
    );

    let outcome = signer
        .try_process_out_tx(pending_cctx(0, 50_000), OutTxProcessorManager::new().start_try_process("x").unwrap(), 42)
        .await;
    assert_eq!(outcome.label(), "broadcast");
    assert_eq!(client.broadcast_attempts(), 3);
    assert_eq!(bridge.submitted_hashes().len(), 1);
}

/// What is tested: Exhausting every broadcast attempt fails without reporting a hash
/// Why: Only a broadcast that succeeded may reach the tracker
#[tokio::test]
async fn test_try_process_broadcast_exhausted() {
    let client = MockUtxoClient::with_utxos(vec![tss_utxo(1, 100_000)]);
    client.fail_broadcasts(100);
    let bridge = MockBridge::new();
    let signer = utxo_signer(
        Arc::new(MockKeysignServer::new(KeysignMode::Honest)),
        bridge.clone(),
        client.clone(),
    );

    let outcome = signer
        .try_process_out_tx(pending_cctx(0, 50_000), OutTxProcessorManager::new().start_try_process("x").unwrap(), 42)
        .await;
    assert_eq!(outcome.label(), "failed");
    assert_eq!(client.broadcast_attempts(), 5);
    assert!(bridge.submitted_hashes().is_empty());
    assert_eq!(signer.broadcasted_tx(0).await, None);
}

/// What is tested: Insufficient funds, unsupported coins and failed rounds end as Failed
/// Why: Errors surface as outcomes instead of stopping the worker
#[tokio::test]
async fn test_try_process_failures() {
    let manager = OutTxProcessorManager::new();

    let poor = utxo_signer(
        Arc::new(MockKeysignServer::new(KeysignMode::Honest)),
        MockBridge::new(),
        MockUtxoClient::with_utxos(vec![tss_utxo(1, 1000)]),
    );
    let outcome = poor
        .try_process_out_tx(pending_cctx(0, 50_000), manager.start_try_process("a").unwrap(), 42)
        .await;
    let OutboundOutcome::Failed { error } = outcome else {
        panic!("expected failure");
    };
    assert!(error.contains("insufficient funds"));

    let mut erc20 = pending_cctx(1, 50_000);
    erc20.outbound_tx_params[0].coin_type = CoinType::Erc20;
    let outcome = poor
        .try_process_out_tx(erc20, manager.start_try_process("b").unwrap(), 42)
        .await;
    assert_eq!(outcome.label(), "failed");

    let outcome = poor
        .try_process_out_tx(pending_cctx(3, u64::MAX), manager.start_try_process("d").unwrap(), 42)
        .await;
    let OutboundOutcome::Failed { error } = outcome else {
        panic!("expected failure");
    };
    assert!(error.contains(&u64::MAX.to_string()));

    let bridge = MockBridge::new();
    let blamed = utxo_signer(
        Arc::new(MockKeysignServer::new(KeysignMode::Fail(vec!["zetapub1node1".to_string()]))),
        bridge.clone(),
        MockUtxoClient::with_utxos(vec![tss_utxo(1, 100_000)]),
    );
    let outcome = blamed
        .try_process_out_tx(pending_cctx(2, 50_000), manager.start_try_process("c").unwrap(), 42)
        .await;
    assert_eq!(outcome.label(), "failed");
    assert_eq!(bridge.blames().len(), 1);
    assert_eq!(manager.num_active(), 0);
}
