//! Unit tests for the outbound processor manager

use std::time::Duration;

use observer::outbound::{out_tx_id, OutTxProcessorManager};

/// What is tested: A second start for the same id is refused while the first is in flight
/// Why: Only one signing attempt per outbound may run at a time
#[test]
fn test_overlapping_start_refused() {
    let manager = OutTxProcessorManager::new();
    let id = out_tx_id(18444, 7);
    assert_eq!(id, "18444-7");

    let guard = manager.start_try_process(&id).expect("first attempt starts");
    assert_eq!(guard.id(), "18444-7");
    assert!(manager.is_out_tx_active(&id));
    assert!(manager.start_try_process(&id).is_none());

    // other outbounds are independent
    let other = manager.start_try_process(&out_tx_id(18444, 8)).expect("other nonce starts");
    assert_eq!(manager.num_active(), 2);
    drop(other);
    drop(guard);
    assert_eq!(manager.num_active(), 0);
}

/// What is tested: Dropping the guard ends the attempt and records its duration
/// Why: Every exit path must release the outbound id
#[test]
fn test_drop_ends_attempt() {
    let manager = OutTxProcessorManager::new();
    let id = out_tx_id(1, 0);
    {
        let _guard = manager.start_try_process(&id).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(manager.time_in_try_process(&id).unwrap() >= Duration::from_millis(5));
    }
    assert!(!manager.is_out_tx_active(&id));
    assert!(manager.time_in_try_process(&id).unwrap() >= Duration::from_millis(5));
    assert!(manager.start_try_process(&id).is_some());
}

/// What is tested: A task that panics while holding the guard still releases the id
/// Why: An unexpected error must never leave an outbound stuck "in progress"
#[tokio::test]
async fn test_panic_releases_id() {
    let manager = OutTxProcessorManager::new();
    let id = out_tx_id(1, 3);
    let guard = manager.start_try_process(&id).unwrap();

    let handle = tokio::spawn(async move {
        let _guard = guard;
        panic!("signer bug");
    });
    assert!(handle.await.unwrap_err().is_panic());

    assert!(!manager.is_out_tx_active(&id));
    assert!(manager.start_try_process(&id).is_some());
}

/// What is tested: Explicit end on an id that is not active is a no-op
/// Why: end_try_process runs again when a guard drops after a manual end
#[test]
fn test_end_unknown_id_is_noop() {
    let manager = OutTxProcessorManager::new();
    manager.end_try_process("1-1");
    assert!(manager.time_in_try_process("1-1").is_none());
    assert_eq!(manager.num_active(), 0);
}
