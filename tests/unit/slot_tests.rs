//! Unit tests for the process-wide gateway slot.

use std::sync::Arc;
use std::thread;

use spark_gateway::orchestrator::slot::SessionSlot;
use spark_gateway::GatewayError;

#[test]
fn second_acquire_fails_fast() {
    let slot = Arc::new(SessionSlot::new());
    let _guard = slot.try_acquire().expect("first acquire");

    let err = slot.try_acquire().expect_err("slot held");

    assert!(matches!(err, GatewayError::SessionActive(_)));
}

#[test]
fn dropping_guard_frees_slot() {
    let slot = Arc::new(SessionSlot::new());
    let guard = slot.try_acquire().expect("acquire");
    assert!(!slot.is_free());

    drop(guard);

    assert!(slot.is_free());
    assert!(slot.try_acquire().is_ok());
}

#[test]
fn exactly_one_racing_thread_wins() {
    let slot = Arc::new(SessionSlot::new());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.try_acquire().ok())
        })
        .collect();
    let guards: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread"))
        .collect();

    assert_eq!(guards.iter().filter(|guard| guard.is_some()).count(), 1);
}

#[test]
fn global_slot_is_shared() {
    let first = SessionSlot::global();
    let second = SessionSlot::global();

    assert!(Arc::ptr_eq(&first, &second));
}
