//! # Lock Manager Concurrency Tests
//!
//! Cross-thread scenarios against the public lock surface: shared-mode
//! coexistence, deadlock detection with deterministic victim selection, and
//! writer isolation across commits.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use shimmer::{EngineError, Environment, LockMode, TxnMode};

#[test]
fn two_readers_share_a_page_lock() {
    let env = Environment::new();
    let db = env.open_database("shared").unwrap();

    let reader_a = env.begin_txn(TxnMode::ReadOnly);
    let reader_b = env.begin_txn(TxnMode::ReadOnly);

    db.locks()
        .lock_page(reader_a.id(), 1, LockMode::Shared)
        .unwrap();
    db.locks()
        .lock_page(reader_b.id(), 1, LockMode::Shared)
        .unwrap();

    assert_eq!(
        db.locks().granted_count(shimmer::ResourceId::page(1)),
        2
    );
}

#[test]
fn crossed_requests_deadlock_exactly_one_victim() {
    let env = Arc::new(Environment::new());
    let db = env.open_database("deadlock").unwrap();

    // A locks page 1, B locks page 2.
    let txn_a = env.begin_txn(TxnMode::ReadWrite);
    let txn_b = env.begin_txn(TxnMode::ReadWrite);
    let (a, b) = (txn_a.id(), txn_b.id());
    db.locks().lock_page(a, 1, LockMode::Exclusive).unwrap();
    db.locks().lock_page(b, 2, LockMode::Exclusive).unwrap();

    // A requests page 2 and blocks.
    let locks = Arc::clone(&db);
    let crossing = thread::spawn(move || locks.locks().lock_page(a, 2, LockMode::Shared));

    thread::sleep(Duration::from_millis(50));

    // B requests page 1, closing the cycle. B has the greater id, so B is
    // the victim.
    let err = db
        .locks()
        .lock_page(b, 1, LockMode::Shared)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::DeadlockDetected { txn }) if *txn == b
    ));

    // The victim's owner aborts it; the survivor's request is granted.
    let mut txn_b = txn_b;
    env.abort_txn(&mut txn_b).unwrap();
    crossing.join().unwrap().unwrap();

    let mut txn_a = txn_a;
    env.commit_txn(&mut txn_a).unwrap();
}

#[test]
fn wounded_victim_fails_with_invalid_transaction() {
    let env = Arc::new(Environment::new());
    let db = env.open_database("wound").unwrap();

    let txn_low = env.begin_txn(TxnMode::ReadWrite);
    let txn_high = env.begin_txn(TxnMode::ReadWrite);
    let (low, high) = (txn_low.id(), txn_high.id());
    db.locks().lock_page(low, 1, LockMode::Exclusive).unwrap();
    db.locks().lock_page(high, 2, LockMode::Exclusive).unwrap();

    // The younger (higher-id) transaction blocks first.
    let locks = Arc::clone(&db);
    let blocked = thread::spawn(move || locks.locks().lock_page(high, 1, LockMode::Shared));
    thread::sleep(Duration::from_millis(50));

    // The older transaction closes the cycle; the younger one is wounded
    // and the older one is granted.
    db.locks().lock_page(low, 2, LockMode::Shared).unwrap();

    let err = blocked.join().unwrap().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::InvalidTransaction { id, .. }) if *id == high
    ));

    // The victim cannot commit; its owner aborts it instead.
    let mut txn_high = txn_high;
    let err = env.commit_txn(&mut txn_high).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::InvalidTransaction { .. })
    ));

    let mut txn_low = txn_low;
    env.commit_txn(&mut txn_low).unwrap();
}

#[test]
fn sequential_writers_serialize_through_commit() {
    let env = Arc::new(Environment::new());
    let db = env.open_database("writers").unwrap();
    db.set_immutable(false);

    for round in 0..4u32 {
        let handles: Vec<_> = (0..2)
            .map(|worker| {
                let env = Arc::clone(&env);
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    let mut txn = env.begin_txn(TxnMode::ReadWrite);
                    let key = format!("worker{worker}-round{round}");
                    db.put(&mut txn, key.as_bytes(), b"done").unwrap();
                    env.commit_txn(&mut txn).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    let mut reader = env.begin_txn(TxnMode::ReadOnly);
    for round in 0..4u32 {
        for worker in 0..2 {
            let key = format!("worker{worker}-round{round}");
            assert_eq!(
                db.get(&mut reader, key.as_bytes()).unwrap(),
                Some(b"done".to_vec())
            );
        }
    }
    db.check_tree().unwrap();
}

#[test]
fn lock_timeout_reports_resource() {
    let env = Environment::new();
    let db = env.open_database("timeout").unwrap();

    let holder = env.begin_txn(TxnMode::ReadWrite);
    db.locks()
        .lock_page(holder.id(), 5, LockMode::Exclusive)
        .unwrap();

    let waiter = env.begin_txn(TxnMode::ReadWrite);
    let err = db
        .locks()
        .acquire(
            waiter.id(),
            shimmer::ResourceId::page(5),
            shimmer::ResourceKind::Page,
            LockMode::Shared,
            Duration::from_millis(50),
        )
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::LockTimeout { .. })
    ));
}
