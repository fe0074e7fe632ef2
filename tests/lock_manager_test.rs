use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tarndb::common::types::Rid;
use tarndb::transaction::{
    AbortReason, IsolationLevel, LockManager, TransactionManager, TransactionState,
};

mod common;

fn setup() -> (Arc<LockManager>, Arc<TransactionManager>) {
    common::init_logging();
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = Arc::new(TransactionManager::new(lock_manager.clone()));
    (lock_manager, txn_manager)
}

#[test]
fn test_shared_locks_are_compatible() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(0, 0);

    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);

    assert!(lock_manager.lock_shared(&t0, rid));
    assert!(lock_manager.lock_shared(&t1, rid));
    assert!(t0.is_shared_locked(rid));
    assert!(t1.is_shared_locked(rid));

    // Re-locking an already held rid is a cheap no-op.
    assert!(lock_manager.lock_shared(&t0, rid));

    txn_manager.commit(&t0);
    txn_manager.commit(&t1);
    assert!(!t0.is_shared_locked(rid));
}

#[test]
fn test_shared_on_read_uncommitted_aborts() {
    let (lock_manager, txn_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::ReadUncommitted);

    assert!(!lock_manager.lock_shared(&txn, Rid::new(0, 0)));
    assert_eq!(txn.state(), TransactionState::Aborted);
    assert_eq!(
        txn.abort_reason(),
        Some(AbortReason::LockSharedOnReadUncommitted)
    );
}

#[test]
fn test_lock_on_shrinking_aborts() {
    // A repeatable-read transaction that unlocks enters the shrinking
    // phase; any further lock request must abort.
    let (lock_manager, txn_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    let r1 = Rid::new(0, 1);
    let r2 = Rid::new(0, 2);

    assert!(lock_manager.lock_shared(&txn, r1));
    assert!(lock_manager.unlock(&txn, r1));
    assert_eq!(txn.state(), TransactionState::Shrinking);

    assert!(!lock_manager.lock_shared(&txn, r2));
    assert_eq!(txn.state(), TransactionState::Aborted);
    assert_eq!(txn.abort_reason(), Some(AbortReason::LockOnShrinking));
}

#[test]
fn test_read_committed_releases_without_shrinking() {
    let (lock_manager, txn_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::ReadCommitted);
    let r1 = Rid::new(0, 1);
    let r2 = Rid::new(0, 2);

    assert!(lock_manager.lock_shared(&txn, r1));
    assert!(lock_manager.unlock(&txn, r1));
    assert_eq!(txn.state(), TransactionState::Growing);

    // The transaction can keep acquiring locks.
    assert!(lock_manager.lock_shared(&txn, r2));
    txn_manager.commit(&txn);
}

#[test]
fn test_exclusive_blocks_until_release() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(1, 0);

    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    assert!(lock_manager.lock_exclusive(&t0, rid));

    // The younger transaction waits behind the older holder.
    let granted = Arc::new(AtomicBool::new(false));
    let waiter = {
        let lock_manager = lock_manager.clone();
        let t1 = t1.clone();
        let granted = granted.clone();
        thread::spawn(move || {
            let ok = lock_manager.lock_exclusive(&t1, rid);
            granted.store(ok, Ordering::SeqCst);
            ok
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!granted.load(Ordering::SeqCst));
    assert_eq!(t1.state(), TransactionState::Growing);

    assert!(lock_manager.unlock(&t0, rid));
    assert!(waiter.join().unwrap());
    assert!(t1.is_exclusive_locked(rid));
    txn_manager.commit(&t1);
    txn_manager.commit(&t0);
}

#[test]
fn test_older_wounds_younger_holder() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(1, 1);

    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);

    // The younger transaction holds the lock; the older requester does
    // not wait for it, it wounds it.
    assert!(lock_manager.lock_exclusive(&t1, rid));
    assert!(lock_manager.lock_exclusive(&t0, rid));

    assert_eq!(t1.state(), TransactionState::Aborted);
    assert_eq!(t1.abort_reason(), Some(AbortReason::Deadlock));

    // The victim's entries are cleaned on its abort path.
    txn_manager.abort(&t1);
    txn_manager.commit(&t0);
}

#[test]
fn test_wound_wait_queue_scenario() {
    // T1 holds X on R; younger T2 and T3 line up behind it. T3 also
    // holds S on R2. When T1 asks for X on R2 it wounds T3; T3 wakes,
    // observes the wound, aborts, and the queue keeps moving.
    let (lock_manager, txn_manager) = setup();
    let r = Rid::new(2, 0);
    let r2 = Rid::new(2, 1);

    let _t0 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t3 = txn_manager.begin(IsolationLevel::RepeatableRead);

    assert!(lock_manager.lock_exclusive(&t1, r));
    assert!(lock_manager.lock_shared(&t3, r2));

    let t2_result = {
        let lock_manager = lock_manager.clone();
        let txn_manager = txn_manager.clone();
        let t2 = t2.clone();
        thread::spawn(move || {
            let ok = lock_manager.lock_exclusive(&t2, r);
            if ok {
                txn_manager.commit(&t2);
            }
            ok
        })
    };
    let t3_result = {
        let lock_manager = lock_manager.clone();
        let txn_manager = txn_manager.clone();
        let t3 = t3.clone();
        thread::spawn(move || {
            let ok = lock_manager.lock_exclusive(&t3, r);
            if !ok {
                // Wounded: release everything held on this behalf.
                txn_manager.abort(&t3);
            }
            ok
        })
    };

    // Both youngsters are parked behind T1.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(t2.state(), TransactionState::Growing);
    assert_eq!(t3.state(), TransactionState::Growing);

    // T1 wounds T3 through its shared lock on R2 and proceeds.
    assert!(lock_manager.lock_exclusive(&t1, r2));
    assert_eq!(t3.state(), TransactionState::Aborted);
    assert_eq!(t3.abort_reason(), Some(AbortReason::Deadlock));

    // T1 finishes; T2 is next in line and gets the lock.
    assert!(lock_manager.unlock(&t1, r));
    assert!(lock_manager.unlock(&t1, r2));

    assert!(t2_result.join().unwrap());
    assert!(!t3_result.join().unwrap());
    txn_manager.commit(&t1);
}

#[test]
fn test_upgrade_wounds_younger_sharer() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(3, 0);

    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);

    assert!(lock_manager.lock_shared(&t0, rid));
    assert!(lock_manager.lock_shared(&t1, rid));

    // The older sharer upgrades, wounding the younger one.
    assert!(lock_manager.lock_upgrade(&t0, rid));
    assert!(t0.is_exclusive_locked(rid));
    assert!(!t0.is_shared_locked(rid));
    assert_eq!(t1.state(), TransactionState::Aborted);

    txn_manager.abort(&t1);
    txn_manager.commit(&t0);
}

#[test]
fn test_concurrent_upgrades_conflict() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(3, 1);

    let t0 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    assert!(lock_manager.lock_shared(&t0, rid));
    assert!(lock_manager.lock_shared(&t1, rid));

    // The younger transaction starts upgrading first and parks behind
    // the older shared holder.
    let t1_result = {
        let lock_manager = lock_manager.clone();
        let txn_manager = txn_manager.clone();
        let t1 = t1.clone();
        thread::spawn(move || {
            let ok = lock_manager.lock_upgrade(&t1, rid);
            if ok {
                txn_manager.commit(&t1);
            }
            ok
        })
    };
    thread::sleep(Duration::from_millis(100));

    // The second upgrader on the same rid aborts with a conflict.
    assert!(!lock_manager.lock_upgrade(&t0, rid));
    assert_eq!(t0.abort_reason(), Some(AbortReason::UpgradeConflict));

    // Releasing the aborted transaction's shared lock unblocks T1.
    txn_manager.abort(&t0);
    assert!(t1_result.join().unwrap());
}

#[test]
fn test_unlock_without_lock_returns_false() {
    let (lock_manager, txn_manager) = setup();
    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    assert!(!lock_manager.unlock(&txn, Rid::new(9, 9)));
}

#[test]
fn test_contended_mix_always_terminates() {
    // Hammer a handful of rids from many transactions. Wound-wait keeps
    // the wait-for graph acyclic, so every transaction either commits
    // or observes its abort and the workload never deadlocks.
    let (lock_manager, txn_manager) = setup();
    let rids = [Rid::new(4, 0), Rid::new(4, 1), Rid::new(4, 2)];

    let mut handles = Vec::new();
    for worker in 0..8usize {
        let lock_manager = lock_manager.clone();
        let txn_manager = txn_manager.clone();
        handles.push(thread::spawn(move || {
            let mut commits = 0;
            let mut aborts = 0;
            for round in 0..20 {
                let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
                let mut ok = true;
                // Alternate acquisition orders to provoke conflicts.
                for step in 0..rids.len() {
                    let rid = rids[(worker + round * step) % rids.len()];
                    let granted = if (worker + step) % 2 == 0 {
                        lock_manager.lock_shared(&txn, rid)
                    } else {
                        lock_manager.lock_exclusive(&txn, rid)
                    };
                    if !granted {
                        ok = false;
                        break;
                    }
                }
                if ok {
                    txn_manager.commit(&txn);
                    commits += 1;
                } else {
                    assert_eq!(txn.state(), TransactionState::Aborted);
                    txn_manager.abort(&txn);
                    aborts += 1;
                }
            }
            (commits, aborts)
        }));
    }

    let mut commits = 0;
    let mut aborts = 0;
    for handle in handles {
        let (c, a) = handle.join().unwrap();
        commits += c;
        aborts += a;
    }
    // Joining at all proves the absence of deadlock; every transaction
    // reached a terminal state.
    assert_eq!(commits + aborts, 8 * 20);
    assert!(commits > 0);
}
