// Tests for the per-state lock on its own

use std::env;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

use crate::*;

#[test]
fn test_acquire_release() {
    let lock = StateLock::default();
    assert!(!lock.is_locked());

    lock.acquire();
    assert!(lock.is_locked());
    assert!(lock.is_held_by_current_thread());
    assert_eq!(lock.depth(), 1);

    lock.release();
    assert!(!lock.is_locked());
    assert!(!lock.is_held_by_current_thread());
    assert_eq!(lock.depth(), 0);
}

#[test]
fn test_reentrant_depth() {
    let lock = StateLock::new(Reentrancy::Reentrant, PoisonPolicy::Clear);

    lock.acquire();
    lock.acquire();
    assert!(lock.try_acquire());
    assert_eq!(lock.depth(), 3);

    lock.release();
    lock.release();
    assert!(lock.is_locked());
    assert_eq!(lock.depth(), 1);

    lock.release();
    assert!(!lock.is_locked());
    assert_eq!(lock.stats().acquisitions, 3);
    assert_eq!(lock.stats().contentions, 0);
}

#[test]
fn test_try_acquire_from_other_thread() {
    let lock = StateLock::default();
    lock.acquire();

    thread::scope(|s| {
        s.spawn(|| {
            assert!(!lock.try_acquire());
            assert!(!lock.is_held_by_current_thread());
            assert_eq!(lock.depth(), 0);
        });
    });

    lock.release();

    thread::scope(|s| {
        s.spawn(|| {
            assert!(lock.try_acquire());
            lock.release();
        });
    });
}

#[test]
fn test_non_reentrant_try_acquire_refuses_owner() {
    let lock = StateLock::new(Reentrancy::NonReentrant, PoisonPolicy::Clear);
    assert_eq!(lock.reentrancy(), Reentrancy::NonReentrant);

    lock.acquire();
    assert!(!lock.try_acquire());
    assert_eq!(lock.depth(), 1);
    lock.release();
    assert!(!lock.is_locked());
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "re-acquired by its owning thread")]
fn test_non_reentrant_self_acquire_asserts() {
    let lock = StateLock::new(Reentrancy::NonReentrant, PoisonPolicy::Clear);
    lock.acquire();
    lock.acquire();
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "does not hold it")]
fn test_release_without_acquire_asserts() {
    let lock = StateLock::default();
    lock.release();
}

#[test]
fn test_contention_is_counted() {
    let lock = Arc::new(StateLock::default());
    lock.acquire();

    let waiter = {
        let lock = Arc::clone(&lock);
        thread::spawn(move || {
            lock.acquire();
            assert_eq!(lock.depth(), 1);
            lock.release();
        })
    };

    // Hold on until the other thread has registered as blocked
    while lock.stats().contentions == 0 {
        thread::yield_now();
    }
    lock.release();
    waiter.join().unwrap();

    let stats = lock.stats();
    assert_eq!(stats.acquisitions, 2);
    assert_eq!(stats.contentions, 1);
    assert!(!lock.is_locked());
}

#[test]
fn test_poison_cleared_on_next_acquire() {
    let lock = StateLock::new(Reentrancy::Reentrant, PoisonPolicy::Clear);
    lock.mark_poisoned();
    assert!(lock.is_poisoned());

    lock.acquire();
    assert!(!lock.is_poisoned());
    lock.release();
}

/// Set in the child process spawned by `test_poison_abort_policy_aborts`
const ABORT_CHILD_ENV: &str = "LUARS_HOOKS_ABORT_CHILD";

#[test]
fn test_poison_abort_policy_aborts() {
    if env::var_os(ABORT_CHILD_ENV).is_some() {
        let lock = StateLock::new(Reentrancy::Reentrant, PoisonPolicy::Abort);
        lock.mark_poisoned();
        lock.acquire();
        // Only reached if the policy let the poisoned lock through
        std::process::exit(0);
    }

    // Aborting takes the whole process down, so run this test again in a child
    let status = Command::new(env::current_exe().unwrap())
        .args([
            "--exact",
            "test::test_state_lock::test_poison_abort_policy_aborts",
            "--test-threads=1",
            "--nocapture",
        ])
        .env(ABORT_CHILD_ENV, "1")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert!(!status.success());

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        const SIGABRT: i32 = 6;
        assert_eq!(status.signal(), Some(SIGABRT));
    }
}

#[test]
fn test_options_select_policy() {
    let options = HookOptions::non_reentrant();
    let lock = StateLock::from_options(&options);
    assert_eq!(lock.reentrancy(), Reentrancy::NonReentrant);
    assert_eq!(options.poison, PoisonPolicy::Clear);
    assert_eq!(options.max_states, None);
}
