// Per-state lock
// Backs the interpreter's lock/unlock pair. The two calls arrive separately
// (no guard object crosses the boundary), so the raw mutex guard is forgotten
// in `acquire` and force-unlocked in `release`.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::hook_error::{HookError, contract_violation, fatal};
use crate::hook_option::{HookOptions, PoisonPolicy, Reentrancy};

/// No owner
const UNOWNED: usize = 0;

static NEXT_THREAD_TOKEN: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static THREAD_TOKEN: usize = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

/// Non-zero id unique to the calling thread for the life of the process
#[inline]
fn current_thread_token() -> usize {
    THREAD_TOKEN.with(|token| *token)
}

/// Counters kept by every state lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LockStats {
    /// Successful acquires, nested ones included
    pub acquisitions: u64,
    /// Acquires that found the mutex held by another thread and had to block
    pub contentions: u64,
}

/// Mutual exclusion for one interpreter state.
///
/// `owner` and `depth` are only written by the thread holding `raw`, so relaxed
/// ordering is enough: a thread only ever observes its own token in `owner` if
/// it stored it itself. The happens-before edge between a release and the next
/// acquire comes from `raw`.
pub struct StateLock {
    raw: Mutex<()>,
    owner: AtomicUsize,
    depth: AtomicUsize,
    poisoned: AtomicBool,
    reentrancy: Reentrancy,
    poison_policy: PoisonPolicy,
    acquisitions: AtomicU64,
    contentions: AtomicU64,
}

impl StateLock {
    pub fn new(reentrancy: Reentrancy, poison_policy: PoisonPolicy) -> Self {
        Self {
            raw: Mutex::new(()),
            owner: AtomicUsize::new(UNOWNED),
            depth: AtomicUsize::new(0),
            poisoned: AtomicBool::new(false),
            reentrancy,
            poison_policy,
            acquisitions: AtomicU64::new(0),
            contentions: AtomicU64::new(0),
        }
    }

    pub fn from_options(options: &HookOptions) -> Self {
        Self::new(options.reentrancy, options.poison)
    }

    /// Block until the calling thread holds the lock.
    ///
    /// Never fails. Under `Reentrancy::NonReentrant` a second acquire by the
    /// owner is a contract violation (panic in debug builds, abort in release).
    pub fn acquire(&self) {
        let me = current_thread_token();
        if self.owner.load(Ordering::Relaxed) == me {
            match self.reentrancy {
                Reentrancy::Reentrant => {
                    self.depth.fetch_add(1, Ordering::Relaxed);
                    self.acquisitions.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Reentrancy::NonReentrant => contract_violation(HookError::SelfDeadlock),
            }
        }

        match self.raw.try_lock() {
            Some(guard) => mem::forget(guard),
            None => {
                self.contentions.fetch_add(1, Ordering::Relaxed);
                log::trace!("state lock contended, blocking");
                mem::forget(self.raw.lock());
            }
        }
        self.take_ownership(me);
    }

    /// Non-blocking acquire. A non-reentrant lock already held by the caller
    /// reports `false` instead of deadlocking.
    pub fn try_acquire(&self) -> bool {
        let me = current_thread_token();
        if self.owner.load(Ordering::Relaxed) == me {
            if self.reentrancy == Reentrancy::NonReentrant {
                return false;
            }
            self.depth.fetch_add(1, Ordering::Relaxed);
            self.acquisitions.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        match self.raw.try_lock() {
            Some(guard) => {
                mem::forget(guard);
                self.take_ownership(me);
                true
            }
            None => false,
        }
    }

    /// Release one level of ownership; the mutex is unlocked at depth zero.
    pub fn release(&self) {
        if !self.is_held_by_current_thread() {
            contract_violation(HookError::UnbalancedRelease);
        }

        let depth = self.depth.load(Ordering::Relaxed);
        if depth > 1 {
            self.depth.store(depth - 1, Ordering::Relaxed);
            return;
        }

        self.depth.store(0, Ordering::Relaxed);
        self.owner.store(UNOWNED, Ordering::Relaxed);
        // SAFETY: this thread took `raw` in `acquire`/`try_acquire` and forgot
        // the guard; ownership was checked above.
        unsafe { self.raw.force_unlock() };
    }

    /// Drop the count of an acquisition the caller turned away right after
    /// taking the lock.
    pub(crate) fn uncount_acquisition(&self) {
        self.acquisitions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Block until no other thread holds the lock. Returns immediately when the
    /// caller is the holder.
    pub(crate) fn wait_idle(&self) {
        if self.is_held_by_current_thread() {
            return;
        }
        drop(self.raw.lock());
    }

    pub(crate) fn mark_poisoned(&self) {
        self.poisoned.store(true, Ordering::Release);
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == current_thread_token()
    }

    /// Nesting depth held by the calling thread (0 when it does not hold the lock)
    pub fn depth(&self) -> usize {
        if self.is_held_by_current_thread() {
            self.depth.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    pub fn reentrancy(&self) -> Reentrancy {
        self.reentrancy
    }

    pub fn stats(&self) -> LockStats {
        LockStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            contentions: self.contentions.load(Ordering::Relaxed),
        }
    }

    #[inline]
    fn take_ownership(&self, me: usize) {
        self.owner.store(me, Ordering::Relaxed);
        self.depth.store(1, Ordering::Relaxed);
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.check_poison();
    }

    fn check_poison(&self) {
        if !self.is_poisoned() {
            return;
        }
        match self.poison_policy {
            PoisonPolicy::Clear => {
                log::warn!("state lock was poisoned by a panicking holder, clearing");
                self.poisoned.store(false, Ordering::Release);
            }
            PoisonPolicy::Abort => fatal(HookError::Poisoned),
        }
    }
}

impl Default for StateLock {
    fn default() -> Self {
        Self::new(Reentrancy::default(), PoisonPolicy::default())
    }
}

impl fmt::Debug for StateLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateLock")
            .field("locked", &self.is_locked())
            .field("reentrancy", &self.reentrancy)
            .field("poisoned", &self.is_poisoned())
            .field("stats", &self.stats())
            .finish()
    }
}
