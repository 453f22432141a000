//! Registry of live interpreter states and the `StateHooks` implementation.
//!
//! Every handle the interpreter opens gets one `StateSlot`: its lock, its
//! companion record and its lifecycle phase. Slots are shared through `Arc` so
//! a thread can block on a state lock without holding the registry lock.
//!
//! # Lock ordering
//!
//! ```text
//! states (RwLock) ──lookup──> Arc<StateSlot> ──> slot.lock ──> slot.companion
//! ```
//!
//! The registry lock is always released before a state lock is taken, so
//! unrelated states never wait on each other and the registry cannot take part
//! in a lock cycle.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::companion::CompanionFactory;
use crate::hook_error::{HookError, HookResult, contract_violation};
use crate::hook_option::{HookOptions, Reentrancy};
use crate::state_handle::StateHandle;
use crate::state_hooks::StateHooks;
use crate::state_lock::{LockStats, StateLock};

// ============ Phases and snapshots ============

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum StatePhase {
    /// Registered, companion not created yet
    Opening = 0,
    Open = 1,
    /// Companion creation failed; only `close` is valid
    Failed = 2,
    /// Unregistered by `close`
    Closed = 3,
}

impl StatePhase {
    #[inline]
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => StatePhase::Opening,
            1 => StatePhase::Open,
            2 => StatePhase::Failed,
            _ => StatePhase::Closed,
        }
    }
}

/// Result of a close hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The companion record was destroyed
    Closed,
    /// The state was registered but never got a companion record
    Partial,
    /// Nothing was registered under the handle
    Unknown,
}

/// Diagnostic snapshot of one registered state
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StateInfo {
    pub handle: StateHandle,
    pub phase: StatePhase,
    pub opened_at: DateTime<Utc>,
    pub lock: LockStats,
    pub poisoned: bool,
    pub has_companion: bool,
}

// ============ Slot ============

struct StateSlot<R> {
    handle: StateHandle,
    lock: StateLock,
    companion: Mutex<Option<R>>,
    /// Mirrors `companion.is_some()` so snapshots never touch the companion mutex
    attached: AtomicBool,
    phase: AtomicU8,
    opened_at: DateTime<Utc>,
}

impl<R> StateSlot<R> {
    fn new(handle: StateHandle, options: &HookOptions) -> Self {
        Self {
            handle,
            lock: StateLock::from_options(options),
            companion: Mutex::new(None),
            attached: AtomicBool::new(false),
            phase: AtomicU8::new(StatePhase::Opening as u8),
            opened_at: Utc::now(),
        }
    }

    #[inline]
    fn phase(&self) -> StatePhase {
        StatePhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    #[inline]
    fn set_phase(&self, phase: StatePhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Move from `from` to `to` unless another thread changed the phase first.
    #[inline]
    fn advance(&self, from: StatePhase, to: StatePhase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Take the state lock and check the state may be used.
    ///
    /// A rejected enter leaves the lock statistics untouched.
    fn enter(&self) -> HookResult<()> {
        if self.lock.reentrancy() == Reentrancy::NonReentrant
            && self.lock.is_held_by_current_thread()
        {
            return Err(HookError::SelfDeadlock);
        }

        self.lock.acquire();
        match self.phase() {
            StatePhase::Open => Ok(()),
            phase => {
                self.lock.uncount_acquisition();
                self.lock.release();
                Err(match phase {
                    StatePhase::Closed => HookError::UnknownState(self.handle),
                    _ => HookError::NotOpen(self.handle),
                })
            }
        }
    }

    fn info(&self) -> StateInfo {
        StateInfo {
            handle: self.handle,
            phase: self.phase(),
            opened_at: self.opened_at,
            lock: self.lock.stats(),
            poisoned: self.lock.is_poisoned(),
            has_companion: self.attached.load(Ordering::Acquire),
        }
    }
}

// ============ HookLayer ============

/// Host side of the interpreter's lock and lifecycle hooks.
///
/// Owns one lock and at most one companion record per open handle. Use it
/// through `StateHooks` from an interpreter wrapper, or through the checked
/// methods (`open`, `acquire`, `enter`, ...) which report contract violations
/// as `HookError` instead of aborting. That includes a nested acquire on a
/// non-reentrant layer, which `acquire` and `enter` report as `SelfDeadlock`.
pub struct HookLayer<F: CompanionFactory = ()> {
    factory: F,
    options: HookOptions,
    states: RwLock<AHashMap<StateHandle, Arc<StateSlot<F::Record>>>>,
}

impl Default for HookLayer<()> {
    fn default() -> Self {
        Self::new(())
    }
}

impl<F: CompanionFactory> HookLayer<F> {
    pub fn new(factory: F) -> Self {
        Self::with_options(factory, HookOptions::default())
    }

    pub fn with_options(factory: F, options: HookOptions) -> Self {
        let states = AHashMap::with_capacity(options.initial_capacity);
        Self {
            factory,
            options,
            states: RwLock::new(states),
        }
    }

    pub fn options(&self) -> &HookOptions {
        &self.options
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Open hook: register a lock for `handle` and create its companion record.
    ///
    /// On `CompanionInit` the handle stays registered in `StatePhase::Failed`
    /// so the follow-up `close` releases the lock; every other error leaves
    /// nothing registered.
    pub fn open(&self, handle: StateHandle) -> HookResult<()> {
        let slot = {
            let mut states = self.states.write();
            if states.contains_key(&handle) {
                return Err(HookError::AlreadyOpen(handle));
            }
            if let Some(limit) = self.options.max_states {
                if states.len() >= limit {
                    log::warn!("refusing to open {handle}: {limit} states already open");
                    return Err(HookError::ResourceExhausted { handle, limit });
                }
            }
            let slot = Arc::new(StateSlot::new(handle, &self.options));
            states.insert(handle, Arc::clone(&slot));
            slot
        };

        // The factory is host code; run it without the registry lock held.
        match self.factory.create(handle) {
            Ok(record) => {
                // `close` takes the record under the same mutex after marking
                // the slot closed, so exactly one side ends up destroying it.
                let mut companion = slot.companion.lock();
                *companion = Some(record);
                slot.attached.store(true, Ordering::Release);
                if !slot.advance(StatePhase::Opening, StatePhase::Open) {
                    let record = companion.take();
                    slot.attached.store(false, Ordering::Release);
                    drop(companion);
                    log::warn!("{handle} was closed while its companion was being created");
                    if let Some(record) = record {
                        self.factory.destroy(handle, record);
                    }
                    return Err(HookError::UnknownState(handle));
                }
                log::debug!("opened {handle}");
                Ok(())
            }
            Err(err) => {
                // Leaves `Closed` in place if a concurrent close got there first
                slot.advance(StatePhase::Opening, StatePhase::Failed);
                log::warn!("companion creation failed for {handle}: {err}");
                Err(match err {
                    err @ HookError::CompanionInit { .. } => err,
                    other => HookError::CompanionInit {
                        handle,
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    /// Close hook: unregister `handle`, wait out any other holder of its lock,
    /// then destroy the companion record. Safe on partially opened, already
    /// closed and unknown handles.
    pub fn close(&self, handle: StateHandle) -> CloseOutcome {
        let Some(slot) = self.states.write().remove(&handle) else {
            log::debug!("close of unregistered {handle} ignored");
            return CloseOutcome::Unknown;
        };
        slot.set_phase(StatePhase::Closed);

        // The interpreter's own close path may still hold the lock; that is
        // the only holder we do not wait for.
        slot.lock.wait_idle();

        let record = slot.companion.lock().take();
        slot.attached.store(false, Ordering::Release);
        match record {
            Some(record) => {
                self.factory.destroy(handle, record);
                log::debug!("closed {handle}");
                CloseOutcome::Closed
            }
            None => {
                log::debug!("closed partially opened {handle}");
                CloseOutcome::Partial
            }
        }
    }

    /// Open `handle` and tie its close to the returned scope.
    pub fn open_scoped(self: &Arc<Self>, handle: StateHandle) -> HookResult<StateScope<F>> {
        if let Err(err) = self.open(handle) {
            if matches!(err, HookError::CompanionInit { .. }) {
                self.close(handle);
            }
            return Err(err);
        }
        Ok(StateScope {
            layer: Arc::clone(self),
            handle,
            closed: false,
        })
    }

    /// Checked lock: blocks until the calling thread holds the lock of `handle`.
    pub fn acquire(&self, handle: StateHandle) -> HookResult<()> {
        self.slot(handle)?.enter()
    }

    /// Checked unlock
    pub fn release(&self, handle: StateHandle) -> HookResult<()> {
        let slot = self.slot(handle)?;
        if !slot.lock.is_held_by_current_thread() {
            return Err(HookError::UnbalancedRelease);
        }
        slot.lock.release();
        Ok(())
    }

    /// Lock `handle` for the lifetime of the returned guard.
    pub fn enter(&self, handle: StateHandle) -> HookResult<StateGuard<F::Record>> {
        let slot = self.slot(handle)?;
        slot.enter()?;
        Ok(StateGuard {
            slot,
            _not_send: PhantomData,
        })
    }

    pub fn is_open(&self, handle: StateHandle) -> bool {
        self.states
            .read()
            .get(&handle)
            .is_some_and(|slot| slot.phase() == StatePhase::Open)
    }

    pub fn info(&self, handle: StateHandle) -> Option<StateInfo> {
        self.states.read().get(&handle).map(|slot| slot.info())
    }

    pub fn handles(&self) -> Vec<StateHandle> {
        self.states.read().keys().copied().collect()
    }

    /// Registered states, failed ones included
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    fn slot(&self, handle: StateHandle) -> HookResult<Arc<StateSlot<F::Record>>> {
        self.states
            .read()
            .get(&handle)
            .cloned()
            .ok_or(HookError::UnknownState(handle))
    }
}

// SAFETY: `lock` only returns once `StateSlot::enter` succeeded, i.e. the
// calling thread owns the handle's `StateLock`.
unsafe impl<F: CompanionFactory> StateHooks for HookLayer<F> {
    #[inline]
    fn lock(&self, handle: StateHandle) {
        if let Err(err) = self.acquire(handle) {
            contract_violation(err);
        }
    }

    #[inline]
    fn unlock(&self, handle: StateHandle) {
        if let Err(err) = self.release(handle) {
            contract_violation(err);
        }
    }

    fn on_open(&self, handle: StateHandle) -> HookResult<()> {
        self.open(handle)
    }

    fn on_close(&self, handle: StateHandle) {
        self.close(handle);
    }
}

impl<F: CompanionFactory> fmt::Debug for HookLayer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookLayer")
            .field("options", &self.options)
            .field("states", &self.len())
            .finish()
    }
}

// ============ Guards ============

/// Holds the lock of one state; released on drop, also while unwinding.
///
/// Dropping the guard during a panic marks the lock poisoned; what the next
/// acquire does about it is set by `PoisonPolicy`.
pub struct StateGuard<R> {
    slot: Arc<StateSlot<R>>,
    // The lock is owned by the thread that took it
    _not_send: PhantomData<*const ()>,
}

impl<R> StateGuard<R> {
    pub fn handle(&self) -> StateHandle {
        self.slot.handle
    }

    /// Lock depth of the current thread, counting this guard
    pub fn depth(&self) -> usize {
        self.slot.lock.depth()
    }

    /// Run `f` on the companion record.
    ///
    /// Fails with `CompanionBusy` when called again from inside `f` through a
    /// nested guard of the same state.
    pub fn with_companion<T>(&self, f: impl FnOnce(&mut R) -> T) -> HookResult<T> {
        let handle = self.slot.handle;
        let mut companion = self
            .slot
            .companion
            .try_lock()
            .ok_or(HookError::CompanionBusy(handle))?;
        let record = companion.as_mut().ok_or(HookError::NoCompanion(handle))?;
        Ok(f(record))
    }
}

impl<R> Drop for StateGuard<R> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.slot.lock.mark_poisoned();
        }
        self.slot.lock.release();
    }
}

/// An open state whose close hook runs exactly once, on `close` or on drop.
pub struct StateScope<F: CompanionFactory> {
    layer: Arc<HookLayer<F>>,
    handle: StateHandle,
    closed: bool,
}

impl<F: CompanionFactory> StateScope<F> {
    pub fn handle(&self) -> StateHandle {
        self.handle
    }

    pub fn layer(&self) -> &Arc<HookLayer<F>> {
        &self.layer
    }

    pub fn enter(&self) -> HookResult<StateGuard<F::Record>> {
        self.layer.enter(self.handle)
    }

    pub fn close(mut self) -> CloseOutcome {
        self.closed = true;
        self.layer.close(self.handle)
    }
}

impl<F: CompanionFactory> Drop for StateScope<F> {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.layer.close(self.handle);
        }
    }
}
