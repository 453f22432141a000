// Hosted interpreter state
// A minimal stand-in for the interpreter side of the hook contract: it owns an
// opaque allocation, calls the open/close hooks around its lifetime and
// brackets every access with lock/unlock, the way the runtime does.

use std::cell::UnsafeCell;
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::hook_error::{HookError, HookResult};
use crate::state_handle::StateHandle;
use crate::state_hooks::StateHooks;

struct RawState<T> {
    /// Set while a `call` closure holds `&mut data`; only touched under the lock
    busy: AtomicBool,
    data: UnsafeCell<T>,
}

/// Interpreter state shared between threads, guarded by injected hooks.
///
/// The handle passed to the hooks is the address of the state's allocation.
/// The allocation outlives `on_close`, so hooks may still use the handle as a
/// key while tearing down.
pub struct HostedState<T> {
    hooks: Arc<dyn StateHooks>,
    raw: NonNull<RawState<T>>,
}

// SAFETY: `data` is only reached inside `call`, between `lock` and `unlock`,
// which `StateHooks` guarantees to be exclusive per handle; the `busy` flag
// rules out a second `&mut` from a reentrant call on the same thread.
unsafe impl<T: Send> Send for HostedState<T> {}
unsafe impl<T: Send> Sync for HostedState<T> {}

impl<T> HostedState<T> {
    /// Allocate a state and run the open hook.
    ///
    /// If the hook fails, the close hook still runs for the handle, the
    /// allocation is freed and the error is returned; no half-open state
    /// escapes.
    pub fn open(hooks: Arc<dyn StateHooks>, data: T) -> HookResult<Self> {
        let raw = NonNull::from(Box::leak(Box::new(RawState {
            busy: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        })));
        let handle = StateHandle::from_non_null(raw);

        if let Err(err) = hooks.on_open(handle) {
            hooks.on_close(handle);
            // SAFETY: allocated above and never shared
            drop(unsafe { Box::from_raw(raw.as_ptr()) });
            return Err(err);
        }

        Ok(Self { hooks, raw })
    }

    #[inline]
    pub fn handle(&self) -> StateHandle {
        StateHandle::from_non_null(self.raw)
    }

    pub fn hooks(&self) -> &Arc<dyn StateHooks> {
        &self.hooks
    }

    /// Run `f` with exclusive access to the state's data.
    ///
    /// `unlock` runs on every exit path, panics included. With reentrant
    /// hooks, calling `call` on the same state from inside `f` returns
    /// `StateBusy`. A non-reentrant `HookLayer` treats that nested `lock` as a
    /// contract violation instead (panic in debug builds, abort in release).
    pub fn call<R>(&self, f: impl FnOnce(&mut T) -> R) -> HookResult<R> {
        let handle = self.handle();
        self.hooks.lock(handle);
        let _unlock = Unlock {
            hooks: &*self.hooks,
            handle,
        };

        // SAFETY: the allocation lives until `self` is dropped
        let raw = unsafe { self.raw.as_ref() };
        if raw.busy.swap(true, Ordering::Relaxed) {
            return Err(HookError::StateBusy(handle));
        }
        let _busy = ClearOnDrop(&raw.busy);

        // SAFETY: lock held and `busy` was clear, so this is the only reference
        let data = unsafe { &mut *raw.data.get() };
        Ok(f(data))
    }

    /// Close the state and hand back its data.
    pub fn into_inner(self) -> T {
        let this = ManuallyDrop::new(self);
        this.hooks.on_close(this.handle());
        // SAFETY: `this` is never dropped, so the Arc and the allocation are
        // each released exactly once here.
        let hooks = unsafe { ptr::read(&this.hooks) };
        let raw = unsafe { Box::from_raw(this.raw.as_ptr()) };
        drop(hooks);
        let RawState { data, .. } = *raw;
        data.into_inner()
    }
}

impl<T> Drop for HostedState<T> {
    fn drop(&mut self) {
        self.hooks.on_close(self.handle());
        // SAFETY: the close hook has finished; nothing references the state now
        drop(unsafe { Box::from_raw(self.raw.as_ptr()) });
    }
}

struct Unlock<'a> {
    hooks: &'a dyn StateHooks,
    handle: StateHandle,
}

impl Drop for Unlock<'_> {
    fn drop(&mut self) {
        self.hooks.unlock(self.handle);
    }
}

struct ClearOnDrop<'a>(&'a AtomicBool);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Relaxed);
    }
}
