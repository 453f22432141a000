use std::sync::Arc;

use crate::hook_error::HookResult;
use crate::state_handle::StateHandle;

/// The four hooks an interpreter calls on the host, bundled as one object.
///
/// Instead of registering free functions in a process-wide table, the host
/// builds a value implementing this trait and hands it to the interpreter
/// wrapper when the wrapper is constructed (see `HostedState::open`).
///
/// | Hook | Called when | Must not |
/// |---|---|---|
/// | `lock` | before a guarded operation | return before the lock is held |
/// | `unlock` | after a guarded operation | be skipped on any exit path |
/// | `on_open` | right after state allocation | leave the state without a lock |
/// | `on_close` | right before state deallocation | expect other hooks to work afterwards |
///
/// # Safety
/// Callers rely on `lock` providing mutual exclusion per handle: between
/// `lock(h)` returning and the matching `unlock(h)`, no other thread may
/// return from `lock(h)`. `HostedState` hands out `&mut` access to state data
/// on that basis.
pub unsafe trait StateHooks: Send + Sync {
    fn lock(&self, handle: StateHandle);

    fn unlock(&self, handle: StateHandle);

    /// Attach the lock and companion data. An error aborts state creation;
    /// the interpreter still calls `on_close` for the handle afterwards.
    fn on_open(&self, handle: StateHandle) -> HookResult<()>;

    fn on_close(&self, handle: StateHandle);
}

unsafe impl<H: StateHooks + ?Sized> StateHooks for Arc<H> {
    #[inline]
    fn lock(&self, handle: StateHandle) {
        (**self).lock(handle)
    }

    #[inline]
    fn unlock(&self, handle: StateHandle) {
        (**self).unlock(handle)
    }

    fn on_open(&self, handle: StateHandle) -> HookResult<()> {
        (**self).on_open(handle)
    }

    fn on_close(&self, handle: StateHandle) {
        (**self).on_close(handle)
    }
}
