// Lua state hooks
// Per-state locking and lifecycle hooks for sharing one Lua runtime across threads

#[cfg(test)]
mod test;

pub mod companion;
pub mod hook_error;
pub mod hook_layer;
pub mod hook_option;
pub mod hosted_state;
pub mod linkage;
pub mod state_handle;
pub mod state_hooks;
pub mod state_lock;

pub use companion::{CompanionFactory, FnFactory, companion_fn};
pub use hook_error::{HookError, HookResult};
pub use hook_layer::{CloseOutcome, HookLayer, StateGuard, StateInfo, StatePhase, StateScope};
pub use hook_option::{HookOptions, PoisonPolicy, Reentrancy};
pub use hosted_state::HostedState;
pub use linkage::{HookKind, LuaVersion, UserHeader};
pub use state_handle::StateHandle;
pub use state_hooks::StateHooks;
pub use state_lock::{LockStats, StateLock};
