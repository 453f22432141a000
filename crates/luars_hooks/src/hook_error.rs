use thiserror::Error;

use crate::state_handle::StateHandle;

pub type HookResult<T> = Result<T, HookError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HookError {
    /// The registry refused a new state (`HookOptions::max_states` reached)
    #[error("cannot open {handle}: state limit of {limit} reached")]
    ResourceExhausted { handle: StateHandle, limit: usize },

    /// The companion factory failed; the state must not be handed out
    #[error("companion record for {handle} could not be created: {reason}")]
    CompanionInit { handle: StateHandle, reason: String },

    #[error("{0} is already open")]
    AlreadyOpen(StateHandle),

    /// No live state is registered under this handle (never opened, or closing)
    #[error("{0} is not registered")]
    UnknownState(StateHandle),

    /// The state exists but failed to open, so it can only be closed
    #[error("{0} is not open")]
    NotOpen(StateHandle),

    /// Non-reentrant lock acquired twice by the same thread
    #[error("state lock re-acquired by its owning thread")]
    SelfDeadlock,

    #[error("state lock released by a thread that does not hold it")]
    UnbalancedRelease,

    /// Poisoned lock under `PoisonPolicy::Abort`
    #[error("state lock poisoned by a panicking holder")]
    Poisoned,

    #[error("companion record of {0} is already borrowed on this thread")]
    CompanionBusy(StateHandle),

    #[error("{0} has no companion record")]
    NoCompanion(StateHandle),

    #[error("{0} is already inside a guarded call")]
    StateBusy(StateHandle),
}

/// Reports a broken hook contract.
///
/// The lock/unlock hooks have no error channel back into the interpreter, so a
/// violation cannot be returned. Debug builds panic so tests and assertions see
/// it; release builds log and abort rather than continue with a corrupted state.
#[cold]
#[track_caller]
pub(crate) fn contract_violation(err: HookError) -> ! {
    if cfg!(debug_assertions) {
        panic!("hook contract violated: {err}");
    }
    fatal(err)
}

#[cold]
pub(crate) fn fatal(err: HookError) -> ! {
    log::error!("fatal hook error, aborting: {err}");
    std::process::abort()
}
