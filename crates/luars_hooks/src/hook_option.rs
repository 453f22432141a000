/// What a state lock does when its owning thread acquires it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reentrancy {
    /// Track owner and depth; nested acquires from the owner succeed at once.
    /// Host callbacks that re-enter the same state rely on this.
    #[default]
    Reentrant,
    /// A nested acquire is a self-deadlock: debug builds panic, release builds
    /// log and abort.
    NonReentrant,
}

/// What the next acquire does after a holder panicked inside a `StateGuard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoisonPolicy {
    /// Log a warning, clear the flag and proceed.
    #[default]
    Clear,
    /// Log and abort the process.
    Abort,
}

#[derive(Debug, Clone)]
pub struct HookOptions {
    pub reentrancy: Reentrancy,
    pub poison: PoisonPolicy,
    /// Registry slots reserved up front
    pub initial_capacity: usize,
    /// Maximum number of simultaneously registered states.
    /// Opening past the limit fails with `HookError::ResourceExhausted`.
    pub max_states: Option<usize>,
}

impl Default for HookOptions {
    fn default() -> Self {
        Self {
            reentrancy: Reentrancy::Reentrant,
            poison: PoisonPolicy::Clear,
            initial_capacity: 16,
            max_states: None,
        }
    }
}

impl HookOptions {
    pub fn non_reentrant() -> Self {
        Self {
            reentrancy: Reentrancy::NonReentrant,
            ..Self::default()
        }
    }

    pub fn with_max_states(mut self, limit: usize) -> Self {
        self.max_states = Some(limit);
        self
    }
}
