use crate::hook_error::HookResult;
use crate::state_handle::StateHandle;

/// Host-side data attached to each interpreter state for its lifetime.
///
/// `create` runs inside the open hook and `destroy` inside the close hook; the
/// layer guarantees `destroy` is called at most once per record and never for a
/// state whose `create` failed.
///
/// # Examples
/// ```ignore
/// struct Registry;
///
/// impl CompanionFactory for Registry {
///     type Record = Vec<String>;
///
///     fn create(&self, _handle: StateHandle) -> HookResult<Vec<String>> {
///         Ok(Vec::new())
///     }
/// }
/// ```
pub trait CompanionFactory: Send + Sync + 'static {
    type Record: Send + 'static;

    fn create(&self, handle: StateHandle) -> HookResult<Self::Record>;

    fn destroy(&self, handle: StateHandle, record: Self::Record) {
        let _ = handle;
        drop(record);
    }
}

/// States that need no companion data
impl CompanionFactory for () {
    type Record = ();

    fn create(&self, _handle: StateHandle) -> HookResult<()> {
        Ok(())
    }
}

/// Adapts a closure into a `CompanionFactory`; records are dropped on close.
pub struct FnFactory<F> {
    create: F,
}

pub fn companion_fn<R, F>(create: F) -> FnFactory<F>
where
    R: Send + 'static,
    F: Fn(StateHandle) -> HookResult<R> + Send + Sync + 'static,
{
    FnFactory { create }
}

impl<R, F> CompanionFactory for FnFactory<F>
where
    R: Send + 'static,
    F: Fn(StateHandle) -> HookResult<R> + Send + Sync + 'static,
{
    type Record = R;

    #[inline]
    fn create(&self, handle: StateHandle) -> HookResult<R> {
        (self.create)(handle)
    }
}
