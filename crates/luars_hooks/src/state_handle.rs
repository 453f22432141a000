use std::fmt;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

/// Opaque identifier of one interpreter state (the `lua_State*` address).
///
/// The interpreter owns the memory behind it; the hook layer only uses the
/// address as a key and never dereferences it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct StateHandle(NonZeroUsize);

impl StateHandle {
    /// Returns `None` for a null pointer.
    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Option<Self> {
        NonZeroUsize::new(ptr as usize).map(StateHandle)
    }

    #[inline]
    pub fn from_non_null<T>(ptr: NonNull<T>) -> Self {
        // SAFETY: a `NonNull` address is never zero
        StateHandle(unsafe { NonZeroUsize::new_unchecked(ptr.as_ptr() as usize) })
    }

    #[inline]
    pub fn from_addr(addr: usize) -> Option<Self> {
        NonZeroUsize::new(addr).map(StateHandle)
    }

    #[inline(always)]
    pub fn addr(self) -> usize {
        self.0.get()
    }

    #[inline(always)]
    pub fn as_ptr<T>(self) -> *mut T {
        self.0.get() as *mut T
    }
}

impl fmt::Display for StateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state({:#x})", self.addr())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for StateHandle {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.addr() as u64)
    }
}
