#[cfg(feature = "serde")]
pub mod test_serde;
pub mod test_state_lock;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::*;

/// Handle for a state the tests never dereference
pub(crate) fn fake_handle(n: usize) -> StateHandle {
    StateHandle::from_addr(0x1000 + n * 0x10).unwrap()
}

/// Companion record that reports its own drop
pub(crate) struct Tracked {
    live: Arc<AtomicUsize>,
    pub count: u64,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Factory counting every create/destroy so tests can check for leaks and
/// double frees
#[derive(Default)]
pub(crate) struct TrackedFactory {
    pub live: Arc<AtomicUsize>,
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub fail: AtomicBool,
}

impl TrackedFactory {
    pub fn failing() -> Self {
        let factory = Self::default();
        factory.fail.store(true, Ordering::SeqCst);
        factory
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl CompanionFactory for TrackedFactory {
    type Record = Tracked;

    fn create(&self, handle: StateHandle) -> HookResult<Tracked> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HookError::CompanionInit {
                handle,
                reason: "out of memory".to_string(),
            });
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Tracked {
            live: Arc::clone(&self.live),
            count: 0,
        })
    }

    fn destroy(&self, _handle: StateHandle, record: Tracked) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        drop(record);
    }
}

pub(crate) fn tracked_layer() -> Arc<HookLayer<TrackedFactory>> {
    Arc::new(HookLayer::new(TrackedFactory::default()))
}
