//! Shared state guarded by a lock.

use crate::{
    channel::polling,
    error::WouldBlockError,
};
use std::{
    cell::Cell,
    fmt::{self, Debug, Formatter},
    sync::Arc,
};
use tokio::sync::Mutex;


thread_local! {
    // whether this thread is currently running a critical section of some guarded state.
    static IN_CRITICAL_SECTION: Cell<bool> = const { Cell::new(false) };
}

// panic if called from within a critical section.
//
// critical sections are synchronous closures, so a critical section never migrates between threads
// while running, and a thread-local flag is enough to detect nesting.
fn assert_not_nested() {
    if IN_CRITICAL_SECTION.with(Cell::get) {
        panic!("nested acquisition of guarded state from within a critical section");
    }
}

// marks this thread as running a critical section while alive.
struct CriticalSection;

impl CriticalSection {
    fn enter() -> Self {
        IN_CRITICAL_SECTION.with(|flag| flag.set(true));
        CriticalSection
    }
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        IN_CRITICAL_SECTION.with(|flag| flag.set(false));
    }
}


/// A value which can only be accessed while holding an exclusive lock
///
/// Cloning produces another handle to the same value. The value is only reachable through a
/// closure which runs with the lock held, and the lock is released when the closure returns or
/// panics. If the closure panics, the panic propagates to the caller and the value is left as the
/// closure left it.
///
/// Critical sections cannot be nested: acquiring any guarded state from within a critical section
/// panics, as does acquiring the same one recursively.
pub struct GuardedState<V>(Arc<Mutex<V>>);

impl<V> GuardedState<V> {
    /// Construct with an initial value
    pub fn new(value: V) -> Self {
        GuardedState(Arc::new(Mutex::new(value)))
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// Acquire the lock, run `f` against the value, and release the lock
    pub async fn with_lock<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut V) -> R,
    {
        assert_not_nested();
        let mut guard = match self.0.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                trace!(state = self.id(), "guarded state contended, waiting for lock");
                self.0.lock().await
            }
        };
        let _section = CriticalSection::enter();
        f(&mut guard)
    }

    /// Blocking version of [`with_lock`](Self::with_lock)
    ///
    /// This blocks the current thread, and should not be called from within an async context.
    pub fn blocking_with_lock<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut V) -> R,
    {
        assert_not_nested();
        let mut guard = match self.0.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                trace!(state = self.id(), "guarded state contended, blocking for lock");
                polling::block_on(self.0.lock())
            }
        };
        let _section = CriticalSection::enter();
        f(&mut guard)
    }

    /// Run `f` against the value only if the lock can be acquired immediately
    pub fn try_with_lock<F, R>(&self, f: F) -> Result<R, WouldBlockError>
    where
        F: FnOnce(&mut V) -> R,
    {
        assert_not_nested();
        let mut guard = self.0.try_lock().map_err(|_| WouldBlockError)?;
        let _section = CriticalSection::enter();
        Ok(f(&mut guard))
    }

    /// Take the value out, if this is the only handle to it
    pub fn into_inner(self) -> Result<V, Self> {
        Arc::try_unwrap(self.0)
            .map(Mutex::into_inner)
            .map_err(GuardedState)
    }
}

impl<V: Clone> GuardedState<V> {
    /// Clone the current value under the lock
    pub async fn snapshot(&self) -> V {
        self.with_lock(|value| value.clone()).await
    }
}

impl<V> Clone for GuardedState<V> {
    fn clone(&self) -> Self {
        GuardedState(Arc::clone(&self.0))
    }
}

impl<V: Default> Default for GuardedState<V> {
    fn default() -> Self {
        GuardedState::new(V::default())
    }
}

impl<V> Debug for GuardedState<V> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("GuardedState").field("id", &self.id()).finish_non_exhaustive()
    }
}
