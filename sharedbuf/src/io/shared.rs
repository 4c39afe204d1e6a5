//! Shared store with reader/writer locking
//!
//! Any number of readers hold the store at once; a writer holds it alone.
//! Writes, growth and clear all go through [`SharedStore::write`], so a reader
//! never observes a half-grown or half-copied buffer.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use super::store::BufferStore;

/// Shared-mode access to the store. The lock is released on drop.
pub struct StoreReadGuard<'a>(RwLockReadGuard<'a, BufferStore>);

impl Deref for StoreReadGuard<'_> {
    type Target = BufferStore;

    fn deref(&self) -> &BufferStore {
        &self.0
    }
}

/// Exclusive access to the store. The lock is released on drop.
pub struct StoreWriteGuard<'a>(RwLockWriteGuard<'a, BufferStore>);

impl Deref for StoreWriteGuard<'_> {
    type Target = BufferStore;

    fn deref(&self) -> &BufferStore {
        &self.0
    }
}

impl DerefMut for StoreWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut BufferStore {
        &mut self.0
    }
}

/// Reference-counted store behind a reader/writer lock.
///
/// Clones share the same store.
///
/// # Example
///
/// ```
/// use sharedbuf::io::{BufferStore, SharedStore};
/// use std::io::IoSlice;
///
/// let shared = SharedStore::new(BufferStore::new(16, 64).unwrap());
/// shared.write().write_at(0, &[IoSlice::new(b"hello")]).unwrap();
///
/// let first = shared.read();
/// let second = shared.read();
/// assert_eq!(first.contents(), second.contents());
/// ```
#[derive(Clone)]
pub struct SharedStore(Arc<RwLock<BufferStore>>);

impl SharedStore {
    #[must_use]
    pub fn new(store: BufferStore) -> Self {
        Self(Arc::new(RwLock::new(store)))
    }

    /// Acquire shared mode, blocking while a writer holds the store
    #[must_use]
    pub fn read(&self) -> StoreReadGuard<'_> {
        StoreReadGuard(self.0.read())
    }

    /// Acquire exclusive mode, blocking until all readers and writers leave
    #[must_use]
    pub fn write(&self) -> StoreWriteGuard<'_> {
        StoreWriteGuard(self.0.write())
    }

    #[must_use]
    pub fn try_read(&self) -> Option<StoreReadGuard<'_>> {
        self.0.try_read().map(StoreReadGuard)
    }

    #[must_use]
    pub fn try_write(&self) -> Option<StoreWriteGuard<'_>> {
        self.0.try_write().map(StoreWriteGuard)
    }

    /// Current number of valid bytes (takes the shared lock briefly)
    #[must_use]
    pub fn size(&self) -> usize {
        self.0.read().size()
    }
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.try_read() {
            Some(store) => write!(f, "SharedStore({:?})", *store),
            None => write!(f, "SharedStore(<locked>)"),
        }
    }
}
