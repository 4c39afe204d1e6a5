//! Growable byte storage under a hard capacity ceiling
//!
//! `BufferStore` is the plain, unlocked data structure. Sharing and locking
//! live in [`super::shared::SharedStore`].
//!
//! Invariants:
//! - `size <= capacity <= max_capacity`, also after a failed growth
//! - bytes in `[size, capacity)` are zero, so a write that starts past the
//!   end exposes a zero-filled gap and never stale data

use std::io::{IoSlice, IoSliceMut};

use crate::error::{Error, Result};

/// Outcome of a committed write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    /// Bytes copied into the buffer
    pub written: usize,
    /// Offset one past the last written byte
    pub end: u64,
    pub size_before: usize,
    pub size_after: usize,
}

impl WriteReport {
    /// Whether the write made more data available to readers
    #[must_use]
    pub fn grew(&self) -> bool {
        self.size_after > self.size_before
    }
}

pub struct BufferStore {
    /// Allocated storage; its length is the capacity
    storage: Vec<u8>,
    size: usize,
    max_capacity: usize,
    /// Set by [`Self::release`]; the store never grows again afterwards
    released: bool,
}

impl BufferStore {
    /// Allocate a zeroed store of `initial_capacity` bytes.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` if the initial capacity is above the ceiling,
    /// `OutOfMemory` if the allocator refuses.
    pub fn new(initial_capacity: usize, max_capacity: usize) -> Result<Self> {
        if initial_capacity > max_capacity {
            return Err(Error::CapacityExceeded {
                required: initial_capacity as u64,
                max: max_capacity,
            });
        }
        Ok(Self {
            storage: zeroed(initial_capacity, &[])?,
            size: 0,
            max_capacity,
            released: false,
        })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    #[must_use]
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The readable bytes `[0, size)`
    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.storage[..self.size]
    }

    /// Make sure at least `needed` bytes are allocated.
    ///
    /// Capacity doubles until it covers `needed`, clamped to the ceiling.
    /// On failure nothing is changed.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` if `needed` is above the ceiling, `OutOfMemory` if
    /// the allocator refuses the new block.
    pub fn ensure_capacity(&mut self, needed: u64) -> Result<()> {
        if needed <= self.capacity() as u64 {
            return Ok(());
        }
        if self.released {
            return Err(Error::BadDescriptor("storage has been released"));
        }
        if needed > self.max_capacity as u64 {
            log::warn!(
                "store.ensure_capacity: {needed} bytes requested, ceiling is {}",
                self.max_capacity
            );
            return Err(Error::CapacityExceeded {
                required: needed,
                max: self.max_capacity,
            });
        }

        let mut new_capacity = self.capacity().max(1);
        while (new_capacity as u64) < needed {
            new_capacity = new_capacity.saturating_mul(2).min(self.max_capacity);
        }

        // Build the replacement completely before swapping it in
        let grown = zeroed(new_capacity, self.contents())?;
        log::debug!(
            "store.ensure_capacity: grew {} -> {new_capacity} (size {})",
            self.capacity(),
            self.size
        );
        self.storage = grown;
        Ok(())
    }

    /// Drop all data. The allocation is kept for reuse.
    pub fn clear(&mut self) {
        let size = self.size;
        self.storage[..size].fill(0);
        self.size = 0;
    }

    /// Truncation requested by an open; same effect as [`Self::clear`]
    pub fn truncate_on_open(&mut self) {
        self.clear();
    }

    /// Release the allocation entirely. Used at device shutdown.
    ///
    /// Later writes fail with `BadDescriptor`, including writes that passed
    /// their shut-down check before the release and only now got the lock.
    pub(crate) fn release(&mut self) {
        self.storage = Vec::new();
        self.size = 0;
        self.released = true;
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Copy bytes starting at `pos` into `segments`, in order.
    ///
    /// Returns the number of bytes copied; zero when `pos` is at or past the
    /// end of the data.
    #[must_use]
    pub fn read_at(&self, pos: u64, segments: &mut [IoSliceMut<'_>]) -> usize {
        if pos >= self.size as u64 {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation)]
        let mut available = &self.storage[pos as usize..self.size];
        let mut copied = 0;
        for segment in segments.iter_mut() {
            if available.is_empty() {
                break;
            }
            let n = segment.len().min(available.len());
            segment[..n].copy_from_slice(&available[..n]);
            available = &available[n..];
            copied += n;
        }
        copied
    }

    /// Copy all `segments` contiguously starting at `pos`.
    ///
    /// All or nothing: if the buffer cannot grow to hold every segment,
    /// no byte is written.
    ///
    /// # Errors
    ///
    /// `BadDescriptor` once the storage is released, otherwise propagates
    /// `ensure_capacity` failures.
    pub fn write_at(&mut self, pos: u64, segments: &[IoSlice<'_>]) -> Result<WriteReport> {
        if self.released {
            return Err(Error::BadDescriptor("storage has been released"));
        }
        let size_before = self.size;
        let total: usize = segments.iter().map(|s| s.len()).sum();
        let end = pos
            .checked_add(total as u64)
            .ok_or(Error::CapacityExceeded {
                required: u64::MAX,
                max: self.max_capacity,
            })?;
        if total == 0 {
            return Ok(WriteReport {
                written: 0,
                end: pos,
                size_before,
                size_after: size_before,
            });
        }

        self.ensure_capacity(end)?;

        // end <= capacity, so every offset below fits in usize
        #[allow(clippy::cast_possible_truncation)]
        let mut offset = pos as usize;
        for segment in segments {
            self.storage[offset..offset + segment.len()].copy_from_slice(segment);
            offset += segment.len();
        }
        self.size = self.size.max(offset);

        Ok(WriteReport {
            written: total,
            end,
            size_before,
            size_after: self.size,
        })
    }
}

impl std::fmt::Debug for BufferStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferStore")
            .field("size", &self.size)
            .field("capacity", &self.capacity())
            .field("max_capacity", &self.max_capacity)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

/// Fallibly allocate `capacity` bytes holding `prefix` followed by zeros
fn zeroed(capacity: usize, prefix: &[u8]) -> Result<Vec<u8>> {
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(capacity)
        .map_err(|_| Error::OutOfMemory(capacity))?;
    storage.extend_from_slice(prefix);
    storage.resize(capacity, 0);
    Ok(storage)
}
