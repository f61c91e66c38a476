// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Byte-addressable physical store contract plus an in-memory backend
//! OWNERS: @runtime
//! PUBLIC API: PhysicalStore, MemPhy, StoreError
//! DEPENDS_ON: parking_lot::Mutex
//! INVARIANTS: Frame 0 is never handed out; the free-frame pool is internally locked

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Failures reported by a physical store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Address lies beyond the end of the store.
    #[error("physical address {0:#x} is out of range")]
    OutOfRange(u64),
    /// Free-frame pool is empty.
    #[error("no free frame left")]
    Exhausted,
}

/// Byte-addressable RAM or swap image.
///
/// Implementations must be safe to share between simulated CPUs: the core
/// calls into a store while holding only its own address-space lock.
pub trait PhysicalStore: Send + Sync {
    /// Reads the byte at `addr`.
    fn read_byte(&self, addr: u64) -> Result<u8, StoreError>;

    /// Writes `value` at `addr`.
    fn write_byte(&self, addr: u64, value: u8) -> Result<(), StoreError>;

    /// Takes a frame out of the free pool.
    fn acquire_frame(&self) -> Result<u64, StoreError>;

    /// Returns `frame` to the free pool.
    fn release_frame(&self, frame: u64);

    /// Size of one frame in bytes.
    fn page_size(&self) -> u64;

    /// Total number of frames, including the reserved frame 0.
    fn frame_count(&self) -> u64;
}

/// In-memory store backed by a byte vector.
pub struct MemPhy {
    storage: Mutex<Vec<u8>>,
    free: Mutex<VecDeque<u64>>,
    page_size: u64,
}

impl MemPhy {
    /// Creates a zeroed store of `size` bytes split into `page_size` frames.
    ///
    /// Trailing bytes that do not fill a whole frame stay addressable but are
    /// never handed out as a frame.
    pub fn new(size: usize, page_size: u64) -> Self {
        let frames = size as u64 / page_size.max(1);
        Self {
            storage: Mutex::new(vec![0; size]),
            free: Mutex::new((1..frames).collect()),
            page_size,
        }
    }

    /// Number of frames currently in the free pool.
    pub fn free_frames(&self) -> usize {
        self.free.lock().len()
    }

    /// Size of the store in bytes.
    pub fn len(&self) -> usize {
        self.storage.lock().len()
    }

    /// Returns `true` for a zero-sized store.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PhysicalStore for MemPhy {
    fn read_byte(&self, addr: u64) -> Result<u8, StoreError> {
        let storage = self.storage.lock();
        usize::try_from(addr)
            .ok()
            .and_then(|idx| storage.get(idx).copied())
            .ok_or(StoreError::OutOfRange(addr))
    }

    fn write_byte(&self, addr: u64, value: u8) -> Result<(), StoreError> {
        let mut storage = self.storage.lock();
        let cell = usize::try_from(addr)
            .ok()
            .and_then(|idx| storage.get_mut(idx))
            .ok_or(StoreError::OutOfRange(addr))?;
        *cell = value;
        Ok(())
    }

    fn acquire_frame(&self) -> Result<u64, StoreError> {
        self.free.lock().pop_front().ok_or(StoreError::Exhausted)
    }

    fn release_frame(&self, frame: u64) {
        if frame == 0 || frame * self.page_size >= self.len() as u64 {
            return;
        }
        let mut free = self.free.lock();
        if !free.contains(&frame) {
            free.push_back(frame);
        }
    }

    fn page_size(&self) -> u64 {
        self.page_size
    }

    fn frame_count(&self) -> u64 {
        self.len() as u64 / self.page_size.max(1)
    }
}
