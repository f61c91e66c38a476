// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Region allocator (First-Fit over the heap free list, symbol table, byte I/O)
//! OWNERS: @runtime
//! PUBLIC API: Region, SymbolTable (allocate/free/read/write are driven by AddressSpace)
//! DEPENDS_ON: vma::VmaList, memmap::dispatch, paging::Stores
//! INVARIANTS: Free regions are non-empty; the free list and symbol table change only on
//!             the success path; live + free bytes never exceed brk - start

use log::warn;

use crate::error::{Error, Result};
use crate::memmap::{self, MemOp, MemReply};
use crate::paging::Stores;
use crate::space::MmState;
use crate::vma::HEAP_AREA;

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Region {
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub const fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Half-open intersection test.
    pub fn overlaps(&self, other: &Region) -> bool {
        self.start.max(other.start) < self.end.min(other.end)
    }
}

/// Fixed-capacity map from region handle to live region.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    slots: Vec<Option<Region>>,
}

impl SymbolTable {
    pub fn new(capacity: usize) -> Self {
        Self { slots: vec![None; capacity] }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, handle: usize) -> Result<&Option<Region>> {
        self.slots.get(handle).ok_or(Error::InvalidHandle(handle))
    }

    /// Live region behind `handle`.
    pub fn get(&self, handle: usize) -> Result<Region> {
        match self.slot(handle)? {
            Some(region) if !region.is_empty() => Ok(*region),
            _ => Err(Error::InvalidHandle(handle)),
        }
    }

    /// Binds `handle` to `region`, returning whatever it replaced.
    pub fn set(&mut self, handle: usize, region: Region) -> Result<Option<Region>> {
        let slot = self.slots.get_mut(handle).ok_or(Error::InvalidHandle(handle))?;
        Ok(slot.replace(region))
    }

    /// Unbinds `handle`, returning its live region.
    pub fn take(&mut self, handle: usize) -> Result<Region> {
        let region = self.get(handle)?;
        self.slots[handle] = None;
        Ok(region)
    }

    /// Every live `(handle, region)` pair in handle order.
    pub fn live(&self) -> Vec<(usize, Region)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(handle, slot)| match slot {
                Some(region) if !region.is_empty() => Some((handle, *region)),
                _ => None,
            })
            .collect()
    }
}

/// Reserves `size` bytes for `handle`, growing the heap when no free region fits.
pub(crate) fn allocate(
    state: &mut MmState,
    stores: &Stores<'_>,
    handle: usize,
    size: u64,
) -> Result<u64> {
    if size == 0 {
        return Err(Error::InvalidSize);
    }
    if handle >= state.symbols.capacity() {
        return Err(Error::InvalidHandle(handle));
    }

    let heap = state.areas.lookup_by_id_mut(HEAP_AREA).ok_or(Error::InvalidArea(HEAP_AREA))?;
    let region = match heap.first_fit(size) {
        Some(region) => region,
        None => grow_heap(state, stores, size)?,
    };
    if let Some(previous) = state.symbols.set(handle, region)? {
        if !previous.is_empty() {
            warn!(
                target: "vmm::mm",
                "handle {handle} rebound; [{:#x}, {:#x}) returned to the free list",
                previous.start, previous.end
            );
            let heap =
                state.areas.lookup_by_id_mut(HEAP_AREA).ok_or(Error::InvalidArea(HEAP_AREA))?;
            heap.enlist_free(previous);
        }
    }
    Ok(region.start)
}

fn grow_heap(state: &mut MmState, stores: &Stores<'_>, size: u64) -> Result<Region> {
    let page_size = state.config.page_size;
    let old_brk = state.areas.lookup_by_id(HEAP_AREA).ok_or(Error::InvalidArea(HEAP_AREA))?.brk();
    let increment = state.config.align_up(size).saturating_add(page_size);
    memmap::dispatch(state, stores, MemOp::IncreaseLimit { area: HEAP_AREA, size: increment })
        .map_err(|err| {
            warn!(target: "vmm::mm", "heap growth by {increment} bytes refused: {err}");
            Error::OutOfSpace
        })?;
    let heap = state.areas.lookup_by_id_mut(HEAP_AREA).ok_or(Error::InvalidArea(HEAP_AREA))?;
    let region = Region::new(old_brk, old_brk + size);
    heap.enlist_free(Region::new(region.end, heap.end()));
    Ok(region)
}

/// Returns the region behind `handle` to the head of the heap free list.
pub(crate) fn free(state: &mut MmState, handle: usize) -> Result<Region> {
    let region = state.symbols.get(handle)?;
    let heap = state.areas.lookup_by_id_mut(HEAP_AREA).ok_or(Error::InvalidArea(HEAP_AREA))?;
    state.symbols.take(handle)?;
    heap.enlist_free(region);
    Ok(region)
}

fn locate(state: &MmState, handle: usize, offset: u64) -> Result<u64> {
    let region = state.symbols.get(handle)?;
    if offset >= region.len() {
        return Err(Error::OutOfBounds { offset, len: region.len() });
    }
    Ok(region.start + offset)
}

/// Reads the byte at `offset` inside the region behind `handle`.
pub(crate) fn read(
    state: &mut MmState,
    stores: &Stores<'_>,
    handle: usize,
    offset: u64,
) -> Result<u8> {
    let addr = locate(state, handle, offset)?;
    match memmap::dispatch(state, stores, MemOp::IoRead { addr })? {
        MemReply::Byte(value) => Ok(value),
        MemReply::Done => Err(Error::MappingFailed),
    }
}

/// Writes `value` at `offset` inside the region behind `handle`; returns the address.
pub(crate) fn write(
    state: &mut MmState,
    stores: &Stores<'_>,
    handle: usize,
    offset: u64,
    value: u8,
) -> Result<u64> {
    let addr = locate(state, handle, offset)?;
    memmap::dispatch(state, stores, MemOp::IoWrite { addr, value })?;
    Ok(addr)
}

#[cfg(test)]
mod tests_prop;
