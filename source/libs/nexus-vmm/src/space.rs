// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-process address space guarded by a single lock
//! OWNERS: @runtime
//! PUBLIC API: AddressSpace
//! DEPENDS_ON: region, vma, paging, memmap, dump, parking_lot::Mutex
//! INVARIANTS: Every operation, reads included, runs under the one state lock; growth and
//!             paging run on the already-locked state and never re-acquire it

use log::{debug, info};
use parking_lot::Mutex;

use crate::config::VmConfig;
use crate::dump;
use crate::error::{Error, Result};
use crate::memmap::{self, MemOp, MemReply};
use crate::paging::pte::Pte;
use crate::paging::{Paging, Stores};
use crate::region::{self, Region, SymbolTable};
use crate::vma::{Vma, VmaList, HEAP_AREA};

/// Mutable state of one address space; only reachable through the lock.
pub(crate) struct MmState {
    pub(crate) config: VmConfig,
    pub(crate) areas: VmaList,
    pub(crate) symbols: SymbolTable,
    pub(crate) paging: Paging,
}

impl MmState {
    fn new(config: VmConfig) -> Self {
        let mut heap = Vma::new(HEAP_AREA, 0, config.initial_heap_size);
        heap.enlist_free(heap.range());
        Self {
            config,
            areas: VmaList::with_heap(heap),
            symbols: SymbolTable::new(config.symbol_table_size),
            paging: Paging::new(&config),
        }
    }
}

/// Virtual address space of one process.
pub struct AddressSpace {
    config: VmConfig,
    state: Mutex<MmState>,
}

static_assertions::assert_impl_all!(AddressSpace: Send, Sync);

impl AddressSpace {
    /// Builds the root table, the heap area `[0, initial_heap_size)` with one free region
    /// covering it, an empty symbol table and an empty residency list.
    pub fn new(config: VmConfig) -> Self {
        debug!(
            target: "vmm::mm",
            "address space: page {} heap {:#x} handles {} {:?}",
            config.page_size, config.initial_heap_size, config.symbol_table_size, config.paging
        );
        Self { config, state: Mutex::new(MmState::new(config)) }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Allocates `size` bytes for `handle` and returns the start address.
    pub fn alloc(&self, stores: &Stores<'_>, handle: usize, size: u64) -> Result<u64> {
        let mut state = self.state.lock();
        let addr = region::allocate(&mut state, stores, handle, size)?;
        self.dump_after("alloc", &state);
        Ok(addr)
    }

    /// Frees the region behind `handle`.
    pub fn free(&self, handle: usize) -> Result<Region> {
        let mut state = self.state.lock();
        let region = region::free(&mut state, handle)?;
        self.dump_after("free", &state);
        Ok(region)
    }

    /// Reads one byte of a live region.
    pub fn read(&self, stores: &Stores<'_>, handle: usize, offset: u64) -> Result<u8> {
        let mut state = self.state.lock();
        region::read(&mut state, stores, handle, offset)
    }

    /// Writes one byte of a live region and returns its virtual address.
    pub fn write(&self, stores: &Stores<'_>, handle: usize, offset: u64, value: u8) -> Result<u64> {
        let mut state = self.state.lock();
        let addr = region::write(&mut state, stores, handle, offset, value)?;
        self.dump_after("write", &state);
        Ok(addr)
    }

    /// Runs one memory-map request against the locked state.
    pub fn memmap(&self, stores: &Stores<'_>, op: MemOp) -> Result<MemReply> {
        let mut state = self.state.lock();
        memmap::dispatch(&mut state, stores, op)
    }

    /// Registers an extra area `[start, end)`.
    pub fn add_area(&self, id: u32, start: u64, end: u64) -> Result<()> {
        self.state.lock().areas.insert(Vma::new(id, start, end))
    }

    /// Checks `[start, end)` against every area except `id`.
    pub fn validate_non_overlap(&self, id: u32, start: u64, end: u64) -> Result<()> {
        self.state.lock().areas.validate_non_overlap(id, start, end)
    }

    /// Returns every frame and swap slot to the stores; the areas stay in place.
    pub fn release_frames(&self, stores: &Stores<'_>) -> usize {
        let released = self.state.lock().paging.release_frames(stores);
        info!(target: "vmm::mm", "released {released} page(s)");
        released
    }

    /// Snapshot of area `id`.
    pub fn area(&self, id: u32) -> Result<Vma> {
        self.state.lock().areas.lookup_by_id(id).cloned().ok_or(Error::InvalidArea(id))
    }

    /// Free list of area `id`, head first.
    pub fn free_regions(&self, id: u32) -> Result<Vec<Region>> {
        self.area(id).map(|vma| vma.free_regions())
    }

    /// Live `(handle, region)` pairs.
    pub fn live_regions(&self) -> Vec<(usize, Region)> {
        self.state.lock().symbols.live()
    }

    /// Resident pages, oldest first.
    pub fn residency(&self) -> Vec<u64> {
        self.state.lock().paging.residency().pages()
    }

    /// Page-table entry of the page holding `addr`.
    pub fn pte(&self, addr: u64) -> Pte {
        let state = self.state.lock();
        state.paging.entry(state.paging.page_of(addr))
    }

    /// Text rendering of areas, free lists, residency and mapped pages.
    pub fn dump(&self) -> String {
        dump::render(&self.state.lock())
    }

    fn dump_after(&self, op: &str, state: &MmState) {
        if self.config.dump_page_table {
            debug!(target: "vmm::pt", "after {op}:\n{}", dump::render(state));
        }
    }
}
