// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Paging engine (address split, PTE state, frame resolution, FIFO swapping)
//! OWNERS: @runtime
//! PUBLIC API: split_address, split_page_number, copy_page, Paging, Stores, MapPages
//! DEPENDS_ON: phys::PhysicalStore, config::VmConfig
//! INVARIANTS: Resident entries carry non-zero frames; every resident page is enlisted
//!             exactly once in the residency list; identity mode never touches a table

pub mod fifo;
pub mod pte;
pub mod table;

use log::{debug, warn};

use crate::config::{PagingMode, VmConfig};
use crate::error::{Error, Result};
use crate::phys::{PhysicalStore, StoreError};

use fifo::Residency;
use pte::{Pte, PteState};
use table::PageTable;

/// Number of translation levels.
pub const LEVELS: usize = 5;
/// Index bits consumed per level.
pub const LEVEL_BITS: usize = 9;
/// Entries per table at every level.
pub const LEVEL_ENTRIES: usize = 1 << LEVEL_BITS;

/// Swap device type recorded in swapped entries; a single active device is used.
pub const ACTIVE_SWAP_TYPE: u8 = 0;

const LEVEL_MASK: u64 = (LEVEL_ENTRIES - 1) as u64;

/// Per-level table indices of a virtual page, most significant first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PageIndices {
    pub pgd: usize,
    pub p4d: usize,
    pub pud: usize,
    pub pmd: usize,
    pub pt: usize,
}

/// Splits a virtual page number into its five table indices.
pub fn split_page_number(pgn: u64) -> PageIndices {
    let level = |shift: usize| ((pgn >> (shift * LEVEL_BITS)) & LEVEL_MASK) as usize;
    PageIndices { pgd: level(4), p4d: level(3), pud: level(2), pmd: level(1), pt: level(0) }
}

/// Splits a virtual address whose low `offset_bits` bits address a byte in the page.
pub fn split_address(addr: u64, offset_bits: u32) -> PageIndices {
    split_page_number(addr >> offset_bits)
}

/// Copies one page byte by byte between two stores.
pub fn copy_page(
    src: &dyn PhysicalStore,
    src_frame: u64,
    dst: &dyn PhysicalStore,
    dst_frame: u64,
    page_size: u64,
) -> Result<()> {
    let src_base = frame_base(src_frame, page_size)?;
    let dst_base = frame_base(dst_frame, page_size)?;
    for cell in 0..page_size {
        let byte = src.read_byte(src_base + cell)?;
        dst.write_byte(dst_base + cell, byte)?;
    }
    Ok(())
}

/// First byte of `frame`, rejecting frames whose page would not fit the address width.
fn frame_base(frame: u64, page_size: u64) -> Result<u64> {
    frame
        .checked_mul(page_size)
        .filter(|base| base.checked_add(page_size).is_some())
        .ok_or(Error::Store(StoreError::OutOfRange(frame)))
}

fn zero_frame(store: &dyn PhysicalStore, frame: u64, page_size: u64) -> Result<()> {
    let base = frame_base(frame, page_size)?;
    for cell in 0..page_size {
        store.write_byte(base + cell, 0)?;
    }
    Ok(())
}

/// Physical stores reachable from the calling context.
#[derive(Clone, Copy, Default)]
pub struct Stores<'a> {
    pub ram: Option<&'a dyn PhysicalStore>,
    pub swap: Option<&'a dyn PhysicalStore>,
}

impl<'a> Stores<'a> {
    pub fn new(ram: &'a dyn PhysicalStore, swap: &'a dyn PhysicalStore) -> Self {
        Self { ram: Some(ram), swap: Some(swap) }
    }

    pub fn ram(&self) -> Result<&'a dyn PhysicalStore> {
        self.ram.ok_or(Error::InvalidContext)
    }

    pub fn swap(&self) -> Result<&'a dyn PhysicalStore> {
        self.swap.ok_or(Error::InvalidContext)
    }
}

/// Backs a freshly reserved virtual range with frames.
///
/// `start` and `end` are page aligned byte addresses.
pub trait MapPages {
    fn map_pages(&mut self, start: u64, end: u64) -> Result<()>;
}

/// Translation state of one address space.
pub struct Paging {
    page_size: u64,
    offset_bits: u32,
    max_page_number: u64,
    table: Option<PageTable>,
    residency: Residency,
}

impl Paging {
    /// Bootstraps the root table (paged mode) and an empty residency list.
    pub fn new(config: &VmConfig) -> Self {
        let table = match config.paging {
            PagingMode::Paged => Some(PageTable::new()),
            PagingMode::Identity => None,
        };
        Self {
            page_size: config.page_size,
            offset_bits: config.offset_bits(),
            max_page_number: config.max_page_number,
            table,
            residency: Residency::new(),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn page_of(&self, addr: u64) -> u64 {
        addr >> self.offset_bits
    }

    pub fn offset_of(&self, addr: u64) -> u64 {
        addr & (self.page_size - 1)
    }

    pub fn table(&self) -> Option<&PageTable> {
        self.table.as_ref()
    }

    pub fn residency(&self) -> &Residency {
        &self.residency
    }

    /// Current entry for `pgn`; empty in identity mode.
    pub fn entry(&self, pgn: u64) -> Pte {
        self.table.as_ref().map_or(Pte::EMPTY, |table| table.entry(pgn))
    }

    /// Removes and returns the longest-resident page.
    pub fn find_victim(&mut self) -> Result<u64> {
        self.residency.find_victim()
    }

    fn check_page(&self, pgn: u64) -> Result<()> {
        if pgn >= self.max_page_number {
            return Err(Error::PageOutOfRange(pgn));
        }
        Ok(())
    }

    /// Resolves `pgn` to a RAM frame, faulting it in when needed.
    pub fn resolve(&mut self, pgn: u64, stores: &Stores<'_>) -> Result<u64> {
        self.check_page(pgn)?;
        let page_size = self.page_size;
        let Some(table) = self.table.as_mut() else {
            return Ok(pgn);
        };
        match table.entry(pgn).state() {
            PteState::Resident { frame, .. } => Ok(frame),
            PteState::Swapped { offset, .. } => {
                let ram = stores.ram()?;
                let swap = stores.swap()?;
                let frame = obtain_frame(table, &mut self.residency, stores, page_size)?;
                if let Err(err) = copy_page(swap, offset, ram, frame, page_size) {
                    ram.release_frame(frame);
                    return Err(err);
                }
                swap.release_frame(offset);
                table.set(pgn, Pte::resident(frame).ok_or(Error::MappingFailed)?);
                self.residency.enlist(pgn);
                debug!(target: "vmm::mm", "swap-in page {pgn} from slot {offset} to frame {frame}");
                Ok(frame)
            }
            PteState::Unmapped => map_one(table, &mut self.residency, stores, pgn, page_size),
        }
    }

    /// Sets the dirty bit of a resident page.
    pub fn mark_dirty(&mut self, pgn: u64) {
        if let Some(table) = self.table.as_mut() {
            let pte = table.entry(pgn);
            if pte.is_resident() {
                table.set(pgn, pte.with_dirty());
            }
        }
    }

    /// Maps `count` pages starting at `first`, undoing partial work on failure.
    pub fn map_range(&mut self, first: u64, count: u64, stores: &Stores<'_>) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        self.check_page(first + count - 1)?;
        let page_size = self.page_size;
        let Some(table) = self.table.as_mut() else {
            return Ok(());
        };
        let mut mapped = Vec::new();
        for pgn in first..first + count {
            if table.entry(pgn).is_present() {
                continue;
            }
            match map_one(table, &mut self.residency, stores, pgn, page_size) {
                Ok(_) => mapped.push(pgn),
                Err(err) => {
                    warn!(target: "vmm::mm", "map of page {pgn} failed: {err}; rolling back");
                    for pgn in mapped {
                        release_entry(table.clear(pgn), stores);
                        self.residency.remove(pgn);
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Returns every frame and swap slot held by this address space.
    pub fn release_frames(&mut self, stores: &Stores<'_>) -> usize {
        let Some(table) = self.table.as_mut() else {
            return 0;
        };
        let entries = table.entries();
        let released = entries.len();
        for (_, pte) in entries {
            release_entry(pte, stores);
        }
        table.reset();
        self.residency.clear();
        released
    }
}

/// Adapter handing the paging engine to the VMA manager.
pub struct Mapper<'p, 's> {
    paging: &'p mut Paging,
    stores: Stores<'s>,
}

impl<'p, 's> Mapper<'p, 's> {
    pub fn new(paging: &'p mut Paging, stores: Stores<'s>) -> Self {
        Self { paging, stores }
    }
}

impl MapPages for Mapper<'_, '_> {
    fn map_pages(&mut self, start: u64, end: u64) -> Result<()> {
        if end <= start {
            return Ok(());
        }
        let first = self.paging.page_of(start);
        let last = self.paging.page_of(end - 1);
        self.paging.map_range(first, last - first + 1, &self.stores)
    }
}

fn release_entry(pte: Pte, stores: &Stores<'_>) {
    match pte.state() {
        PteState::Resident { frame, .. } => {
            if let Some(ram) = stores.ram {
                ram.release_frame(frame);
            }
        }
        PteState::Swapped { offset, .. } => {
            if let Some(swap) = stores.swap {
                swap.release_frame(offset);
            }
        }
        PteState::Unmapped => {}
    }
}

fn map_one(
    table: &mut PageTable,
    residency: &mut Residency,
    stores: &Stores<'_>,
    pgn: u64,
    page_size: u64,
) -> Result<u64> {
    let ram = stores.ram()?;
    let frame = obtain_frame(table, residency, stores, page_size)?;
    let pte = match Pte::resident(frame) {
        Some(pte) => pte,
        None => {
            ram.release_frame(frame);
            return Err(Error::MappingFailed);
        }
    };
    if let Err(err) = zero_frame(ram, frame, page_size) {
        ram.release_frame(frame);
        return Err(err);
    }
    table.set(pgn, pte);
    residency.enlist(pgn);
    Ok(frame)
}

/// Takes a free RAM frame, evicting the FIFO victim to swap when RAM is full.
fn obtain_frame(
    table: &mut PageTable,
    residency: &mut Residency,
    stores: &Stores<'_>,
    page_size: u64,
) -> Result<u64> {
    let ram = stores.ram()?;
    match ram.acquire_frame() {
        Ok(frame) => return Ok(frame),
        Err(StoreError::Exhausted) => {}
        Err(err) => return Err(err.into()),
    }

    let swap = stores.swap()?;
    let slot = swap.acquire_frame().map_err(|_| Error::MappingFailed)?;
    let victim = match residency.find_victim() {
        Ok(victim) => victim,
        Err(err) => {
            swap.release_frame(slot);
            return Err(err);
        }
    };
    let Some(frame) = table.entry(victim).frame() else {
        swap.release_frame(slot);
        return Err(Error::MappingFailed);
    };
    if let Err(err) = copy_page(ram, frame, swap, slot, page_size) {
        swap.release_frame(slot);
        residency.enlist(victim);
        return Err(err);
    }
    table.set(victim, Pte::swapped(ACTIVE_SWAP_TYPE, slot));
    debug!(target: "vmm::mm", "evicted page {victim} from frame {frame} to slot {slot}");
    Ok(frame)
}
