// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Virtual memory areas of one address space
//! OWNERS: @runtime
//! PUBLIC API: Vma, VmaList (lookup_by_id, covering, validate_non_overlap, insert, grow)
//! DEPENDS_ON: paging::MapPages, region::Region, config::VmConfig
//! INVARIANTS: start <= brk <= end; areas sorted by id; sibling ranges never intersect;
//!             end/brk only grow

use std::collections::VecDeque;

use log::debug;

use crate::config::VmConfig;
use crate::error::{Error, Result};
use crate::paging::MapPages;
use crate::region::Region;

/// Id of the heap area created with every address space.
pub const HEAP_AREA: u32 = 0;

/// One contiguous area of the virtual address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vma {
    id: u32,
    start: u64,
    end: u64,
    brk: u64,
    free: VecDeque<Region>,
}

impl Vma {
    /// Creates an area spanning `[start, end)` with `brk == end` and an empty free list.
    pub fn new(id: u32, start: u64, end: u64) -> Self {
        Self { id, start, end, brk: end, free: VecDeque::new() }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn brk(&self) -> u64 {
        self.brk
    }

    pub fn range(&self) -> Region {
        Region::new(self.start, self.end)
    }

    /// Free regions in list order (most recently freed first).
    pub fn free_regions(&self) -> Vec<Region> {
        self.free.iter().copied().collect()
    }

    /// Takes `size` bytes from the first free region large enough to hold them.
    ///
    /// An exact match unlinks the region; a larger one is shrunk from its start.
    pub fn first_fit(&mut self, size: u64) -> Option<Region> {
        let index = self.free.iter().position(|region| region.len() >= size)?;
        let start = self.free[index].start;
        if self.free[index].len() == size {
            self.free.remove(index);
        } else {
            self.free[index].start += size;
        }
        Some(Region::new(start, start + size))
    }

    /// Pushes `region` onto the head of the free list. Empty regions are dropped.
    pub fn enlist_free(&mut self, region: Region) {
        if !region.is_empty() {
            self.free.push_front(region);
        }
    }
}

/// Areas of one address space, ordered by ascending id.
#[derive(Debug, Clone, Default)]
pub struct VmaList {
    areas: Vec<Vma>,
}

impl VmaList {
    pub fn new() -> Self {
        Self::default()
    }

    /// List holding only the heap area, which needs no sibling validation.
    pub fn with_heap(heap: Vma) -> Self {
        Self { areas: vec![heap] }
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vma> {
        self.areas.iter()
    }

    /// Scans in id order, stopping once the scanned id passes `id`.
    pub fn lookup_by_id(&self, id: u32) -> Option<&Vma> {
        self.areas.iter().take_while(|vma| vma.id <= id).find(|vma| vma.id == id)
    }

    pub fn lookup_by_id_mut(&mut self, id: u32) -> Option<&mut Vma> {
        self.areas.iter_mut().take_while(|vma| vma.id <= id).find(|vma| vma.id == id)
    }

    /// Area whose `[start, end)` contains `addr`.
    pub fn covering(&self, addr: u64) -> Option<&Vma> {
        self.areas.iter().find(|vma| vma.start <= addr && addr < vma.end)
    }

    /// Checks `[start, end)` against every area other than `id`.
    pub fn validate_non_overlap(&self, id: u32, start: u64, end: u64) -> Result<()> {
        if start >= end {
            return Err(Error::Overlap { start, end });
        }
        let candidate = Region::new(start, end);
        match self.areas.iter().find(|vma| vma.id != id && vma.range().overlaps(&candidate)) {
            Some(sibling) => {
                debug!(
                    target: "vmm::mm",
                    "range {start:#x}..{end:#x} hits area {} [{:#x}, {:#x})",
                    sibling.id, sibling.start, sibling.end
                );
                Err(Error::Overlap { start, end })
            }
            None => Ok(()),
        }
    }

    /// Registers a new area, keeping the list sorted by id.
    pub fn insert(&mut self, vma: Vma) -> Result<()> {
        if self.lookup_by_id(vma.id).is_some() {
            return Err(Error::InvalidArea(vma.id));
        }
        self.validate_non_overlap(vma.id, vma.start, vma.end)?;
        let at = self.areas.partition_point(|existing| existing.id < vma.id);
        self.areas.insert(at, vma);
        Ok(())
    }

    /// Extends area `id` by `increment` bytes rounded up to whole pages.
    ///
    /// Returns the newly covered range. A zero increment succeeds with an empty range
    /// before the area is looked up.
    pub fn grow(
        &mut self,
        id: u32,
        increment: u64,
        config: &VmConfig,
        mapper: &mut dyn MapPages,
    ) -> Result<Region> {
        if increment == 0 {
            return Ok(Region::default());
        }
        let old_end = self.lookup_by_id(id).ok_or(Error::InvalidArea(id))?.end;
        let aligned = config.align_up(increment);
        let new_end = old_end.checked_add(aligned).ok_or(Error::Overlap {
            start: old_end,
            end: u64::MAX,
        })?;
        self.validate_non_overlap(id, old_end, new_end)?;
        mapper.map_pages(old_end, new_end).map_err(|err| {
            debug!(target: "vmm::mm", "mapping {old_end:#x}..{new_end:#x} failed: {err}");
            Error::MappingFailed
        })?;
        let vma = self.lookup_by_id_mut(id).ok_or(Error::InvalidArea(id))?;
        vma.end = new_end;
        vma.brk = new_end;
        Ok(Region::new(old_end, new_end))
    }
}
