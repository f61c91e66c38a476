// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Caller context through which the instruction layer reaches the memory manager
//! OWNERS: @runtime
//! PUBLIC API: ProcessContext (alloc, free, read, write)
//! DEPENDS_ON: space::AddressSpace, phys::PhysicalStore
//! INVARIANTS: Missing address space or RAM store is reported as InvalidContext before any
//!             state changes; pid is used for diagnostics only

use std::sync::Arc;

use log::debug;

use crate::error::{Error, Result};
use crate::paging::Stores;
use crate::phys::PhysicalStore;
use crate::region::Region;
use crate::space::AddressSpace;

/// References a process brings to every memory operation.
#[derive(Clone, Default)]
pub struct ProcessContext {
    pub pid: u32,
    pub mm: Option<Arc<AddressSpace>>,
    pub ram: Option<Arc<dyn PhysicalStore>>,
    pub swap: Option<Arc<dyn PhysicalStore>>,
}

impl ProcessContext {
    pub fn new(
        pid: u32,
        mm: Arc<AddressSpace>,
        ram: Arc<dyn PhysicalStore>,
        swap: Arc<dyn PhysicalStore>,
    ) -> Self {
        Self { pid, mm: Some(mm), ram: Some(ram), swap: Some(swap) }
    }

    fn mm(&self) -> Result<&AddressSpace> {
        self.mm.as_deref().ok_or(Error::InvalidContext)
    }

    fn stores(&self) -> Stores<'_> {
        Stores { ram: self.ram.as_deref(), swap: self.swap.as_deref() }
    }

    fn trace(&self, mm: &AddressSpace, op: &str, detail: impl core::fmt::Display) {
        if mm.config().trace_io {
            debug!(target: "vmm::io", "pid={} {op} {detail}", self.pid);
        }
    }

    /// Allocates `size` bytes under `handle`; returns the region start.
    pub fn alloc(&self, handle: usize, size: u64) -> Result<u64> {
        let mm = self.mm()?;
        let addr = mm.alloc(&self.stores(), handle, size)?;
        self.trace(mm, "alloc", format_args!("addr={addr:#x} size={size} handle={handle}"));
        Ok(addr)
    }

    /// Releases the region behind `handle`.
    pub fn free(&self, handle: usize) -> Result<Region> {
        let mm = self.mm()?;
        let region = mm.free(handle)?;
        self.trace(
            mm,
            "free",
            format_args!("addr={:#x} size={} handle={handle}", region.start, region.len()),
        );
        Ok(region)
    }

    /// Reads the byte at `offset` inside the region behind `handle`.
    pub fn read(&self, handle: usize, offset: u64) -> Result<u8> {
        let mm = self.mm()?;
        if self.ram.is_none() {
            return Err(Error::InvalidContext);
        }
        let value = mm.read(&self.stores(), handle, offset)?;
        self.trace(mm, "read", format_args!("handle={handle} offset={offset} value={value:#04x}"));
        Ok(value)
    }

    /// Writes `value` at `offset` inside the region behind `handle`.
    pub fn write(&self, handle: usize, offset: u64, value: u8) -> Result<()> {
        let mm = self.mm()?;
        if self.ram.is_none() {
            return Err(Error::InvalidContext);
        }
        let addr = mm.write(&self.stores(), handle, offset, value)?;
        self.trace(mm, "write", format_args!("addr={addr:#x} handle={handle} value={value:#04x}"));
        Ok(())
    }

    /// Returns every frame held by the address space to the stores.
    pub fn release(&self) -> Result<usize> {
        Ok(self.mm()?.release_frames(&self.stores()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use crate::phys::MemPhy;

    fn context() -> ProcessContext {
        let config = VmConfig { trace_io: true, ..VmConfig::default() };
        ProcessContext::new(
            7,
            Arc::new(AddressSpace::new(config)),
            Arc::new(MemPhy::new(8 * 4096, 4096)),
            Arc::new(MemPhy::new(4 * 4096, 4096)),
        )
    }

    #[test]
    fn missing_address_space_is_rejected() {
        let ctx = ProcessContext { pid: 1, ..ProcessContext::default() };
        assert_eq!(ctx.alloc(0, 8), Err(Error::InvalidContext));
        assert_eq!(ctx.free(0), Err(Error::InvalidContext));
        assert_eq!(ctx.read(0, 0), Err(Error::InvalidContext));
    }

    #[test]
    fn missing_ram_rejects_io_only() {
        let mut ctx = context();
        ctx.ram = None;
        assert_eq!(ctx.alloc(0, 8), Ok(0));
        assert_eq!(ctx.write(0, 0, 1), Err(Error::InvalidContext));
        assert_eq!(ctx.read(0, 0), Err(Error::InvalidContext));
    }

    #[test]
    fn handle_and_size_are_validated() {
        let ctx = context();
        assert_eq!(ctx.alloc(0, 0), Err(Error::InvalidSize));
        assert_eq!(ctx.alloc(30, 4), Err(Error::InvalidHandle(30)));
        assert_eq!(ctx.free(3), Err(Error::InvalidHandle(3)));
        assert_eq!(ctx.read(3, 0), Err(Error::InvalidHandle(3)));
    }

    #[test]
    fn write_then_read_round_trips() {
        let ctx = context();
        ctx.alloc(2, 16).unwrap();
        ctx.write(2, 3, 0x7A).unwrap();
        assert_eq!(ctx.read(2, 3), Ok(0x7A));
        assert_eq!(ctx.read(2, 16), Err(Error::OutOfBounds { offset: 16, len: 16 }));
        assert_eq!(ctx.release(), Ok(1));
    }
}
