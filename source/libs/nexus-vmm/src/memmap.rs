// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Memory-map request router.
//!
//! The region allocator never touches areas or stores directly: heap growth and
//! physical byte access are expressed as [`MemOp`] requests and routed here,
//! synchronously, on the already-locked address-space state.

use log::{debug, trace};

use crate::config::PagingMode;
use crate::error::{Error, Result};
use crate::paging::{copy_page, Mapper, Stores};
use crate::space::MmState;

/// Memory-map request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOp {
    /// Grow area `area` by `size` bytes (page aligned by the VMA manager).
    IncreaseLimit { area: u32, size: u64 },
    /// Copy RAM frame `src_frame` to swap frame `dst_frame`.
    SwapPage { src_frame: u64, dst_frame: u64 },
    /// Read the byte at virtual address `addr`.
    IoRead { addr: u64 },
    /// Write `value` at virtual address `addr`.
    IoWrite { addr: u64, value: u8 },
}

/// Reply to a [`MemOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemReply {
    Done,
    Byte(u8),
}

pub(crate) fn dispatch(state: &mut MmState, stores: &Stores<'_>, op: MemOp) -> Result<MemReply> {
    trace!(target: "vmm::mm", "memmap {op:?}");
    match op {
        MemOp::IncreaseLimit { area, size } => {
            let MmState { config, areas, paging, .. } = state;
            let mut mapper = Mapper::new(paging, *stores);
            areas.grow(area, size, config, &mut mapper)?;
            Ok(MemReply::Done)
        }
        MemOp::SwapPage { src_frame, dst_frame } => {
            copy_page(stores.ram()?, src_frame, stores.swap()?, dst_frame, state.config.page_size)?;
            Ok(MemReply::Done)
        }
        MemOp::IoRead { addr } => {
            let phys = translate(state, stores, addr)?;
            Ok(MemReply::Byte(stores.ram()?.read_byte(phys)?))
        }
        MemOp::IoWrite { addr, value } => {
            let phys = translate(state, stores, addr)?;
            stores.ram()?.write_byte(phys, value)?;
            let pgn = state.paging.page_of(addr);
            state.paging.mark_dirty(pgn);
            Ok(MemReply::Done)
        }
    }
}

/// Virtual to physical: `frame * page_size + addr % page_size`.
///
/// In paged mode only addresses inside an area may fault a page in.
fn translate(state: &mut MmState, stores: &Stores<'_>, addr: u64) -> Result<u64> {
    stores.ram()?;
    if state.config.paging == PagingMode::Paged && state.areas.covering(addr).is_none() {
        debug!(target: "vmm::mm", "address {addr:#x} lies outside every area");
        return Err(Error::MappingFailed);
    }
    let pgn = state.paging.page_of(addr);
    let frame = state.paging.resolve(pgn, stores)?;
    Ok(frame * state.config.page_size + state.paging.offset_of(addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use crate::phys::{MemPhy, PhysicalStore, StoreError};
    use crate::space::AddressSpace;
    use crate::vma::HEAP_AREA;

    #[test]
    fn increase_limit_grows_the_area() {
        let ram = MemPhy::new(8 * 4096, 4096);
        let swap = MemPhy::new(2 * 4096, 4096);
        let space = AddressSpace::new(VmConfig::default());
        let reply = space
            .memmap(&Stores::new(&ram, &swap), MemOp::IncreaseLimit { area: HEAP_AREA, size: 10 })
            .unwrap();
        assert_eq!(reply, MemReply::Done);
        assert_eq!(space.area(HEAP_AREA).map(|vma| vma.end()), Ok(8192));
        assert_eq!(ram.free_frames(), 6);
    }

    #[test]
    fn swap_page_copies_between_stores() {
        let ram = MemPhy::new(4 * 64, 64);
        let swap = MemPhy::new(4 * 64, 64);
        ram.write_byte(2 * 64 + 7, 9).unwrap();
        let config = VmConfig { page_size: 64, ..VmConfig::default() };
        let space = AddressSpace::new(config);
        space
            .memmap(&Stores::new(&ram, &swap), MemOp::SwapPage { src_frame: 2, dst_frame: 1 })
            .unwrap();
        assert_eq!(swap.read_byte(64 + 7), Ok(9));
    }

    #[test]
    fn io_in_identity_mode_hits_the_same_physical_address() {
        let ram = MemPhy::new(4 * 64, 64);
        let config =
            VmConfig { page_size: 64, paging: PagingMode::Identity, ..VmConfig::default() };
        let space = AddressSpace::new(config);
        let stores = Stores { ram: Some(&ram), swap: None };
        space.memmap(&stores, MemOp::IoWrite { addr: 130, value: 0x11 }).unwrap();
        assert_eq!(ram.read_byte(130), Ok(0x11));
        assert_eq!(space.memmap(&stores, MemOp::IoRead { addr: 130 }), Ok(MemReply::Byte(0x11)));
    }

    #[test]
    fn io_without_ram_is_an_invalid_context() {
        let space = AddressSpace::new(VmConfig::default());
        assert_eq!(
            space.memmap(&Stores::default(), MemOp::IoRead { addr: 0 }),
            Err(Error::InvalidContext)
        );
    }

    #[test]
    fn zero_increase_of_unknown_area_is_done() {
        let ram = MemPhy::new(4 * 4096, 4096);
        let swap = MemPhy::new(2 * 4096, 4096);
        let space = AddressSpace::new(VmConfig::default());
        let stores = Stores::new(&ram, &swap);
        assert_eq!(
            space.memmap(&stores, MemOp::IncreaseLimit { area: 9, size: 0 }),
            Ok(MemReply::Done)
        );
        assert_eq!(
            space.memmap(&stores, MemOp::IncreaseLimit { area: 9, size: 1 }),
            Err(Error::InvalidArea(9))
        );
    }

    #[test]
    fn io_outside_every_area_maps_nothing() {
        let ram = MemPhy::new(8 * 4096, 4096);
        let swap = MemPhy::new(2 * 4096, 4096);
        let space = AddressSpace::new(VmConfig::default());
        let stores = Stores::new(&ram, &swap);
        let free_before = ram.free_frames();
        assert_eq!(
            space.memmap(&stores, MemOp::IoWrite { addr: 0x40_0000, value: 1 }),
            Err(Error::MappingFailed)
        );
        assert_eq!(
            space.memmap(&stores, MemOp::IoRead { addr: 0x40_0000 }),
            Err(Error::MappingFailed)
        );
        assert_eq!(ram.free_frames(), free_before);
        assert!(space.residency().is_empty());
    }

    #[test]
    fn swap_page_with_huge_frame_is_out_of_range() {
        let ram = MemPhy::new(4 * 64, 64);
        let swap = MemPhy::new(4 * 64, 64);
        let config = VmConfig { page_size: 64, ..VmConfig::default() };
        let space = AddressSpace::new(config);
        let stores = Stores::new(&ram, &swap);
        assert!(matches!(
            space.memmap(&stores, MemOp::SwapPage { src_frame: u64::MAX, dst_frame: 1 }),
            Err(Error::Store(StoreError::OutOfRange(_)))
        ));
        assert!(matches!(
            space.memmap(&stores, MemOp::SwapPage { src_frame: 1, dst_frame: u64::MAX }),
            Err(Error::Store(StoreError::OutOfRange(_)))
        ));
    }
}
