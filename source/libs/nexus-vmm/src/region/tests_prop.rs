// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Property-based tests for the region allocator
//! OWNERS: @runtime
//! NOTE: Tests only. Drives random allocate/free/rebind sequences through an identity-mapped
//!       space.
//!
//! TEST_SCOPE:
//!   - Space accounting across allocate/free and handle rebinding
//!   - Disjointness of live and free regions
//!
//! TEST_SCENARIOS:
//!   - alloc_then_free_returns_the_range(): freed range heads the free list at the same address
//!   - live_plus_free_matches_heap(): live + free bytes equal brk - start after any sequence
//!   - live_and_free_never_overlap(): no byte is both live and free, no two live regions alias

use proptest::prelude::*;

use super::Region;
use crate::config::{PagingMode, VmConfig};
use crate::paging::Stores;
use crate::space::AddressSpace;
use crate::vma::HEAP_AREA;

const HANDLES: usize = 8;

fn space() -> AddressSpace {
    AddressSpace::new(VmConfig {
        paging: PagingMode::Identity,
        symbol_table_size: HANDLES,
        ..VmConfig::default()
    })
}

fn arb_ops() -> impl Strategy<Value = Vec<(usize, u64)>> {
    prop::collection::vec((0..HANDLES, 1u64..6000), 1..64)
}

/// Allocates `size` bytes for a free `handle`. A live one is freed on even sizes and
/// rebound to `size` new bytes on odd ones.
fn apply(space: &AddressSpace, ops: &[(usize, u64)]) {
    let stores = Stores::default();
    for &(handle, size) in ops {
        let live = space.live_regions().iter().any(|(live, _)| *live == handle);
        if live && size % 2 == 0 {
            space.free(handle).unwrap();
        } else {
            space.alloc(&stores, handle, size).unwrap();
        }
    }
}

proptest! {
    #[test]
    fn alloc_then_free_returns_the_range(handle in 0..HANDLES, size in 1u64..20_000) {
        let space = space();
        let addr = space.alloc(&Stores::default(), handle, size).unwrap();
        let freed = space.free(handle).unwrap();
        prop_assert_eq!(freed, Region::new(addr, addr + size));
        let head = space.free_regions(HEAP_AREA).unwrap()[0];
        prop_assert_eq!(head.start, addr);
        prop_assert!(head.len() >= size);
    }

    #[test]
    fn live_plus_free_matches_heap(ops in arb_ops()) {
        let space = space();
        apply(&space, &ops);
        let heap = space.area(HEAP_AREA).unwrap();
        let live: u64 = space.live_regions().iter().map(|(_, region)| region.len()).sum();
        let free: u64 = heap.free_regions().iter().map(Region::len).sum();
        prop_assert!(heap.start() <= heap.brk() && heap.brk() <= heap.end());
        prop_assert_eq!(live + free, heap.brk() - heap.start());
    }

    #[test]
    fn live_and_free_never_overlap(ops in arb_ops()) {
        let space = space();
        apply(&space, &ops);
        let mut all: Vec<Region> =
            space.live_regions().into_iter().map(|(_, region)| region).collect();
        all.extend(space.free_regions(HEAP_AREA).unwrap());
        for (i, a) in all.iter().enumerate() {
            prop_assert!(!a.is_empty());
            for b in &all[i + 1..] {
                prop_assert!(!a.overlaps(b), "{:?} overlaps {:?}", a, b);
            }
        }
    }
}
