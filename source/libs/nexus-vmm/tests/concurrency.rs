//! CONTEXT: Concurrent allocate/free/read/write against one address space
//! OWNERS: @runtime
//! STATUS: Functional
//! TEST_COVERAGE: 2 integration tests
//!
//! TEST_SCOPE:
//!   - Symbol table and free list stay mutually consistent under contention
//!   - Byte I/O from several threads sees each thread's own writes
//!
//! TEST_SCENARIOS:
//!   - interleaved_alloc_free_stays_consistent(): threads cycle disjoint handle sets
//!   - concurrent_writers_keep_their_bytes(): each thread writes and re-reads its own region
//!
//! DEPENDENCIES:
//!   - nexus_vmm::ProcessContext shared across std threads
use std::sync::Arc;
use std::thread;

use nexus_vmm::{AddressSpace, MemPhy, ProcessContext, Region, VmConfig, HEAP_AREA};

const THREADS: usize = 8;
const HANDLES_PER_THREAD: usize = 8;

fn shared_process() -> ProcessContext {
    let config = VmConfig {
        symbol_table_size: THREADS * HANDLES_PER_THREAD,
        ..VmConfig::default()
    };
    ProcessContext::new(
        1,
        Arc::new(AddressSpace::new(config)),
        Arc::new(MemPhy::new(256 * 4096, 4096)),
        Arc::new(MemPhy::new(64 * 4096, 4096)),
    )
}

#[test]
fn interleaved_alloc_free_stays_consistent() {
    let ctx = shared_process();
    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let ctx = ctx.clone();
            thread::spawn(move || {
                let base = t * HANDLES_PER_THREAD;
                for round in 0..50u64 {
                    for slot in 0..HANDLES_PER_THREAD {
                        let size = 8 + ((round + slot as u64) % 5) * 24;
                        ctx.alloc(base + slot, size).unwrap();
                    }
                    for slot in (0..HANDLES_PER_THREAD).step_by(2) {
                        ctx.free(base + slot).unwrap();
                    }
                    for slot in (1..HANDLES_PER_THREAD).step_by(2) {
                        ctx.free(base + slot).unwrap();
                    }
                }
                ctx.alloc(base, 16).unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let space = ctx.mm.as_deref().unwrap();
    let live = space.live_regions();
    assert_eq!(live.len(), THREADS);
    let free = space.free_regions(HEAP_AREA).unwrap();
    let mut all: Vec<Region> = live.iter().map(|(_, region)| *region).collect();
    all.extend(free.iter().copied());
    for (i, a) in all.iter().enumerate() {
        for b in &all[i + 1..] {
            assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
        }
    }
    let heap = space.area(HEAP_AREA).unwrap();
    let total: u64 = all.iter().map(Region::len).sum();
    assert_eq!(total, heap.brk() - heap.start());
}

#[test]
fn concurrent_writers_keep_their_bytes() {
    let ctx = shared_process();
    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let ctx = ctx.clone();
            thread::spawn(move || {
                let handle = t;
                ctx.alloc(handle, 64).unwrap();
                for offset in 0..64u64 {
                    ctx.write(handle, offset, (t as u8) ^ offset as u8).unwrap();
                }
                for offset in 0..64u64 {
                    assert_eq!(ctx.read(handle, offset), Ok((t as u8) ^ offset as u8));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}
