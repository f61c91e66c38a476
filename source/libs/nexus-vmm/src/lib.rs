// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! CONTEXT: Host-first process virtual memory manager
//! OWNERS: @runtime
//! PUBLIC API: AddressSpace, ProcessContext, VmConfig, PhysicalStore, MemPhy, Error
//! DEPENDS_ON: parking_lot, bitflags, log, thiserror, serde/toml
//! INVARIANTS: Region handles index a fixed-capacity symbol table; heap areas only grow;
//!             one lock per address space serialises every operation
//!
//! Layers, leaf first: [`phys`] (byte stores), [`paging`] (5-level tables, PTE encoding,
//! FIFO replacement), [`vma`] (areas, overlap checks, growth), [`region`] (First-Fit heap
//! regions), [`space`] (the locked address space) and [`context`] (per-process entry point).

pub mod config;
pub mod context;
mod dump;
pub mod error;
pub mod memmap;
pub mod paging;
pub mod phys;
pub mod region;
pub mod space;
pub mod vma;

pub use config::{ConfigError, PagingMode, VmConfig};
pub use context::ProcessContext;
pub use error::{Error, Result};
pub use memmap::{MemOp, MemReply};
pub use paging::pte::{Pte, PteFlags, PteState};
pub use paging::{copy_page, split_address, split_page_number, PageIndices, Stores};
pub use phys::{MemPhy, PhysicalStore, StoreError};
pub use region::Region;
pub use space::AddressSpace;
pub use vma::{Vma, HEAP_AREA};
