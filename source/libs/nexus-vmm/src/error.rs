// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy shared by the region allocator, the VMA manager and the
//! paging engine.

use crate::phys::StoreError;

/// Result alias for memory-manager operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors reported to the immediate caller of a memory operation.
///
/// Nothing here is retried by the core; the instruction layer decides whether a
/// failure aborts the instruction or the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Caller context lacks its address space or a required store.
    #[error("caller context is missing its address space or store")]
    InvalidContext,
    /// Region handle is out of range or not mapped to a live region.
    #[error("region handle {0} is invalid or unmapped")]
    InvalidHandle(usize),
    /// Offset lies beyond the length of the mapped region.
    #[error("offset {offset} is outside a region of {len} bytes")]
    OutOfBounds {
        /// Requested offset.
        offset: u64,
        /// Length of the region.
        len: u64,
    },
    /// No free region fits and the heap could not be grown.
    #[error("no free region fits and heap growth was refused")]
    OutOfSpace,
    /// Proposed range intersects a sibling area.
    #[error("range {start:#x}..{end:#x} overlaps another area")]
    Overlap {
        /// First byte of the proposed range.
        start: u64,
        /// One past the last byte of the proposed range.
        end: u64,
    },
    /// Paging engine could not back the requested range with frames.
    #[error("paging engine could not map the requested range")]
    MappingFailed,
    /// Eviction was requested with no resident pages.
    #[error("no resident page available for eviction")]
    NoVictim,
    /// Area id does not resolve to a VMA.
    #[error("area {0} does not exist")]
    InvalidArea(u32),
    /// Allocation size of zero bytes.
    #[error("allocation size must be non-zero")]
    InvalidSize,
    /// Page number lies at or above the configured maximum.
    #[error("page {0} exceeds the address-space capacity")]
    PageOutOfRange(u64),
    /// Physical store rejected an access.
    #[error("physical store: {0}")]
    Store(#[from] StoreError),
}
