// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page-table entry encoding.
//!
//! Layout of the 64-bit entry:
//!
//! ```text
//!  63       62       61       60      59..51   50 ........ 5   4 .. 0
//! PRESENT SWAPPED RESERVED  DIRTY    (zero)   [ swap offset ] [ type ]   swapped
//! PRESENT SWAPPED RESERVED  DIRTY    (zero)   [       frame number     ]  resident
//! ```

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// State bits stored in the top of a PTE.
    pub struct PteFlags: u64 {
        const PRESENT = 1 << 63;
        const SWAPPED = 1 << 62;
        const RESERVED = 1 << 61;
        const DIRTY = 1 << 60;
    }
}

const FPN_MASK: u64 = (1 << 48) - 1;
const SWPTYP_MASK: u64 = 0x1f;
const SWPOFF_SHIFT: u32 = 5;
const SWPOFF_MASK: u64 = (1 << 46) - 1;

/// Single page-table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Pte(u64);

/// Where a present page currently lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PteState {
    /// Page has never been mapped or was released.
    Unmapped,
    /// Page lives in RAM frame `frame`.
    Resident { frame: u64, dirty: bool },
    /// Page content was pushed to swap.
    Swapped { swap_type: u8, offset: u64 },
}

impl Pte {
    /// Entry with every bit clear.
    pub const EMPTY: Self = Self(0);

    /// Encodes a resident page. Frame 0 is rejected as an invalid setting.
    pub fn resident(frame: u64) -> Option<Self> {
        if frame == 0 || frame > FPN_MASK {
            return None;
        }
        Some(Self(PteFlags::PRESENT.bits() | frame))
    }

    /// Encodes a page whose content sits at `offset` in swap device `swap_type`.
    pub fn swapped(swap_type: u8, offset: u64) -> Self {
        let bits = (PteFlags::PRESENT | PteFlags::SWAPPED).bits()
            | (u64::from(swap_type) & SWPTYP_MASK)
            | ((offset & SWPOFF_MASK) << SWPOFF_SHIFT);
        Self(bits)
    }

    /// Builds an entry from its raw encoding.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw encoding.
    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }

    pub fn is_present(self) -> bool {
        self.flags().contains(PteFlags::PRESENT)
    }

    pub fn is_swapped(self) -> bool {
        self.flags().contains(PteFlags::PRESENT | PteFlags::SWAPPED)
    }

    pub fn is_resident(self) -> bool {
        self.is_present() && !self.is_swapped()
    }

    pub fn is_dirty(self) -> bool {
        self.flags().contains(PteFlags::DIRTY)
    }

    /// Frame number of a resident entry.
    pub fn frame(self) -> Option<u64> {
        self.is_resident().then_some(self.0 & FPN_MASK)
    }

    /// Swap type of a swapped entry.
    pub fn swap_type(self) -> Option<u8> {
        self.is_swapped().then_some((self.0 & SWPTYP_MASK) as u8)
    }

    /// Swap offset of a swapped entry.
    pub fn swap_offset(self) -> Option<u64> {
        self.is_swapped().then_some((self.0 >> SWPOFF_SHIFT) & SWPOFF_MASK)
    }

    /// Returns a copy with the dirty bit set.
    #[must_use]
    pub fn with_dirty(self) -> Self {
        Self(self.0 | PteFlags::DIRTY.bits())
    }

    /// Decoded view of the entry.
    pub fn state(self) -> PteState {
        if let Some(frame) = self.frame() {
            PteState::Resident { frame, dirty: self.is_dirty() }
        } else if self.is_swapped() {
            PteState::Swapped {
                swap_type: (self.0 & SWPTYP_MASK) as u8,
                offset: (self.0 >> SWPOFF_SHIFT) & SWPOFF_MASK,
            }
        } else {
            PteState::Unmapped
        }
    }
}
