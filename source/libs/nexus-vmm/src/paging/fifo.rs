// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! FIFO residency list used for victim selection.

use std::collections::VecDeque;

use crate::error::{Error, Result};

/// Resident page numbers in the order they became resident.
#[derive(Debug, Default, Clone)]
pub struct Residency {
    pages: VecDeque<u64>,
}

impl Residency {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `pgn` as the most recently resident page.
    pub fn enlist(&mut self, pgn: u64) {
        self.pages.push_back(pgn);
    }

    /// Removes and returns the longest-resident page.
    pub fn find_victim(&mut self) -> Result<u64> {
        self.pages.pop_front().ok_or(Error::NoVictim)
    }

    /// Drops `pgn` from the list wherever it sits.
    pub fn remove(&mut self, pgn: u64) -> bool {
        match self.pages.iter().position(|page| *page == pgn) {
            Some(index) => {
                self.pages.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Oldest-first snapshot.
    pub fn pages(&self) -> Vec<u64> {
        self.pages.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }
}
