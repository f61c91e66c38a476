// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Five-level page table allocating the lower levels on demand.
//!
//! Tables live in an arena and refer to each other by index, so the
//! hierarchy never holds raw pointers and drops as a single vector.

use super::pte::Pte;
use super::{split_page_number, PageIndices, LEVELS, LEVEL_ENTRIES};

type TableId = u32;

enum Table {
    Directory(Box<[Option<TableId>]>),
    Leaf(Box<[Pte]>),
}

impl Table {
    fn directory() -> Self {
        Self::Directory(vec![None; LEVEL_ENTRIES].into_boxed_slice())
    }

    fn leaf() -> Self {
        Self::Leaf(vec![Pte::EMPTY; LEVEL_ENTRIES].into_boxed_slice())
    }
}

const ROOT: TableId = 0;

/// PGD → P4D → PUD → PMD → PT hierarchy.
pub struct PageTable {
    tables: Vec<Table>,
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PageTable {
    /// Creates a table holding only a zeroed root directory.
    pub fn new() -> Self {
        Self { tables: vec![Table::directory()] }
    }

    /// Number of tables allocated so far, root included.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Returns the entry for `pgn`, or an empty entry if no leaf covers it.
    pub fn entry(&self, pgn: u64) -> Pte {
        let indices = split_page_number(pgn);
        let path = indices.as_array();
        let mut id = ROOT;
        for (level, index) in path.iter().enumerate() {
            match &self.tables[id as usize] {
                Table::Directory(slots) => match slots[*index] {
                    Some(next) => id = next,
                    None => return Pte::EMPTY,
                },
                Table::Leaf(entries) => {
                    debug_assert_eq!(level, LEVELS - 1);
                    return entries[*index];
                }
            }
        }
        Pte::EMPTY
    }

    /// Stores `pte` for `pgn`, allocating intermediate tables as needed.
    pub fn set(&mut self, pgn: u64, pte: Pte) {
        let indices = split_page_number(pgn);
        let path = indices.as_array();
        let mut id = ROOT;
        for (level, index) in path.iter().enumerate() {
            if level == LEVELS - 1 {
                if let Table::Leaf(entries) = &mut self.tables[id as usize] {
                    entries[*index] = pte;
                }
                return;
            }
            let existing = match &self.tables[id as usize] {
                Table::Directory(slots) => slots[*index],
                Table::Leaf(_) => return,
            };
            id = match existing {
                Some(next) => next,
                None => {
                    if pte == Pte::EMPTY {
                        return;
                    }
                    let next = self.tables.len() as TableId;
                    let table =
                        if level == LEVELS - 2 { Table::leaf() } else { Table::directory() };
                    self.tables.push(table);
                    if let Table::Directory(slots) = &mut self.tables[id as usize] {
                        slots[*index] = Some(next);
                    }
                    next
                }
            };
        }
    }

    /// Clears the entry for `pgn`, returning its previous value.
    pub fn clear(&mut self, pgn: u64) -> Pte {
        let old = self.entry(pgn);
        if old != Pte::EMPTY {
            self.set(pgn, Pte::EMPTY);
        }
        old
    }

    /// Every non-empty entry in ascending page order.
    pub fn entries(&self) -> Vec<(u64, Pte)> {
        let mut out = Vec::new();
        self.collect(ROOT, 0, 0, &mut out);
        out
    }

    fn collect(&self, id: TableId, level: usize, prefix: u64, out: &mut Vec<(u64, Pte)>) {
        match &self.tables[id as usize] {
            Table::Directory(slots) => {
                for (index, slot) in slots.iter().enumerate() {
                    if let Some(next) = slot {
                        let prefix = (prefix << super::LEVEL_BITS) | index as u64;
                        self.collect(*next, level + 1, prefix, out);
                    }
                }
            }
            Table::Leaf(entries) => {
                for (index, pte) in entries.iter().enumerate() {
                    if *pte != Pte::EMPTY {
                        out.push(((prefix << super::LEVEL_BITS) | index as u64, *pte));
                    }
                }
            }
        }
    }

    /// Drops every lower-level table, leaving an empty root.
    pub fn reset(&mut self) {
        self.tables.truncate(1);
        self.tables[0] = Table::directory();
    }
}

impl PageIndices {
    fn as_array(&self) -> [usize; LEVELS] {
        [self.pgd, self.p4d, self.pud, self.pmd, self.pt]
    }
}
