// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Tunables for the memory manager (page geometry, table sizes, tracing)
//! OWNERS: @runtime
//! PUBLIC API: VmConfig, PagingMode, ConfigError, DEFAULT_* constants
//! DEPENDS_ON: serde, toml, std::fs
//! INVARIANTS: page_size is a power of two; max_page_number fits the 5-level space

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::paging::{LEVELS, LEVEL_BITS};

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: u64 = 4096;
/// Default number of virtual pages an address space may address.
pub const DEFAULT_MAX_PAGE_NUMBER: u64 = 1 << 20;
/// Default number of region handles per process.
pub const DEFAULT_SYMBOL_TABLE_SIZE: usize = 30;
/// Default size of the heap area created with the address space.
pub const DEFAULT_INITIAL_HEAP_SIZE: u64 = DEFAULT_PAGE_SIZE;

/// Largest page number expressible by the page-table hierarchy.
pub const PAGE_NUMBER_LIMIT: u64 = 1 << (LEVEL_BITS * LEVELS);

/// Address translation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PagingMode {
    /// Real page tables, frame acquisition and FIFO swapping.
    #[default]
    Paged,
    /// No page table is materialised; page number equals frame number.
    Identity,
}

/// Memory-manager configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Page (and frame) size in bytes.
    pub page_size: u64,
    /// Exclusive upper bound on virtual page numbers.
    pub max_page_number: u64,
    /// Capacity of the per-process symbol table.
    pub symbol_table_size: usize,
    /// Size of the heap area at address-space creation.
    pub initial_heap_size: u64,
    /// Translation strategy.
    pub paging: PagingMode,
    /// Emit a trace line for each allocate/free/read/write.
    pub trace_io: bool,
    /// Emit region and page-table dumps after mutating operations.
    pub dump_page_table: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_page_number: DEFAULT_MAX_PAGE_NUMBER,
            symbol_table_size: DEFAULT_SYMBOL_TABLE_SIZE,
            initial_heap_size: DEFAULT_INITIAL_HEAP_SIZE,
            paging: PagingMode::Paged,
            trace_io: false,
            dump_page_table: false,
        }
    }
}

/// Errors raised while loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

impl VmConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: VmConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&data)
    }

    /// Checks the structural constraints the paging engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size < 2 || !self.page_size.is_power_of_two() {
            return Err(ConfigError::Invalid("page_size must be a power of two >= 2"));
        }
        if self.max_page_number == 0 || self.max_page_number > PAGE_NUMBER_LIMIT {
            return Err(ConfigError::Invalid("max_page_number must be in 1..=2^45"));
        }
        if self.symbol_table_size == 0 {
            return Err(ConfigError::Invalid("symbol_table_size must be non-zero"));
        }
        if self.initial_heap_size > self.max_page_number.saturating_mul(self.page_size) {
            return Err(ConfigError::Invalid("initial_heap_size exceeds the address space"));
        }
        Ok(())
    }

    /// Number of low address bits used as the in-page offset.
    pub fn offset_bits(&self) -> u32 {
        self.page_size.trailing_zeros()
    }

    /// Rounds `bytes` up to whole pages, returning at least one page.
    pub fn align_up(&self, bytes: u64) -> u64 {
        let mask = self.page_size - 1;
        let aligned = bytes.saturating_add(mask) & !mask;
        aligned.max(self.page_size)
    }
}
