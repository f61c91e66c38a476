// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Text dumps of address-space state for the `vmm::pt` log target.

use core::fmt::Write;

use crate::paging::pte::PteState;
use crate::paging::{split_address, split_page_number};
use crate::region::Region;
use crate::space::MmState;

pub(crate) fn render(state: &MmState) -> String {
    let mut out = String::new();
    for vma in state.areas.iter() {
        let _ = writeln!(
            out,
            "area {} [{:#x}, {:#x}) brk {:#x}",
            vma.id(),
            vma.start(),
            vma.end(),
            vma.brk()
        );
        let _ = writeln!(out, "  free: {}", regions(&vma.free_regions()));
        let range = split_address(vma.start(), state.config.offset_bits());
        let _ = writeln!(
            out,
            "  start pgd {} p4d {} pud {} pmd {} pt {}",
            range.pgd, range.p4d, range.pud, range.pmd, range.pt
        );
    }
    let live: Vec<String> = state
        .symbols
        .live()
        .into_iter()
        .map(|(handle, region)| format!("{handle}={}", region_text(region)))
        .collect();
    let _ = writeln!(out, "live: {}", live.join(" "));
    let _ = writeln!(out, "fifo: {:?}", state.paging.residency().pages());
    if let Some(table) = state.paging.table() {
        for (pgn, pte) in table.entries() {
            let idx = split_page_number(pgn);
            let place = match pte.state() {
                PteState::Resident { frame, dirty } => {
                    format!("frame {frame}{}", if dirty { " dirty" } else { "" })
                }
                PteState::Swapped { swap_type, offset } => format!("swap {swap_type}:{offset}"),
                PteState::Unmapped => continue,
            };
            let _ = writeln!(
                out,
                "  page {pgn:#x} [{:03x}:{:03x}:{:03x}:{:03x}:{:03x}] {place}",
                idx.pgd, idx.p4d, idx.pud, idx.pmd, idx.pt
            );
        }
    }
    out
}

fn region_text(region: Region) -> String {
    format!("[{:#x}, {:#x})", region.start, region.end)
}

fn regions(list: &[Region]) -> String {
    let parts: Vec<String> = list.iter().copied().map(region_text).collect();
    parts.join(" ")
}
