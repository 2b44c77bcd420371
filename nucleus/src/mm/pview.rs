/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! A pview maps one pset into one vas at a virtual address, page offset and
//! length, with its own protection mask (spec §3 "Pview"). Exclusively
//! owned by its vas; the pset underneath is shared with every other pview
//! referencing it.

use {crate::mm::{PsetHandle, PAGE_SIZE}, machine::hat::Protection};

/// Index of a pview within its owning vas's fixed-size pview table. Part of
/// an [`crate::mm::pset::AttachEntry`], never meaningful on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PviewId(pub u8);

bitflags::bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct PviewFlags: u8 {
        /// A PROT_MMAP shared mapping, preserved across exec (spec §4.4, §4.8).
        const SHARED_MMAP = 1 << 0;
        /// Grows downward on a fault just below it, up to a maximum (the
        /// user stack's auto-grow region, spec §4.4).
        const STACK_GROWTH = 1 << 1;
    }
}

/// One mapping of a pset's pages into a vas.
#[derive(Clone, Copy)]
pub struct Pview {
    pub pset: PsetHandle,
    /// Starting virtual address of this mapping.
    pub vaddr: usize,
    /// Index of the first pset page this view exposes.
    pub page_offset: usize,
    /// Number of pages this view covers.
    pub len_pages: usize,
    pub prot: Protection,
    pub flags: PviewFlags,
}

impl Pview {
    pub fn new(
        pset: PsetHandle,
        vaddr: usize,
        page_offset: usize,
        len_pages: usize,
        prot: Protection,
    ) -> Self {
        Self {
            pset,
            vaddr,
            page_offset,
            len_pages,
            prot,
            flags: PviewFlags::empty(),
        }
    }

    pub fn end_vaddr(&self) -> usize {
        self.vaddr + self.len_pages * PAGE_SIZE
    }

    pub fn contains(&self, vaddr: usize) -> bool {
        vaddr >= self.vaddr && vaddr < self.end_vaddr()
    }

    /// Slot index within the underlying pset for a vaddr this view contains.
    pub fn slot_index(&self, vaddr: usize) -> usize {
        self.page_offset + (vaddr - self.vaddr) / PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_handle() -> PsetHandle {
        let mut a: crate::arena::Arena<(), 1> = crate::arena::Arena::new();
        a.insert(()).unwrap()
    }

    #[test_case]
    fn contains_respects_bounds() {
        let v = Pview::new(dummy_handle(), 0x1000, 0, 4, Protection::USER_RW);
        assert!(v.contains(0x1000));
        assert!(!v.contains(v.end_vaddr()));
    }

    #[test_case]
    fn slot_index_accounts_for_page_offset() {
        let v = Pview::new(dummy_handle(), 0x1000, 2, 4, Protection::USER_RW);
        assert_eq!(v.slot_index(0x1000), 2);
        assert_eq!(v.slot_index(0x1000 + PAGE_SIZE), 3);
    }
}
