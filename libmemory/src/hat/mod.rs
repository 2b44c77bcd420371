/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! The aarch64 implementation of [`machine::hat::Hat`].
//!
//! `machine`'s own translation tables (`arch::aarch64::memory::mmu`) are a
//! `FixedSizeTranslationTable` populated once, in full, at boot, to cover
//! the kernel's own fixed layout; there is no per-page install/remove
//! operation on it. A per-process address space instead grows its tables
//! one page at a time as the VM core installs and removes translations, so
//! this module builds its own two-level table on the same 64 KiB granule
//! and descriptor encoding `machine` uses for its static kernel map.

mod table;

use {
    core::cell::RefCell,
    machine::{
        hat::{AccessBits, Hat, HatError, Protection},
        memory::{Address, Physical, Virtual},
    },
    table::{RootTable, TableFrame},
};

/// Per-address-space state: the frame backing the root table plus every
/// second-level frame allocated so far, so `deinit_vas` can give them back.
pub struct Vas {
    root: TableFrame,
    children: RefCell<heapless_children::Children>,
}

/// A tiny fixed-capacity substitute for a `Vec<Pfn>`: `libmemory` has no
/// heap. Bounded by the number of 512 MiB windows a 48-bit address space can
/// have, which vastly exceeds anything a single process maps, but a real
/// deployment should size this to the board's actual physical memory.
mod heapless_children {
    use crate::perpage::Pfn;

    pub const MAX_CHILDREN: usize = 64;

    pub struct Children {
        frames: [Option<Pfn>; MAX_CHILDREN],
        len: usize,
    }

    impl Children {
        pub const fn new() -> Self {
            Self {
                frames: [None; MAX_CHILDREN],
                len: 0,
            }
        }

        pub fn push(&mut self, pfn: Pfn) -> Result<(), ()> {
            if self.len == MAX_CHILDREN {
                return Err(());
            }
            self.frames[self.len] = Some(pfn);
            self.len += 1;
            Ok(())
        }

        pub fn iter(&self) -> impl Iterator<Item = Pfn> + '_ {
            self.frames[..self.len].iter().filter_map(|f| *f)
        }
    }
}

/// Allocates and frees the physical frames backing per-process translation
/// tables. Plugged in by whoever owns the physical page allocator (`nucleus`
/// at boot), since `libmemory`'s [`crate::page_alloc::PageAllocator`] needs a
/// live thread handle to block callers that find no frame free.
pub trait TableFrameSource {
    fn alloc_table_frame() -> TableFrame;
    fn free_table_frame(frame: TableFrame);
}

/// The aarch64 HAT. `S` supplies table-frame allocation so this type stays
/// independent of which physical allocator or thread type the kernel uses.
pub struct AArch64Hat<S> {
    _source: core::marker::PhantomData<S>,
}

impl<S: TableFrameSource> Hat for AArch64Hat<S> {
    type Vas = Vas;

    fn init_vas() -> Self::Vas {
        let mut root = S::alloc_table_frame();
        root.zero();
        Vas {
            root,
            children: RefCell::new(heapless_children::Children::new()),
        }
    }

    fn deinit_vas(vas: &mut Self::Vas) {
        for pfn in vas.children.borrow().iter() {
            S::free_table_frame(TableFrame::from_pfn(pfn));
        }
        S::free_table_frame(core::mem::replace(&mut vas.root, TableFrame::from_pfn(0)));
    }

    fn switch_to_vas(vas: &Self::Vas) {
        table::activate(&vas.root);
    }

    unsafe fn install_trans(
        vas: &mut Self::Vas,
        vaddr: Address<Virtual>,
        paddr: Address<Physical>,
        prot: Protection,
    ) -> Result<(), HatError> {
        let mut root = RootTable::borrow(&vas.root);
        let leaf = root.ensure_leaf(vaddr, || {
            let frame = S::alloc_table_frame();
            vas.children
                .borrow_mut()
                .push(frame.pfn())
                .map_err(|_| HatError::OutOfTableMemory)?;
            Ok(frame)
        })?;

        if leaf.is_present(vaddr) {
            return Err(HatError::AlreadyMapped);
        }
        leaf.install(vaddr, paddr, prot);
        table::flush_tlb_entry(vaddr);
        Ok(())
    }

    unsafe fn delete_trans(vas: &mut Self::Vas, vaddr: Address<Virtual>) {
        let mut root = RootTable::borrow(&vas.root);
        if let Some(leaf) = root.find_leaf(vaddr) {
            leaf.remove(vaddr);
        }
        table::flush_tlb_entry(vaddr);
    }

    fn get_bits(vas: &mut Self::Vas, vaddr: Address<Virtual>) -> AccessBits {
        let mut root = RootTable::borrow(&vas.root);
        match root.find_leaf(vaddr) {
            Some(leaf) => leaf.take_access_bits(vaddr),
            None => AccessBits::default(),
        }
    }
}
