/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Per-page frame descriptor table, one entry per physical page frame.
//!
//! Modelled on `struct core` in VSTa's `vm_page.c`: the descriptor is reused
//! both for live page state (pset owner, slot index, access bits) and, while
//! the frame sits on the free list, as the free-list link itself.

use core::cell::Cell;

bitflags::bitflags! {
    /// Per-page state bits, the Rust equivalent of `c_flags`.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// Frame holds a valid translation.
        const VALID = 1 << 0;
        /// Frame is a copy-on-write child mapping of a master pset.
        const COW = 1 << 1;
        /// Frame's former contents are out on swap.
        const SWAPPED = 1 << 2;
        /// Frame is unusable (memory hole, failed self-test).
        const BAD = 1 << 3;
        /// Frame is held by the kernel itself and never goes on the free list.
        const SYS = 1 << 4;
        /// Hardware accessed bit, OR'd in whenever a translation mapping this
        /// frame is torn down.
        const REFERENCED = 1 << 5;
        /// Hardware dirty bit, OR'd in whenever a writable translation
        /// mapping this frame is torn down.
        const MODIFIED = 1 << 6;
    }
}

/// Physical page frame number.
pub type Pfn = usize;

/// One descriptor per physical page frame.
///
/// Slot locking follows the PP_LOCK/PP_WANT protocol described for the pset
/// layer: `busy` is the lock bit, `want` records that some other context is
/// waiting for it to clear. The pset above this layer supplies the
/// wait-queue (its own waiters semaphore) that a locker actually sleeps on;
/// this descriptor only carries the bits the pset tests under its spinlock.
pub struct PerPage {
    flags: Cell<PageFlags>,
    free_next: Cell<Option<Pfn>>,
    busy: Cell<bool>,
    want: Cell<bool>,
    /// Owning pset's opaque identity and the slot index within it, set by
    /// the pset layer via [`PerPage::set_owner`]. `None` while on the free
    /// list or held by the kernel directly (`PageFlags::SYS`).
    owner: Cell<Option<(usize, usize)>>,
}

impl PerPage {
    pub const fn new() -> Self {
        Self {
            flags: Cell::new(PageFlags::empty()),
            free_next: Cell::new(None),
            busy: Cell::new(false),
            want: Cell::new(false),
            owner: Cell::new(None),
        }
    }

    pub fn flags(&self) -> PageFlags {
        self.flags.get()
    }

    pub fn set_flags(&self, flags: PageFlags) {
        self.flags.set(flags);
    }

    pub fn insert_flags(&self, flags: PageFlags) {
        self.flags.set(self.flags.get() | flags);
    }

    pub fn remove_flags(&self, flags: PageFlags) {
        self.flags.set(self.flags.get() & !flags);
    }

    /// OR hardware access bits observed when a translation to this frame is
    /// torn down into the descriptor, for the pageout clock to consult later.
    pub fn note_access(&self, referenced: bool, modified: bool) {
        let mut flags = self.flags.get();
        if referenced {
            flags.insert(PageFlags::REFERENCED);
        }
        if modified {
            flags.insert(PageFlags::MODIFIED);
        }
        self.flags.set(flags);
    }

    /// Read and clear the accumulated access bits, as the pageout clock's
    /// forward and back hands do on every pass.
    pub fn take_access(&self) -> (bool, bool) {
        let flags = self.flags.get();
        let bits = (
            flags.contains(PageFlags::REFERENCED),
            flags.contains(PageFlags::MODIFIED),
        );
        self.remove_flags(PageFlags::REFERENCED | PageFlags::MODIFIED);
        bits
    }

    pub fn owner(&self) -> Option<(usize, usize)> {
        self.owner.get()
    }

    pub fn set_owner(&self, pset: usize, idx: usize) {
        self.owner.set(Some((pset, idx)));
    }

    pub fn clear_owner(&self) {
        self.owner.set(None);
    }

    pub(crate) fn free_next(&self) -> Option<Pfn> {
        self.free_next.get()
    }

    pub(crate) fn set_free_next(&self, next: Option<Pfn>) {
        self.free_next.set(next);
    }

    /// Try to set the busy bit. Returns `false` if already busy, in which
    /// case the caller must record `PP_WANT` and sleep.
    pub(crate) fn try_lock(&self) -> bool {
        if self.busy.get() {
            false
        } else {
            self.busy.set(true);
            true
        }
    }

    pub(crate) fn unlock(&self) -> bool {
        self.busy.set(false);
        self.want.replace(false)
    }

    pub(crate) fn set_want(&self) {
        self.want.set(true);
    }
}

impl Default for PerPage {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: every field is a `Cell` reached only while the owning table's
// frame-level spinlock or slot busy-bit is held.
unsafe impl Sync for PerPage {}
