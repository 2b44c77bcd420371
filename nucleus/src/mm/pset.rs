/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Page sets (spec §4.3): the unit of coherent page state shared by every
//! view mapping the same pages. A pset's slot array is separate from
//! `libmemory::perpage::PerPage` (the physical-frame table): a frame table
//! entry describes "what is this physical page doing right now"; a slot
//! here describes "what is logical page `idx` of this pset doing right
//! now", which may be unmapped, backed by a frame, or paged out, entirely
//! independent of which physical frame (if any) currently backs it. The
//! original keeps these as two separate structs (`struct core` in
//! `vm_page.c` vs. `struct perpage` in `include/sys/pset.h`); this crate
//! keeps that separation rather than conflating frame state with slot
//! state.

use {
    crate::{
        errors::{KernelError, Result},
        mm::{pview::PviewId, MAX_COW_CHILDREN, PsetHandle},
    },
    core::cell::Cell,
    libmemory::perpage::Pfn,
};

bitflags::bitflags! {
    /// Per-slot state bits, the pset-layer analogue of `PP_V`/`PP_COW`/
    /// `PP_SWAPPED`/`PP_BAD`/`PP_R`/`PP_M` in `include/sys/pset.h`.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct SlotFlags: u8 {
        /// Slot currently has a physical frame backing it.
        const VALID    = 1 << 0;
        /// Slot is a not-yet-copied reference into a COW master's frame.
        const COW      = 1 << 1;
        /// Slot's contents live on swap; no frame is currently assigned.
        const SWAPPED  = 1 << 2;
        /// Slot is permanently unusable (I/O error during fill or writeback).
        const BAD      = 1 << 3;
        /// Union of every attached view's HAT-observed accessed bit.
        const REFERENCED = 1 << 4;
        /// Union of every attached view's HAT-observed dirty bit.
        const MODIFIED = 1 << 5;
    }
}

/// Bound on simultaneously attached views per slot (spec §9: "represent as
/// a small-inline vector"). A page shared read-only by more mappings than
/// this is a pathological case this kernel doesn't target.
pub const MAX_ATTACH: usize = 8;

/// One mapping of this slot into some vas's pview, identified without a
/// pointer: the owning vas's arena handle plus the index of the pview
/// within that vas's own pview table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachEntry {
    pub vas: crate::mm::VasHandle,
    pub pview: PviewId,
}

/// Per-slot-in-pset descriptor.
pub struct Slot {
    flags: Cell<SlotFlags>,
    locked: Cell<bool>,
    want: Cell<bool>,
    pfn: Cell<Option<Pfn>>,
    attach: Cell<[Option<AttachEntry>; MAX_ATTACH]>,
}

impl Slot {
    pub const fn new() -> Self {
        Self {
            flags: Cell::new(SlotFlags::empty()),
            locked: Cell::new(false),
            want: Cell::new(false),
            pfn: Cell::new(None),
            attach: Cell::new([None; MAX_ATTACH]),
        }
    }

    pub fn flags(&self) -> SlotFlags {
        self.flags.get()
    }

    pub fn pfn(&self) -> Option<Pfn> {
        self.pfn.get()
    }

    pub fn is_valid(&self) -> bool {
        self.flags.get().contains(SlotFlags::VALID)
    }

    /// Count of attach-list entries; spec invariant: equal to `refs`.
    pub fn refs(&self) -> usize {
        self.attach.get().iter().filter(|e| e.is_some()).count()
    }

    pub fn add_attach(&self, entry: AttachEntry) -> Result<()> {
        let mut list = self.attach.get();
        for slot in list.iter_mut() {
            if slot.is_none() {
                *slot = Some(entry);
                self.attach.set(list);
                return Ok(());
            }
        }
        Err(KernelError::OutOfSpace)
    }

    pub fn remove_attach(&self, entry: AttachEntry) {
        let mut list = self.attach.get();
        for slot in list.iter_mut() {
            if *slot == Some(entry) {
                *slot = None;
            }
        }
        self.attach.set(list);
    }

    /// Attempt the slot's lock without blocking, for the pageout scan
    /// (spec §4.5: "conditionally lock the slot; skip if busy").
    pub fn try_lock(&self) -> bool {
        if self.locked.get() {
            false
        } else {
            self.locked.set(true);
            true
        }
    }

    /// Unconditionally mark the slot locked; callers sleep on the pset's
    /// waiters semaphore first if `try_lock` fails (spec §4.3 "lock_slot").
    pub fn force_lock(&self) {
        self.locked.set(true);
    }

    pub fn unlock(&self) -> bool {
        self.locked.set(false);
        self.want.replace(false)
    }

    pub fn mark_want(&self) {
        self.want.set(true);
    }

    pub fn set_frame(&self, pfn: Pfn) {
        self.pfn.set(Some(pfn));
        self.flags.set(self.flags.get() | SlotFlags::VALID);
    }

    pub fn clear_frame(&self) {
        self.pfn.set(None);
        self.flags.set(self.flags.get() - SlotFlags::VALID);
    }

    pub fn insert_flags(&self, f: SlotFlags) {
        self.flags.set(self.flags.get() | f);
    }

    pub fn remove_flags(&self, f: SlotFlags) {
        self.flags.set(self.flags.get() - f);
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::new()
    }
}

/// What a pset's pages are backed by (spec §3 "Pset" variants).
pub enum Kind {
    Uninit,
    /// Zero-fill-on-demand.
    Zfod,
    /// File-backed: reads/writes go through a portref at a byte offset.
    File {
        portref: crate::ipc::portref::PortrefHandle,
        file_offset: usize,
    },
    /// Copy-on-write over a master pset's `[offset, offset+len)` window.
    Cow { master: PsetHandle, offset: usize },
    /// Pre-filled physical range (e.g. a device's MMIO window exported as a
    /// pset for `msg_send` payload delivery, spec §4.6).
    Physmem { base_pfn: Pfn },
}

impl Kind {
    /// Unwrap the `Cow` master/offset pair, for `mm::fault`'s fill path.
    pub fn as_cow(&self) -> Option<(PsetHandle, usize)> {
        match *self {
            Kind::Cow { master, offset } => Some((master, offset)),
            _ => None,
        }
    }

    /// Unwrap the `File` portref/offset pair, for `mm::fault`'s fill path.
    pub fn as_file(&self) -> Option<(crate::ipc::portref::PortrefHandle, usize)> {
        match *self {
            Kind::File { portref, file_offset } => Some((portref, file_offset)),
            _ => None,
        }
    }

    /// Unwrap the `Physmem` base frame, for `mm::fault`'s fill path.
    pub fn as_physmem(&self) -> Option<Pfn> {
        match *self {
            Kind::Physmem { base_pfn } => Some(base_pfn),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct PsetFlags: u8 {
        /// Every view sees the same slot state rather than forking on write.
        const SHARED = 1 << 0;
    }
}

/// A logical array of pages sharing one backing policy.
///
/// `N` bounds the pset's page count; callers size it to the largest single
/// mapping this kernel needs to represent in one pset (a COW pset over a
/// sub-window of a master still allocates a full `N`-slot array sized to
/// its own window length, not the master's).
pub struct Pset<const N: usize> {
    kind: Kind,
    flags: Cell<PsetFlags>,
    len: usize,
    refs: Cell<u32>,
    cow_chain: Cell<[Option<PsetHandle>; MAX_COW_CHILDREN]>,
    swap_block: Cell<Option<usize>>,
    slots: [Slot; N],
}

impl<const N: usize> Pset<N> {
    pub fn new(kind: Kind, len: usize) -> Self {
        debug_assert!(len <= N);
        Self {
            kind,
            flags: Cell::new(PsetFlags::empty()),
            len,
            refs: Cell::new(0),
            cow_chain: Cell::new([None; MAX_COW_CHILDREN]),
            swap_block: Cell::new(None),
            slots: core::array::from_fn(|_| Slot::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn slot(&self, idx: usize) -> &Slot {
        &self.slots[idx]
    }

    pub fn is_shared(&self) -> bool {
        self.flags.get().contains(PsetFlags::SHARED)
    }

    pub fn mark_shared(&self) {
        self.flags.set(self.flags.get() | PsetFlags::SHARED);
    }

    pub fn refs(&self) -> u32 {
        self.refs.get()
    }

    pub fn add_ref(&self) {
        self.refs.set(self.refs.get() + 1);
    }

    /// Drop a reference; `true` if this was the last one and the pset
    /// should now be torn down by its owner (frees the swap block, unlinks
    /// from the master's cow-chain if it was a COW child).
    pub fn drop_ref(&self) -> bool {
        let n = self.refs.get() - 1;
        self.refs.set(n);
        n == 0
    }

    /// Link a COW child onto this master's chain for this master's
    /// lifetime (spec invariant: "a COW pset appears on its master's
    /// cow-chain for its entire lifetime").
    pub fn link_cow_child(&self, child: PsetHandle) -> Result<()> {
        let mut chain = self.cow_chain.get();
        for slot in chain.iter_mut() {
            if slot.is_none() {
                *slot = Some(child);
                self.cow_chain.set(chain);
                return Ok(());
            }
        }
        Err(KernelError::OutOfSpace)
    }

    pub fn unlink_cow_child(&self, child: PsetHandle) {
        let mut chain = self.cow_chain.get();
        for slot in chain.iter_mut() {
            if *slot == Some(child) {
                *slot = None;
            }
        }
        self.cow_chain.set(chain);
    }

    pub fn cow_children(&self) -> impl Iterator<Item = PsetHandle> {
        self.cow_chain.get().into_iter().flatten()
    }

    /// `true` if slot `idx` isn't backed by a frame yet and needs
    /// `mm::fault::fillslot` run on it (spec §4.3 *fillslot*). Filling
    /// itself lives in `mm::fault`, not here: it needs the page allocator
    /// and, for `Cow`, the pset arena to reach the master — neither of
    /// which a bare `Pset` has access to.
    pub fn needs_fill(&self, idx: usize) -> bool {
        !self.slots[idx].is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn fresh_pset_slots_are_invalid() {
        let p: Pset<4> = Pset::new(Kind::Zfod, 4);
        assert!(p.needs_fill(0));
    }

    #[test_case]
    fn attach_list_tracks_refs() {
        let mut arena: crate::arena::Arena<(), 1> = crate::arena::Arena::new();
        let vas = arena.insert(()).unwrap();
        let p: Pset<1> = Pset::new(Kind::Zfod, 1);
        let s = p.slot(0);
        let a = AttachEntry {
            vas,
            pview: PviewId(0),
        };
        s.add_attach(a).unwrap();
        assert_eq!(s.refs(), 1);
        s.remove_attach(a);
        assert_eq!(s.refs(), 0);
    }

    #[test_case]
    fn cow_chain_links_and_unlinks() {
        let mut arena: crate::arena::Arena<(), 1> = crate::arena::Arena::new();
        let child = arena.insert(()).unwrap();
        let master: Pset<1> = Pset::new(Kind::Zfod, 1);
        master.link_cow_child(child).unwrap();
        assert_eq!(master.cow_children().count(), 1);
        master.unlink_cow_child(child);
        assert_eq!(master.cow_children().count(), 0);
    }

    #[test_case]
    fn slot_lock_is_exclusive() {
        let s = Slot::new();
        assert!(s.try_lock());
        assert!(!s.try_lock());
        s.unlock();
        assert!(s.try_lock());
    }
}
