/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! An address space: a list of pviews plus HAT state (spec §3 "Vas").
//! Owned exclusively by its process.

use crate::{
    errors::{KernelError, Result},
    mm::{
        pset::AttachEntry,
        pview::{Pview, PviewId},
        PsetHandle, VasHandle, PAGE_SIZE,
    },
};

/// Upper bound on simultaneous pviews in one address space: text, data,
/// bss, stack, a handful of mmaps, and the auto-grow stack region.
pub const MAX_PVIEWS: usize = 32;

/// How far below the current stack pointer a fault is still treated as
/// stack growth rather than a real fault (spec §4.4).
pub const STACK_GROWTH_MAX_PAGES: usize = 256;

bitflags::bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct VasFlags: u8 {
        const MEMLOCK = 1 << 0;
        const DMA     = 1 << 1;
        const BOOT    = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// Address is outside every pview and outside the stack-growth window.
    NoMapping,
    /// The access direction (read/write) isn't permitted by the pview.
    ProtectionViolation,
}

impl From<FaultError> for KernelError {
    fn from(_: FaultError) -> Self {
        KernelError::Fault
    }
}

/// An address space: a fixed-capacity, address-sorted pview table plus
/// HAT-specific state `H`. Generic over the HAT vas type so this module
/// never depends on a concrete architecture.
pub struct Vas<H> {
    pviews: [Option<Pview>; MAX_PVIEWS],
    count: usize,
    pub hat: H,
    flags: VasFlags,
    stack_top: usize,
}

impl<H> Vas<H> {
    pub fn new(hat: H, stack_top: usize) -> Self {
        Self {
            pviews: [None; MAX_PVIEWS],
            count: 0,
            hat,
            flags: VasFlags::empty(),
            stack_top,
        }
    }

    pub fn flags(&self) -> VasFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: VasFlags) {
        self.flags = flags;
    }

    pub fn pviews(&self) -> impl Iterator<Item = (PviewId, &Pview)> {
        self.pviews
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (PviewId(i as u8), v)))
    }

    pub fn pview(&self, id: PviewId) -> Option<&Pview> {
        self.pviews[id.0 as usize].as_ref()
    }

    /// *attach*: insert `view` into the first free slot (spec §4.4). Actual
    /// overlap validation and HAT registration is the caller's
    /// responsibility — this only owns the table, not the fault path.
    pub fn attach(&mut self, view: Pview) -> Result<PviewId> {
        if self.pviews().any(|(_, v)| overlaps(v, &view)) {
            return Err(KernelError::AlreadyExists);
        }
        for (i, slot) in self.pviews.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(view);
                self.count += 1;
                return Ok(PviewId(i as u8));
            }
        }
        Err(KernelError::OutOfSpace)
    }

    /// *detach*: remove a pview from the table. Callers must have already
    /// torn down its HAT translations and dropped the pset reference.
    pub fn detach(&mut self, id: PviewId) -> Option<Pview> {
        let slot = self.pviews[id.0 as usize].take();
        if slot.is_some() {
            self.count -= 1;
        }
        slot
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Locate the pview containing `vaddr`, or `None` if outside every
    /// mapping and outside the stack-growth window.
    pub fn find(&self, vaddr: usize) -> Option<(PviewId, &Pview)> {
        self.pviews().find(|(_, v)| v.contains(vaddr))
    }

    /// `true` if `vaddr` lies in the auto-grow region just below the
    /// current stack (spec §4.4): within `STACK_GROWTH_MAX_PAGES` pages of
    /// `stack_top` but not already covered by a pview.
    pub fn in_stack_growth_window(&self, vaddr: usize) -> bool {
        let floor = self
            .stack_top
            .saturating_sub(STACK_GROWTH_MAX_PAGES * PAGE_SIZE);
        vaddr >= floor && vaddr < self.stack_top && self.find(vaddr).is_none()
    }

    /// Attach-entry identifying a mapping of `id` in this vas, for a pset
    /// slot's attach list.
    pub fn attach_entry(&self, handle: VasHandle, id: PviewId) -> AttachEntry {
        AttachEntry { vas: handle, pview: id }
    }

    /// Redirect an already-attached pview to a different pset, keeping its
    /// address range and protection unchanged. `fork_vas` uses this to move
    /// a parent's own pview onto a fresh COW pset once the pset it used to
    /// point at directly is frozen as a fork master.
    pub fn repoint(&mut self, id: PviewId, pset: PsetHandle) {
        if let Some(view) = self.pviews[id.0 as usize].as_mut() {
            view.pset = pset;
        }
    }
}

fn overlaps(a: &Pview, b: &Pview) -> bool {
    a.vaddr < b.end_vaddr() && b.vaddr < a.end_vaddr()
}

/// Walk `parent`'s pviews, wrapping each writable private pset in a COW
/// pset shared between parent and child (spec §4.4 "Fork of a vas"), and
/// sharing `PROT_MMAP` views directly. The actual COW-pset construction is
/// the caller's job (it needs the pset arena); this only classifies each
/// pview so the caller knows which action to take.
pub enum ForkAction {
    /// Share the pset directly; no COW wrapping.
    Share,
    /// Wrap in a COW pset; `existing_master` is `Some` if the parent's
    /// pset was itself already a COW child (both fork into the same
    /// master rather than nesting COW layers).
    Cow { existing_master: Option<PsetHandle> },
}

pub fn classify_for_fork(view: &Pview, parent_kind_is_cow_of: Option<PsetHandle>) -> ForkAction {
    if view.flags.contains(crate::mm::pview::PviewFlags::SHARED_MMAP) || !view.prot.writable {
        ForkAction::Share
    } else {
        ForkAction::Cow {
            existing_master: parent_kind_is_cow_of,
        }
    }
}

/// *fork_vas* (spec §4.4 "Fork of a vas"): build a child vas from `parent`'s
/// current pviews, classifying each with [`classify_for_fork`] and actually
/// performing the action this time. `PROT_MMAP` and read-only views are
/// shared outright (`Pset::add_ref`); a private writable view already
/// backed by a COW pset gets the child a sibling COW pset over the same
/// master, never a nested COW-of-COW chain; a private writable view backed
/// directly by a plain pset freezes that pset as a master and moves *both*
/// sides onto a fresh COW pset over it, so a write by either parent or
/// child after the fork always goes through `mm::fault::upgrade_cow`
/// instead of mutating the now-shared frame in place.
pub fn fork_vas(parent: &mut Vas<()>, psets: &mut crate::mm::PsetTable) -> Result<Vas<()>> {
    use crate::mm::pset::{Kind, Pset};

    let mut child: Vas<()> = Vas::new((), parent.stack_top);
    child.flags = parent.flags;

    let views: [Option<(PviewId, Pview)>; MAX_PVIEWS] =
        core::array::from_fn(|i| parent.pviews[i].map(|v| (PviewId(i as u8), v)));

    for entry in views.into_iter().flatten() {
        let (id, view) = entry;
        let master_of = psets.get(view.pset).and_then(|p| p.kind().as_cow()).map(|(m, _)| m);

        match classify_for_fork(&view, master_of) {
            ForkAction::Share => {
                if let Some(p) = psets.get(view.pset) {
                    p.add_ref();
                }
                child.attach(view)?;
            }
            ForkAction::Cow {
                existing_master: Some(master),
            } => {
                let sibling = psets
                    .insert(Pset::new(
                        Kind::Cow {
                            master,
                            offset: view.page_offset,
                        },
                        view.len_pages,
                    ))
                    .map_err(|_| KernelError::OutOfSpace)?;
                psets.get(master).ok_or(KernelError::NoSuchEntity)?.link_cow_child(sibling)?;

                let mut child_view = view;
                child_view.pset = sibling;
                child.attach(child_view)?;
            }
            ForkAction::Cow { existing_master: None } => {
                let master = view.pset;

                let parent_cow = psets
                    .insert(Pset::new(
                        Kind::Cow {
                            master,
                            offset: view.page_offset,
                        },
                        view.len_pages,
                    ))
                    .map_err(|_| KernelError::OutOfSpace)?;
                let child_cow = psets
                    .insert(Pset::new(
                        Kind::Cow {
                            master,
                            offset: view.page_offset,
                        },
                        view.len_pages,
                    ))
                    .map_err(|_| KernelError::OutOfSpace)?;

                let master_pset = psets.get(master).ok_or(KernelError::NoSuchEntity)?;
                master_pset.link_cow_child(parent_cow)?;
                master_pset.link_cow_child(child_cow)?;

                parent.repoint(id, parent_cow);

                let mut child_view = view;
                child_view.pset = child_cow;
                child.attach(child_view)?;
            }
        }
    }

    Ok(child)
}

/// *exec*'s vas half (spec §4.8, grounded on `discard_vas`/`add_minstack`
/// in the original's `exec.c`): tear down every pview except a `PROT_MMAP`
/// mapping over a pset still marked [`crate::mm::pset::PsetFlags::SHARED`],
/// then attach the new binary's `segments` and a fresh ZFOD stack pview at
/// `stack_pages` pages below the vas's stack top. A discarded pset that's
/// still acting as a COW master for some other live vas is left resident
/// (only detached here, never removed); any other discarded pset is
/// `drop_ref`'d first and only actually freed once that hits zero, since a
/// pset `fork_vas`'s `Share` branch bumped is still reachable from another
/// vas. Resetting the surviving thread's user registers to the new entry
/// point happens above this, in the trap-return path.
pub fn exec_vas(
    vas: &mut Vas<()>,
    psets: &mut crate::mm::PsetTable,
    segments: &[Pview],
    stack_pset: PsetHandle,
    stack_pages: usize,
) -> Result<()> {
    let snapshot: [Option<(PviewId, Pview)>; MAX_PVIEWS] =
        core::array::from_fn(|i| vas.pviews[i].map(|v| (PviewId(i as u8), v)));

    for (id, view) in snapshot.into_iter().flatten() {
        let keep = view.flags.contains(crate::mm::pview::PviewFlags::SHARED_MMAP)
            && psets.get(view.pset).map(|p| p.is_shared()).unwrap_or(false);
        if keep {
            continue;
        }
        vas.detach(id);

        let Some(pset) = psets.get(view.pset) else { continue };
        if pset.cow_children().count() > 0 {
            continue;
        }
        let doomed = if pset.refs() > 0 { pset.drop_ref() } else { true };
        if !doomed {
            continue;
        }
        if let Some((master, _)) = pset.kind().as_cow() {
            if let Some(m) = psets.get(master) {
                m.unlink_cow_child(view.pset);
            }
        }
        psets.remove(view.pset);
    }

    for seg in segments {
        vas.attach(*seg)?;
    }

    let stack_vaddr = vas.stack_top.saturating_sub(stack_pages * PAGE_SIZE);
    vas.attach(Pview::new(
        stack_pset,
        stack_vaddr,
        0,
        stack_pages,
        machine::hat::Protection::USER_RW,
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use machine::hat::Protection;

    fn dummy_pset() -> PsetHandle {
        let mut a: crate::arena::Arena<(), 1> = crate::arena::Arena::new();
        a.insert(()).unwrap()
    }

    #[test_case]
    fn attach_rejects_overlap() {
        let mut vas: Vas<()> = Vas::new((), 0x8000_0000);
        let p = dummy_pset();
        vas.attach(Pview::new(p, 0x1000, 0, 4, Protection::USER_RW))
            .unwrap();
        let err = vas
            .attach(Pview::new(p, 0x2000, 0, 4, Protection::USER_RW))
            .unwrap_err();
        assert_eq!(err, KernelError::AlreadyExists);
    }

    #[test_case]
    fn find_locates_containing_view() {
        let mut vas: Vas<()> = Vas::new((), 0x8000_0000);
        let p = dummy_pset();
        let id = vas
            .attach(Pview::new(p, 0x1000, 0, 4, Protection::USER_RW))
            .unwrap();
        let (found, _) = vas.find(0x1000 + PAGE_SIZE).unwrap();
        assert_eq!(found, id);
        assert!(vas.find(0x9000).is_none());
    }

    #[test_case]
    fn stack_growth_window_is_below_top_and_unmapped() {
        let vas: Vas<()> = Vas::new((), 0x8000_0000);
        assert!(vas.in_stack_growth_window(0x8000_0000 - PAGE_SIZE));
        assert!(!vas.in_stack_growth_window(0x8000_0000));
    }

    #[test_case]
    fn detach_frees_the_slot_for_reuse() {
        let mut vas: Vas<()> = Vas::new((), 0x8000_0000);
        let p = dummy_pset();
        let id = vas
            .attach(Pview::new(p, 0x1000, 0, 4, Protection::USER_RW))
            .unwrap();
        vas.detach(id);
        assert_eq!(vas.count(), 0);
        vas.attach(Pview::new(p, 0x1000, 0, 4, Protection::USER_RW))
            .unwrap();
    }

    #[test_case]
    fn fork_vas_shares_read_only_views_directly() {
        use crate::mm::pset::{Kind, Pset};

        let mut psets: crate::mm::PsetTable = crate::arena::Arena::new();
        let text = psets.insert(Pset::new(Kind::Zfod, 4)).unwrap();
        let mut parent: Vas<()> = Vas::new((), 0x8000_0000);
        parent
            .attach(Pview::new(text, 0x1000, 0, 4, Protection::USER_RO))
            .unwrap();

        let child = fork_vas(&mut parent, &mut psets).unwrap();

        assert_eq!(child.count(), 1);
        let (_, view) = child.find(0x1000).unwrap();
        assert_eq!(view.pset, text);
        assert_eq!(psets.get(text).unwrap().refs(), 1);
    }

    #[test_case]
    fn fork_vas_freezes_a_private_pset_into_a_shared_cow_master() {
        use crate::mm::pset::{Kind, Pset};

        let mut psets: crate::mm::PsetTable = crate::arena::Arena::new();
        let data = psets.insert(Pset::new(Kind::Zfod, 4)).unwrap();
        let mut parent: Vas<()> = Vas::new((), 0x8000_0000);
        let parent_id = parent
            .attach(Pview::new(data, 0x1000, 0, 4, Protection::USER_RW))
            .unwrap();

        let child = fork_vas(&mut parent, &mut psets).unwrap();

        let parent_pset = parent.pview(parent_id).unwrap().pset;
        assert_ne!(parent_pset, data, "parent's own view should move off the frozen master");

        let (_, child_view) = child.find(0x1000).unwrap();
        assert_ne!(child_view.pset, data);
        assert_ne!(child_view.pset, parent_pset);

        let (parent_master, _) = psets.get(parent_pset).unwrap().kind().as_cow().unwrap();
        let (child_master, _) = psets.get(child_view.pset).unwrap().kind().as_cow().unwrap();
        assert_eq!(parent_master, data);
        assert_eq!(child_master, data);
        assert_eq!(psets.get(data).unwrap().cow_children().count(), 2);
    }

    #[test_case]
    fn fork_vas_gives_a_second_fork_a_sibling_of_the_same_master() {
        use crate::mm::pset::{Kind, Pset};

        let mut psets: crate::mm::PsetTable = crate::arena::Arena::new();
        let data = psets.insert(Pset::new(Kind::Zfod, 4)).unwrap();
        let mut parent: Vas<()> = Vas::new((), 0x8000_0000);
        parent
            .attach(Pview::new(data, 0x1000, 0, 4, Protection::USER_RW))
            .unwrap();

        let mut child_a = fork_vas(&mut parent, &mut psets).unwrap();
        let _child_b = fork_vas(&mut child_a, &mut psets).unwrap();

        // Three COW psets now share `data` as master: the original parent's
        // repointed view, child_a's, and child_b's — never a COW-of-COW.
        assert_eq!(psets.get(data).unwrap().cow_children().count(), 3);
        for handle in psets.get(data).unwrap().cow_children() {
            let (master, _) = psets.get(handle).unwrap().kind().as_cow().unwrap();
            assert_eq!(master, data);
        }
    }

    #[test_case]
    fn exec_vas_discards_private_mappings_and_attaches_the_new_binary() {
        use crate::mm::pset::{Kind, Pset};

        let mut psets: crate::mm::PsetTable = crate::arena::Arena::new();
        let old_text = psets.insert(Pset::new(Kind::Zfod, 4)).unwrap();
        let mut vas: Vas<()> = Vas::new((), 0x8000_0000);
        vas.attach(Pview::new(old_text, 0x1000, 0, 4, Protection::USER_RO))
            .unwrap();

        let new_text = psets.insert(Pset::new(Kind::Zfod, 2)).unwrap();
        let new_stack = psets.insert(Pset::new(Kind::Zfod, 1)).unwrap();
        let segments = [Pview::new(new_text, 0x4000, 0, 2, Protection::USER_RO)];

        exec_vas(&mut vas, &mut psets, &segments, new_stack, 1).unwrap();

        assert!(vas.find(0x1000).is_none(), "old text mapping must be gone");
        assert!(psets.get(old_text).is_none(), "unshared pset should be freed");
        let (_, text_view) = vas.find(0x4000).unwrap();
        assert_eq!(text_view.pset, new_text);
        let (_, stack_view) = vas.find(vas.stack_top - PAGE_SIZE).unwrap();
        assert_eq!(stack_view.pset, new_stack);
    }

    #[test_case]
    fn exec_vas_keeps_a_shared_mmap_view_across_exec() {
        use crate::mm::pset::{Kind, Pset};

        let mut psets: crate::mm::PsetTable = crate::arena::Arena::new();
        let shm = psets.insert(Pset::new(Kind::Zfod, 1)).unwrap();
        psets.get(shm).unwrap().mark_shared();

        let mut vas: Vas<()> = Vas::new((), 0x8000_0000);
        let mut shared_view = Pview::new(shm, 0x2000, 0, 1, Protection::USER_RW);
        shared_view.flags.insert(crate::mm::pview::PviewFlags::SHARED_MMAP);
        vas.attach(shared_view).unwrap();

        let new_stack = psets.insert(Pset::new(Kind::Zfod, 1)).unwrap();
        exec_vas(&mut vas, &mut psets, &[], new_stack, 1).unwrap();

        let (_, kept) = vas.find(0x2000).unwrap();
        assert_eq!(kept.pset, shm);
        assert!(psets.get(shm).is_some());
    }

    #[test_case]
    fn exec_vas_leaves_a_still_shared_cow_master_resident() {
        use crate::mm::pset::{Kind, Pset};

        let mut psets: crate::mm::PsetTable = crate::arena::Arena::new();
        let data = psets.insert(Pset::new(Kind::Zfod, 4)).unwrap();
        let cow_child = psets
            .insert(Pset::new(Kind::Cow { master: data, offset: 0 }, 4))
            .unwrap();
        psets.get(data).unwrap().link_cow_child(cow_child).unwrap();

        let mut vas: Vas<()> = Vas::new((), 0x8000_0000);
        vas.attach(Pview::new(data, 0x1000, 0, 4, Protection::USER_RW))
            .unwrap();

        let new_stack = psets.insert(Pset::new(Kind::Zfod, 1)).unwrap();
        exec_vas(&mut vas, &mut psets, &[], new_stack, 1).unwrap();

        // `cow_child` elsewhere still shadows `data`; exec must not free it.
        assert!(psets.get(data).is_some());
    }
}
