/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Fault resolution (spec §4.4): locate the pview, lock its slot, fill it
//! from whatever backs the pset, upgrade a COW slot on a write fault, wire
//! the mapping into the slot's attach list and unlock. Installing the HAT
//! translation itself is left to the caller, which is the only layer that
//! knows the architecture's page-table format.

use crate::{
    errors::{KernelError, Result},
    mm::{
        pset::{Kind, Pset, SlotFlags},
        pview::PviewId,
        vas::{FaultError, Vas},
        PsetHandle, PsetTable, VasHandle, PAGE_SIZE, PSET_MAX_PAGES,
    },
};
use libmemory::{page_alloc::PageAllocator, perpage::Pfn};
use machine::semaphore::Waiter;

/// Raw byte view of a physical frame through the kernel's identity mapping,
/// the same assumption `ipc::segment::frame_bytes` and
/// `libmemory::hat::table::TableFrame` rely on.
///
/// # Safety
/// `pfn` must name a frame this kernel owns and that no other context is
/// concurrently touching without the owning slot's lock held.
unsafe fn frame_bytes(pfn: Pfn) -> &'static mut [u8; PAGE_SIZE] {
    &mut *((pfn * PAGE_SIZE) as *mut [u8; PAGE_SIZE])
}

/// What came of trying to fill a slot (spec §4.3 *fillslot*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// Slot now has a frame backing it.
    Filled(Pfn),
    /// Already filled; nothing to do.
    AlreadyValid(Pfn),
    /// `File`-backed slot: caller must drive a read through the portref at
    /// this offset and install the result with [`writeslot`].
    NeedsFsRead {
        portref: crate::ipc::portref::PortrefHandle,
        file_offset: usize,
    },
    /// `Cow`-backed slot whose master hasn't been filled yet; caller must
    /// fault the master pset at this index first, then retry.
    NeedsMasterFill { master: PsetHandle, master_index: usize },
    /// No frame available right now; caller should retry once one frees up
    /// (this kernel has no concrete parkable `Waiter` wired into the fault
    /// path yet, so allocation here never blocks).
    OutOfMemory,
}

/// Fill `pset`'s slot `idx` if it isn't already valid (spec §4.3
/// *fillslot*). Caller must hold the slot's lock. `owner` is this pset's
/// own arena handle, recorded on the frame's `PerPage` entry (via
/// `set_owner`) whenever a fresh frame is handed out here, so
/// `mm::pageout`'s scan loop can resolve a frame back to the slot that
/// owns it.
pub fn fillslot(
    pset: &Pset<PSET_MAX_PAGES>,
    owner: PsetHandle,
    idx: usize,
    allocator: &PageAllocator<impl Waiter>,
    psets: &PsetTable,
) -> FillOutcome {
    let slot = pset.slot(idx);
    if let Some(pfn) = slot.pfn() {
        return FillOutcome::AlreadyValid(pfn);
    }

    match pset.kind() {
        Kind::Uninit => FillOutcome::OutOfMemory,
        Kind::Zfod => {
            let Some(pfn) = allocator.try_alloc_page() else {
                return FillOutcome::OutOfMemory;
            };
            // SAFETY: `try_alloc_page` just handed us exclusive ownership
            // of this frame.
            unsafe { frame_bytes(pfn).fill(0) };
            slot.set_frame(pfn);
            allocator.perpage(pfn).set_owner(owner.index(), idx);
            FillOutcome::Filled(pfn)
        }
        Kind::Physmem { base_pfn } => {
            let pfn = base_pfn + idx;
            slot.set_frame(pfn);
            FillOutcome::Filled(pfn)
        }
        Kind::File { portref, file_offset } => FillOutcome::NeedsFsRead {
            portref: *portref,
            file_offset: file_offset + idx * PAGE_SIZE,
        },
        Kind::Cow { master, offset } => {
            let master_index = offset + idx;
            let Some(master_pset) = psets.get(*master) else {
                return FillOutcome::OutOfMemory;
            };
            let Some(master_pfn) = master_pset.slot(master_index).pfn() else {
                return FillOutcome::NeedsMasterFill {
                    master: *master,
                    master_index,
                };
            };
            slot.set_frame(master_pfn);
            slot.insert_flags(SlotFlags::COW);
            FillOutcome::Filled(master_pfn)
        }
    }
}

/// Install a read result into a `File`-backed slot once the read completes
/// (spec §4.3 *writeslot*, the async-fault continuation of
/// [`FillOutcome::NeedsFsRead`]). Caller still holds the slot's lock.
pub fn writeslot_from_read(pset: &Pset<PSET_MAX_PAGES>, idx: usize, data: &[u8]) -> Pfn {
    let slot = pset.slot(idx);
    debug_assert!(data.len() <= PAGE_SIZE);
    let pfn = slot.pfn().expect("writeslot_from_read: slot has no frame assigned");
    // SAFETY: the slot's frame was allocated by fillslot and is locked.
    unsafe {
        let dst = frame_bytes(pfn);
        dst[..data.len()].copy_from_slice(data);
    }
    slot.insert_flags(SlotFlags::VALID | SlotFlags::MODIFIED);
    pfn
}

/// Upgrade a write-faulted COW slot to a private copy (spec §4.4 "COW
/// upgrade"): allocate a fresh frame, copy the shared master's bytes into
/// it, and repoint the slot there. A no-op if the slot isn't (or is no
/// longer) a COW reference.
pub fn upgrade_cow(
    pset: &Pset<PSET_MAX_PAGES>,
    owner: PsetHandle,
    idx: usize,
    allocator: &PageAllocator<impl Waiter>,
) -> Result<Pfn> {
    let slot = pset.slot(idx);
    if !slot.flags().contains(SlotFlags::COW) {
        return Ok(slot.pfn().expect("upgrade_cow: non-COW slot with no frame"));
    }
    let shared_pfn = slot.pfn().expect("upgrade_cow: COW slot with no frame");
    let Some(new_pfn) = allocator.try_alloc_page() else {
        return Err(KernelError::OutOfMemory);
    };
    // SAFETY: `shared_pfn` is the master's frame, read-only to this slot
    // until this copy completes; `new_pfn` was just handed to us exclusively.
    unsafe {
        let src = frame_bytes(shared_pfn);
        let dst = frame_bytes(new_pfn);
        dst.copy_from_slice(&src[..]);
    }
    slot.set_frame(new_pfn);
    slot.remove_flags(SlotFlags::COW);
    slot.insert_flags(SlotFlags::MODIFIED);
    allocator.perpage(new_pfn).set_owner(owner.index(), idx);
    Ok(new_pfn)
}

/// Result of a full fault-resolution pass (spec §4.4): either a frame ready
/// for the caller to map into the HAT, or a reason resolution stalled that
/// the caller must act on before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// `addr` is ready to map; install the HAT translation for this frame.
    Ready { pview: PviewId, pfn: Pfn },
    NeedsFsRead {
        portref: crate::ipc::portref::PortrefHandle,
        file_offset: usize,
    },
    NeedsMasterFill { master: PsetHandle, master_index: usize },
    OutOfMemory,
    /// The slot is locked by someone else; retry.
    Contended,
}

/// *vas_fault* (spec §4.4): locate the pview containing `addr`, lock its
/// underlying slot, fill it, upgrade it on a write fault if it's COW,
/// record the mapping in the slot's attach list, and unlock. Does not
/// touch the HAT; the caller maps `pfn` at `addr` itself.
pub fn resolve_fault<H>(
    vas: &Vas<H>,
    vas_handle: VasHandle,
    psets: &PsetTable,
    allocator: &PageAllocator<impl Waiter>,
    addr: usize,
    is_write: bool,
) -> core::result::Result<Resolution, FaultError> {
    let (pview_id, pview) = vas.find(addr).ok_or(FaultError::NoMapping)?;
    if is_write && !pview.prot.writable {
        return Err(FaultError::ProtectionViolation);
    }

    let Some(pset) = psets.get(pview.pset) else {
        return Err(FaultError::NoMapping);
    };
    let idx = pview.slot_index(addr);
    let slot = pset.slot(idx);
    if !slot.try_lock() {
        slot.mark_want();
        return Ok(Resolution::Contended);
    }

    let pfn = if pset.needs_fill(idx) {
        match fillslot(pset, pview.pset, idx, allocator, psets) {
            FillOutcome::Filled(pfn) | FillOutcome::AlreadyValid(pfn) => pfn,
            FillOutcome::NeedsFsRead { portref, file_offset } => {
                slot.unlock();
                return Ok(Resolution::NeedsFsRead { portref, file_offset });
            }
            FillOutcome::NeedsMasterFill { master, master_index } => {
                slot.unlock();
                return Ok(Resolution::NeedsMasterFill { master, master_index });
            }
            FillOutcome::OutOfMemory => {
                slot.unlock();
                return Ok(Resolution::OutOfMemory);
            }
        }
    } else {
        slot.pfn().expect("needs_fill false but slot has no frame")
    };

    let pfn = if is_write && slot.flags().contains(SlotFlags::COW) {
        match upgrade_cow(pset, pview.pset, idx, allocator) {
            Ok(pfn) => pfn,
            Err(_) => {
                slot.unlock();
                return Ok(Resolution::OutOfMemory);
            }
        }
    } else {
        pfn
    };

    let _ = slot.add_attach(vas.attach_entry(vas_handle, pview_id));
    slot.unlock();
    Ok(Resolution::Ready { pview: pview_id, pfn })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::pview::Pview;
    use machine::hat::Protection;

    #[derive(Clone, Copy, PartialEq, Eq)]
    struct NeverBlocks;

    unsafe impl Waiter for NeverBlocks {
        fn next(self) -> Option<Self> {
            None
        }
        fn set_next(self, _next: Option<Self>) {}
        fn park(self) {
            panic!("fault resolution never blocks a thread yet");
        }
        fn wake(self) {}
        fn was_interrupted(self) -> bool {
            false
        }
    }

    fn dummy_vas_handle() -> VasHandle {
        let mut a: crate::arena::Arena<(), 1> = crate::arena::Arena::new();
        a.insert(()).unwrap()
    }

    fn dummy_pset_handle() -> PsetHandle {
        let mut a: crate::arena::Arena<(), 1> = crate::arena::Arena::new();
        a.insert(()).unwrap()
    }

    #[test_case]
    fn fillslot_zeroes_a_zfod_page() {
        let allocator: PageAllocator<NeverBlocks> = PageAllocator::new();
        allocator.init(0, 4).unwrap();
        let psets: PsetTable = crate::arena::Arena::new();
        let pset: Pset<PSET_MAX_PAGES> = Pset::new(Kind::Zfod, 1);
        match fillslot(&pset, dummy_pset_handle(), 0, &allocator, &psets) {
            FillOutcome::Filled(pfn) => assert!(pfn < 4),
            other => panic!("expected Filled, got {other:?}"),
        }
        assert!(pset.slot(0).is_valid());
    }

    #[test_case]
    fn fillslot_reports_out_of_memory_when_exhausted() {
        let allocator: PageAllocator<NeverBlocks> = PageAllocator::new();
        allocator.init(0, 0).unwrap();
        let psets: PsetTable = crate::arena::Arena::new();
        let pset: Pset<PSET_MAX_PAGES> = Pset::new(Kind::Zfod, 1);
        assert_eq!(
            fillslot(&pset, dummy_pset_handle(), 0, &allocator, &psets),
            FillOutcome::OutOfMemory
        );
    }

    #[test_case]
    fn fillslot_reports_needs_fs_read_for_file_backed_pages() {
        let allocator: PageAllocator<NeverBlocks> = PageAllocator::new();
        allocator.init(0, 4).unwrap();
        let psets: PsetTable = crate::arena::Arena::new();
        let mut portref_arena: crate::arena::Arena<(), 1> = crate::arena::Arena::new();
        let portref = portref_arena.insert(()).unwrap();
        let pset: Pset<PSET_MAX_PAGES> = Pset::new(
            Kind::File {
                portref,
                file_offset: 0,
            },
            1,
        );
        match fillslot(&pset, dummy_pset_handle(), 0, &allocator, &psets) {
            FillOutcome::NeedsFsRead { file_offset, .. } => assert_eq!(file_offset, 0),
            other => panic!("expected NeedsFsRead, got {other:?}"),
        }
    }

    #[test_case]
    fn fillslot_shares_the_masters_frame_for_cow() {
        let allocator: PageAllocator<NeverBlocks> = PageAllocator::new();
        allocator.init(0, 4).unwrap();
        let mut psets: PsetTable = crate::arena::Arena::new();
        let master: Pset<PSET_MAX_PAGES> = Pset::new(Kind::Zfod, 1);
        let master_pfn = match fillslot(&master, dummy_pset_handle(), 0, &allocator, &psets) {
            FillOutcome::Filled(pfn) => pfn,
            other => panic!("expected Filled, got {other:?}"),
        };
        let master_handle = psets.insert(master).unwrap();

        let child: Pset<PSET_MAX_PAGES> = Pset::new(
            Kind::Cow {
                master: master_handle,
                offset: 0,
            },
            1,
        );
        match fillslot(&child, dummy_pset_handle(), 0, &allocator, &psets) {
            FillOutcome::Filled(pfn) => assert_eq!(pfn, master_pfn),
            other => panic!("expected Filled, got {other:?}"),
        }
        assert!(child.slot(0).flags().contains(SlotFlags::COW));
    }

    #[test_case]
    fn fillslot_asks_for_the_master_when_it_isnt_filled_yet() {
        let allocator: PageAllocator<NeverBlocks> = PageAllocator::new();
        allocator.init(0, 4).unwrap();
        let mut psets: PsetTable = crate::arena::Arena::new();
        let master: Pset<PSET_MAX_PAGES> = Pset::new(Kind::Zfod, 1);
        let master_handle = psets.insert(master).unwrap();
        let child: Pset<PSET_MAX_PAGES> = Pset::new(
            Kind::Cow {
                master: master_handle,
                offset: 0,
            },
            1,
        );
        assert_eq!(
            fillslot(&child, dummy_pset_handle(), 0, &allocator, &psets),
            FillOutcome::NeedsMasterFill {
                master: master_handle,
                master_index: 0,
            }
        );
    }

    #[test_case]
    fn upgrade_cow_copies_into_a_fresh_frame() {
        let allocator: PageAllocator<NeverBlocks> = PageAllocator::new();
        allocator.init(0, 4).unwrap();
        let psets: PsetTable = crate::arena::Arena::new();
        let master: Pset<PSET_MAX_PAGES> = Pset::new(Kind::Zfod, 1);
        let owner = dummy_pset_handle();
        let master_pfn = match fillslot(&master, owner, 0, &allocator, &psets) {
            FillOutcome::Filled(pfn) => pfn,
            other => panic!("expected Filled, got {other:?}"),
        };
        master.slot(0).insert_flags(SlotFlags::COW);
        let new_pfn = upgrade_cow(&master, owner, 0, &allocator).unwrap();
        assert_ne!(new_pfn, master_pfn);
        assert!(!master.slot(0).flags().contains(SlotFlags::COW));
    }

    #[test_case]
    fn fillslot_records_the_owning_pset_on_the_frame() {
        let allocator: PageAllocator<NeverBlocks> = PageAllocator::new();
        allocator.init(0, 4).unwrap();
        let psets: PsetTable = crate::arena::Arena::new();
        let pset: Pset<PSET_MAX_PAGES> = Pset::new(Kind::Zfod, 1);
        let owner = dummy_pset_handle();
        let pfn = match fillslot(&pset, owner, 0, &allocator, &psets) {
            FillOutcome::Filled(pfn) => pfn,
            other => panic!("expected Filled, got {other:?}"),
        };
        assert_eq!(allocator.perpage(pfn).owner(), Some((owner.index(), 0)));
    }

    #[test_case]
    fn resolve_fault_reports_no_mapping_outside_every_pview() {
        let vas: Vas<()> = Vas::new((), 0x8000_0000);
        let psets: PsetTable = crate::arena::Arena::new();
        let allocator: PageAllocator<NeverBlocks> = PageAllocator::new();
        allocator.init(0, 4).unwrap();
        let err = resolve_fault(&vas, dummy_vas_handle(), &psets, &allocator, 0x1000, false)
            .unwrap_err();
        assert_eq!(err, FaultError::NoMapping);
    }

    #[test_case]
    fn resolve_fault_fills_and_returns_a_frame() {
        let mut vas: Vas<()> = Vas::new((), 0x8000_0000);
        let mut psets: PsetTable = crate::arena::Arena::new();
        let pset: Pset<PSET_MAX_PAGES> = Pset::new(Kind::Zfod, 4);
        let pset_handle = psets.insert(pset).unwrap();
        let pview_id = vas
            .attach(Pview::new(pset_handle, 0x1000, 0, 4, Protection::USER_RW))
            .unwrap();
        let allocator: PageAllocator<NeverBlocks> = PageAllocator::new();
        allocator.init(0, 4).unwrap();

        let res = resolve_fault(&vas, dummy_vas_handle(), &psets, &allocator, 0x1000, false)
            .unwrap();
        match res {
            Resolution::Ready { pview, .. } => assert_eq!(pview, pview_id),
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test_case]
    fn resolve_fault_rejects_a_write_to_a_read_only_view() {
        let mut vas: Vas<()> = Vas::new((), 0x8000_0000);
        let mut psets: PsetTable = crate::arena::Arena::new();
        let pset: Pset<PSET_MAX_PAGES> = Pset::new(Kind::Zfod, 4);
        let pset_handle = psets.insert(pset).unwrap();
        vas.attach(Pview::new(pset_handle, 0x1000, 0, 4, Protection::USER_RO))
            .unwrap();
        let allocator: PageAllocator<NeverBlocks> = PageAllocator::new();
        allocator.init(0, 4).unwrap();

        let err = resolve_fault(&vas, dummy_vas_handle(), &psets, &allocator, 0x1000, true)
            .unwrap_err();
        assert_eq!(err, FaultError::ProtectionViolation);
    }
}
