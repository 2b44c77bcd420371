/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Two-handed clock pageout daemon (spec §4.5). The forward hand looks for
//! clean pages to steal outright; the back hand, offset by `SPREAD` frames,
//! looks for pages to either steal (if untouched) or push to swap (if
//! dirty). Both hands only ever take conditional locks, so the daemon can
//! never deadlock against an in-progress fault or a concurrent slot holder
//! — it just skips the page and moves on.

use crate::mm::{pset::SlotFlags, PsetTable};
use libmemory::{
    page_alloc::PageAllocator,
    perpage::{PageFlags, Pfn},
};
use machine::semaphore::Waiter;

/// Fractions of total memory at which the daemon changes behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trouble {
    /// Free memory is comfortably above `DESFREE`; the daemon idles.
    None,
    /// Below `DESFREE` (1/8): start stealing clean pages.
    DesperateForClean,
    /// Below `MINFREE` (1/16): also start pushing dirty pages to swap.
    DesperateForAny,
}

/// `DESFREE`, `MINFREE`, `SPREAD` as memory fractions (spec §4.5), applied
/// to a total frame count to get a threshold frame count.
pub const DESFREE_DENOM: usize = 8;
pub const MINFREE_DENOM: usize = 16;
pub const SPREAD_DENOM: usize = 8;

pub fn trouble_level(total_frames: usize, free_frames: usize) -> Trouble {
    if free_frames < total_frames / MINFREE_DENOM {
        Trouble::DesperateForAny
    } else if free_frames < total_frames / DESFREE_DENOM {
        Trouble::DesperateForClean
    } else {
        Trouble::None
    }
}

/// How many pages each hand scans on one wakeup, scaled by how bad things
/// are. The exact counts are a tuning knob, not a correctness property; the
/// original's own comment calls them "the usual hand-waving".
pub fn scan_count(trouble: Trouble) -> usize {
    match trouble {
        Trouble::None => 0,
        Trouble::DesperateForClean => 32,
        Trouble::DesperateForAny => 128,
    }
}

/// The two-handed clock's position over the frame table.
pub struct Clock {
    total_frames: usize,
    forward: usize,
    back: usize,
}

impl Clock {
    pub fn new(total_frames: usize) -> Self {
        let spread = (total_frames / SPREAD_DENOM).max(1);
        Self {
            total_frames,
            forward: 0,
            back: total_frames.saturating_sub(spread) % total_frames.max(1),
        }
    }

    fn advance(pos: &mut usize, total: usize) -> usize {
        let here = *pos;
        *pos = if total == 0 { 0 } else { (*pos + 1) % total };
        here
    }

    pub fn next_forward(&mut self) -> usize {
        Self::advance(&mut self.forward, self.total_frames)
    }

    pub fn next_back(&mut self) -> usize {
        Self::advance(&mut self.back, self.total_frames)
    }
}

/// Outcome of inspecting one page under the per-hand steps in spec §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Not in use, bad, wired or system-reserved: nothing to do.
    Skip,
    /// Some lock in the pset/page/slot chain was contended: try again
    /// next pass rather than block the daemon.
    Contended,
    /// Referenced or modified since last pass: clear the bit(s) and leave
    /// it resident for now.
    ClearedBits,
    /// Clean and untouched: reclaimed outright.
    Stolen,
    /// Dirty: async writeback to swap started; the slot stays locked until
    /// the write completes (`writeslot`'s `iodone` unlocks it).
    WritebackStarted,
}

/// *steal1* (forward hand): only reclaims when trouble is at its worst,
/// and always clears the referenced bit first so a page touched again
/// before the back hand arrives is spared.
pub fn steal1(trouble: Trouble, referenced: bool) -> Disposition {
    if !matches!(trouble, Trouble::DesperateForAny) {
        return Disposition::ClearedBits;
    }
    if referenced {
        Disposition::ClearedBits
    } else {
        Disposition::Stolen
    }
}

/// *steal2* (back hand): reclaims clean-and-untouched pages once trouble
/// is at least mild; pushes dirty pages to swap instead of discarding them.
pub fn steal2(trouble: Trouble, referenced: bool, modified: bool, swap_configured: bool) -> Disposition {
    if matches!(trouble, Trouble::None) {
        return Disposition::Skip;
    }
    if referenced {
        return Disposition::ClearedBits;
    }
    if modified {
        if swap_configured {
            Disposition::WritebackStarted
        } else {
            Disposition::Skip
        }
    } else {
        Disposition::Stolen
    }
}

/// Resolve one frame back to the pset/slot that owns it (page lock, then
/// pset slot lock, spec §4.5's lock order), apply `decide` to its access
/// bits, and act on the outcome: `Stolen` clears the slot's frame (and any
/// cow-children still pointing at the same frame) and returns it to
/// `allocator`; `WritebackStarted` leaves the slot locked for whatever
/// completes the write; anything else unlocks and moves on.
fn visit<W: Waiter>(
    pfn: Pfn,
    allocator: &PageAllocator<W>,
    psets: &PsetTable,
    decide: impl FnOnce(bool, bool) -> Disposition,
) -> Disposition {
    let page = allocator.perpage(pfn);
    if page.flags().intersects(PageFlags::SYS | PageFlags::BAD) {
        return Disposition::Skip;
    }
    let Some((pset_idx, slot_idx)) = page.owner() else {
        return Disposition::Skip;
    };
    if !page.try_lock() {
        page.set_want();
        return Disposition::Contended;
    }

    let Some(pset) = psets.get_by_index(pset_idx) else {
        page.unlock();
        return Disposition::Skip;
    };
    let slot = pset.slot(slot_idx);
    if !slot.try_lock() {
        slot.mark_want();
        page.unlock();
        return Disposition::Contended;
    }

    let (referenced, modified) = page.take_access();
    let disposition = decide(referenced, modified);
    match disposition {
        Disposition::Stolen => {
            slot.clear_frame();
            slot.remove_flags(SlotFlags::REFERENCED | SlotFlags::MODIFIED | SlotFlags::COW);
            for child_handle in pset.cow_children() {
                let Some(child_pset) = psets.get(child_handle) else { continue };
                let Some((_, offset)) = child_pset.kind().as_cow() else { continue };
                if slot_idx < offset {
                    continue;
                }
                let child_idx = slot_idx - offset;
                if child_idx >= child_pset.len() {
                    continue;
                }
                let child_slot = child_pset.slot(child_idx);
                if child_slot.pfn() == Some(pfn) {
                    child_slot.clear_frame();
                    child_slot.remove_flags(SlotFlags::COW);
                }
            }
            slot.unlock();
            page.unlock();
            allocator.free_page(pfn);
        }
        Disposition::WritebackStarted => {
            // The slot stays locked; whoever drives the async write to swap
            // (not wired up yet, see DESIGN.md) unlocks it via `writeslot`
            // once the write completes.
            page.unlock();
        }
        Disposition::ClearedBits | Disposition::Skip => {
            slot.unlock();
            page.unlock();
        }
        Disposition::Contended => unreachable!("decide never returns Contended"),
    }
    disposition
}

/// One daemon wakeup: scan `scan_count(trouble)` frames under each hand.
/// `swap_configured` gates the back hand's willingness to push dirty pages
/// to swap instead of skipping them (no swap device is wired up yet).
pub fn run_pass<W: Waiter>(clock: &mut Clock, allocator: &PageAllocator<W>, psets: &PsetTable, swap_configured: bool) {
    let trouble = trouble_level(allocator.total_frames(), allocator.free_frames());
    let count = scan_count(trouble);

    for _ in 0..count {
        let pfn = clock.next_forward();
        visit(pfn, allocator, psets, |referenced, _modified| steal1(trouble, referenced));
    }
    for _ in 0..count {
        let pfn = clock.next_back();
        visit(pfn, allocator, psets, |referenced, modified| {
            steal2(trouble, referenced, modified, swap_configured)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn trouble_escalates_as_free_memory_drops() {
        assert_eq!(trouble_level(1024, 900), Trouble::None);
        assert_eq!(trouble_level(1024, 100), Trouble::DesperateForClean);
        assert_eq!(trouble_level(1024, 10), Trouble::DesperateForAny);
    }

    #[test_case]
    fn clock_hands_wrap_around() {
        let mut c = Clock::new(4);
        let first = c.next_forward();
        for _ in 0..3 {
            c.next_forward();
        }
        assert_eq!(c.next_forward(), first);
    }

    #[test_case]
    fn forward_hand_only_steals_when_desperate() {
        assert_eq!(steal1(Trouble::DesperateForClean, false), Disposition::ClearedBits);
        assert_eq!(steal1(Trouble::DesperateForAny, false), Disposition::Stolen);
        assert_eq!(steal1(Trouble::DesperateForAny, true), Disposition::ClearedBits);
    }

    #[test_case]
    fn back_hand_pushes_dirty_pages_to_swap() {
        assert_eq!(
            steal2(Trouble::DesperateForClean, false, true, true),
            Disposition::WritebackStarted
        );
        assert_eq!(steal2(Trouble::DesperateForClean, false, true, false), Disposition::Skip);
        assert_eq!(steal2(Trouble::DesperateForClean, false, false, true), Disposition::Stolen);
    }

    #[derive(Clone, Copy, PartialEq, Eq)]
    struct NeverBlocks;

    unsafe impl Waiter for NeverBlocks {
        fn next(self) -> Option<Self> {
            None
        }
        fn set_next(self, _next: Option<Self>) {}
        fn park(self) {
            panic!("pageout never blocks a thread")
        }
        fn wake(self) {}
        fn was_interrupted(self) -> bool {
            false
        }
    }

    #[test_case]
    fn run_pass_steals_a_clean_untouched_frame_once_desperate() {
        use crate::mm::{
            fault::fillslot,
            pset::{Kind, Pset},
            PSET_MAX_PAGES,
        };

        let allocator: PageAllocator<NeverBlocks> = PageAllocator::new();
        allocator.init(0, 16).unwrap();
        let mut psets: PsetTable = crate::arena::Arena::new();
        let pset: Pset<PSET_MAX_PAGES> = Pset::new(Kind::Zfod, 1);
        let handle = psets.insert(pset).unwrap();
        let pfn = match fillslot(psets.get(handle).unwrap(), handle, 0, &allocator, &psets) {
            super::super::fault::FillOutcome::Filled(pfn) => pfn,
            other => panic!("expected Filled, got {other:?}"),
        };
        // Drain the rest of the free list so trouble_level reports
        // DesperateForAny and the forward hand is willing to steal.
        while allocator.try_alloc_page().is_some() {}

        let mut clock = Clock::new(allocator.total_frames());
        // Drive the forward hand directly at the frame under test rather
        // than depending on `Clock`'s starting position.
        let trouble = trouble_level(allocator.total_frames(), allocator.free_frames());
        assert_eq!(trouble, Trouble::DesperateForAny);
        let disposition = visit(pfn, &allocator, &psets, |referenced, _| steal1(trouble, referenced));

        assert_eq!(disposition, Disposition::Stolen);
        assert!(psets.get(handle).unwrap().slot(0).pfn().is_none());
        assert_eq!(allocator.perpage(pfn).owner(), None);
        let _ = clock.next_forward();
    }

    #[test_case]
    fn run_pass_clears_a_cow_childs_frame_when_the_master_is_stolen() {
        use crate::mm::{
            fault::fillslot,
            pset::{Kind, Pset},
            PSET_MAX_PAGES,
        };

        let allocator: PageAllocator<NeverBlocks> = PageAllocator::new();
        allocator.init(0, 16).unwrap();
        let mut psets: PsetTable = crate::arena::Arena::new();
        let master: Pset<PSET_MAX_PAGES> = Pset::new(Kind::Zfod, 1);
        let master_handle = psets.insert(master).unwrap();
        let pfn = match fillslot(psets.get(master_handle).unwrap(), master_handle, 0, &allocator, &psets) {
            super::super::fault::FillOutcome::Filled(pfn) => pfn,
            other => panic!("expected Filled, got {other:?}"),
        };

        let child: Pset<PSET_MAX_PAGES> = Pset::new(
            Kind::Cow {
                master: master_handle,
                offset: 0,
            },
            1,
        );
        let child_handle = psets.insert(child).unwrap();
        match fillslot(psets.get(child_handle).unwrap(), child_handle, 0, &allocator, &psets) {
            super::super::fault::FillOutcome::Filled(child_pfn) => assert_eq!(child_pfn, pfn),
            other => panic!("expected Filled, got {other:?}"),
        }
        psets.get(master_handle).unwrap().link_cow_child(child_handle).unwrap();

        // Drain the rest of the free list so trouble_level reports
        // DesperateForAny and the forward hand is willing to steal.
        while allocator.try_alloc_page().is_some() {}
        let trouble = trouble_level(allocator.total_frames(), allocator.free_frames());
        let disposition = visit(pfn, &allocator, &psets, |referenced, _| steal1(trouble, referenced));

        assert_eq!(disposition, Disposition::Stolen);
        assert!(psets.get(child_handle).unwrap().slot(0).pfn().is_none());
        assert!(!psets
            .get(child_handle)
            .unwrap()
            .slot(0)
            .flags()
            .contains(SlotFlags::COW));
    }
}
