/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Scatter/gather segment: a byte range within a pview, used as message
//! payload (spec §4.6). A segment copies the pview's fields rather than
//! borrowing it, and carries its own reference on the underlying pset so
//! the sender's vas can change shape while the segment is in flight; the
//! reference is dropped when the segment itself is dropped.

use crate::mm::{pset::SlotFlags, PsetHandle, PsetTable, PAGE_SIZE};

/// One scatter/gather entry: the pset it reads from, trimmed to the byte
/// range actually touched.
#[derive(Clone, Copy)]
pub struct Segment {
    pub pset: PsetHandle,
    /// First pset page this segment's range touches.
    pub page_offset: usize,
    /// Byte offset within that first page.
    pub byte_offset: usize,
    /// Total length in bytes, possibly spanning multiple pages.
    pub len: usize,
    /// `true` once `attach_seg` has installed this segment read-only into
    /// a receiver's vas; `detach_seg` must run exactly once before drop.
    pub(crate) attached: bool,
}

impl Segment {
    /// *make_seg* (spec §4.6): build a segment over `[byte_start,
    /// byte_start+len)` of `pview`, already known to fit inside it. Adds a
    /// reference to the pview's pset; callers must pair this with a
    /// `release` when the segment is torn down (`Drop` cannot do it itself
    /// without access to the pset arena).
    pub fn new(pview: &crate::mm::pview::Pview, byte_start: usize, len: usize) -> Self {
        debug_assert!(byte_start + len <= pview.len_pages * crate::mm::PAGE_SIZE);
        let page_offset = pview.page_offset + byte_start / crate::mm::PAGE_SIZE;
        let byte_offset = byte_start % crate::mm::PAGE_SIZE;
        Self {
            pset: pview.pset,
            page_offset,
            byte_offset,
            len,
            attached: false,
        }
    }

    pub fn mark_attached(&mut self) {
        self.attached = true;
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Number of whole-or-partial pages this segment's byte range spans.
    pub fn page_count(&self) -> usize {
        (self.byte_offset + self.len).div_ceil(crate::mm::PAGE_SIZE)
    }
}

/// Copies between a sender's segment list and a receiver's scatter list,
/// obeying both sides' lengths. Returns the total bytes actually
/// transferred. The actual byte copy is left to the caller (it needs the
/// HAT-mapped kernel addresses of both sides' pages); this only computes
/// the transfer plan so the copy loop can't misaccount lengths.
pub fn transfer_plan(send: &[Segment], receive_capacities: &[usize]) -> usize {
    let mut send_iter = send.iter();
    let mut cur = send_iter.next();
    let mut cur_remaining = cur.map(|s| s.len).unwrap_or(0);
    let mut total = 0usize;

    for &cap in receive_capacities {
        let mut remaining_cap = cap;
        while remaining_cap > 0 {
            let Some(_) = cur else { break };
            let take = remaining_cap.min(cur_remaining);
            total += take;
            remaining_cap -= take;
            cur_remaining -= take;
            if cur_remaining == 0 {
                cur = send_iter.next();
                cur_remaining = cur.map(|s| s.len).unwrap_or(0);
            }
        }
    }
    total
}

/// Raw byte view of a physical frame through the kernel's identity mapping
/// of DRAM, the same assumption `libmemory::hat::table::TableFrame` relies
/// on to zero a page-table frame.
///
/// # Safety
/// `pfn` must name a frame this kernel has mapped identity-style and that
/// no other context is concurrently writing without the owning slot's lock
/// held.
unsafe fn frame_bytes(pfn: libmemory::perpage::Pfn) -> &'static mut [u8; PAGE_SIZE] {
    &mut *((pfn * PAGE_SIZE) as *mut [u8; PAGE_SIZE])
}

/// Copy bytes from `send`'s segments into `receive`'s, following the same
/// page-by-page accounting as `transfer_plan` but moving real data between
/// the two sides' resident frames. Every slot touched must already be
/// filled (`mm::fault::fillslot` run ahead of the call, as `msg_send`
/// does); an unfilled slot stops the copy short, same truncation policy as
/// `transfer_plan`. Marks every written receive slot `MODIFIED` for the
/// pageout clock.
pub fn copy_segments(send: &[Segment], receive: &[Segment], psets: &PsetTable) -> usize {
    let mut total = 0usize;
    let mut send_iter = send.iter();
    let mut cur_send = send_iter.next();
    let mut send_page = cur_send.map_or(0, |s| s.page_offset);
    let mut send_off = cur_send.map_or(0, |s| s.byte_offset);
    let mut send_remaining = cur_send.map_or(0, |s| s.len);

    for recv in receive {
        let Some(recv_pset) = psets.get(recv.pset) else { return total };
        let mut recv_page = recv.page_offset;
        let mut recv_off = recv.byte_offset;
        let mut recv_remaining = recv.len;

        while recv_remaining > 0 {
            let Some(send) = cur_send else { return total };
            let Some(send_pset) = psets.get(send.pset) else { return total };
            if send_page >= send_pset.len() || recv_page >= recv_pset.len() {
                return total;
            }
            let Some(send_pfn) = send_pset.slot(send_page).pfn() else { return total };
            let Some(recv_pfn) = recv_pset.slot(recv_page).pfn() else { return total };

            let take = recv_remaining
                .min(send_remaining)
                .min(PAGE_SIZE - send_off)
                .min(PAGE_SIZE - recv_off);
            if take == 0 {
                return total;
            }

            // SAFETY: both frames came from a slot marked valid by fillslot,
            // which only happens after the page allocator hands out a frame
            // this kernel owns.
            unsafe {
                let src = frame_bytes(send_pfn);
                let dst = frame_bytes(recv_pfn);
                dst[recv_off..recv_off + take].copy_from_slice(&src[send_off..send_off + take]);
            }
            recv_pset.slot(recv_page).insert_flags(SlotFlags::MODIFIED);

            total += take;
            send_off += take;
            recv_off += take;
            send_remaining -= take;
            recv_remaining -= take;

            if send_off == PAGE_SIZE {
                send_off = 0;
                send_page += 1;
            }
            if recv_off == PAGE_SIZE {
                recv_off = 0;
                recv_page += 1;
            }
            if send_remaining == 0 {
                cur_send = send_iter.next();
                send_page = cur_send.map_or(0, |s| s.page_offset);
                send_off = cur_send.map_or(0, |s| s.byte_offset);
                send_remaining = cur_send.map_or(0, |s| s.len);
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(pset: PsetHandle, len: usize) -> Segment {
        Segment {
            pset,
            page_offset: 0,
            byte_offset: 0,
            len,
            attached: false,
        }
    }

    fn dummy_pset() -> PsetHandle {
        let mut a: crate::arena::Arena<(), 1> = crate::arena::Arena::new();
        a.insert(()).unwrap()
    }

    #[test_case]
    fn transfer_plan_caps_at_the_smaller_side() {
        let p = dummy_pset();
        let send = [seg(p, 100)];
        assert_eq!(transfer_plan(&send, &[40]), 40);
    }

    #[test_case]
    fn transfer_plan_spans_multiple_receive_buffers() {
        let p = dummy_pset();
        let send = [seg(p, 100)];
        assert_eq!(transfer_plan(&send, &[30, 30, 30]), 90);
    }

    #[test_case]
    fn transfer_plan_spans_multiple_send_segments() {
        let p = dummy_pset();
        let send = [seg(p, 10), seg(p, 10)];
        assert_eq!(transfer_plan(&send, &[15]), 15);
        assert_eq!(transfer_plan(&send, &[25]), 20);
    }

    #[test_case]
    fn copy_segments_stops_short_at_an_unfilled_slot() {
        let mut psets: PsetTable = crate::arena::Arena::new();
        let send_pset = psets
            .insert(crate::mm::pset::Pset::new(crate::mm::pset::Kind::Zfod, 1))
            .unwrap();
        let recv_pset = psets
            .insert(crate::mm::pset::Pset::new(crate::mm::pset::Kind::Zfod, 1))
            .unwrap();
        // Neither slot has a frame assigned, so the copy can't make progress.
        let send = [seg(send_pset, PAGE_SIZE)];
        let receive = [seg(recv_pset, PAGE_SIZE)];
        assert_eq!(copy_segments(&send, &receive, &psets), 0);
    }

    #[test_case]
    fn copy_segments_stops_at_an_unresolvable_pset_handle() {
        let psets: PsetTable = crate::arena::Arena::new();
        let p = dummy_pset();
        let send = [seg(p, PAGE_SIZE)];
        let receive = [seg(p, PAGE_SIZE)];
        // `p` was allocated from a different arena, so it resolves against
        // neither side of `psets`.
        assert_eq!(copy_segments(&send, &receive, &psets), 0);
    }
}
