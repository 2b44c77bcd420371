/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Kernel-side image of a message (spec §3 "Sysmsg"). Distinct from
//! `vsta_abi::msg::Sysmsg`, the wire struct a client builds: this carries
//! the segment list as kernel [`crate::ipc::segment::Segment`]s (not user
//! buffer addresses) plus the originating portref and an error string,
//! neither of which cross the ABI boundary as part of the message itself.

use crate::ipc::{portref::PortrefHandle, segment::Segment};

pub const MAX_SEGMENTS: usize = vsta_abi::msg::MSGSEGS;

/// A message queued on a port, or in flight back to its sender.
pub struct Sysmsg {
    pub op: u32,
    pub arg: i32,
    pub arg1: i32,
    pub segments: heapless_segments::SegList,
    /// The portref this message originated from (or will reply to).
    pub from: PortrefHandle,
    pub error: Option<&'static str>,
}

impl Sysmsg {
    pub fn new(op: u32, arg: i32, arg1: i32, from: PortrefHandle) -> Self {
        Self {
            op,
            arg,
            arg1,
            segments: heapless_segments::SegList::new(),
            from,
            error: None,
        }
    }

    pub fn with_error(mut self, error: &'static str) -> Self {
        self.error = Some(error);
        self
    }
}

/// A fixed-capacity segment list; named as its own module because `Vec` is
/// unavailable in this `no_std` crate and every message caps out at
/// `MSGSEGS` entries by ABI definition (`vsta_abi::msg::MSGSEGS`).
pub mod heapless_segments {
    use super::{Segment, MAX_SEGMENTS};

    pub struct SegList {
        slots: [Option<Segment>; MAX_SEGMENTS],
        len: usize,
    }

    impl SegList {
        pub fn new() -> Self {
            Self {
                slots: core::array::from_fn(|_| None),
                len: 0,
            }
        }

        pub fn len(&self) -> usize {
            self.len
        }

        pub fn is_empty(&self) -> bool {
            self.len == 0
        }

        pub fn push(&mut self, seg: Segment) -> Result<(), Segment> {
            if self.len >= MAX_SEGMENTS {
                return Err(seg);
            }
            self.slots[self.len] = Some(seg);
            self.len += 1;
            Ok(())
        }

        pub fn iter(&self) -> impl Iterator<Item = &Segment> {
            self.slots[..self.len].iter().filter_map(|s| s.as_ref())
        }
    }

    impl Default for SegList {
        fn default() -> Self {
            Self::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn seglist_rejects_push_past_capacity() {
        let mut a: crate::arena::Arena<(), 1> = crate::arena::Arena::new();
        let pset = a.insert(()).unwrap();
        let mut list = heapless_segments::SegList::new();
        for _ in 0..MAX_SEGMENTS {
            list.push(Segment {
                pset,
                page_offset: 0,
                byte_offset: 0,
                len: 1,
                attached: false,
            })
            .unwrap();
        }
        let rejected = list.push(Segment {
            pset,
            page_offset: 0,
            byte_offset: 0,
            len: 1,
            attached: false,
        });
        assert!(rejected.is_err());
        assert_eq!(list.len(), MAX_SEGMENTS);
    }
}
