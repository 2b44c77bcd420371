/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Server-side message endpoint (spec §3 "Port", §4.7). A port owns a
//! FIFO queue of unserved sysmsgs and, for file-backed psets, a cache from
//! file-id to pset so repeated `exec`s of the same binary share one pset
//! (spec §4.7 "Mapped-file cache on port").

use crate::{
    arena::Handle,
    errors::{KernelError, Result},
    ipc::sysmsg::Sysmsg,
    mm::PsetHandle,
};

pub type PortHandle = Handle;

/// Bound on queued-but-unserved messages per port.
pub const MAX_QUEUED: usize = 32;

/// Bound on distinct cached files per port (spec §4.7's file-id -> pset map).
pub const MAX_CACHE_ENTRIES: usize = 16;

bitflags::bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct PortFlags: u8 {
        /// Port no longer participates in the file-id cache (spec §4.7
        /// `NO_MAP_HASH`).
        const NO_MAP_HASH = 1 << 0;
    }
}

#[derive(Clone, Copy)]
struct CacheEntry {
    file_id: u64,
    page_len: usize,
    pset: PsetHandle,
}

/// A FIFO queue of messages, bounded by `MAX_QUEUED`. Uses a ring buffer
/// over a fixed array rather than the arena: queue order must be FIFO and
/// lookup is always "pop the oldest", which an array-backed ring serves
/// directly without the indirection an arena would add.
struct Queue {
    slots: [Option<Sysmsg>; MAX_QUEUED],
    head: usize,
    len: usize,
}

impl Queue {
    fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, msg: Sysmsg) -> core::result::Result<(), Sysmsg> {
        if self.len == MAX_QUEUED {
            return Err(msg);
        }
        let idx = (self.head + self.len) % MAX_QUEUED;
        self.slots[idx] = Some(msg);
        self.len += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<Sysmsg> {
        if self.len == 0 {
            return None;
        }
        let msg = self.slots[self.head].take();
        self.head = (self.head + 1) % MAX_QUEUED;
        self.len -= 1;
        msg
    }

    fn len(&self) -> usize {
        self.len
    }
}

pub struct Port {
    queue: Queue,
    cache: [Option<CacheEntry>; MAX_CACHE_ENTRIES],
    flags: PortFlags,
    refs: u32,
}

impl Port {
    pub fn new() -> Self {
        Self {
            queue: Queue::new(),
            cache: [None; MAX_CACHE_ENTRIES],
            flags: PortFlags::empty(),
            refs: 1,
        }
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Client-side enqueue. Callers release the receive-waiter semaphore
    /// afterwards (that semaphore is instantiated over a concrete thread
    /// type one layer up, in `crate::proc`).
    pub fn enqueue(&mut self, msg: Sysmsg) -> Result<()> {
        self.queue.push(msg).map_err(|_| KernelError::Busy)
    }

    /// *msg_receive*: dequeue the oldest message, if any.
    pub fn receive(&mut self) -> Option<Sysmsg> {
        self.queue.pop()
    }

    pub fn add_ref(&mut self) {
        self.refs += 1;
    }

    pub fn drop_ref(&mut self) -> bool {
        self.refs -= 1;
        self.refs == 0
    }

    pub fn mark_no_map_hash(&mut self) {
        self.flags.insert(PortFlags::NO_MAP_HASH);
    }

    fn cache_eligible(&self) -> bool {
        !self.flags.contains(PortFlags::NO_MAP_HASH)
    }

    /// Look up a cached pset for `file_id`, inserted by a prior `exec`'s
    /// `FS_FID` round-trip.
    pub fn cache_lookup(&self, file_id: u64) -> Option<(PsetHandle, usize)> {
        self.cache
            .iter()
            .flatten()
            .find(|e| e.file_id == file_id)
            .map(|e| (e.pset, e.page_len))
    }

    /// Insert a new cache entry. A no-op success if the port has been
    /// marked `NO_MAP_HASH`, matching the original treating it as "caching
    /// silently declined" rather than an error.
    pub fn cache_insert(&mut self, file_id: u64, page_len: usize, pset: PsetHandle) -> Result<()> {
        if !self.cache_eligible() {
            return Ok(());
        }
        for slot in self.cache.iter_mut() {
            if slot.is_none() {
                *slot = Some(CacheEntry {
                    file_id,
                    page_len,
                    pset,
                });
                return Ok(());
            }
        }
        Err(KernelError::OutOfSpace)
    }

    /// *unhash*: remove one cache entry.
    pub fn cache_remove(&mut self, file_id: u64) -> Option<PsetHandle> {
        for slot in self.cache.iter_mut() {
            if slot.map(|e| e.file_id) == Some(file_id) {
                let pset = slot.unwrap().pset;
                *slot = None;
                return Some(pset);
            }
        }
        None
    }

    /// *exec_cleanup*: dump the whole cache on port shutdown, returning
    /// every pset that held a cache reference so the caller can drop them.
    pub fn cache_drain(&mut self) -> impl Iterator<Item = PsetHandle> + '_ {
        self.cache.iter_mut().filter_map(|slot| slot.take().map(|e| e.pset))
    }
}

impl Default for Port {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_msg(op: u32) -> Sysmsg {
        let mut a: crate::arena::Arena<(), 1> = crate::arena::Arena::new();
        let portref = a.insert(()).unwrap();
        Sysmsg::new(op, 0, 0, portref)
    }

    fn dummy_pset() -> PsetHandle {
        let mut a: crate::arena::Arena<(), 1> = crate::arena::Arena::new();
        a.insert(()).unwrap()
    }

    #[test_case]
    fn receive_is_fifo() {
        let mut p = Port::new();
        p.enqueue(dummy_msg(1)).unwrap();
        p.enqueue(dummy_msg(2)).unwrap();
        assert_eq!(p.receive().unwrap().op, 1);
        assert_eq!(p.receive().unwrap().op, 2);
        assert!(p.receive().is_none());
    }

    #[test_case]
    fn cache_round_trips() {
        let mut p = Port::new();
        let pset = dummy_pset();
        p.cache_insert(7, 3, pset).unwrap();
        let (found, len) = p.cache_lookup(7).unwrap();
        assert_eq!(found.index(), pset.index());
        assert_eq!(len, 3);
        assert!(p.cache_remove(7).is_some());
        assert!(p.cache_lookup(7).is_none());
    }

    #[test_case]
    fn no_map_hash_declines_new_entries_silently() {
        let mut p = Port::new();
        p.mark_no_map_hash();
        p.cache_insert(1, 1, dummy_pset()).unwrap();
        assert!(p.cache_lookup(1).is_none());
    }
}
