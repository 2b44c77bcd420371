/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Exit-group: the ref-counted channel a process's children post their
//! exit status through, and the parent drains with `wait` (spec §4.8
//! "Exit-group contract"). Grounded on `exitgrp.c`'s `alloc_exitgrp`/
//! `post_exitgrp`/`wait_exitgrp`/`noparent_exitgrp`, with the original's
//! unbounded linked list of `exitst` records replaced by a fixed-capacity
//! ring (this crate has no allocator): a parent that falls more than
//! `MAX_QUEUED` exits behind its children loses the oldest ones, which
//! `post` reports back to the caller so it can be logged.

use core::cell::Cell;

/// Length of the event-string snapshot carried in a status record.
pub const EVENT_LEN: usize = 32;

/// Bound on outstanding, not-yet-`wait`ed-for exit records.
pub const MAX_QUEUED: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct ExitStatus {
    pub pid: u32,
    pub code: i32,
    pub usr_cpu: u64,
    pub sys_cpu: u64,
    pub event: [u8; EVENT_LEN],
    pub event_len: u8,
}

impl ExitStatus {
    pub fn new(pid: u32, code: i32, usr_cpu: u64, sys_cpu: u64, event: &[u8]) -> Self {
        let mut buf = [0u8; EVENT_LEN];
        let n = event.len().min(EVENT_LEN);
        buf[..n].copy_from_slice(&event[..n]);
        Self {
            pid,
            code,
            usr_cpu,
            sys_cpu,
            event: buf,
            event_len: n as u8,
        }
    }
}

/// What `wait` found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A status record was ready; here it is.
    Found,
    /// No record queued and no children remain (or non-blocking was asked
    /// for) — the `ESRCH` case in the original's `waits()`.
    NoChildren,
    /// No record queued, children remain, and the caller asked to block.
    /// Blocking itself is the thread layer's job (park on a semaphore);
    /// this only reports that a wait is warranted.
    WouldBlock,
}

struct Ring {
    slots: [Option<ExitStatus>; MAX_QUEUED],
    head: usize,
    len: usize,
}

impl Default for Ring {
    fn default() -> Self {
        Self::new()
    }
}

impl Ring {
    const fn new() -> Self {
        Self {
            slots: [None; MAX_QUEUED],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, status: ExitStatus) -> bool {
        if self.len == MAX_QUEUED {
            return false;
        }
        let idx = (self.head + self.len) % MAX_QUEUED;
        self.slots[idx] = Some(status);
        self.len += 1;
        true
    }

    fn pop(&mut self) -> Option<ExitStatus> {
        if self.len == 0 {
            return None;
        }
        let status = self.slots[self.head].take();
        self.head = (self.head + 1) % MAX_QUEUED;
        self.len -= 1;
        status
    }

    fn clear(&mut self) {
        self.slots = [None; MAX_QUEUED];
        self.head = 0;
        self.len = 0;
    }
}

/// One exit group: a parent's inbox for its children's exit statuses.
/// `refs` counts children currently pointing at this group as their
/// `parent` (i.e. this proc's `p_children`, referenced once per live
/// child); it is not the group's own refcount on memory, matching the
/// original's `e_refs`.
pub struct ExitGroup {
    parent: Cell<Option<u32>>,
    refs: Cell<u32>,
    queue: Cell<Ring>,
}

impl ExitGroup {
    /// *alloc_exitgrp*: `parent` is the PID that owns this group (`None`
    /// for the group a proc hands to its own children, which has no
    /// parent of its own).
    pub fn new(parent: Option<u32>) -> Self {
        Self {
            parent: Cell::new(parent),
            refs: Cell::new(if parent.is_some() { 1 } else { 0 }),
            queue: Cell::new(Ring::new()),
        }
    }

    pub fn parent(&self) -> Option<u32> {
        self.parent.get()
    }

    /// *ref_exitgrp*: a new child now targets this group.
    pub fn add_ref(&self) {
        self.refs.set(self.refs.get() + 1);
    }

    /// *deref_exitgrp*: a child departs. Returns `true` once the last
    /// reference is gone, at which point the caller should free the
    /// group's arena slot.
    pub fn deref(&self) -> bool {
        let n = self.refs.get() - 1;
        self.refs.set(n);
        n == 0
    }

    /// *noparent_exitgrp*: the parent has exited; null the back-pointer
    /// and drop any records nobody will ever collect.
    pub fn detach_parent(&self) {
        self.parent.set(None);
        let mut ring = self.queue.take();
        ring.clear();
        self.queue.set(ring);
    }

    /// *post_exitgrp*: queue a child's status. A `false` return means the
    /// parent had already departed (status silently dropped, matching the
    /// original racing-with-`noparent_exitgrp` path) or the queue was
    /// full.
    pub fn post(&self, status: ExitStatus) -> bool {
        if self.parent.get().is_none() {
            return false;
        }
        let mut ring = self.queue.take();
        let ok = ring.push(status);
        self.queue.set(ring);
        ok
    }

    /// *wait_exitgrp*: take the oldest queued status, if any.
    pub fn wait(&self, block: bool) -> (WaitOutcome, Option<ExitStatus>) {
        let mut ring = self.queue.take();
        let popped = ring.pop();
        self.queue.set(ring);
        if let Some(status) = popped {
            return (WaitOutcome::Found, Some(status));
        }
        if self.refs.get() == 0 || !block {
            (WaitOutcome::NoChildren, None)
        } else {
            (WaitOutcome::WouldBlock, None)
        }
    }
}

impl Default for ExitGroup {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(pid: u32) -> ExitStatus {
        ExitStatus::new(pid, 0, 10, 20, b"")
    }

    #[test_case]
    fn post_then_wait_round_trips() {
        let g = ExitGroup::new(Some(1));
        assert!(g.post(status(42)));
        let (outcome, found) = g.wait(true);
        assert_eq!(outcome, WaitOutcome::Found);
        assert_eq!(found.unwrap().pid, 42);
    }

    #[test_case]
    fn wait_with_no_children_and_empty_queue_is_no_children() {
        let g = ExitGroup::new(Some(1));
        g.deref();
        let (outcome, found) = g.wait(true);
        assert_eq!(outcome, WaitOutcome::NoChildren);
        assert!(found.is_none());
    }

    #[test_case]
    fn wait_blocks_when_children_remain_and_queue_empty() {
        let g = ExitGroup::new(Some(1));
        g.add_ref();
        let (outcome, _) = g.wait(true);
        assert_eq!(outcome, WaitOutcome::WouldBlock);
    }

    #[test_case]
    fn detach_parent_drops_unclaimed_records() {
        let g = ExitGroup::new(Some(1));
        g.post(status(1));
        g.detach_parent();
        assert!(g.parent().is_none());
        let (outcome, found) = g.wait(false);
        assert_eq!(outcome, WaitOutcome::NoChildren);
        assert!(found.is_none());
    }
}
