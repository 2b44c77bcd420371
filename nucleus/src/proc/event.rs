/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Per-thread event strings (spec §4.10). Each thread carries two
//! one-slot mailboxes: a system event (kill, unblockable) and a process
//! event (catchable, delivered through a user handler if one is
//! registered). Writing a second event before the first is delivered
//! overwrites it, matching the original's single `t_evsys`/`t_evproc`
//! buffers rather than a queue.

use core::cell::Cell;

pub const EVENT_LEN: usize = 32;

#[derive(Debug, Clone, Copy)]
struct EventBuf {
    bytes: [u8; EVENT_LEN],
    len: u8,
}

impl EventBuf {
    const EMPTY: Self = Self {
        bytes: [0u8; EVENT_LEN],
        len: 0,
    };
}

/// One one-slot event mailbox.
pub struct EventSlot {
    buf: Cell<EventBuf>,
}

impl EventSlot {
    pub const fn new() -> Self {
        Self {
            buf: Cell::new(EventBuf::EMPTY),
        }
    }

    pub fn is_set(&self) -> bool {
        self.buf.get().len > 0
    }

    /// Write an event string, truncating to `EVENT_LEN`. Overwrites
    /// whatever was pending.
    pub fn write(&self, event: &[u8]) {
        let mut b = EventBuf::EMPTY;
        let n = event.len().min(EVENT_LEN);
        b.bytes[..n].copy_from_slice(&event[..n]);
        b.len = n as u8;
        self.buf.set(b);
    }

    /// Take and clear the pending event, if any.
    pub fn take(&self) -> Option<([u8; EVENT_LEN], usize)> {
        let b = self.buf.get();
        if b.len == 0 {
            return None;
        }
        self.buf.set(EventBuf::EMPTY);
        Some((b.bytes, b.len as usize))
    }

    /// Read the pending event without clearing it (ptrace's `PeekEvent`).
    pub fn peek(&self) -> Option<([u8; EVENT_LEN], usize)> {
        let b = self.buf.get();
        if b.len == 0 {
            None
        } else {
            Some((b.bytes, b.len as usize))
        }
    }
}

impl Default for EventSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Both of a thread's event mailboxes.
pub struct Events {
    /// Unblockable: kill and similarly mandatory signals.
    pub system: EventSlot,
    /// Catchable: delivered through the process's registered handler, if
    /// any, otherwise fatal (spec §4.10).
    pub process: EventSlot,
}

impl Events {
    pub const fn new() -> Self {
        Self {
            system: EventSlot::new(),
            process: EventSlot::new(),
        }
    }

    /// Whichever of the two mailboxes is due for delivery, system taking
    /// priority since it cannot be masked.
    pub fn pending(&self) -> Option<([u8; EVENT_LEN], usize)> {
        self.system.take().or_else(|| self.process.take())
    }

    /// Non-destructive version of [`Events::pending`] (ptrace's
    /// `PeekEvent`).
    pub fn peek(&self) -> Option<([u8; EVENT_LEN], usize)> {
        self.system.peek().or_else(|| self.process.peek())
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::new()
    }
}

/// What `check_events` should do with a delivered event, decided by
/// whether the process has registered a handler and whether the event is
/// the unblockable kill event (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// No handler registered, or this is the unblockable kill event: the
    /// process dies with the event string recorded.
    Fatal,
    /// Push a frame carrying the event string and the saved user SP/PC
    /// onto the user stack, and redirect the user PC to `handler`.
    ToHandler { handler: usize },
}

pub const KILL_EVENT: &[u8] = b"kill";

/// Sentinel recorded as a thread's last event when it exits voluntarily
/// (never delivered through `Events`, never shown to a handler) rather
/// than dying off a posted event. Lets `ExitStatus`'s event field tell a
/// `wait`ing parent why the child actually died instead of defaulting to
/// [`KILL_EVENT`] for every exit.
pub const VOLUNTARY_EXIT_EVENT: &[u8] = b"exit";

/// Pack a raw event string into the fixed `(bytes, len)` form threaded
/// through [`crate::proc::thread::Thread::last_event`] and
/// [`crate::proc::exitgrp::ExitStatus`].
pub fn encode(event: &[u8]) -> ([u8; EVENT_LEN], u8) {
    let mut bytes = [0u8; EVENT_LEN];
    let n = event.len().min(EVENT_LEN);
    bytes[..n].copy_from_slice(&event[..n]);
    (bytes, n as u8)
}

pub fn classify(event: &[u8; EVENT_LEN], event_len: usize, handler: Option<usize>) -> Delivery {
    match handler {
        Some(handler) if &event[..event_len] != KILL_EVENT => Delivery::ToHandler { handler },
        _ => Delivery::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn write_then_take_round_trips() {
        let slot = EventSlot::new();
        assert!(!slot.is_set());
        slot.write(b"stop");
        assert!(slot.is_set());
        let (bytes, len) = slot.take().unwrap();
        assert_eq!(&bytes[..len], b"stop");
        assert!(!slot.is_set());
    }

    #[test_case]
    fn peek_reads_without_clearing() {
        let slot = EventSlot::new();
        slot.write(b"stop");
        let (bytes, len) = slot.peek().unwrap();
        assert_eq!(&bytes[..len], b"stop");
        assert!(slot.is_set());
        let (bytes, len) = slot.take().unwrap();
        assert_eq!(&bytes[..len], b"stop");
    }

    #[test_case]
    fn second_write_overwrites_first() {
        let slot = EventSlot::new();
        slot.write(b"one");
        slot.write(b"two");
        let (bytes, len) = slot.take().unwrap();
        assert_eq!(&bytes[..len], b"two");
    }

    #[test_case]
    fn system_event_takes_priority_over_process_event() {
        let events = Events::new();
        events.process.write(b"usr1");
        events.system.write(b"kill");
        let (bytes, len) = events.pending().unwrap();
        assert_eq!(&bytes[..len], b"kill");
    }

    #[test_case]
    fn kill_event_is_always_fatal_even_with_a_handler() {
        let mut buf = [0u8; EVENT_LEN];
        buf[..4].copy_from_slice(b"kill");
        assert_eq!(classify(&buf, 4, Some(0x1000)), Delivery::Fatal);
    }

    #[test_case]
    fn other_events_go_to_a_registered_handler() {
        let mut buf = [0u8; EVENT_LEN];
        buf[..4].copy_from_slice(b"usr1");
        assert_eq!(
            classify(&buf, 4, Some(0x1000)),
            Delivery::ToHandler { handler: 0x1000 }
        );
    }

    #[test_case]
    fn no_handler_is_fatal() {
        let mut buf = [0u8; EVENT_LEN];
        buf[..4].copy_from_slice(b"usr1");
        assert_eq!(classify(&buf, 4, None), Delivery::Fatal);
    }
}
