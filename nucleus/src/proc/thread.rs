/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! A thread of execution within a process (spec §3 "Thread", §4.8, §4.9).
//! Grounded on `struct thread` in the original's `sys/thread.h`, trimmed to
//! the fields this crate's modules actually consult: scheduling state, the
//! event mailboxes, accumulated CPU time, and the probe-PC trampoline used
//! by kernel copyin/copyout on a page fault (spec §4.11, §7 `EFAULT`).
//!
//! Wiring this up to `machine::semaphore::Semaphore<W>` needs a concrete,
//! globally-addressable `Waiter` impl (the trait requires `Copy`, with
//! `park`/`wake` driving a real context switch); that requires a
//! process-table-wide static thread table this module doesn't yet own, so
//! blocking operations below (`msg_receive`, `wait_exitgrp`, slot locks)
//! are exposed as non-blocking probes (`WouldBlock`-style return values)
//! for now rather than parking directly.

use {
    crate::proc::{
        event::{self, Events, EVENT_LEN},
        ProcHandle,
    },
    core::cell::Cell,
};

/// Default quantum in clock ticks (spec §4.9 "run-ticks").
pub const DEFAULT_QUANTUM: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Run,
    Sleep,
    /// Parked for a debugger (spec §4.11 ptrace hook).
    Stopped,
}

pub struct Thread {
    pub pid: u32,
    pub proc: ProcHandle,
    pub state: Cell<State>,
    pub run_ticks: Cell<u32>,
    /// Quanta used back-to-back without the thread voluntarily blocking;
    /// lowers effective priority under contention (spec §4.9 "Oink
    /// counter").
    pub oink: Cell<u32>,
    pub usr_cpu: Cell<u64>,
    pub sys_cpu: Cell<u64>,
    pub events: Events,
    /// Kernel PC to resume at instead of killing the thread, when a page
    /// fault happens while copying to/from user memory on its behalf
    /// (spec §4.11, §7 `EFAULT`).
    pub probe_pc: Cell<Option<usize>>,
    /// The event string that actually ended this thread: a delivered
    /// event's bytes if it died fatally (`event::classify` returning
    /// `Delivery::Fatal`), or [`event::VOLUNTARY_EXIT_EVENT`] if it called
    /// exit on its own. `do_exit` reads this instead of assuming a kill.
    last_event: Cell<([u8; EVENT_LEN], u8)>,
}

impl Thread {
    pub fn new(pid: u32, proc: ProcHandle) -> Self {
        Self {
            pid,
            proc,
            state: Cell::new(State::Sleep),
            run_ticks: Cell::new(0),
            oink: Cell::new(0),
            usr_cpu: Cell::new(0),
            sys_cpu: Cell::new(0),
            events: Events::new(),
            probe_pc: Cell::new(None),
            last_event: Cell::new(event::encode(event::VOLUNTARY_EXIT_EVENT)),
        }
    }

    /// Record the event string that is about to end this thread, for
    /// `do_exit` to post into the exit-group record.
    pub fn record_last_event(&self, bytes: &[u8; EVENT_LEN], len: usize) {
        self.last_event.set((*bytes, len as u8));
    }

    /// The event string last recorded via `record_last_event`, or
    /// [`event::VOLUNTARY_EXIT_EVENT`] if none was (a thread that exits
    /// without a fatal event delivered first).
    pub fn last_event(&self) -> ([u8; EVENT_LEN], u8) {
        self.last_event.get()
    }

    /// *setrun*-adjacent: grant a fresh quantum and mark runnable.
    pub fn grant_quantum(&self) {
        self.run_ticks.set(DEFAULT_QUANTUM);
        self.state.set(State::Run);
    }

    /// Clock-tick accounting (spec §4.11 "Hardware clock tick"): bill one
    /// tick, decrementing run-ticks. Returns `true` once the quantum is
    /// exhausted (caller should set `do_preempt`, bumping `oink` for next
    /// time).
    pub fn tick(&self) -> bool {
        let left = self.run_ticks.get();
        if left == 0 {
            return true;
        }
        self.run_ticks.set(left - 1);
        if left - 1 == 0 {
            self.oink.set(self.oink.get() + 1);
            true
        } else {
            false
        }
    }

    pub fn reset_oink(&self) {
        self.oink.set(0);
    }

    pub fn bill_user(&self, ticks: u64) {
        self.usr_cpu.set(self.usr_cpu.get() + ticks);
    }

    pub fn bill_system(&self, ticks: u64) {
        self.sys_cpu.set(self.sys_cpu.get() + ticks);
    }

    pub fn set_probe(&self, pc: usize) {
        self.probe_pc.set(Some(pc));
    }

    pub fn clear_probe(&self) {
        self.probe_pc.set(None);
    }

    /// *signal_thread* (spec §4.10): post `event` into the unblockable
    /// system mailbox (`system = true`) or the catchable process mailbox,
    /// then wake the thread if it was sleeping. Actually pulling a parked
    /// thread off a semaphore wait and nudging one running on another CPU
    /// both need the concrete `Waiter`/scheduler-leaf wiring this module's
    /// doc comment already flags as missing; this does the part that's
    /// left: flip `state` the same way `grant_quantum` would once a real
    /// wakeup exists to drive it.
    pub fn signal(&self, event: &[u8], system: bool) {
        if system {
            self.events.system.write(event);
        } else {
            self.events.process.write(event);
        }
        if self.state.get() == State::Sleep {
            self.state.set(State::Run);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc_handle() -> ProcHandle {
        let mut a: crate::arena::Arena<(), 1> = crate::arena::Arena::new();
        a.insert(()).unwrap()
    }

    #[test_case]
    fn tick_exhausts_the_quantum_and_bumps_oink() {
        let t = Thread::new(1, proc_handle());
        t.run_ticks.set(2);
        assert!(!t.tick());
        assert!(t.tick());
        assert_eq!(t.oink.get(), 1);
    }

    #[test_case]
    fn grant_quantum_resets_run_ticks_and_marks_running() {
        let t = Thread::new(1, proc_handle());
        t.grant_quantum();
        assert_eq!(t.run_ticks.get(), DEFAULT_QUANTUM);
        assert_eq!(t.state.get(), State::Run);
    }

    #[test_case]
    fn signal_wakes_a_sleeping_thread_and_posts_the_event() {
        let t = Thread::new(1, proc_handle());
        assert_eq!(t.state.get(), State::Sleep);
        t.signal(b"kill", true);
        assert_eq!(t.state.get(), State::Run);
        let (bytes, len) = t.events.system.take().unwrap();
        assert_eq!(&bytes[..len], b"kill");
    }

    #[test_case]
    fn signal_to_the_process_mailbox_leaves_the_system_one_empty() {
        let t = Thread::new(1, proc_handle());
        t.signal(b"usr1", false);
        assert!(!t.events.system.is_set());
        let (bytes, len) = t.events.process.take().unwrap();
        assert_eq!(&bytes[..len], b"usr1");
    }

    #[test_case]
    fn probe_pc_round_trips() {
        let t = Thread::new(1, proc_handle());
        assert!(t.probe_pc.get().is_none());
        t.set_probe(0xdead);
        assert_eq!(t.probe_pc.get(), Some(0xdead));
        t.clear_probe();
        assert!(t.probe_pc.get().is_none());
    }
}
