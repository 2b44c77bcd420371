/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Single trap/syscall dispatch entry point (spec §4.11). `machine`'s
//! architecture-specific exception vectors decode the hardware fault into
//! one of [`TrapKind`]'s variants and call into the matching function here;
//! the actual register save/restore and return-to-user trampoline stay in
//! `machine`, one layer below policy.

use {
    crate::{
        errors::{KernelError, Result},
        mm::{pview::PviewId, vas::Vas},
        proc::{
            event::{self, Delivery},
            process::ProcTable,
            thread::Thread,
        },
    },
    core::cell::Cell,
};

/// What brought the CPU into the kernel (spec §4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    PageFault { addr: usize, write: bool },
    MathError,
    IllegalInstruction,
    Breakpoint,
    Syscall { op: u32 },
    ClockTick,
}

/// Resolution for a page fault, decided before any frame is touched (spec
/// §4.11 "resolves via vas_fault and handles stack growth").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// `addr` falls inside an existing pview; filling the underlying slot
    /// runs above this layer; it needs the pset arena and page allocator,
    /// neither of which this module owns.
    InMapping { pview: PviewId },
    /// `addr` is in the auto-grow window just below the stack; the caller
    /// should `vas.attach` a fresh stack pview and retry the fault.
    GrowStack,
    /// The thread had a probe PC set for a kernel copyin/copyout; resume
    /// there instead of killing it (spec §4.11, §7 `EFAULT`).
    Probe { resume_pc: usize },
    /// No mapping, no growth window, no probe: the thread dies.
    Unmapped,
}

/// *vas_fault* classification (spec §4.11). A probe PC always wins: a fault
/// while the kernel is copying to/from user memory on the thread's behalf
/// is never a real user fault.
pub fn classify_page_fault<H>(thread: &Thread, vas: &Vas<H>, addr: usize) -> FaultOutcome {
    if let Some(pc) = thread.probe_pc.get() {
        return FaultOutcome::Probe { resume_pc: pc };
    }
    if let Some((id, _)) = vas.find(addr) {
        return FaultOutcome::InMapping { pview: id };
    }
    if vas.in_stack_growth_window(addr) {
        return FaultOutcome::GrowStack;
    }
    FaultOutcome::Unmapped
}

/// Event strings self-signalled for the non-page-fault trap kinds (spec
/// §4.11 "self-signal the corresponding event").
pub const EVENT_FPE: &[u8] = b"fpe";
pub const EVENT_ILL: &[u8] = b"ill";
pub const EVENT_BPT: &[u8] = b"bpt";

/// Post the event matching a math/illegal-instruction/breakpoint trap into
/// the thread's catchable mailbox. These are process events, not the
/// unblockable system one: a registered handler may legitimately retry or
/// translate a breakpoint or a trapped FP exception rather than die.
pub fn signal_fault_trap(thread: &Thread, kind: TrapKind) {
    let event = match kind {
        TrapKind::MathError => EVENT_FPE,
        TrapKind::IllegalInstruction => EVENT_ILL,
        TrapKind::Breakpoint => EVENT_BPT,
        TrapKind::PageFault { .. } | TrapKind::Syscall { .. } | TrapKind::ClockTick => return,
    };
    thread.events.process.write(event);
}

bitflags::bitflags! {
    /// Which trap/event classes cause a synchronous stop through a proc's
    /// debug port (spec §4.11 "selected events (always, on event, on
    /// breakpoint, on exit)").
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct DebugMask: u8 {
        const ALWAYS   = 1 << 0;
        const ON_EVENT = 1 << 1;
        const ON_BREAK = 1 << 2;
        const ON_EXIT  = 1 << 3;
    }
}

/// Whether `kind` should stop the thread for a ptrace command exchange
/// before it is delivered normally. `true` means the caller should
/// `msg_send` a notification over the proc's debug port and run the
/// command loop (single-step, breakpoint set/clear, register and memory
/// read/write, event-string peek/poke, mask update); that loop is a
/// synchronous exchange over the port/portref tables and belongs with
/// whatever owns those alongside the proc table, not this dispatch layer.
pub fn ptrace_notify(mask: DebugMask, kind: TrapKind) -> bool {
    mask.contains(DebugMask::ALWAYS)
        || (mask.contains(DebugMask::ON_BREAK) && matches!(kind, TrapKind::Breakpoint))
        || (mask.contains(DebugMask::ON_EVENT)
            && matches!(kind, TrapKind::MathError | TrapKind::IllegalInstruction))
}

/// The kernel side of the ptrace command loop (spec §4.11): one
/// `PtraceState` per debugged process, holding the stop mask `ptrace_notify`
/// tests and the breakpoint address set `Command::SetBreakpoint`/
/// `ClearBreakpoint` maintain. `apply` decodes a command already pulled off
/// the debug port and returns the reply to send back over it; the actual
/// `msg_send`/`msg_receive` exchange that frame travels over belongs to
/// whatever owns the port/portref tables alongside the proc table, not this
/// module.
pub mod ptrace {
    use {
        super::DebugMask,
        crate::{errors::KernelError, proc::thread::Thread},
        vsta_abi::ptrace::{Command, Reply, MAX_PAYLOAD},
    };

    /// Bound on simultaneously armed breakpoints per debugged process.
    pub const MAX_BREAKPOINTS: usize = 8;

    pub struct PtraceState {
        pub mask: DebugMask,
        attached: bool,
        breakpoints: [Option<u64>; MAX_BREAKPOINTS],
    }

    impl PtraceState {
        pub const fn new() -> Self {
            Self {
                mask: DebugMask::empty(),
                attached: false,
                breakpoints: [None; MAX_BREAKPOINTS],
            }
        }

        pub fn is_attached(&self) -> bool {
            self.attached
        }

        pub fn has_breakpoint(&self, addr: u64) -> bool {
            self.breakpoints.iter().flatten().any(|a| *a == addr)
        }

        /// Apply one decoded command against the stopped `thread`,
        /// returning the reply. Register and memory access (`ReadReg`,
        /// `WriteReg`, `ReadMem`, `WriteMem`) need the architecture
        /// register file and a HAT mapping of the target's vas, neither of
        /// which this module reaches; those always reply `NotSupported`
        /// until that wiring exists.
        pub fn apply(&mut self, thread: &Thread, cmd: Command) -> Reply {
            use crate::proc::thread::State;

            match cmd {
                Command::Attach => {
                    self.attached = true;
                    Reply::Ok
                }
                Command::Detach => {
                    self.attached = false;
                    self.mask = DebugMask::empty();
                    Reply::Ok
                }
                Command::Continue | Command::Step => {
                    if thread.state.get() == State::Stopped {
                        thread.state.set(State::Run);
                    }
                    Reply::Ok
                }
                Command::SetBreakpoint { addr } => {
                    if self.has_breakpoint(addr) {
                        return Reply::Ok;
                    }
                    match self.breakpoints.iter_mut().find(|slot| slot.is_none()) {
                        Some(slot) => {
                            *slot = Some(addr);
                            Reply::Ok
                        }
                        None => Reply::Err(KernelError::OutOfSpace as u8),
                    }
                }
                Command::ClearBreakpoint { addr } => {
                    match self.breakpoints.iter_mut().find(|slot| **slot == Some(addr)) {
                        Some(slot) => {
                            *slot = None;
                            Reply::Ok
                        }
                        None => Reply::Err(KernelError::NoSuchEntity as u8),
                    }
                }
                Command::ReadReg { .. }
                | Command::WriteReg { .. }
                | Command::ReadMem { .. }
                | Command::WriteMem { .. } => Reply::Err(KernelError::NotSupported as u8),
                Command::PeekEvent => match thread.events.peek() {
                    Some((bytes, len)) => Reply::Event { len: len as u8, data: pad(&bytes[..len]) },
                    None => Reply::Event { len: 0, data: [0u8; MAX_PAYLOAD] },
                },
                Command::PokeEvent { len, data } => {
                    thread.events.process.write(&data[..len as usize]);
                    Reply::Ok
                }
                Command::SetMask { mask } => {
                    self.mask = DebugMask::from_bits_truncate(mask as u8);
                    Reply::Ok
                }
            }
        }
    }

    impl Default for PtraceState {
        fn default() -> Self {
            Self::new()
        }
    }

    fn pad(event: &[u8]) -> [u8; MAX_PAYLOAD] {
        let mut out = [0u8; MAX_PAYLOAD];
        out[..event.len()].copy_from_slice(event);
        out
    }
}

/// A syscall's op code, classified to a handler family (spec §6 "Message
/// ABI"). Connect/Disconnect/Dup/Abort map onto `ipc::portref::Portref`'s
/// state machine directly; Isr/Time are kernel-synthesized messages a
/// driver receives, never sends; the `Fs*` family is server-defined policy
/// this dispatch layer never interprets itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallRoute {
    Connect,
    Disconnect,
    Dup,
    Abort,
    Isr,
    Time,
    Fs(vsta_abi::op::Op),
}

pub fn route_syscall(op_bits: u32) -> Result<SyscallRoute> {
    use vsta_abi::op::Op;
    let op = Op::from_bits(op_bits).ok_or(KernelError::InvalidArgument)?;
    Ok(match op {
        Op::Connect => SyscallRoute::Connect,
        Op::Disconnect => SyscallRoute::Disconnect,
        Op::Dup => SyscallRoute::Dup,
        Op::Abort => SyscallRoute::Abort,
        Op::Isr => SyscallRoute::Isr,
        Op::Time => SyscallRoute::Time,
        other => SyscallRoute::Fs(other),
    })
}

/// Outcome of one `hardclock` tick (spec §4.11 "Hardware clock tick").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// Run-ticks exhausted; preempt on the next clean lock boundary.
    pub preempt: bool,
    /// `PAGEOUT_PERIOD_TICKS` have elapsed; wake the pageout daemon.
    pub kick_pageout: bool,
}

/// How often the clock tick kicks the pageout daemon, in ticks. A tuning
/// knob, not a correctness property (mirrors `mm::pageout`'s own hand-waved
/// scan counts).
pub const PAGEOUT_PERIOD_TICKS: u64 = 100;

/// Per-CPU tick counter driving the periodic pageout kick.
pub struct ClockState {
    ticks: Cell<u64>,
}

impl ClockState {
    pub const fn new() -> Self {
        Self { ticks: Cell::new(0) }
    }

    /// Bill the running thread, decrement its run-ticks, and report what's
    /// due. Waking expired timed sleeps against a sorted timer-event list
    /// is the semaphore layer's job once a concrete `Waiter` exists (see
    /// `proc::thread`'s module doc comment for why that's not wired yet).
    pub fn tick(&self, thread: &Thread, from_user: bool) -> TickOutcome {
        if from_user {
            thread.bill_user(1);
        } else {
            thread.bill_system(1);
        }
        let preempt = thread.tick();
        let n = self.ticks.get().wrapping_add(1);
        self.ticks.set(n);
        TickOutcome {
            preempt,
            kick_pageout: n % PAGEOUT_PERIOD_TICKS == 0,
        }
    }
}

impl Default for ClockState {
    fn default() -> Self {
        Self::new()
    }
}

/// On return to user mode (spec §4.11 "deliver any pending events"):
/// whichever of the thread's two mailboxes is due, classified against the
/// process's registered handler. A fatal verdict records the event string
/// on the thread first, so `ProcTable::exit`'s posted status reflects what
/// actually killed it rather than assuming a kill event.
pub fn on_return_to_user(thread: &Thread, notify_handler: Option<usize>) -> Option<Delivery> {
    let (event, len) = thread.events.pending()?;
    let delivery = event::classify(&event, len, notify_handler);
    if delivery == Delivery::Fatal {
        thread.record_last_event(&event, len);
    }
    Some(delivery)
}

/// Kernel entry point once `machine` has brought up exception vectors, the
/// MMU and the console (`kmain` hands off here and never expects it back).
/// Seeds the first process and idles the scheduling loop; the actual
/// context switch into a picked thread is architecture-specific register
/// save/restore that belongs in `machine`, not this policy layer.
pub fn run_forever() -> ! {
    let mut procs = ProcTable::new();
    let root_vas: Vas<()> = Vas::new((), 0x8000_0000);
    procs
        .spawn_root(root_vas)
        .expect("process table has room for the first process");

    let clock = ClockState::new();
    loop {
        match procs.pick_next() {
            Some(thread) => {
                if let Some(t) = procs.thread(thread) {
                    let outcome = clock.tick(t, true);
                    if outcome.kick_pageout {
                        log::trace!("pageout daemon due");
                    }
                }
            }
            None => log::trace!("idle: nothing runnable"),
        }
        machine::time::time_manager().spin_for(core::time::Duration::from_millis(10));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use machine::hat::Protection;

    fn proc_handle() -> crate::proc::ProcHandle {
        let mut a: crate::arena::Arena<(), 1> = crate::arena::Arena::new();
        a.insert(()).unwrap()
    }

    fn dummy_pset() -> crate::mm::PsetHandle {
        let mut a: crate::arena::Arena<(), 1> = crate::arena::Arena::new();
        a.insert(()).unwrap()
    }

    #[test_case]
    fn probe_pc_wins_over_everything_else() {
        let thread = Thread::new(1, proc_handle());
        thread.set_probe(0xdead);
        let vas: Vas<()> = Vas::new((), 0x8000_0000);
        assert_eq!(
            classify_page_fault(&thread, &vas, 0x1000),
            FaultOutcome::Probe { resume_pc: 0xdead }
        );
    }

    #[test_case]
    fn fault_inside_a_mapping_is_classified_as_such() {
        let thread = Thread::new(1, proc_handle());
        let mut vas: Vas<()> = Vas::new((), 0x8000_0000);
        let id = vas
            .attach(crate::mm::pview::Pview::new(
                dummy_pset(),
                0x1000,
                0,
                4,
                Protection::USER_RW,
            ))
            .unwrap();
        assert_eq!(
            classify_page_fault(&thread, &vas, 0x1000),
            FaultOutcome::InMapping { pview: id }
        );
    }

    #[test_case]
    fn fault_just_below_the_stack_grows_it() {
        let thread = Thread::new(1, proc_handle());
        let vas: Vas<()> = Vas::new((), 0x8000_0000);
        assert_eq!(
            classify_page_fault(&thread, &vas, 0x8000_0000 - crate::mm::PAGE_SIZE),
            FaultOutcome::GrowStack
        );
    }

    #[test_case]
    fn fault_with_no_mapping_or_growth_window_is_unmapped() {
        let thread = Thread::new(1, proc_handle());
        let vas: Vas<()> = Vas::new((), 0x8000_0000);
        assert_eq!(classify_page_fault(&thread, &vas, 0x9000_0000), FaultOutcome::Unmapped);
    }

    #[test_case]
    fn signal_fault_trap_writes_the_matching_event() {
        let thread = Thread::new(1, proc_handle());
        signal_fault_trap(&thread, TrapKind::IllegalInstruction);
        let (bytes, len) = thread.events.process.take().unwrap();
        assert_eq!(&bytes[..len], EVENT_ILL);
    }

    #[test_case]
    fn ptrace_notify_respects_the_mask() {
        assert!(!ptrace_notify(DebugMask::ON_BREAK, TrapKind::MathError));
        assert!(ptrace_notify(DebugMask::ON_BREAK, TrapKind::Breakpoint));
        assert!(ptrace_notify(DebugMask::ALWAYS, TrapKind::ClockTick));
    }

    #[test_case]
    fn ptrace_set_and_clear_breakpoint_round_trips() {
        use ptrace::PtraceState;
        use vsta_abi::ptrace::{Command, Reply};

        let thread = Thread::new(1, proc_handle());
        let mut state = PtraceState::new();
        assert_eq!(state.apply(&thread, Command::SetBreakpoint { addr: 0x4000 }), Reply::Ok);
        assert!(state.has_breakpoint(0x4000));
        assert_eq!(state.apply(&thread, Command::ClearBreakpoint { addr: 0x4000 }), Reply::Ok);
        assert!(!state.has_breakpoint(0x4000));
    }

    #[test_case]
    fn ptrace_clear_breakpoint_rejects_an_unknown_address() {
        use ptrace::PtraceState;
        use vsta_abi::ptrace::{Command, Reply};

        let thread = Thread::new(1, proc_handle());
        let mut state = PtraceState::new();
        assert_eq!(
            state.apply(&thread, Command::ClearBreakpoint { addr: 0x4000 }),
            Reply::Err(KernelError::NoSuchEntity as u8)
        );
    }

    #[test_case]
    fn ptrace_continue_resumes_a_stopped_thread() {
        use crate::proc::thread::State;
        use ptrace::PtraceState;
        use vsta_abi::ptrace::Command;

        let thread = Thread::new(1, proc_handle());
        thread.state.set(State::Stopped);
        let mut state = PtraceState::new();
        state.apply(&thread, Command::Continue);
        assert_eq!(thread.state.get(), State::Run);
    }

    #[test_case]
    fn ptrace_peek_event_does_not_clear_it() {
        use ptrace::PtraceState;
        use vsta_abi::ptrace::{Command, Reply};

        let thread = Thread::new(1, proc_handle());
        thread.events.process.write(b"usr1");
        let mut state = PtraceState::new();
        let Reply::Event { len, data } = state.apply(&thread, Command::PeekEvent) else {
            panic!("expected an Event reply");
        };
        assert_eq!(&data[..len as usize], b"usr1");
        assert!(thread.events.process.is_set());
    }

    #[test_case]
    fn ptrace_register_and_memory_access_are_not_supported() {
        use ptrace::PtraceState;
        use vsta_abi::ptrace::{Command, Reply};

        let thread = Thread::new(1, proc_handle());
        let mut state = PtraceState::new();
        assert_eq!(
            state.apply(&thread, Command::ReadReg { reg: 0 }),
            Reply::Err(KernelError::NotSupported as u8)
        );
    }

    #[test_case]
    fn ptrace_detach_clears_the_mask() {
        use ptrace::PtraceState;
        use vsta_abi::ptrace::Command;

        let thread = Thread::new(1, proc_handle());
        let mut state = PtraceState::new();
        state.apply(&thread, Command::SetMask { mask: DebugMask::ALWAYS.bits() as u32 });
        assert_eq!(state.mask, DebugMask::ALWAYS);
        state.apply(&thread, Command::Detach);
        assert_eq!(state.mask, DebugMask::empty());
        assert!(!state.is_attached());
    }

    #[test_case]
    fn route_syscall_classifies_known_ops() {
        assert_eq!(route_syscall(vsta_abi::op::Op::Connect.bits()).unwrap(), SyscallRoute::Connect);
        assert_eq!(route_syscall(vsta_abi::op::Op::Abort.bits()).unwrap(), SyscallRoute::Abort);
        assert_eq!(
            route_syscall(vsta_abi::op::Op::FsRead.bits()).unwrap(),
            SyscallRoute::Fs(vsta_abi::op::Op::FsRead)
        );
        assert_eq!(route_syscall(0xffff_ffff).unwrap_err(), KernelError::InvalidArgument);
    }

    #[test_case]
    fn clock_tick_bills_the_thread_and_reports_preempt() {
        let thread = Thread::new(1, proc_handle());
        thread.run_ticks.set(1);
        let clock = ClockState::new();
        let outcome = clock.tick(&thread, true);
        assert!(outcome.preempt);
        assert_eq!(thread.usr_cpu.get(), 1);
    }

    #[test_case]
    fn clock_tick_kicks_pageout_on_the_period() {
        let thread = Thread::new(1, proc_handle());
        thread.run_ticks.set(u32::MAX);
        let clock = ClockState::new();
        let mut kicked = false;
        for _ in 0..PAGEOUT_PERIOD_TICKS {
            kicked = clock.tick(&thread, false).kick_pageout;
        }
        assert!(kicked);
    }

    #[test_case]
    fn return_to_user_delivers_the_pending_event() {
        let thread = Thread::new(1, proc_handle());
        thread.events.process.write(b"usr1");
        assert_eq!(
            on_return_to_user(&thread, Some(0x1000)),
            Some(Delivery::ToHandler { handler: 0x1000 })
        );
        assert_eq!(on_return_to_user(&thread, None), None);
    }

    #[test_case]
    fn a_fatal_delivery_records_the_event_as_the_threads_last() {
        let thread = Thread::new(1, proc_handle());
        thread.events.system.write(event::KILL_EVENT);
        assert_eq!(on_return_to_user(&thread, Some(0x1000)), Some(Delivery::Fatal));
        let (bytes, len) = thread.last_event();
        assert_eq!(&bytes[..len as usize], event::KILL_EVENT);
    }
}
