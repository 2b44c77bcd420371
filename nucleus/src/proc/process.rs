/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Process object and the table that ties processes, threads, exit groups
//! and the scheduler together (spec §3 "Proc", §4.8). Grounded on
//! `bootproc`/`fork`/`fork_thread`/`do_exit` in the original's `proc.c`.

use {
    crate::{
        arena::Arena,
        errors::{KernelError, Result},
        ipc::portref::PortrefHandle,
        mm::vas::Vas,
        proc::{
            exitgrp::{ExitGroup, ExitStatus, WaitOutcome},
            pid::PidAllocator,
            sched::Scheduler,
            thread::Thread,
            ExitGroupHandle, ProcHandle, ThreadHandle, MAX_PROCS, MAX_THREADS,
            MAX_THREADS_PER_PROC,
        },
    },
    core::cell::Cell,
};

/// Upper bound on a process's command-name field (`p_cmd`).
pub const CMD_LEN: usize = 32;

/// Upper bound on a process's open portref table (`PROCOPENS`).
pub const MAX_OPEN_PORTREFS: usize = 32;

/// Upper bound on identity entries carried by one process (`PROCPERMS`).
pub const MAX_IDENTITIES: usize = 4;

/// One loader-supplied boot task (spec §6 "Boot contract"): the physical
/// frame range a binary's text and data segments were already loaded into,
/// where to map each, and where the thread enters. `vstatool`'s
/// `BootTasks` command builds one of these per ELF binary on the host.
#[derive(Debug, Clone, Copy)]
pub struct BootTask {
    pub frame_base: libmemory::perpage::Pfn,
    pub text_vaddr: usize,
    pub text_pages: usize,
    pub data_vaddr: usize,
    pub data_pages: usize,
    pub entry: usize,
}

/// `sys/sys` identity (spec §6, `bootproc`'s `p_ids[0]` set to id bytes
/// `{1, 1}`): every boot task gets this as its sole non-root identity.
/// Encoded here as the literal bytes `"sys"` rather than the original's
/// packed `{1, 1}` numeric pair, matching the string-keyed longest-prefix
/// labels `vsta_abi::label::Permission` uses everywhere else in this port.
fn sys_sys_identity() -> vsta_abi::label::Permission {
    let mut id = [0u8; vsta_abi::label::MAX_ID_LEN];
    id[..3].copy_from_slice(b"sys");
    vsta_abi::label::Permission { id, id_len: 3, uid: 0, disabled: false }
}

pub struct Proc {
    pub pid: u32,
    pub vas: Vas<()>,
    threads: Cell<[Option<ThreadHandle>; MAX_THREADS_PER_PROC]>,
    pub sched_node: crate::proc::sched::SchedHandle,
    /// Exit group this proc's own children post their status into (`p_children`).
    pub children: ExitGroupHandle,
    /// Exit group this proc posts its own status into on exit (`p_parent`).
    pub parent: ExitGroupHandle,
    pub pgrp: u32,
    cmd: Cell<[u8; CMD_LEN]>,
    cmd_len: Cell<u8>,
    identities: Cell<[vsta_abi::label::Permission; MAX_IDENTITIES]>,
    identity_len: Cell<u8>,
    pub notify_handler: Cell<Option<usize>>,
    open_portrefs: Cell<[Option<PortrefHandle>; MAX_OPEN_PORTREFS]>,
    pub usr_cpu: Cell<u64>,
    pub sys_cpu: Cell<u64>,
}

const NO_PERM: vsta_abi::label::Permission = vsta_abi::label::Permission {
    id: [0u8; vsta_abi::label::MAX_ID_LEN],
    id_len: 0,
    uid: 0,
    disabled: true,
};

impl Proc {
    fn new(
        pid: u32,
        vas: Vas<()>,
        sched_node: crate::proc::sched::SchedHandle,
        children: ExitGroupHandle,
        parent: ExitGroupHandle,
        pgrp: u32,
    ) -> Self {
        Self {
            pid,
            vas,
            threads: Cell::new([None; MAX_THREADS_PER_PROC]),
            sched_node,
            children,
            parent,
            pgrp,
            cmd: Cell::new([0u8; CMD_LEN]),
            cmd_len: Cell::new(0),
            identities: Cell::new([NO_PERM; MAX_IDENTITIES]),
            identity_len: Cell::new(0),
            notify_handler: Cell::new(None),
            open_portrefs: Cell::new([None; MAX_OPEN_PORTREFS]),
            usr_cpu: Cell::new(0),
            sys_cpu: Cell::new(0),
        }
    }

    pub fn set_command(&self, name: &[u8]) {
        let mut buf = [0u8; CMD_LEN];
        let n = name.len().min(CMD_LEN);
        buf[..n].copy_from_slice(&name[..n]);
        self.cmd.set(buf);
        self.cmd_len.set(n as u8);
    }

    pub fn command(&self) -> ([u8; CMD_LEN], usize) {
        (self.cmd.get(), self.cmd_len.get() as usize)
    }

    pub fn set_identities(&self, ids: &[vsta_abi::label::Permission]) {
        let mut buf = [NO_PERM; MAX_IDENTITIES];
        let n = ids.len().min(MAX_IDENTITIES);
        buf[..n].copy_from_slice(&ids[..n]);
        self.identities.set(buf);
        self.identity_len.set(n as u8);
    }

    pub fn identities(&self) -> ([vsta_abi::label::Permission; MAX_IDENTITIES], usize) {
        (self.identities.get(), self.identity_len.get() as usize)
    }

    /// Whether this process holds a root identity (empty-prefix entry,
    /// not disabled). `notify` requires this to signal a different
    /// process, standing in for the original's per-target `P_SIG`
    /// protection bit: this port's identities are longest-prefix labels
    /// rather than a bitmask computed against a target's own protection
    /// map, so root-or-self is the closest equivalent this table can
    /// check without a second per-process protection field.
    pub fn has_root_identity(&self) -> bool {
        let (ids, len) = self.identities();
        ids[..len].iter().any(|p| !p.disabled && p.is_root())
    }

    /// Is single-threaded right now (an *exec* precondition, spec §4.8).
    pub fn is_single_threaded(&self) -> bool {
        self.threads.get().iter().flatten().count() == 1
    }

    pub fn threads(&self) -> impl Iterator<Item = ThreadHandle> {
        self.threads.get().into_iter().flatten()
    }

    fn add_thread(&self, thread: ThreadHandle) -> Result<()> {
        let mut list = self.threads.get();
        for slot in list.iter_mut() {
            if slot.is_none() {
                *slot = Some(thread);
                self.threads.set(list);
                return Ok(());
            }
        }
        Err(KernelError::OutOfSpace)
    }

    fn remove_thread(&self, thread: ThreadHandle) -> bool {
        let mut list = self.threads.get();
        let mut removed = false;
        for slot in list.iter_mut() {
            if *slot == Some(thread) {
                *slot = None;
                removed = true;
                break;
            }
        }
        self.threads.set(list);
        removed
    }

    /// Install a duplicated portref into the first free open-table slot
    /// (the landing spot for `fork`'s `M_DUP` pass once message-send is
    /// wired up at the trap layer).
    pub fn open_portref(&self, portref: PortrefHandle) -> Result<()> {
        let mut table = self.open_portrefs.get();
        for slot in table.iter_mut() {
            if slot.is_none() {
                *slot = Some(portref);
                self.open_portrefs.set(table);
                return Ok(());
            }
        }
        Err(KernelError::OutOfSpace)
    }

    pub fn open_portrefs(&self) -> impl Iterator<Item = PortrefHandle> {
        self.open_portrefs.get().into_iter().flatten()
    }
}

/// Outcome of `ProcTable::exit` for the last thread in a process: whether
/// the full process was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Another thread remains; only this one was removed.
    ThreadOnly,
    /// This was the last thread; the process itself is gone.
    ProcessTornDown,
}

/// Owns every process, thread and exit group, plus the scheduler and the
/// PID allocator shared across them (spec §4.8's `allprocs`/`pid_hash`
/// globals, folded into one table instead of several module-level
/// statics).
pub struct ProcTable {
    procs: Arena<Proc, MAX_PROCS>,
    threads: Arena<Thread, MAX_THREADS>,
    exitgroups: Arena<ExitGroup, MAX_PROCS>,
    sched: Scheduler,
    pids: PidAllocator,
}

impl ProcTable {
    pub fn new() -> Self {
        Self {
            procs: Arena::new(),
            threads: Arena::new(),
            exitgroups: Arena::new(),
            sched: Scheduler::new(),
            pids: PidAllocator::new(),
        }
    }

    fn used_pids(&self) -> impl Iterator<Item = u32> + Clone + '_ {
        self.procs
            .iter()
            .map(|p| p.pid)
            .chain(self.threads.iter().map(|t| t.pid))
    }

    fn alloc_pid(&mut self) -> u32 {
        // `used_pids` borrows `self.procs`/`self.threads`; collect nothing
        // extra here, `PidAllocator` only ever re-iterates while scanning.
        let used: heapless_pids::Snapshot = heapless_pids::snapshot(self.used_pids());
        self.pids.alloc(used.iter())
    }

    pub fn proc(&self, handle: ProcHandle) -> Option<&Proc> {
        self.procs.get(handle)
    }

    pub fn thread(&self, handle: ThreadHandle) -> Option<&Thread> {
        self.threads.get(handle)
    }

    pub fn exit_group(&self, handle: ExitGroupHandle) -> Option<&ExitGroup> {
        self.exitgroups.get(handle)
    }

    pub fn pick_next(&self) -> Option<ThreadHandle> {
        self.sched.pick_next()
    }

    /// *bootproc*/`init_proc`-equivalent: seed the very first process (a
    /// boot task, or the kernel's own idle process), with no parent exit
    /// group of its own.
    pub fn spawn_root(&mut self, vas: Vas<()>) -> Result<(ProcHandle, ThreadHandle)> {
        let pid = self.alloc_pid();
        let own_children = self
            .exitgroups
            .insert(ExitGroup::new(Some(pid)))
            .map_err(|_| KernelError::OutOfSpace)?;
        let parent_group = self
            .exitgroups
            .insert(ExitGroup::new(None))
            .map_err(|_| KernelError::OutOfSpace)?;

        let sched_node = self
            .sched
            .sched_node(self.sched.root())
            .ok_or(KernelError::OutOfSpace)?;

        let proc = Proc::new(pid, vas, sched_node, own_children, parent_group, pid);
        let proc_handle = self.procs.insert(proc).map_err(|_| KernelError::OutOfSpace)?;

        let thread_pid = self.alloc_pid();
        let thread = Thread::new(thread_pid, proc_handle);
        let thread_handle = self
            .threads
            .insert(thread)
            .map_err(|_| KernelError::OutOfSpace)?;
        let leaf = self
            .sched
            .sched_thread(sched_node, thread_handle)
            .ok_or(KernelError::OutOfSpace)?;
        self.sched.lsetrun(leaf);

        self.procs
            .get(proc_handle)
            .expect("just inserted")
            .add_thread(thread_handle)?;

        Ok((proc_handle, thread_handle))
    }

    /// *bootproc* (spec §6 "Boot contract"): build a proc straight from one
    /// loader-supplied [`BootTask`] — `Physmem`-backed text (RO) and data
    /// views over the frames the loader already put the binary in, a
    /// fresh ZFOD stack topping out at `stack_top`, and a `sys/sys`
    /// identity. Resetting the fresh thread's trap frame to resume at
    /// `task.entry` is left undone here: that needs the architecture
    /// register state `machine` owns, the same gap `exec` leaves for the
    /// trap-return path to close (spec §4.8).
    pub fn spawn_boot_task(
        &mut self,
        psets: &mut crate::mm::PsetTable,
        task: BootTask,
        stack_top: usize,
        stack_pages: usize,
    ) -> Result<(ProcHandle, ThreadHandle)> {
        use crate::mm::{
            pset::{Kind, Pset},
            pview::Pview,
        };
        use machine::hat::Protection;

        let mut vas: Vas<()> = Vas::new((), stack_top);

        let text = psets
            .insert(Pset::new(Kind::Physmem { base_pfn: task.frame_base }, task.text_pages))
            .map_err(|_| KernelError::OutOfSpace)?;
        vas.attach(Pview::new(text, task.text_vaddr, 0, task.text_pages, Protection::USER_RO))?;

        let data = psets
            .insert(Pset::new(
                Kind::Physmem { base_pfn: task.frame_base + task.text_pages },
                task.data_pages,
            ))
            .map_err(|_| KernelError::OutOfSpace)?;
        vas.attach(Pview::new(data, task.data_vaddr, 0, task.data_pages, Protection::USER_RW))?;

        let stack = psets
            .insert(Pset::new(Kind::Zfod, stack_pages))
            .map_err(|_| KernelError::OutOfSpace)?;
        let stack_vaddr = stack_top.saturating_sub(stack_pages * crate::mm::PAGE_SIZE);
        vas.attach(Pview::new(stack, stack_vaddr, 0, stack_pages, Protection::USER_RW))?;

        let (proc_handle, thread_handle) = self.spawn_root(vas)?;
        self.procs
            .get(proc_handle)
            .expect("just inserted")
            .set_identities(&[sys_sys_identity()]);

        Ok((proc_handle, thread_handle))
    }

    /// *fork_thread* (spec §4.8): launch a new thread within `proc`'s
    /// process, returning its PID.
    pub fn fork_thread(&mut self, proc_handle: ProcHandle) -> Result<u32> {
        let proc = self.procs.get(proc_handle).ok_or(KernelError::NoSuchEntity)?;
        if proc.threads.get().iter().flatten().count() >= MAX_THREADS_PER_PROC {
            return Err(KernelError::OutOfMemory);
        }
        let sched_node = proc.sched_node;

        let pid = self.alloc_pid();
        let thread = Thread::new(pid, proc_handle);
        let thread_handle = self
            .threads
            .insert(thread)
            .map_err(|_| KernelError::OutOfSpace)?;
        let leaf = self
            .sched
            .sched_thread(sched_node, thread_handle)
            .ok_or(KernelError::OutOfSpace)?;
        self.sched.lsetrun(leaf);

        self.procs
            .get(proc_handle)
            .expect("looked up above")
            .add_thread(thread_handle)?;
        Ok(pid)
    }

    /// *fork* (spec §4.8): create an entirely new process, a copy of
    /// `parent`'s single thread. Permission identities, protection label,
    /// command name and pgrp are copied; the vas fork, portref
    /// duplication (`M_DUP`) and kernel-stack duplication live above this
    /// layer (they need the HAT and message-send machinery this table
    /// doesn't own).
    pub fn fork(&mut self, parent_handle: ProcHandle, child_vas: Vas<()>) -> Result<(ProcHandle, u32)> {
        let parent = self
            .procs
            .get(parent_handle)
            .ok_or(KernelError::NoSuchEntity)?;

        let child_pid = self.alloc_pid();

        let child_children = self
            .exitgroups
            .insert(ExitGroup::new(Some(child_pid)))
            .map_err(|_| KernelError::OutOfSpace)?;
        // The child's own exit status is posted into the parent's
        // children-group, and that group gains one more reference.
        let parent_children_group = parent.children;
        if let Some(g) = self.exitgroups.get(parent_children_group) {
            g.add_ref();
        }

        let sched_node = self
            .sched
            .sched_node(self.sched.root())
            .ok_or(KernelError::OutOfSpace)?;

        let (identities, identity_len) = parent.identities();
        let (cmd, cmd_len) = parent.command();
        let pgrp = parent.pgrp;
        let handler = parent.notify_handler.get();

        let child = Proc::new(
            child_pid,
            child_vas,
            sched_node,
            child_children,
            parent_children_group,
            pgrp,
        );
        child.set_identities(&identities[..identity_len]);
        child.set_command(&cmd[..cmd_len]);
        child.notify_handler.set(handler);

        let child_handle = self.procs.insert(child).map_err(|_| KernelError::OutOfSpace)?;

        let child_thread_pid = self.alloc_pid();
        let child_thread = Thread::new(child_thread_pid, child_handle);
        let child_thread_handle = self
            .threads
            .insert(child_thread)
            .map_err(|_| KernelError::OutOfSpace)?;
        let leaf = self
            .sched
            .sched_thread(sched_node, child_thread_handle)
            .ok_or(KernelError::OutOfSpace)?;
        self.sched.lsetrun(leaf);
        self.procs
            .get(child_handle)
            .expect("just inserted")
            .add_thread(child_thread_handle)?;

        Ok((child_handle, child_pid))
    }

    /// Preconditions for *exec* (spec §4.8): the calling process must be
    /// single-threaded.
    pub fn exec_precondition(&self, proc_handle: ProcHandle) -> Result<()> {
        let proc = self
            .procs
            .get(proc_handle)
            .ok_or(KernelError::NoSuchEntity)?;
        if proc.is_single_threaded() {
            Ok(())
        } else {
            Err(KernelError::Busy)
        }
    }

    /// *exec* (spec §4.8): once `exec_precondition` has passed, discard the
    /// calling process's vas down to its surviving shared mmaps
    /// (`mm::vas::exec_vas`) and attach the new binary's `segments` plus a
    /// fresh stack. Resetting the surviving thread's user registers to the
    /// new entry point is the trap-return path's job, once this returns
    /// `Ok`.
    pub fn exec(
        &mut self,
        proc_handle: ProcHandle,
        psets: &mut crate::mm::PsetTable,
        segments: &[crate::mm::pview::Pview],
        stack_pset: crate::mm::PsetHandle,
        stack_pages: usize,
    ) -> Result<()> {
        self.exec_precondition(proc_handle)?;
        let proc = self.procs.get_mut(proc_handle).ok_or(KernelError::NoSuchEntity)?;
        crate::mm::vas::exec_vas(&mut proc.vas, psets, segments, stack_pset, stack_pages)
    }

    /// *do_exit* (spec §4.8), run for `thread` with the given exit `code`.
    pub fn exit(&mut self, thread_handle: ThreadHandle, code: i32) -> Result<ExitOutcome> {
        let thread = self
            .threads
            .get(thread_handle)
            .ok_or(KernelError::NoSuchEntity)?;
        let proc_handle = thread.proc;
        let usr = thread.usr_cpu.get();
        let sys = thread.sys_cpu.get();
        let (last_event_bytes, last_event_len) = thread.last_event();

        let proc = self
            .procs
            .get(proc_handle)
            .ok_or(KernelError::NoSuchEntity)?;
        if !proc.remove_thread(thread_handle) {
            return Err(KernelError::NoSuchEntity);
        }
        proc.usr_cpu.set(proc.usr_cpu.get() + usr);
        proc.sys_cpu.set(proc.sys_cpu.get() + sys);
        let last = proc.threads().next().is_none();

        if last {
            let (children, parent) = (proc.children, proc.parent);
            if let Some(g) = self.exitgroups.get(children) {
                g.detach_parent();
            }
            if let Some(g) = self.exitgroups.get(parent) {
                g.post(ExitStatus::new(
                    proc.pid,
                    code,
                    proc.usr_cpu.get(),
                    proc.sys_cpu.get(),
                    &last_event_bytes[..last_event_len as usize],
                ));
                let drop_last = g.deref();
                if drop_last {
                    self.exitgroups.remove(parent);
                }
            }
            self.sched.remove_node(proc.sched_node);
            self.exitgroups.remove(children);
            self.procs.remove(proc_handle);
        }

        self.threads.remove(thread_handle);
        Ok(if last {
            ExitOutcome::ProcessTornDown
        } else {
            ExitOutcome::ThreadOnly
        })
    }

    /// *waits* (spec §4.8): collect the next exit status posted to
    /// `proc_handle`'s children group.
    pub fn waits(&self, proc_handle: ProcHandle, block: bool) -> Result<(WaitOutcome, Option<ExitStatus>)> {
        let proc = self
            .procs
            .get(proc_handle)
            .ok_or(KernelError::NoSuchEntity)?;
        let group = self.exitgroups.get(proc.children).ok_or(KernelError::NoSuchEntity)?;
        Ok(group.wait(block))
    }

    /// *notify* (spec §4.10): deliver `event` to one thread (`tid != 0`,
    /// matched by its own PID) or every thread under `target_pid`
    /// (`tid == 0`). `target_pid == 0` means the sender's own process.
    /// Signalling any other process requires `sender` hold a root
    /// identity ([`Proc::has_root_identity`]).
    pub fn notify(
        &self,
        sender: ProcHandle,
        target_pid: u32,
        tid: u32,
        event: &[u8],
    ) -> Result<()> {
        let sender_proc = self.procs.get(sender).ok_or(KernelError::NoSuchEntity)?;
        let target = if target_pid == 0 {
            sender_proc
        } else {
            self.procs
                .iter()
                .find(|p| p.pid == target_pid)
                .ok_or(KernelError::NoSuchEntity)?
        };

        if target.pid != sender_proc.pid && !sender_proc.has_root_identity() {
            return Err(KernelError::AccessDenied);
        }

        let mut hit = false;
        for th in target.threads() {
            let Some(t) = self.threads.get(th) else { continue };
            if tid != 0 && t.pid != tid {
                continue;
            }
            t.signal(event, false);
            hit = true;
            if tid != 0 {
                break;
            }
        }
        if hit {
            Ok(())
        } else {
            Err(KernelError::NoSuchEntity)
        }
    }
}

impl Default for ProcTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A small fixed-capacity snapshot of in-use PIDs, used only to give
/// `PidAllocator::alloc` a `Clone` iterator without re-borrowing the proc
/// and thread arenas while it scans (the allocator may iterate the set
/// more than once during a single refill).
mod heapless_pids {
    use crate::proc::MAX_THREADS;

    pub struct Snapshot {
        pids: [u32; MAX_THREADS],
        len: usize,
    }

    impl Snapshot {
        pub fn iter(&self) -> impl Iterator<Item = u32> + Clone + '_ {
            self.pids[..self.len].iter().copied()
        }
    }

    pub fn snapshot(used: impl Iterator<Item = u32>) -> Snapshot {
        let mut pids = [0u32; MAX_THREADS];
        let mut len = 0;
        for pid in used {
            if len == MAX_THREADS {
                break;
            }
            pids[len] = pid;
            len += 1;
        }
        Snapshot { pids, len }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_vas() -> Vas<()> {
        Vas::new((), 0x8000_0000)
    }

    #[test_case]
    fn spawn_root_produces_a_runnable_thread() {
        let mut table = ProcTable::new();
        let (proc_handle, thread_handle) = table.spawn_root(root_vas()).unwrap();
        assert!(table.proc(proc_handle).is_some());
        assert!(table.thread(thread_handle).is_some());
        assert_eq!(table.pick_next(), Some(thread_handle));
    }

    #[test_case]
    fn spawn_boot_task_maps_text_data_and_stack_with_a_sys_identity() {
        let mut table = ProcTable::new();
        let mut psets: crate::mm::PsetTable = crate::arena::Arena::new();
        let task = BootTask {
            frame_base: 10,
            text_vaddr: 0x1000,
            text_pages: 4,
            data_vaddr: 0x5000,
            data_pages: 2,
            entry: 0x1000,
        };

        let (proc_handle, thread_handle) =
            table.spawn_boot_task(&mut psets, task, 0x8000_0000, 1).unwrap();

        let vas = &table.proc(proc_handle).unwrap().vas;
        let (_, text_view) = vas.find(0x1000).unwrap();
        assert_eq!(text_view.len_pages, 4);
        let (_, data_view) = vas.find(0x5000).unwrap();
        assert_eq!(data_view.len_pages, 2);
        assert!(vas.find(0x8000_0000 - crate::mm::PAGE_SIZE).is_some());

        let (ids, len) = table.proc(proc_handle).unwrap().identities();
        assert_eq!(len, 1);
        assert_eq!(ids[0].id_bytes(), b"sys");
        assert!(!ids[0].disabled);

        assert_eq!(table.pick_next(), Some(thread_handle));
    }

    #[test_case]
    fn fork_thread_adds_a_second_thread_to_the_same_process() {
        let mut table = ProcTable::new();
        let (proc_handle, _) = table.spawn_root(root_vas()).unwrap();
        assert!(table.exec_precondition(proc_handle).is_ok());
        table.fork_thread(proc_handle).unwrap();
        assert_eq!(table.exec_precondition(proc_handle).unwrap_err(), KernelError::Busy);
    }

    #[test_case]
    fn fork_creates_a_distinct_process_whose_exit_is_visible_to_the_parent() {
        let mut table = ProcTable::new();
        let (parent_handle, parent_thread) = table.spawn_root(root_vas()).unwrap();
        let (child_handle, _child_pid) = table.fork(parent_handle, root_vas()).unwrap();
        let child_thread = table.proc(child_handle).unwrap().threads().next().unwrap();

        table.exit(child_thread, 7).unwrap();
        let (outcome, status) = table.waits(parent_handle, true).unwrap();
        assert_eq!(outcome, WaitOutcome::Found);
        assert_eq!(status.unwrap().code, 7);

        // Parent itself still runs.
        assert!(table.thread(parent_thread).is_some());
    }

    #[test_case]
    fn exec_replaces_the_vas_with_the_new_binarys_segments() {
        use crate::mm::{
            pset::{Kind, Pset},
            pview::Pview,
        };
        use machine::hat::Protection;

        let mut table = ProcTable::new();
        let mut psets: crate::mm::PsetTable = crate::arena::Arena::new();
        let (proc_handle, _) = table.spawn_root(root_vas()).unwrap();

        let old_text = psets.insert(Pset::new(Kind::Zfod, 2)).unwrap();
        table
            .procs
            .get_mut(proc_handle)
            .unwrap()
            .vas
            .attach(Pview::new(old_text, 0x1000, 0, 2, Protection::USER_RO))
            .unwrap();

        let new_text = psets.insert(Pset::new(Kind::Zfod, 2)).unwrap();
        let stack = psets.insert(Pset::new(Kind::Zfod, 1)).unwrap();
        let segments = [Pview::new(new_text, 0x4000, 0, 2, Protection::USER_RO)];

        table.exec(proc_handle, &mut psets, &segments, stack, 1).unwrap();

        let vas = &table.proc(proc_handle).unwrap().vas;
        assert!(vas.find(0x1000).is_none());
        assert!(psets.get(old_text).is_none());
        let (_, view) = vas.find(0x4000).unwrap();
        assert_eq!(view.pset, new_text);
    }

    #[test_case]
    fn exec_rejects_a_multithreaded_process() {
        let mut table = ProcTable::new();
        let mut psets: crate::mm::PsetTable = crate::arena::Arena::new();
        let (proc_handle, _) = table.spawn_root(root_vas()).unwrap();
        table.fork_thread(proc_handle).unwrap();
        let stack = psets.insert(crate::mm::pset::Pset::new(crate::mm::pset::Kind::Zfod, 1)).unwrap();

        let err = table.exec(proc_handle, &mut psets, &[], stack, 1).unwrap_err();
        assert_eq!(err, KernelError::Busy);
    }

    fn root_permission() -> vsta_abi::label::Permission {
        vsta_abi::label::Permission {
            id: [0u8; vsta_abi::label::MAX_ID_LEN],
            id_len: 0,
            uid: 0,
            disabled: false,
        }
    }

    #[test_case]
    fn notify_delivers_to_a_single_thread_by_pid() {
        let mut table = ProcTable::new();
        let (proc_handle, thread_a) = table.spawn_root(root_vas()).unwrap();
        table.fork_thread(proc_handle).unwrap();
        let thread_b = table
            .proc(proc_handle)
            .unwrap()
            .threads()
            .find(|h| *h != thread_a)
            .unwrap();
        let tid_b = table.thread(thread_b).unwrap().pid;

        table.notify(proc_handle, 0, tid_b, b"usr1").unwrap();

        assert!(!table.thread(thread_a).unwrap().events.process.is_set());
        let (bytes, len) = table.thread(thread_b).unwrap().events.process.take().unwrap();
        assert_eq!(&bytes[..len], b"usr1");
    }

    #[test_case]
    fn notify_with_zero_tid_delivers_to_every_thread_under_the_proc() {
        let mut table = ProcTable::new();
        let (proc_handle, thread_a) = table.spawn_root(root_vas()).unwrap();
        table.fork_thread(proc_handle).unwrap();
        let thread_b = table
            .proc(proc_handle)
            .unwrap()
            .threads()
            .find(|h| *h != thread_a)
            .unwrap();

        table.notify(proc_handle, 0, 0, b"usr2").unwrap();

        assert!(table.thread(thread_a).unwrap().events.process.is_set());
        assert!(table.thread(thread_b).unwrap().events.process.is_set());
    }

    #[test_case]
    fn notify_to_another_process_is_denied_without_a_root_identity() {
        let mut table = ProcTable::new();
        let (parent_handle, _) = table.spawn_root(root_vas()).unwrap();
        let (child_handle, _) = table.fork(parent_handle, root_vas()).unwrap();
        let target_pid = table.proc(child_handle).unwrap().pid;

        let err = table.notify(parent_handle, target_pid, 0, b"usr1").unwrap_err();
        assert_eq!(err, KernelError::AccessDenied);
    }

    #[test_case]
    fn notify_to_another_process_succeeds_with_a_root_identity() {
        let mut table = ProcTable::new();
        let (parent_handle, _) = table.spawn_root(root_vas()).unwrap();
        let (child_handle, _) = table.fork(parent_handle, root_vas()).unwrap();
        let target_pid = table.proc(child_handle).unwrap().pid;
        table.procs.get_mut(parent_handle).unwrap().set_identities(&[root_permission()]);

        table.notify(parent_handle, target_pid, 0, b"kill").unwrap();

        let child_thread = table.proc(child_handle).unwrap().threads().next().unwrap();
        assert!(table.thread(child_thread).unwrap().events.process.is_set());
    }
}
