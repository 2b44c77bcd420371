/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Hierarchical weighted-tree scheduler (spec §4.9). Internal nodes carry
//! the summed weight of their runnable descendants; leaves hold one
//! thread. Picking the next thread descends from the root always taking
//! the heaviest child. `lsetrun`/`free_sched_node` insert and remove a
//! leaf and propagate the weight change up to the root, mirroring
//! `sched_node`/`sched_thread`/`lsetrun` in the original's `sched.c`.

use {
    crate::{
        arena::{Arena, Handle},
        proc::ThreadHandle,
    },
    core::cell::Cell,
};

pub type SchedHandle = Handle;

/// Bound on direct children of one scheduler node (process fan-out at one
/// level, or threads directly under one process node).
pub const MAX_CHILDREN: usize = 16;

/// Bound on total live scheduler nodes.
pub const MAX_NODES: usize = 256;

enum Kind {
    /// A grouping node (one per process, or the root).
    Internal { children: [Option<SchedHandle>; MAX_CHILDREN] },
    /// A single runnable thread.
    Leaf { thread: ThreadHandle },
}

struct Node {
    kind: Kind,
    weight: Cell<u32>,
    parent: Cell<Option<SchedHandle>>,
    runnable: Cell<bool>,
}

pub struct Scheduler {
    nodes: Arena<Node, MAX_NODES>,
    root: SchedHandle,
}

impl Scheduler {
    pub fn new() -> Self {
        let mut nodes = Arena::new();
        let root = nodes
            .insert(Node {
                kind: Kind::Internal {
                    children: [None; MAX_CHILDREN],
                },
                weight: Cell::new(0),
                parent: Cell::new(None),
                runnable: Cell::new(false),
            })
            .unwrap_or_else(|_| unreachable!("scheduler arena has room for its own root"));
        Self { nodes, root }
    }

    pub fn root(&self) -> SchedHandle {
        self.root
    }

    /// *sched_node*: allocate a new internal grouping node under `parent`
    /// (one per process, so each process's threads compete with each
    /// other before competing with other processes).
    pub fn sched_node(&mut self, parent: SchedHandle) -> Option<SchedHandle> {
        let node = Node {
            kind: Kind::Internal {
                children: [None; MAX_CHILDREN],
            },
            weight: Cell::new(0),
            parent: Cell::new(Some(parent)),
            runnable: Cell::new(false),
        };
        let handle = self.nodes.insert(node).ok()?;
        self.link(parent, handle)?;
        Some(handle)
    }

    /// *sched_thread*: allocate a leaf for `thread` under `parent`.
    pub fn sched_thread(&mut self, parent: SchedHandle, thread: ThreadHandle) -> Option<SchedHandle> {
        let node = Node {
            kind: Kind::Leaf { thread },
            weight: Cell::new(0),
            parent: Cell::new(Some(parent)),
            runnable: Cell::new(false),
        };
        let handle = self.nodes.insert(node).ok()?;
        self.link(parent, handle)?;
        Some(handle)
    }

    fn link(&mut self, parent: SchedHandle, child: SchedHandle) -> Option<()> {
        let node = self.nodes.get_mut(parent)?;
        let Kind::Internal { children } = &mut node.kind else {
            return None;
        };
        for slot in children.iter_mut() {
            if slot.is_none() {
                *slot = Some(child);
                return Some(());
            }
        }
        None
    }

    /// *lsetrun*: mark `leaf`'s thread runnable and propagate the weight
    /// increase up to the root.
    pub fn lsetrun(&self, leaf: SchedHandle) {
        if let Some(node) = self.nodes.get(leaf) {
            if matches!(node.kind, Kind::Leaf { .. }) && !node.runnable.get() {
                node.runnable.set(true);
                node.weight.set(1);
                self.propagate(leaf);
            }
        }
    }

    /// *free_sched_node* (the "remove" half): clear a leaf's runnable bit
    /// and propagate the decrease.
    pub fn clear_run(&self, leaf: SchedHandle) {
        if let Some(node) = self.nodes.get(leaf) {
            if node.runnable.get() {
                node.runnable.set(false);
                node.weight.set(0);
                self.propagate(leaf);
            }
        }
    }

    fn propagate(&self, mut handle: SchedHandle) {
        while let Some(node) = self.nodes.get(handle) {
            let Some(parent) = node.parent.get() else {
                break;
            };
            let Some(parent_node) = self.nodes.get(parent) else {
                break;
            };
            let Kind::Internal { children } = &parent_node.kind else {
                break;
            };
            let sum: u32 = children
                .iter()
                .filter_map(|c| *c)
                .filter_map(|c| self.nodes.get(c))
                .map(|n| n.weight.get())
                .sum();
            parent_node.weight.set(sum);
            handle = parent;
        }
    }

    /// *setrun* top-level pick: descend from the root always choosing the
    /// heaviest child, returning the thread at the bottom, or `None` if
    /// nothing is runnable anywhere.
    pub fn pick_next(&self) -> Option<ThreadHandle> {
        let mut cur = self.root;
        loop {
            let node = self.nodes.get(cur)?;
            match &node.kind {
                Kind::Leaf { thread } => return Some(*thread),
                Kind::Internal { children } => {
                    let heaviest = children
                        .iter()
                        .filter_map(|c| *c)
                        .filter_map(|c| self.nodes.get(c).map(|n| (c, n.weight.get())))
                        .filter(|(_, w)| *w > 0)
                        .max_by_key(|(_, w)| *w);
                    match heaviest {
                        Some((handle, _)) => cur = handle,
                        None => return None,
                    }
                }
            }
        }
    }

    pub fn remove_node(&mut self, handle: SchedHandle) {
        self.clear_run(handle);
        self.nodes.remove(handle);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread_handle(n: u32) -> ThreadHandle {
        let mut a: Arena<(), 4> = Arena::new();
        let mut h = a.insert(()).unwrap();
        for _ in 0..n {
            h = a.insert(()).unwrap();
        }
        h
    }

    #[test_case]
    fn single_runnable_leaf_is_picked() {
        let mut s = Scheduler::new();
        let proc_node = s.sched_node(s.root()).unwrap();
        let leaf = s.sched_thread(proc_node, thread_handle(0)).unwrap();
        assert!(s.pick_next().is_none());
        s.lsetrun(leaf);
        assert!(s.pick_next().is_some());
    }

    #[test_case]
    fn clearing_the_only_runnable_leaf_leaves_nothing_to_pick() {
        let mut s = Scheduler::new();
        let proc_node = s.sched_node(s.root()).unwrap();
        let leaf = s.sched_thread(proc_node, thread_handle(0)).unwrap();
        s.lsetrun(leaf);
        s.clear_run(leaf);
        assert!(s.pick_next().is_none());
    }

    #[test_case]
    fn two_processes_each_get_picked_while_runnable() {
        let mut s = Scheduler::new();
        let p1 = s.sched_node(s.root()).unwrap();
        let p2 = s.sched_node(s.root()).unwrap();
        let t1 = s.sched_thread(p1, thread_handle(0)).unwrap();
        let t2 = s.sched_thread(p2, thread_handle(1)).unwrap();
        s.lsetrun(t1);
        s.lsetrun(t2);
        // Both subtrees carry equal weight; whichever is picked must be
        // one of the two runnable threads, not nothing.
        assert!(s.pick_next().is_some());
        s.clear_run(t1);
        assert!(s.pick_next().is_some());
        s.clear_run(t2);
        assert!(s.pick_next().is_none());
    }
}
