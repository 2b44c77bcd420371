/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Virtual memory: page sets, views, address spaces and the pageout daemon.

pub mod fault;
pub mod pageout;
pub mod pset;
pub mod pview;
pub mod vas;

/// Bound on how many distinct page sets may be live at once. Sized well
/// above what a handful of processes with a handful of file mappings each
/// would need; see `DESIGN.md` for the reasoning behind fixed capacities
/// throughout this workspace.
pub const MAX_PSETS: usize = 256;

/// Bound on simultaneous COW children of one master pset.
pub const MAX_COW_CHILDREN: usize = 16;

/// Page size this kernel standardizes on everywhere (`DESIGN.md` Open
/// Question 1: one granule, 64 KiB, matching `machine`'s own kernel tables).
pub const PAGE_SIZE: usize = 64 * 1024;

/// Bound on how many address spaces (one per live process) may be live at
/// once; mirrors `proc::pid::MAX_PROCS`.
pub const MAX_VASES: usize = 128;

/// Bound on pages in a single pset (`Pset<N>`'s `N`), chosen to cover the
/// largest single mapping this kernel represents as one pset (a whole
/// binary's text+data, or a sizeable file mapping) without an allocator.
pub const PSET_MAX_PAGES: usize = 256;

pub type PsetHandle = crate::arena::Handle;
/// A vas's identity for a pset slot's attach list. A vas is owned
/// exclusively and permanently by one process (`proc::process::Proc.vas`
/// is a direct field, not an arena entry), so its owning process's own
/// handle doubles as its identity here rather than minting a second,
/// redundant arena just to hand out vas handles.
pub type VasHandle = crate::arena::Handle;

/// The live page-set table every pset-owning structure (a pview, a COW
/// chain, the pageout daemon) refers to by [`PsetHandle`].
pub type PsetTable = crate::arena::Arena<pset::Pset<PSET_MAX_PAGES>, MAX_PSETS>;
