/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Hardware address translation abstraction (spec §9 "HAT abstraction").
//!
//! The VM core programs against this trait only; the concrete aarch64
//! translation-table implementation lives in `libmemory`, which keeps this
//! crate free of any per-process page-table layout decisions.

use crate::memory::{Address, Physical, Virtual};

/// Access permissions requested for an installed translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protection {
    pub writable: bool,
    pub executable: bool,
    pub user: bool,
}

impl Protection {
    pub const KERNEL_RW: Self = Self {
        writable: true,
        executable: false,
        user: false,
    };
    pub const USER_RO: Self = Self {
        writable: false,
        executable: false,
        user: true,
    };
    pub const USER_RW: Self = Self {
        writable: true,
        executable: false,
        user: true,
    };
}

/// Accessed/modified bits observed and cleared by `get_bits`, the HAT
/// equivalent of the perpage PP_R/PP_M union described in spec §4.3.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessBits {
    pub referenced: bool,
    pub modified: bool,
}

/// Errors a HAT implementation may report while installing a translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HatError {
    /// Backing translation-table storage is exhausted.
    OutOfTableMemory,
    /// The requested virtual address is already mapped.
    AlreadyMapped,
    /// No mapping exists at the given address.
    NotMapped,
}

/// Hardware address translation for one architecture.
///
/// Every operation takes `&mut Self::Vas` because translation-table edits
/// are never concurrent with themselves on a given address space: callers
/// serialize through the pview/vas locks described in spec §4.4 before
/// calling in.
pub trait Hat {
    /// Per-address-space HAT state (translation tables plus anything else
    /// the architecture needs to remember, e.g. an ASID).
    type Vas;

    /// Construct a fresh, empty address space.
    fn init_vas() -> Self::Vas;

    /// Tear down an address space. All translations must already have been
    /// removed via `delete_trans`.
    fn deinit_vas(vas: &mut Self::Vas);

    /// Make `vas` the one the current CPU translates through.
    fn switch_to_vas(vas: &Self::Vas);

    /// Install a translation `vaddr -> paddr` with permissions `prot`.
    ///
    /// # Safety
    ///
    /// The caller must guarantee `paddr` is owned by the address space for
    /// the lifetime of the mapping.
    unsafe fn install_trans(
        vas: &mut Self::Vas,
        vaddr: Address<Virtual>,
        paddr: Address<Physical>,
        prot: Protection,
    ) -> Result<(), HatError>;

    /// Remove the translation at `vaddr`, flushing any TLB entries for it
    /// before returning (spec §9: "the HAT layer must flush TLB entries
    /// removed under slot lock before releasing").
    ///
    /// # Safety
    ///
    /// The caller must hold whatever slot lock protects the underlying page
    /// for the duration of this call.
    unsafe fn delete_trans(vas: &mut Self::Vas, vaddr: Address<Virtual>);

    /// Read and clear the referenced/modified bits for `vaddr`.
    fn get_bits(vas: &mut Self::Vas, vaddr: Address<Virtual>) -> AccessBits;
}
