/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Two-level, 64 KiB granule translation tables for a single process.
//!
//! Same descriptor encoding as `machine`'s static kernel table
//! (`arch::aarch64::memory::mmu::translation_table`), but the leaf (lvl3)
//! frames are allocated lazily, one 512 MiB window at a time, instead of
//! being declared up front: a root table entry starts invalid and is filled
//! in by the first [`RootTable::ensure_leaf`] call that needs it.

use {
    crate::perpage::Pfn,
    aarch64_cpu::asm::barrier,
    core::arch::asm,
    machine::{
        arch::aarch64::memory::mmu::mair,
        hat::{AccessBits, HatError, Protection},
        memory::mmu::{AccessPermissions, AttributeFields, MemAttributes, TranslationGranule},
        memory::{Address, Physical, Virtual},
    },
    tock_registers::{
        interfaces::{Readable, Writeable},
        register_bitfields,
        registers::InMemoryRegister,
    },
};

/// The granule `machine` maps the kernel with; per-process tables use the
/// same page size so a process's pages and the kernel's DMA/heap windows
/// are fungible.
type Granule64KiB = TranslationGranule<{ 64 * 1024 }>;
type Granule512MiB = TranslationGranule<{ 512 * 1024 * 1024 }>;

const ENTRIES_PER_TABLE: usize = 8192;

register_bitfields! {
    u64,
    TABLE_DESCRIPTOR [
        NEXT_LEVEL_TABLE_ADDR_64KiB OFFSET(16) NUMBITS(32) [],
        TYPE VALID_TABLE OFFSET(1) NUMBITS(1) [Block = 0, Table = 1],
        VALID OFFSET(0) NUMBITS(1) [False = 0, True = 1]
    ]
}

register_bitfields! {
    u64,
    PAGE_DESCRIPTOR [
        UXN OFFSET(54) NUMBITS(1) [Execute = 0, NeverExecute = 1],
        PXN OFFSET(53) NUMBITS(1) [Execute = 0, NeverExecute = 1],
        OUTPUT_ADDR_64KiB OFFSET(16) NUMBITS(32) [],
        AF OFFSET(10) NUMBITS(1) [NotAccessed = 0, Accessed = 1],
        SH OFFSET(8) NUMBITS(2) [OuterShareable = 0b10, InnerShareable = 0b11],
        AP OFFSET(6) NUMBITS(2) [
            RW_EL1 = 0b00,
            RW_EL1_EL0 = 0b01,
            RO_EL1 = 0b10,
            RO_EL1_EL0 = 0b11
        ],
        AttrIndx OFFSET(2) NUMBITS(3) [],
        TYPE OFFSET(1) NUMBITS(1) [Reserved = 0, Page = 1],
        VALID OFFSET(0) NUMBITS(1) [False = 0, True = 1]
    ]
}

fn attribute_fields(prot: Protection) -> AttributeFields {
    AttributeFields {
        mem_attributes: MemAttributes::CacheableDRAM,
        acc_perms: if prot.writable {
            AccessPermissions::ReadWrite
        } else {
            AccessPermissions::ReadOnly
        },
        execute_never: !prot.executable,
    }
}

fn page_descriptor_value(paddr: Address<Physical>, prot: Protection) -> u64 {
    let reg = InMemoryRegister::<u64, PAGE_DESCRIPTOR::Register>::new(0);
    let attrs = attribute_fields(prot);

    let sh_attr = match attrs.mem_attributes {
        MemAttributes::CacheableDRAM => {
            PAGE_DESCRIPTOR::SH::InnerShareable + PAGE_DESCRIPTOR::AttrIndx.val(mair::attr::NORMAL)
        }
        MemAttributes::NonCacheableDRAM => {
            PAGE_DESCRIPTOR::SH::InnerShareable
                + PAGE_DESCRIPTOR::AttrIndx.val(mair::attr::NORMAL_NON_CACHEABLE)
        }
        MemAttributes::Device => {
            PAGE_DESCRIPTOR::SH::OuterShareable + PAGE_DESCRIPTOR::AttrIndx.val(mair::attr::DEVICE_NGNRE)
        }
    };
    let ap_attr = match attrs.acc_perms {
        AccessPermissions::ReadOnly => {
            if prot.user {
                PAGE_DESCRIPTOR::AP::RO_EL1_EL0
            } else {
                PAGE_DESCRIPTOR::AP::RO_EL1
            }
        }
        AccessPermissions::ReadWrite => {
            if prot.user {
                PAGE_DESCRIPTOR::AP::RW_EL1_EL0
            } else {
                PAGE_DESCRIPTOR::AP::RW_EL1
            }
        }
    };
    let pxn_attr = if attrs.execute_never {
        PAGE_DESCRIPTOR::PXN::NeverExecute
    } else {
        PAGE_DESCRIPTOR::PXN::Execute
    };

    let shifted = (paddr.as_usize() as u64) >> Granule64KiB::SHIFT;
    reg.write(
        PAGE_DESCRIPTOR::OUTPUT_ADDR_64KiB.val(shifted)
            + PAGE_DESCRIPTOR::AF::Accessed
            + PAGE_DESCRIPTOR::TYPE::Page
            + PAGE_DESCRIPTOR::VALID::True
            + PAGE_DESCRIPTOR::UXN::NeverExecute
            + sh_attr
            + ap_attr
            + pxn_attr,
    );
    reg.get()
}

fn table_descriptor_value(leaf_paddr: usize) -> u64 {
    let reg = InMemoryRegister::<u64, TABLE_DESCRIPTOR::Register>::new(0);
    let shifted = (leaf_paddr as u64) >> Granule64KiB::SHIFT;
    reg.write(
        TABLE_DESCRIPTOR::NEXT_LEVEL_TABLE_ADDR_64KiB.val(shifted)
            + TABLE_DESCRIPTOR::TYPE::VALID_TABLE::Table
            + TABLE_DESCRIPTOR::VALID::True,
    );
    reg.get()
}

fn index_for(vaddr: Address<Virtual>) -> (usize, usize) {
    let v = vaddr.as_usize();
    let l2 = (v >> Granule512MiB::SHIFT) & (ENTRIES_PER_TABLE - 1);
    let l3 = (v >> Granule64KiB::SHIFT) & (ENTRIES_PER_TABLE - 1);
    (l2, l3)
}

/// A physical frame backing one level of the table, dereferenced through
/// the kernel's identity mapping of DRAM.
pub struct TableFrame {
    pfn: Pfn,
}

impl TableFrame {
    pub fn from_pfn(pfn: Pfn) -> Self {
        Self { pfn }
    }

    pub fn pfn(&self) -> Pfn {
        self.pfn
    }

    fn phys_addr(&self) -> usize {
        self.pfn * Granule64KiB::SIZE
    }

    fn entries(&self) -> &'static mut [u64; ENTRIES_PER_TABLE] {
        // SAFETY: the frame is owned exclusively by this Vas/leaf and DRAM is
        // identity-mapped for the kernel, per `kernel_virt_to_phys_region`.
        unsafe { &mut *(self.phys_addr() as *mut [u64; ENTRIES_PER_TABLE]) }
    }

    pub fn zero(&mut self) {
        self.entries().fill(0);
    }
}

/// A leaf (lvl3) table: 8192 64 KiB page descriptors.
pub struct LeafTable<'a> {
    entries: &'a mut [u64; ENTRIES_PER_TABLE],
}

impl<'a> LeafTable<'a> {
    pub fn is_present(&self, vaddr: Address<Virtual>) -> bool {
        let (_, l3) = index_for(vaddr);
        self.entries[l3] & 1 != 0
    }

    pub fn install(&mut self, vaddr: Address<Virtual>, paddr: Address<Physical>, prot: Protection) {
        let (_, l3) = index_for(vaddr);
        self.entries[l3] = page_descriptor_value(paddr, prot);
    }

    pub fn remove(&mut self, vaddr: Address<Virtual>) {
        let (_, l3) = index_for(vaddr);
        self.entries[l3] = 0;
    }

    pub fn take_access_bits(&mut self, vaddr: Address<Virtual>) -> AccessBits {
        let (_, l3) = index_for(vaddr);
        let reg = InMemoryRegister::<u64, PAGE_DESCRIPTOR::Register>::new(self.entries[l3]);
        let referenced = reg.is_set(PAGE_DESCRIPTOR::AF);
        if referenced {
            let cleared = reg.get() & !(1 << 10);
            self.entries[l3] = cleared;
        }
        // AArch64 has no software-visible dirty bit without the hardware
        // DBM extension; callers that need precise write tracking must map
        // pages read-only and observe the write fault instead.
        AccessBits {
            referenced,
            modified: false,
        }
    }
}

/// The root (lvl2) table for one address space.
pub struct RootTable<'a> {
    entries: &'a mut [u64; ENTRIES_PER_TABLE],
}

impl<'a> RootTable<'a> {
    pub fn borrow(frame: &TableFrame) -> Self {
        Self {
            entries: frame.entries(),
        }
    }

    pub fn find_leaf(&mut self, vaddr: Address<Virtual>) -> Option<LeafTable<'_>> {
        let (l2, _) = index_for(vaddr);
        let desc = self.entries[l2];
        if desc & 1 == 0 {
            return None;
        }
        let leaf_phys = ((desc >> 16) << Granule64KiB::SHIFT) as usize;
        let entries = unsafe { &mut *(leaf_phys as *mut [u64; ENTRIES_PER_TABLE]) };
        Some(LeafTable { entries })
    }

    /// Return the leaf table for `vaddr`'s 512 MiB window, allocating and
    /// linking a fresh one via `alloc` if none exists yet.
    pub fn ensure_leaf<F>(
        &mut self,
        vaddr: Address<Virtual>,
        alloc: F,
    ) -> Result<LeafTable<'_>, HatError>
    where
        F: FnOnce() -> Result<TableFrame, HatError>,
    {
        let (l2, _) = index_for(vaddr);
        if self.entries[l2] & 1 == 0 {
            let mut frame = alloc()?;
            frame.zero();
            self.entries[l2] = table_descriptor_value(frame.phys_addr());
            core::mem::forget(frame); // ownership now lives in `Vas::children`
        }
        Ok(self.find_leaf(vaddr).expect("just installed"))
    }
}

/// Point TTBR0_EL1 at `root` and invalidate the ASID-tagged TLB entries.
pub fn activate(root: &TableFrame) {
    use aarch64_cpu::registers::TTBR0_EL1;

    TTBR0_EL1.set_baddr(root.phys_addr() as u64);
    unsafe {
        barrier::isb(barrier::SY);
        asm!("tlbi vmalle1is");
        barrier::dsb(barrier::ISH);
        barrier::isb(barrier::SY);
    }
}

/// Invalidate any cached translation for `vaddr` across inner-shareable
/// observers.
pub fn flush_tlb_entry(vaddr: Address<Virtual>) {
    let page = (vaddr.as_usize() >> 12) as u64;
    unsafe {
        barrier::dsb(barrier::ISH);
        asm!("tlbi vaae1is, {page}", page = in(reg) page);
        barrier::dsb(barrier::ISH);
        barrier::isb(barrier::SY);
    }
}
