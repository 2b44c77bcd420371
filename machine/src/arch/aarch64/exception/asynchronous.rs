/*
 * SPDX-License-Identifier: MIT OR BlueOak-1.0.0
 * Copyright (c) 2019 Andre Richter <andre.o.richter@gmail.com>
 * Original code distributed under MIT, additional changes are under BlueOak-1.0.0
 */

//! Architectural asynchronous exception handling: DAIF masking and the
//! token that proves IRQs are off for the duration of an IRQ handler.

use aarch64_cpu::{asm::barrier, registers::*};
use tock_registers::interfaces::Readable;

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Zero-cost proof token that this code is running with IRQs masked, handed
/// to registered IRQ handlers so they cannot be called from anywhere else.
#[derive(Clone, Copy)]
pub struct IRQContext<'irq_context> {
    _0: core::marker::PhantomData<&'irq_context ()>,
}

impl<'irq_context> IRQContext<'irq_context> {
    /// # Safety
    ///
    /// Must only be constructed in contexts where IRQs are actually masked,
    /// i.e. the top of an IRQ exception handler.
    #[inline(always)]
    pub unsafe fn new() -> Self {
        IRQContext {
            _0: core::marker::PhantomData,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Mask IRQs on the local core.
#[inline(always)]
pub fn local_irq_mask() {
    unsafe { core::arch::asm!("msr DAIFSet, {x}", x = const 2, options(nomem, nostack)) };
}

/// Unmask IRQs on the local core.
#[inline(always)]
pub fn local_irq_unmask() {
    unsafe { core::arch::asm!("msr DAIFClr, {x}", x = const 2, options(nomem, nostack)) };
}

/// True if IRQs are currently masked on the local core.
#[inline(always)]
pub fn is_local_irq_masked() -> bool {
    DAIF.matches_all(DAIF::I::Masked)
}

/// Mask IRQs, run `f`, then restore the previous mask state. This is the
/// primitive the kernel's `Spinlock` uses to raise to IPL_HIGH: it both
/// excludes other threads (via the lock word) and excludes the ISR that
/// would otherwise preempt this core while the lock is held.
#[inline(always)]
pub fn exec_with_irq_masked<T>(f: impl FnOnce() -> T) -> T {
    let was_masked = is_local_irq_masked();

    if !was_masked {
        local_irq_mask();
    }

    barrier::isb(barrier::SY);
    let ret = f();
    barrier::isb(barrier::SY);

    if !was_masked {
        local_irq_unmask();
    }

    ret
}
