// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2020-2022 Andre Richter <andre.o.richter@gmail.com>

//! Generic asynchronous exception handling: re-exports the architectural
//! IRQ-mask primitives and holds the table of registered IRQ handlers.

#[cfg(target_arch = "aarch64")]
use crate::arch::aarch64::exception::asynchronous as arch_asynchronous;

pub use arch_asynchronous::{
    exec_with_irq_masked, is_local_irq_masked, local_irq_mask, local_irq_unmask, IRQContext,
};

use crate::synchronization::{interface::ReadWriteEx, InitStateLock};

/// A flat IRQ number, independent of whatever interrupt-controller driver
/// the board provides. The controller driver is a Non-goal of this
/// specification (spec §1, "machine-dependent assembly stubs... we specify
/// the contract those stubs must satisfy, not their contents") — this type
/// is the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IRQNumber(usize);

impl IRQNumber {
    pub const fn new(n: usize) -> Self {
        IRQNumber(n)
    }

    pub const fn get(self) -> usize {
        self.0
    }
}

/// A single registered handler: the driver's name, for diagnostics, plus
/// the trait object that actually services the interrupt.
pub struct IRQHandlerDescriptor<T: Copy> {
    number: T,
    name: &'static str,
    handler: &'static (dyn interface::IRQHandler + Sync),
}

impl<T: Copy> IRQHandlerDescriptor<T> {
    pub const fn new(
        number: T,
        name: &'static str,
        handler: &'static (dyn interface::IRQHandler + Sync),
    ) -> Self {
        Self {
            number,
            name,
            handler,
        }
    }

    pub const fn number(&self) -> T {
        self.number
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn handler(&self) -> &'static (dyn interface::IRQHandler + Sync) {
        self.handler
    }
}

pub mod interface {
    /// A device driver that services one or more IRQs.
    pub trait IRQHandler {
        /// Called with IRQs masked; must not block.
        fn handle(&self) -> Result<(), &'static str>;
    }

    /// The registry of IRQ handlers and dispatcher for pending IRQs.
    pub trait IRQManager {
        type IRQNumberType: Copy;

        fn register_handler(
            &self,
            descriptor: super::IRQHandlerDescriptor<Self::IRQNumberType>,
        ) -> Result<(), &'static str>;

        /// # Safety
        ///
        /// Must only be called from IRQ context, proven by possession of an
        /// `IRQContext` token.
        fn enable(&self, irq_number: Self::IRQNumberType);

        fn handle_pending_irqs<'irq_context>(
            &'irq_context self,
            ic: &super::IRQContext<'irq_context>,
        );
    }
}

const NUM_IRQS: usize = 64;

struct IRQTable {
    handlers: [Option<IRQHandlerDescriptor<IRQNumber>>; NUM_IRQS],
}

impl IRQTable {
    const fn new() -> Self {
        IRQTable {
            handlers: [None; NUM_IRQS],
        }
    }
}

impl Copy for IRQHandlerDescriptor<IRQNumber> {}
impl Clone for IRQHandlerDescriptor<IRQNumber> {
    fn clone(&self) -> Self {
        *self
    }
}

static IRQ_TABLE: InitStateLock<IRQTable> = InitStateLock::new(IRQTable::new());

/// The kernel-wide IRQ manager: a flat table indexed by IRQ number. Every
/// ISR the kernel ultimately delivers to user space becomes an `M_ISR`
/// message posted to the port registered for that IRQ (spec §5), so this
/// table's only job is finding which driver's `handle` to call.
pub struct IRQManagerOfIRQManagers;

impl interface::IRQManager for IRQManagerOfIRQManagers {
    type IRQNumberType = IRQNumber;

    fn register_handler(
        &self,
        descriptor: IRQHandlerDescriptor<Self::IRQNumberType>,
    ) -> Result<(), &'static str> {
        let idx = descriptor.number().get();
        if idx >= NUM_IRQS {
            return Err("IRQ number out of range");
        }

        IRQ_TABLE.write(|table| {
            if table.handlers[idx].is_some() {
                return Err("IRQ handler already registered");
            }
            table.handlers[idx] = Some(descriptor);
            Ok(())
        })
    }

    fn enable(&self, _irq_number: Self::IRQNumberType) {
        // Board-specific interrupt controller programming is out of scope
        // here; the platform driver that owns the controller enables the
        // line itself when it registers.
    }

    fn handle_pending_irqs<'irq_context>(&'irq_context self, _ic: &IRQContext<'irq_context>) {
        IRQ_TABLE.read(|table| {
            for slot in table.handlers.iter().flatten() {
                if let Err(e) = slot.handler().handle() {
                    crate::warn!("Error handling IRQ {}: {}", slot.name(), e);
                }
            }
        })
    }
}

static IRQ_MANAGER: IRQManagerOfIRQManagers = IRQManagerOfIRQManagers;

pub fn irq_manager() -> &'static IRQManagerOfIRQManagers {
    &IRQ_MANAGER
}
