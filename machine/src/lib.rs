#![no_std]
#![no_main]
#![allow(stable_features)]
#![feature(asm_const)]
#![feature(decl_macro)]
#![feature(ptr_internals)]
#![feature(allocator_api)]
#![feature(format_args_nl)]
#![feature(core_intrinsics)]
#![feature(const_option)]
#![feature(strict_provenance)]
#![feature(stmt_expr_attributes)]
#![feature(slice_ptr_get)]
#![feature(panic_info_message)]
#![feature(nonnull_slice_from_raw_parts)] // stabilised in 1.71 nightly
#![feature(unchecked_math)]
#![feature(custom_test_frameworks)]
#![test_runner(crate::tests::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![allow(clippy::upper_case_acronyms)]
#![allow(clippy::enum_variant_names)]
#![allow(clippy::nonstandard_macro_braces)] // https://github.com/shepmaster/snafu/issues/296
#![allow(missing_docs)] // Temp: switch to deny
#![deny(warnings)]
#![allow(unused)]

#[cfg(not(target_arch = "aarch64"))]
use architecture_not_supported_sorry;

/// Architecture-specific code.
#[macro_use]
pub mod arch;
pub mod console;
pub mod cpu;
pub mod debug;
pub mod devices;
pub mod drivers;
pub mod exception;
pub mod hat;
pub mod macros;
pub mod memory;
mod mm;
pub mod mmio_deref_wrapper;
pub mod panic;
pub mod platform;
pub mod qemu;
pub mod semaphore;
pub mod spinlock;
pub mod state;
mod sync;
mod synchronization;
pub mod tests;
pub mod time;
pub mod write_to;

/// Version string.
pub fn version() -> &'static str {
    concat!(
        env!("CARGO_PKG_NAME"),
        " version ",
        env!("CARGO_PKG_VERSION")
    )
}

// The global allocator for DMA-able memory, i.e. memory tagged non-cacheable
// in the page tables. The mailbox is the only consumer so far: the
// VideoCore reads requests straight out of physical memory, so the buffer
// handed to it must never sit behind the data cache.
use buddy_alloc::{BuddyAlloc, BuddyAllocParam};
use once_cell::unsync::Lazy;

// @todo Carve this out of the region the boot memory map reports free,
// rather than a fixed window.
const DMA_HEAP_START: usize = 0x0040_0000;
const DMA_HEAP_END: usize = 0x0050_0000;

#[allow(dead_code)]
static DMA_ALLOCATOR: sync::NullLock<Lazy<BuddyAlloc>> = sync::NullLock::new(Lazy::new(|| unsafe {
    BuddyAlloc::new(BuddyAllocParam::new(
        DMA_HEAP_START as *const u8,
        DMA_HEAP_END - DMA_HEAP_START,
        64,
    ))
}));

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[panic_handler]
    fn panicked(info: &core::panic::PanicInfo) -> ! {
        panic::handler_for_tests(info)
    }

    /// Main for running tests.
    #[no_mangle]
    pub unsafe fn main() -> ! {
        exception::handling_init();
        platform::drivers::qemu_bring_up_console();
        test_main();
        qemu::semihosting::exit_success()
    }
}
