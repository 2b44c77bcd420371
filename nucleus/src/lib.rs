/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

#![no_std]
#![no_main]
#![allow(stable_features)]
#![allow(incomplete_features)]
#![allow(internal_features)]
#![feature(custom_test_frameworks)]
#![test_runner(machine::tests::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![allow(clippy::upper_case_acronyms)]
#![allow(clippy::enum_variant_names)]

#[cfg(not(target_arch = "aarch64"))]
use architecture_not_supported_sorry;

// Kernel proper: virtual memory, port/message IPC, and the process/thread
// core that turns `machine`'s hardware plumbing and `libmemory`'s page
// allocator into a running system. Everything here is policy; mechanism
// lives one layer down.

pub mod arena;
pub mod errors;
pub mod ipc;
pub mod logger;
pub mod mm;
pub mod proc;
pub mod trap;

#[cfg(test)]
mod lib_tests {
    #[panic_handler]
    fn panicked(info: &core::panic::PanicInfo) -> ! {
        machine::panic::handler_for_tests(info)
    }

    #[no_mangle]
    pub unsafe fn main() -> ! {
        super::test_main();
        machine::qemu::semihosting::exit_success()
    }
}
