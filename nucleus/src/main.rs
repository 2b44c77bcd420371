/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

#![no_std]
#![no_main]

#[cfg(not(target_arch = "aarch64"))]
use architecture_not_supported_sorry;

mod panic;

/// Kernel entry point. `machine` is responsible for calling this once the
/// exception vectors, MMU and console are up.
#[no_mangle]
pub unsafe fn kmain() -> ! {
    machine::exception::handling_init();
    machine::platform::drivers::qemu_bring_up_console();
    nucleus::logger::init().expect("logger installs exactly once");

    log::info!("{}", machine::version());
    log::info!("booting");

    nucleus::trap::run_forever()
}
