/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

#[panic_handler]
fn panicked(info: &core::panic::PanicInfo) -> ! {
    machine::panic::handler(info)
}
