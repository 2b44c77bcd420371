/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

use {
    super::{gpio, mailbox, pl011_uart},
    crate::console,
    core::sync::atomic::{AtomicBool, Ordering},
    once_cell::sync::OnceCell,
};

/// Mailbox property-tag buffer size; 36 32-bit words covers the single
/// clock-rate tag this board init needs.
const MAILBOX_ITEMS_COUNT: usize = 36;

static PL011: OnceCell<pl011_uart::PreparedPL011Uart> = OnceCell::new();

/// Bring up the board's console.
///
/// # Safety
///
/// Pokes MMIO registers directly; must run before anything else touches the
/// UART or GPIO peripherals, and only once.
pub unsafe fn init() -> Result<(), &'static str> {
    static INIT_DONE: AtomicBool = AtomicBool::new(false);
    if INIT_DONE.swap(true, Ordering::Relaxed) {
        return Err("Init already done");
    }

    let gpio = gpio::GPIO::default();
    let mbox = mailbox::Mailbox::<MAILBOX_ITEMS_COUNT>::default();
    let uart = pl011_uart::PL011Uart::default()
        .prepare(mbox, &gpio)
        .map_err(|_| "failed to bring up PL011 UART")?;

    let uart = PL011.get_or_init(|| uart);
    console::register_console(uart);

    Ok(())
}

/// Console bring-up for the test harness.
#[cfg(test)]
pub fn qemu_bring_up_console() {
    let _ = unsafe { init() };
}
