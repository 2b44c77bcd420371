/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Installs a minimal [`log::Log`] over `machine`'s console sink, so kernel
//! code can use `log::info!`/`log::warn!`/`log::error!` instead of calling
//! `machine::println!` directly. `machine` itself only exposes its own
//! `print!`/`println!`/`info!`/`warn!` macros with no level filtering and
//! no module-path prefix; this gives the kernel proper the same ergonomics
//! every host tool in this workspace already gets from `env_logger`.

use log::{LevelFilter, Metadata, Record};

struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        machine::println!(
            "[{level:<5} {target}] {args}",
            level = record.level(),
            target = record.target(),
            args = record.args()
        );
    }

    fn flush(&self) {}
}

/// Compiled-in filter: `debug!`/`trace!` are dropped entirely in release
/// builds rather than filtered at the call site, the way `machine`'s own
/// `#[deny(warnings)]` build keeps hot paths free of formatting overhead.
fn max_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Installs the console logger as the global `log` backend. Call exactly
/// once, early in `kmain`, after the console driver itself is up.
pub fn init() -> Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(max_level());
    Ok(())
}
