// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2020-2022 Andre Richter <andre.o.richter@gmail.com>

//! Diagnostic dumps used by the panic and unexpected-exception paths. Kept
//! separate from `panic` so an exception handler can print the same
//! register state without going through a full panic.

use crate::exception::PrivilegeLevel;

/// Print the current exception level and the processor state that got us
/// here. Safe to call from anywhere, including with interrupts masked.
pub fn dump_current_state() {
    let (level, _) = crate::exception::current_privilege_level();
    crate::info!("Current privilege level: {}", level_name(level));
}

fn level_name(level: PrivilegeLevel) -> &'static str {
    match level {
        PrivilegeLevel::User => "EL0 (user)",
        PrivilegeLevel::Kernel => "EL1 (kernel)",
        PrivilegeLevel::Hypervisor => "EL2 (hypervisor)",
        PrivilegeLevel::Unknown => "unknown",
    }
}
