/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Implementation of aarch64 kernel functions.

pub mod boot;
pub mod cpu;
pub mod exception;
pub mod jtag;
pub mod memory;
pub mod traps;
