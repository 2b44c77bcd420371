// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2020-2022 Andre Richter <andre.o.richter@gmail.com>

//! Conditional reexporting of processor architecture code.

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
