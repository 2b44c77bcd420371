/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Wire format shared by the kernel and every server/client that talks to it
//! over a port: operation codes, access mode bits, the stat record grammar
//! and the permission label encoding. No kernel-internal types live here.

#![no_std]

pub mod access;
pub mod label;
pub mod msg;
pub mod op;
pub mod ptrace;
pub mod stat;

pub use access::AccessMode;
pub use label::{Permission, PermissionLabel};
pub use msg::{Segment, Sysmsg, MSGSEGS};
pub use op::Op;
