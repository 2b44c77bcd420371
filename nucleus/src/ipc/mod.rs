/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Port/portref message IPC and the scatter/gather segment layer that
//! carries payload between address spaces.

pub mod msg;
pub mod port;
pub mod portref;
pub mod segment;
pub mod sysmsg;

pub const MAX_PORTS: usize = 128;
pub const MAX_PORTREFS: usize = 512;
