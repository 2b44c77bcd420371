/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Access mode bitmask carried by `FS_OPEN` (spec §6 "Access modes").

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessMode: u32 {
        const READ    = 1 << 0;
        const WRITE   = 1 << 1;
        const CREATE  = 1 << 2;
        const EXEC    = 1 << 3;
        const CHMOD   = 1 << 4;
        /// Directory type.
        const DIR     = 1 << 5;
        /// Don't allocate a new portref on open; dup the caller's instead.
        const NOCLONE = 1 << 6;
        /// Operate on the symlink itself rather than its target.
        const SYM     = 1 << 7;
        /// Select exception condition.
        const EXCEP   = 1 << 8;
        /// select(2) layer's internal "this port doesn't support select" bit.
        const UNSUPP  = 1 << 9;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composes_like_a_bitmask() {
        let m = AccessMode::READ | AccessMode::WRITE;
        assert!(m.contains(AccessMode::READ));
        assert!(m.contains(AccessMode::WRITE));
        assert!(!m.contains(AccessMode::CREATE));
    }
}
