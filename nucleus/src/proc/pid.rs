/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Sliding-window PID allocator (spec §4.8). Keeps a contiguous range of
//! known-free PIDs in hand; when it runs dry, rescans the PIDs currently in
//! use to build a fresh window starting just above a rotating cursor.
//! Grounded on `allocpid`/`refill_pids` in the original proc.c, adapted to
//! take the set of in-use PIDs as an iterator rather than walking a global
//! process list directly.

/// Where the rotor resets to after wrapping; low PIDs are reserved for boot
/// tasks, matching the original's choice of 200.
const ROTOR_BASE: u32 = 200;

/// Width of the window claimed when no PID above the rotor is currently in
/// use (i.e. scanning found an open-ended range).
const OPEN_ENDED_WINDOW: u32 = 1 << 16;

pub struct PidAllocator {
    npid_free: u64,
    next_free: u32,
    rotor: u32,
}

impl PidAllocator {
    pub const fn new() -> Self {
        Self {
            npid_free: 0,
            next_free: 0,
            rotor: 0,
        }
    }

    /// Allocate the next PID, rescanning `used` if the window is empty.
    /// `used` must enumerate every PID currently assigned to a proc or
    /// thread; it may be iterated more than once.
    pub fn alloc<I>(&mut self, used: I) -> u32
    where
        I: Iterator<Item = u32> + Clone,
    {
        if self.npid_free == 0 {
            self.refill(used);
        }
        self.npid_free -= 1;
        let pid = self.next_free;
        self.next_free += 1;
        pid
    }

    fn refill<I>(&mut self, used: I)
    where
        I: Iterator<Item = u32> + Clone,
    {
        loop {
            if self.rotor == 0 {
                self.rotor = ROTOR_BASE;
            }
            if used.clone().any(|p| p == self.rotor) {
                // Worst case: collision right at the rotor. Advance and retry.
                self.rotor += 1;
                continue;
            }
            let pnext = used.clone().filter(|&p| p > self.rotor).min();
            match pnext {
                Some(p) => {
                    self.npid_free = (p - self.rotor) as u64;
                    self.next_free = self.rotor;
                    self.rotor = p + 1;
                }
                None => {
                    self.npid_free = OPEN_ENDED_WINDOW as u64;
                    self.next_free = self.rotor;
                    self.rotor = self.rotor.saturating_add(OPEN_ENDED_WINDOW);
                }
            }
            return;
        }
    }
}

impl Default for PidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn allocates_increasing_pids_with_no_collisions() {
        let mut a = PidAllocator::new();
        let mut used: [u32; 0] = [];
        let first = a.alloc(used.iter().copied());
        let second = a.alloc(used.iter().copied());
        assert!(second > first);
        let _ = &mut used;
    }

    #[test_case]
    fn refill_skips_pids_already_in_use() {
        let mut a = PidAllocator::new();
        // Force a window that starts exactly at ROTOR_BASE, with ROTOR_BASE
        // itself taken: the allocator must advance past it, not reuse it.
        let used = [ROTOR_BASE];
        let pid = a.alloc(used.iter().copied());
        assert_ne!(pid, ROTOR_BASE);
        assert!(pid > ROTOR_BASE);
    }

    #[test_case]
    fn window_stops_at_next_used_pid() {
        let mut a = PidAllocator::new();
        let used = [ROTOR_BASE + 3];
        let first = a.alloc(used.iter().copied());
        let second = a.alloc(used.iter().copied());
        assert_eq!(first, ROTOR_BASE);
        assert_eq!(second, ROTOR_BASE + 1);
    }
}
