/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Interrupt-priority-level spinlock, the kernel's base mutual-exclusion
//! primitive. Modelled on the uniprocessor lock in VSTa's `mach/mutex.c`:
//! taking a lock at `Spl::Hi` masks interrupts, and the prior level is
//! returned so release can restore it.

use {
    crate::exception::asynchronous::{is_local_irq_masked, local_irq_mask, local_irq_unmask},
    core::sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// Interrupt priority level a spinlock is acquired at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spl {
    /// Interrupts stay enabled; only excludes other holders of this lock.
    Zero,
    /// Interrupts are masked for the duration of the critical section.
    Hi,
}

/// Per-CPU count of spinlocks currently held. Used by the scheduler to defer
/// preemption while any lock is held.
static LOCKS_HELD: AtomicUsize = AtomicUsize::new(0);

/// Number of spinlocks currently held on this core.
pub fn locks_held() -> usize {
    LOCKS_HELD.load(Ordering::Relaxed)
}

/// A uniprocessor-safe spinlock with interrupt-priority-level semantics.
pub struct Spinlock {
    held: AtomicBool,
}

impl Spinlock {
    /// Create a lock in the "not held" state.
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    /// Acquire the lock at priority level `spl`, returning the level that
    /// was in effect beforehand so a matching `release` can restore it.
    ///
    /// # Panics
    ///
    /// Panics on recursive acquisition, matching the original's debug assert.
    pub fn acquire(&self, spl: Spl) -> Spl {
        let was_masked = if matches!(spl, Spl::Hi) {
            let was_masked = is_local_irq_masked();
            local_irq_mask();
            was_masked
        } else {
            is_local_irq_masked()
        };

        assert!(!self.held.swap(true, Ordering::Acquire), "Spinlock: deadlock");
        LOCKS_HELD.fetch_add(1, Ordering::Relaxed);

        if was_masked {
            Spl::Hi
        } else {
            Spl::Zero
        }
    }

    /// Acquire only if uncontended. Returns the prior level on success.
    pub fn try_acquire(&self, spl: Spl) -> Option<Spl> {
        let was_masked = if matches!(spl, Spl::Hi) {
            let was_masked = is_local_irq_masked();
            local_irq_mask();
            was_masked
        } else {
            is_local_irq_masked()
        };

        if self.held.swap(true, Ordering::Acquire) {
            if matches!(spl, Spl::Hi) && !was_masked {
                local_irq_unmask();
            }
            return None;
        }

        LOCKS_HELD.fetch_add(1, Ordering::Relaxed);
        Some(if was_masked { Spl::Hi } else { Spl::Zero })
    }

    /// Release the lock, restoring the priority level `prior` returned by
    /// the matching `acquire`/`try_acquire`.
    pub fn release(&self, prior: Spl) {
        assert!(self.held.swap(false, Ordering::Release), "Spinlock: not held");
        LOCKS_HELD.fetch_sub(1, Ordering::Relaxed);

        if matches!(prior, Spl::Zero) {
            local_irq_unmask();
        }
    }
}

impl Default for Spinlock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn acquire_release_round_trips() {
        let lock = Spinlock::new();
        let prior = lock.acquire(Spl::Zero);
        lock.release(prior);
        assert_eq!(locks_held(), 0);
    }

    #[test_case]
    fn try_acquire_fails_on_contention() {
        let lock = Spinlock::new();
        let prior = lock.acquire(Spl::Zero);
        assert!(lock.try_acquire(Spl::Zero).is_none());
        lock.release(prior);
    }
}
