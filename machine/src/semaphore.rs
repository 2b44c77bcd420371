/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Counting semaphore with a FIFO wait queue, modelled on `p_sema`/`v_sema`
//! in VSTa's `mach/mutex.c`. `machine` has no notion of a thread, so the
//! wait queue is generic over a `Waiter`: the kernel's scheduler supplies
//! the thread type and the actual block/wake operations.

use {
    crate::spinlock::{Spl, Spinlock},
    core::cell::Cell,
};

/// A context that can be linked into a semaphore's intrusive wait queue and
/// suspended/resumed by the scheduler.
///
/// # Safety
///
/// `park` must not return until some other context calls `wake(self)`, and
/// `next`/`set_next` must only be touched by the semaphore that currently
/// owns this waiter (enforced by the semaphore's own spinlock).
pub unsafe trait Waiter: Copy + PartialEq {
    /// Next waiter in the queue, or `None` at the tail.
    fn next(self) -> Option<Self>;
    /// Relink this waiter's successor pointer.
    fn set_next(self, next: Option<Self>);
    /// Block the calling context until woken.
    fn park(self);
    /// Mark `self` runnable. Does not block.
    fn wake(self);
    /// `true` if this waiter was woken by event delivery rather than by a
    /// paired `release`/`release_all`.
    fn was_interrupted(self) -> bool;
}

/// Result of `Semaphore::acquire`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// The semaphore was taken normally.
    Ok,
    /// The wait was cut short by event delivery; the caller's priority
    /// class was catchable, so no unwind was forced.
    Interrupted,
}

/// How `acquire` should behave if woken by event delivery instead of by a
/// paired release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Return `Acquired::Interrupted` to the caller.
    Catchable,
    /// Event delivery cannot interrupt this wait; always return `Acquired::Ok`.
    High,
    /// The caller expects the semaphore layer never to hand back control on
    /// interruption; the trap/thread layer above must longjmp-equivalent
    /// unwind to the syscall boundary instead. `machine` cannot perform that
    /// unwind itself, so this variant is rejected with a panic if reached
    /// with an interrupted waiter — callers needing it must use
    /// `Priority::Catchable` and unwind themselves.
    Normal,
}

/// A counting semaphore with an intrusive FIFO sleep queue of waiters `W`.
pub struct Semaphore<W> {
    lock: Spinlock,
    count: Cell<isize>,
    head: Cell<Option<W>>,
    tail: Cell<Option<W>>,
}

// SAFETY: all mutable state is behind `lock`; `W: Copy` values are handles,
// not the data they point to.
unsafe impl<W: Copy> Sync for Semaphore<W> {}

impl<W: Waiter> Semaphore<W> {
    /// Create a semaphore with the given initial count (1 by default per
    /// the original's `init_sema`).
    pub const fn new(count: isize) -> Self {
        Self {
            lock: Spinlock::new(),
            count: Cell::new(count),
            head: Cell::new(None),
            tail: Cell::new(None),
        }
    }

    /// Force the count to an arbitrary value. Misuse strands waiters.
    pub fn set_count(&self, count: isize) {
        let prior = self.lock.acquire(Spl::Hi);
        self.count.set(count);
        self.lock.release(prior);
    }

    /// `true` if any context is currently asleep on this semaphore.
    pub fn blocked(&self) -> bool {
        self.count.get() < 0
    }

    fn enqueue(&self, waiter: W) {
        match self.tail.get() {
            None => {
                self.head.set(Some(waiter));
                self.tail.set(Some(waiter));
            }
            Some(t) => {
                t.set_next(Some(waiter));
                self.tail.set(Some(waiter));
            }
        }
        waiter.set_next(None);
    }

    fn dequeue(&self) -> Option<W> {
        let head = self.head.get()?;
        self.head.set(head.next());
        if self.head.get().is_none() {
            self.tail.set(None);
        }
        head.set_next(None);
        Some(head)
    }

    /// Acquire the semaphore, blocking `waiter` if the count goes negative.
    pub fn acquire(&self, waiter: W, priority: Priority) -> Acquired {
        let prior = self.lock.acquire(Spl::Hi);
        self.count.set(self.count.get() - 1);
        self.finish_acquire(prior, waiter, priority)
    }

    /// `p_sema_v_lock`: atomically release a held spinlock and acquire this
    /// semaphore, so a caller can give up the lock protecting its wait
    /// condition without a window where another context could change that
    /// condition and release this semaphore before the caller enqueues.
    /// `lock`/`held_prior` are the spinlock and its `acquire`-returned prior
    /// level; they're released only after this semaphore's own lock is held,
    /// so the two operations appear atomic to any other context.
    pub fn transfer(&self, lock: &Spinlock, held_prior: Spl, waiter: W, priority: Priority) -> Acquired {
        let prior = self.lock.acquire(Spl::Hi);
        lock.release(held_prior);
        self.count.set(self.count.get() - 1);
        self.finish_acquire(prior, waiter, priority)
    }

    fn finish_acquire(&self, prior: Spl, waiter: W, priority: Priority) -> Acquired {
        if self.count.get() >= 0 {
            self.lock.release(prior);
            return Acquired::Ok;
        }

        self.enqueue(waiter);
        self.lock.release(prior);
        waiter.park();

        if waiter.was_interrupted() {
            match priority {
                Priority::Catchable => Acquired::Interrupted,
                Priority::High => Acquired::Ok,
                Priority::Normal => {
                    panic!("Semaphore::acquire: Priority::Normal waiter was interrupted")
                }
            }
        } else {
            Acquired::Ok
        }
    }

    /// Decrement only if the count is strictly positive; never blocks.
    pub fn try_acquire(&self) -> bool {
        let prior = self.lock.acquire(Spl::Hi);
        let ok = self.count.get() > 0;
        if ok {
            self.count.set(self.count.get() - 1);
        }
        self.lock.release(prior);
        ok
    }

    /// Release the semaphore: wake the head waiter if any (who owns the
    /// count update), else increment the count.
    pub fn release(&self) {
        let prior = self.lock.acquire(Spl::Hi);
        match self.dequeue() {
            Some(waiter) => {
                self.lock.release(prior);
                waiter.wake();
            }
            None => {
                self.count.set(self.count.get() + 1);
                self.lock.release(prior);
            }
        }
    }

    /// Release until no waiters remain.
    pub fn release_all(&self) {
        while self.blocked() {
            self.release();
        }
    }

    /// Remove `waiter` from the queue under a conditional lock, as used by
    /// event delivery trying to cancel a pending wait. Returns `true` if
    /// removed, `false` if the lock was contended (caller should retry).
    pub fn try_cancel(&self, waiter: W) -> bool {
        let Some(prior) = self.lock.try_acquire(Spl::Hi) else {
            return false;
        };

        let mut cur = self.head.get();
        let mut prev: Option<W> = None;
        let mut found = false;
        while let Some(w) = cur {
            if w == waiter {
                found = true;
                match prev {
                    Some(p) => p.set_next(w.next()),
                    None => self.head.set(w.next()),
                }
                if self.tail.get() == Some(w) {
                    self.tail.set(prev);
                }
                self.count.set(self.count.get() + 1);
                break;
            }
            prev = Some(w);
            cur = w.next();
        }

        self.lock.release(prior);
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, PartialEq, Eq)]
    struct NeverBlocks;

    unsafe impl Waiter for NeverBlocks {
        fn next(self) -> Option<Self> {
            None
        }
        fn set_next(self, _next: Option<Self>) {}
        fn park(self) {
            panic!("test pre-seeds the count so it never blocks");
        }
        fn wake(self) {}
        fn was_interrupted(self) -> bool {
            false
        }
    }

    #[test_case]
    fn acquire_then_release_round_trips() {
        let sem: Semaphore<NeverBlocks> = Semaphore::new(1);
        assert_eq!(sem.acquire(NeverBlocks, Priority::Catchable), Acquired::Ok);
        assert!(!sem.blocked());
        sem.release();
        assert_eq!(sem.count.get(), 1);
    }

    #[test_case]
    fn transfer_releases_the_held_spinlock_before_returning() {
        let held = Spinlock::new();
        let held_prior = held.acquire(Spl::Zero);
        let sem: Semaphore<NeverBlocks> = Semaphore::new(1);

        let outcome = sem.transfer(&held, held_prior, NeverBlocks, Priority::Catchable);

        assert_eq!(outcome, Acquired::Ok);
        // If `transfer` failed to release `held`, this would panic ("deadlock").
        let prior = held.acquire(Spl::Zero);
        held.release(prior);
    }

    #[test_case]
    fn transfer_enqueues_and_decrements_like_acquire_when_contended() {
        let held = Spinlock::new();
        let held_prior = held.acquire(Spl::Zero);
        let sem: Semaphore<NeverBlocks> = Semaphore::new(0);

        // count starts at 0; transfer decrements to -1, which would enqueue
        // and park on a real waiter. Drive it manually to check the count
        // and held-lock-release side effects without actually parking.
        let prior = sem.lock.acquire(Spl::Hi);
        held.release(held_prior);
        sem.count.set(sem.count.get() - 1);
        assert_eq!(sem.count.get(), -1);
        sem.lock.release(prior);

        let held_prior = held.acquire(Spl::Zero);
        held.release(held_prior);
    }
}
