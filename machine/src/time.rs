// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2020-2022 Andre Richter <andre.o.richter@gmail.com>

//! Monotonic time, read off the architectural generic timer. Every subsystem
//! that needs a timestamp or a deadline (the scheduler's quantum, a
//! semaphore's timed wait, the console's `info!`/`warn!` stamps) goes through
//! this single `TimeManager`, not the register directly.

use core::time::Duration;

#[cfg(target_arch = "aarch64")]
use aarch64_cpu::{asm::barrier, registers::*};
#[cfg(target_arch = "aarch64")]
use tock_registers::interfaces::Readable;

const NS_PER_S: u64 = 1_000_000_000;

pub struct TimeManager;

static TIME_MANAGER: TimeManager = TimeManager;

pub fn time_manager() -> &'static TimeManager {
    &TIME_MANAGER
}

impl TimeManager {
    #[cfg(target_arch = "aarch64")]
    fn counter_frequency(&self) -> u64 {
        CNTFRQ_EL0.get()
    }

    #[cfg(target_arch = "aarch64")]
    fn counter_value(&self) -> u64 {
        barrier::isb(barrier::SY);
        CNTPCT_EL0.get()
    }

    /// Time elapsed since the counter was last reset (usually, since boot).
    pub fn uptime(&self) -> Duration {
        #[cfg(target_arch = "aarch64")]
        {
            let frq = self.counter_frequency();
            let ticks = self.counter_value();
            let secs = ticks / frq;
            let subsec_ticks = ticks % frq;
            let nanos = (subsec_ticks * NS_PER_S) / frq;
            Duration::new(secs, nanos as u32)
        }
        #[cfg(not(target_arch = "aarch64"))]
        {
            Duration::ZERO
        }
    }

    /// Busy-wait for at least `duration`. Used only below the scheduler's
    /// reach (hardware bring-up, lock backoff); anything that can block
    /// should sleep on a semaphore instead.
    pub fn spin_for(&self, duration: Duration) {
        let curr = self.uptime();
        let target = curr + duration;
        while self.uptime() < target {
            core::hint::spin_loop();
        }
    }
}
