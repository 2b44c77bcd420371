// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2021-2022 Andre Richter <andre.o.richter@gmail.com>

//! Coarse boot-phase state, so code can refuse operations (like writing an
//! `InitStateLock`) once concurrency becomes possible.

use core::sync::atomic::{AtomicU8, Ordering};

#[derive(Copy, Clone, Eq, PartialEq)]
enum State {
    Init = 0,
    SingleCoreMain = 1,
    MultiCoreMain = 2,
}

struct StateManager(AtomicU8);

static STATE_MANAGER: StateManager = StateManager::new();

impl StateManager {
    const fn new() -> Self {
        Self(AtomicU8::new(State::Init as u8))
    }

    pub fn is_init(&self) -> bool {
        self.0.load(Ordering::Acquire) == State::Init as u8
    }

    pub fn transition_to_single_core_main(&self) {
        assert!(
            self.is_init(),
            "transition_to_single_core_main called more than once"
        );
        self.0.store(State::SingleCoreMain as u8, Ordering::Release);
    }

    pub fn transition_to_multi_core_main(&self) {
        assert!(self.0.load(Ordering::Acquire) == State::SingleCoreMain as u8);
        self.0.store(State::MultiCoreMain as u8, Ordering::Release);
    }
}

pub fn state_manager() -> &'static StateManager {
    &STATE_MANAGER
}
