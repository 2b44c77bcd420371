// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2020-2022 Andre Richter <andre.o.richter@gmail.com>

//! Custom `#[test_case]` runner: hardware-dependent tests (exception entry,
//! drivers, MMU) can't run under the host's own test harness, so they run
//! under QEMU and report pass/fail by exiting the emulator.

pub trait TestFn {
    fn run(&self);
}

impl<T> TestFn for T
where
    T: Fn(),
{
    fn run(&self) {
        crate::print!("{}...", core::any::type_name::<T>());
        self();
        crate::println!("[ok]");
    }
}

pub fn test_runner(tests: &[&dyn TestFn]) {
    crate::println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    crate::qemu::semihosting::exit_success();
}
