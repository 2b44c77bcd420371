#![no_std]
#![no_main]
#![allow(stable_features)]
#![allow(incomplete_features)]
#![allow(internal_features)]
#![feature(custom_test_frameworks)]
#![test_runner(machine::tests::test_runner)]
#![reexport_test_harness_main = "test_main"]

#[cfg(not(target_arch = "aarch64"))]
use architecture_not_supported_sorry;

pub mod hat;
pub mod malloc;
pub mod page_alloc;
pub mod perpage;
pub mod resource_map;

#[cfg(test)]
mod lib_tests {
    #[panic_handler]
    fn panicked(info: &core::panic::PanicInfo) -> ! {
        machine::panic::handler_for_tests(info)
    }

    #[no_mangle]
    pub unsafe fn main() -> ! {
        super::test_main();
        machine::qemu::semihosting::exit_success()
    }
}
