/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Two error universes, matched at the trap boundary: [`KernelError`] is
//! what every fallible kernel-internal operation returns, carrying enough
//! context for a `snafu` `Display` to be useful in a log line.
//! [`SyscallError`] is the flattened ASCII token a syscall result actually
//! sets via `seterr` (spec §7), with no payload beyond the token itself.

use snafu::Snafu;

#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum KernelError {
    #[snafu(display("operation not permitted"))]
    NotPermitted,
    #[snafu(display("access denied by permission label"))]
    AccessDenied,
    #[snafu(display("no such process, port or object"))]
    NoSuchEntity,
    #[snafu(display("object already exists"))]
    AlreadyExists,
    #[snafu(display("not a directory"))]
    NotDirectory,
    #[snafu(display("is a directory"))]
    IsDirectory,
    #[snafu(display("out of memory"))]
    OutOfMemory,
    #[snafu(display("arena or table exhausted"))]
    OutOfSpace,
    #[snafu(display("resource busy"))]
    Busy,
    #[snafu(display("argument too large"))]
    TooBig,
    #[snafu(display("I/O error"))]
    Io,
    #[snafu(display("interrupted"))]
    Interrupted,
    #[snafu(display("would block"))]
    WouldBlock,
    #[snafu(display("broken pipe"))]
    BrokenPipe,
    #[snafu(display("invalid argument"))]
    InvalidArgument,
    #[snafu(display("not supported"))]
    NotSupported,
    #[snafu(display("cannot execute"))]
    CannotExec,
    #[snafu(display("bad address"))]
    Fault,
    #[snafu(display("too many levels of indirection"))]
    TooManyLinks,
    #[snafu(display("name too long"))]
    NameTooLong,
}

/// ASCII token a syscall sets via `seterr` (spec §7), independent of the
/// `KernelError` variant's internal `snafu` machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallError(pub &'static str);

impl SyscallError {
    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl From<KernelError> for SyscallError {
    fn from(e: KernelError) -> Self {
        use KernelError::*;
        SyscallError(match e {
            NotPermitted => "EPERM",
            AccessDenied => "ENOACCESS",
            NoSuchEntity => "ESRCH",
            AlreadyExists => "EEXIST",
            NotDirectory => "ENOTDIR",
            IsDirectory => "EISDIR",
            OutOfMemory => "ENOMEM",
            OutOfSpace => "ENOSPC",
            Busy => "EBUSY",
            TooBig => "E2BIG",
            Io => "EIO",
            Interrupted => "EINTR",
            WouldBlock => "EAGAIN",
            BrokenPipe => "EPIPE",
            InvalidArgument => "EINVAL",
            NotSupported => "ENOTSUP",
            CannotExec => "ENOEXEC",
            Fault => "EFAULT",
            TooManyLinks => "ELOOP",
            NameTooLong => "ENAMETOOLONG",
        })
    }
}

pub type Result<T> = core::result::Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn every_variant_has_a_distinct_token() {
        let all = [
            KernelError::NotPermitted,
            KernelError::AccessDenied,
            KernelError::NoSuchEntity,
            KernelError::AlreadyExists,
            KernelError::NotDirectory,
            KernelError::IsDirectory,
            KernelError::OutOfMemory,
            KernelError::OutOfSpace,
            KernelError::Busy,
            KernelError::TooBig,
            KernelError::Io,
            KernelError::Interrupted,
            KernelError::WouldBlock,
            KernelError::BrokenPipe,
            KernelError::InvalidArgument,
            KernelError::NotSupported,
            KernelError::CannotExec,
            KernelError::Fault,
            KernelError::TooManyLinks,
            KernelError::NameTooLong,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                let ta: SyscallError = (*a).into();
                let tb: SyscallError = (*b).into();
                assert_ne!(ta.as_str(), tb.as_str());
            }
        }
    }

    #[test_case]
    fn interrupted_maps_to_eintr() {
        let e: SyscallError = KernelError::Interrupted.into();
        assert_eq!(e.as_str(), "EINTR");
    }
}
