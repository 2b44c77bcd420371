/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Client-side handle to a port (spec §3 "Portref", §4.7 state machine).
//!
//! ```text
//!                alloc
//!                  |
//!                  v
//!               OPENING --accept-->  IODONE
//!                                      |
//!                              send -->+--> IOWAIT --reply--> IODONE
//!                                      |      |
//!                                      |    abort
//!                                      |      v
//!                                      |   ABWAIT -- svc ack --> ABDONE -> IODONE
//!                                      v
//!                                   CLOSING -> (freed)
//! ```
//!
//! Every transition runs with the portref's own spinlock held; the
//! sole-client semaphore (not modelled as a field here — see
//! `crate::proc::thread` for the waiter type it's instantiated with)
//! guarantees at most one syscall is inside this state machine at a time,
//! which is what keeps it a flat `match` rather than something needing its
//! own internal locking beyond the spinlock already serializing transitions
//! against server-departure/abort from other threads.

use crate::{
    arena::Handle,
    errors::{KernelError, Result},
    ipc::port::PortHandle,
};

pub type PortrefHandle = Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// `msg_connect` sent, waiting for the server's `msg_accept`.
    Opening,
    /// Idle; no request in flight.
    IoDone,
    /// A `msg_send` is queued or being serviced.
    IoWait,
    /// `M_ABORT` sent, waiting for the server's acknowledgement.
    AbWait,
    /// Server acknowledged the abort; about to fold back to `IoDone`.
    AbDone,
    /// Client is departing; portref will be freed once torn down.
    Closing,
}

pub struct Portref {
    /// `None` once the server has departed (spec §4.7 "server-departure
    /// handling": the kernel nulls this and wakes any `IoWait`er).
    port: Option<PortHandle>,
    state: State,
}

impl Portref {
    pub fn new() -> Self {
        Self {
            port: None,
            state: State::Opening,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn port(&self) -> Option<PortHandle> {
        self.port
    }

    /// Server-side `msg_accept`: the portref becomes usable.
    pub fn accept(&mut self, port: PortHandle) -> Result<()> {
        if self.state != State::Opening {
            return Err(KernelError::InvalidArgument);
        }
        self.port = Some(port);
        self.state = State::IoDone;
        Ok(())
    }

    /// Client `msg_send`: only legal from `IoDone`.
    pub fn begin_send(&mut self) -> Result<()> {
        if self.port.is_none() {
            return Err(KernelError::Io);
        }
        if self.state != State::IoDone {
            return Err(KernelError::Busy);
        }
        self.state = State::IoWait;
        Ok(())
    }

    /// Server `msg_reply`/`msg_err`: only legal from `IoWait` or `AbDone`
    /// (an abort that was acknowledged folds the pending reply into the
    /// error return, rather than delivering the original reply).
    pub fn complete(&mut self) -> Result<()> {
        match self.state {
            State::IoWait | State::AbDone => {
                self.state = State::IoDone;
                Ok(())
            }
            _ => Err(KernelError::InvalidArgument),
        }
    }

    /// Client `M_ABORT`: only legal while a send is in flight. Once in
    /// `AbWait`, any reply to the original message is superseded (spec
    /// §4.7 "Abort semantics") — `complete` from `AbWait` is rejected;
    /// only `acknowledge_abort` advances it.
    pub fn abort(&mut self) -> Result<()> {
        if self.state != State::IoWait {
            return Err(KernelError::InvalidArgument);
        }
        self.state = State::AbWait;
        Ok(())
    }

    /// Server acknowledges the abort it was sent.
    pub fn acknowledge_abort(&mut self) -> Result<()> {
        if self.state != State::AbWait {
            return Err(KernelError::InvalidArgument);
        }
        self.state = State::AbDone;
        Ok(())
    }

    /// Client departure (`msg_disconnect`/`exit`): legal from any state
    /// except an in-flight send, which must finish or be aborted first.
    pub fn begin_close(&mut self) -> Result<()> {
        if matches!(self.state, State::IoWait | State::AbWait) {
            return Err(KernelError::Busy);
        }
        self.state = State::Closing;
        Ok(())
    }

    /// Server departure: null the port back-pointer. Any thread parked in
    /// `IoWait` must be woken by the caller (this only updates state).
    pub fn server_departed(&mut self) {
        self.port = None;
    }
}

impl Default for Portref {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port_handle() -> PortHandle {
        let mut a: crate::arena::Arena<(), 1> = crate::arena::Arena::new();
        a.insert(()).unwrap()
    }

    #[test_case]
    fn happy_path_send_then_reply() {
        let mut p = Portref::new();
        p.accept(port_handle()).unwrap();
        assert_eq!(p.state(), State::IoDone);
        p.begin_send().unwrap();
        assert_eq!(p.state(), State::IoWait);
        p.complete().unwrap();
        assert_eq!(p.state(), State::IoDone);
    }

    #[test_case]
    fn abort_then_ack_folds_back_to_iodone() {
        let mut p = Portref::new();
        p.accept(port_handle()).unwrap();
        p.begin_send().unwrap();
        p.abort().unwrap();
        assert_eq!(p.state(), State::AbWait);
        p.acknowledge_abort().unwrap();
        assert_eq!(p.state(), State::AbDone);
        p.complete().unwrap();
        assert_eq!(p.state(), State::IoDone);
    }

    #[test_case]
    fn cannot_close_while_send_in_flight() {
        let mut p = Portref::new();
        p.accept(port_handle()).unwrap();
        p.begin_send().unwrap();
        assert_eq!(p.begin_close().unwrap_err(), KernelError::Busy);
    }

    #[test_case]
    fn server_departure_is_observable_after_send() {
        let mut p = Portref::new();
        p.accept(port_handle()).unwrap();
        p.server_departed();
        assert!(p.port().is_none());
        assert_eq!(p.begin_send().unwrap_err(), KernelError::Io);
    }
}
