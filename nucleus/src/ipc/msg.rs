/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! The message operations spec §4.7 names (`msg_port`, `msg_receive`,
//! `msg_reply`, `msg_err`, `msg_accept`, `msg_connect`, `msg_send`,
//! `msg_disconnect`, `clone`), wiring the already-built [`Port`]/[`Portref`]
//! state machines and [`Sysmsg`] queue together end to end. Grounded on
//! `port.c`'s `msg_*` family: a connect enqueues a synthetic `M_CONNECT`
//! sysmsg the server discovers via ordinary `msg_receive`, `msg_accept`
//! consumes that sysmsg and flips the portref live, and `clone` is a
//! `msg_connect` variant that skips straight to a duplicate-request sysmsg
//! instead of a fresh one.

use crate::{
    arena::Arena,
    errors::{KernelError, Result},
    ipc::{
        port::{Port, PortHandle},
        portref::{Portref, PortrefHandle, State},
        segment::Segment,
        sysmsg::Sysmsg,
    },
};

pub const MAX_PORTS: usize = super::MAX_PORTS;
pub const MAX_PORTREFS: usize = super::MAX_PORTREFS;

pub type PortTable = Arena<Port, MAX_PORTS>;
pub type PortrefTable = Arena<Portref, MAX_PORTREFS>;

/// *msg_port*: allocate a fresh, empty server endpoint.
pub fn msg_port(ports: &mut PortTable) -> Result<PortHandle> {
    ports.insert(Port::new()).map_err(|_| KernelError::OutOfSpace)
}

/// *msg_connect*: open a new, not-yet-usable portref on `port`, and queue
/// the `M_CONNECT` request the server will see via `msg_receive` followed
/// by `msg_accept`.
pub fn msg_connect(ports: &mut PortTable, portrefs: &mut PortrefTable, port: PortHandle) -> Result<PortrefHandle> {
    let server = ports.get_mut(port).ok_or(KernelError::NoSuchEntity)?;
    let portref = portrefs.insert(Portref::new()).map_err(|_| KernelError::OutOfSpace)?;
    let msg = Sysmsg::new(vsta_abi::op::Op::Connect.bits(), 0, 0, portref);
    if server.enqueue(msg).is_err() {
        portrefs.remove(portref);
        return Err(KernelError::Busy);
    }
    Ok(portref)
}

/// *clone*: duplicate an already-connected portref's server-side state.
/// Same shape as `msg_connect`, but the queued request is `M_DUP` rather
/// than `M_CONNECT`, so the server knows to allocate duplicate state
/// instead of treating this as a brand new client.
pub fn clone_portref(
    ports: &mut PortTable,
    portrefs: &mut PortrefTable,
    existing: PortrefHandle,
) -> Result<PortrefHandle> {
    let port = portrefs
        .get(existing)
        .ok_or(KernelError::NoSuchEntity)?
        .port()
        .ok_or(KernelError::Io)?;
    let server = ports.get_mut(port).ok_or(KernelError::NoSuchEntity)?;
    let portref = portrefs.insert(Portref::new()).map_err(|_| KernelError::OutOfSpace)?;
    let msg = Sysmsg::new(vsta_abi::op::Op::Dup.bits(), 0, 0, portref);
    if server.enqueue(msg).is_err() {
        portrefs.remove(portref);
        return Err(KernelError::Busy);
    }
    server.add_ref();
    Ok(portref)
}

/// *msg_accept*: the server's reply to a connect/dup request it already
/// dequeued via `msg_receive`. `msg.from` names the portref to flip live.
pub fn msg_accept(ports: &PortTable, portrefs: &mut PortrefTable, port: PortHandle, msg: &Sysmsg) -> Result<()> {
    ports.get(port).ok_or(KernelError::NoSuchEntity)?;
    let portref = portrefs.get_mut(msg.from).ok_or(KernelError::NoSuchEntity)?;
    portref.accept(port)
}

/// *msg_send*: hand a request to the portref's port, blocking callers must
/// themselves wait on the port's receive-waiter semaphore once this
/// returns `Ok`. Copies the caller's segment list into the queued sysmsg's
/// fixed-capacity scatter list, truncating silently past `MAX_SEGMENTS`
/// (spec §4.6's own truncation policy, not a new one).
pub fn msg_send(
    ports: &mut PortTable,
    portrefs: &mut PortrefTable,
    portref_h: PortrefHandle,
    op: u32,
    arg: i32,
    arg1: i32,
    segments: &[Segment],
) -> Result<()> {
    let portref = portrefs.get_mut(portref_h).ok_or(KernelError::NoSuchEntity)?;
    let port = portref.port().ok_or(KernelError::Io)?;
    portref.begin_send()?;

    let mut msg = Sysmsg::new(op, arg, arg1, portref_h);
    for seg in segments {
        let _ = msg.segments.push(*seg);
    }

    let server = ports.get_mut(port).ok_or(KernelError::NoSuchEntity)?;
    if server.enqueue(msg).is_err() {
        // Roll the portref back to idle; the caller can retry once the
        // port's queue drains.
        let portref = portrefs.get_mut(portref_h).expect("just looked up above");
        portref.complete().ok();
        return Err(KernelError::Busy);
    }
    Ok(())
}

/// *msg_receive*: server-side dequeue of the oldest unserved sysmsg.
pub fn msg_receive(ports: &mut PortTable, port: PortHandle) -> Result<Option<Sysmsg>> {
    Ok(ports.get_mut(port).ok_or(KernelError::NoSuchEntity)?.receive())
}

/// *msg_reply*: server completed `msg` successfully; folds the originating
/// portref back to `IoDone` so its client can issue another `msg_send`.
pub fn msg_reply(portrefs: &mut PortrefTable, msg: &Sysmsg) -> Result<()> {
    portrefs.get_mut(msg.from).ok_or(KernelError::NoSuchEntity)?.complete()
}

/// *msg_err*: server rejected `msg`; same portref-state transition as
/// `msg_reply`, but tags the sysmsg with the ASCII error token the
/// client's `msg_send` will observe instead of a successful completion.
pub fn msg_err(portrefs: &mut PortrefTable, msg: Sysmsg, error: &'static str) -> Result<Sysmsg> {
    portrefs.get_mut(msg.from).ok_or(KernelError::NoSuchEntity)?.complete()?;
    Ok(msg.with_error(error))
}

/// *msg_disconnect*: client departure. Drops the port's reference count
/// and frees the portref outright; a port reaching zero references is the
/// caller's cue to tear down the port itself.
pub fn msg_disconnect(ports: &mut PortTable, portrefs: &mut PortrefTable, portref_h: PortrefHandle) -> Result<bool> {
    let portref = portrefs.get_mut(portref_h).ok_or(KernelError::NoSuchEntity)?;
    portref.begin_close()?;
    let port_handle = portref.port();
    portrefs.remove(portref_h);

    let Some(port_handle) = port_handle else {
        return Ok(false);
    };
    let port = ports.get_mut(port_handle).ok_or(KernelError::NoSuchEntity)?;
    let emptied = port.drop_ref();
    if emptied {
        ports.remove(port_handle);
    }
    Ok(emptied)
}

/// Server departure: null every portref still pointing at `port` and leave
/// any mid-send portref `IoWait`; the caller (owner of the thread table)
/// must still wake whoever is parked waiting on those sends.
pub fn port_depart(ports: &mut PortTable, portrefs: &mut PortrefTable, port: PortHandle) {
    ports.remove(port);
    for portref in portrefs.iter_mut() {
        if portref.port() == Some(port) {
            portref.server_departed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(pset: crate::mm::PsetHandle) -> Segment {
        Segment {
            pset,
            page_offset: 0,
            byte_offset: 0,
            len: 8,
            attached: false,
        }
    }

    fn dummy_pset() -> crate::mm::PsetHandle {
        let mut a: Arena<(), 1> = Arena::new();
        a.insert(()).unwrap()
    }

    #[test_case]
    fn connect_accept_send_reply_round_trips() {
        let mut ports: PortTable = Arena::new();
        let mut portrefs: PortrefTable = Arena::new();
        let port = msg_port(&mut ports).unwrap();

        let client = msg_connect(&mut ports, &mut portrefs, port).unwrap();
        assert_eq!(portrefs.get(client).unwrap().state(), State::Opening);

        let request = msg_receive(&mut ports, port).unwrap().unwrap();
        assert_eq!(request.op, vsta_abi::op::Op::Connect.bits());
        msg_accept(&ports, &mut portrefs, port, &request).unwrap();
        assert_eq!(portrefs.get(client).unwrap().state(), State::IoDone);

        let pset = dummy_pset();
        msg_send(&mut ports, &mut portrefs, client, 42, 0, 0, &[seg(pset)]).unwrap();
        assert_eq!(portrefs.get(client).unwrap().state(), State::IoWait);

        let serviced = msg_receive(&mut ports, port).unwrap().unwrap();
        assert_eq!(serviced.op, 42);
        assert_eq!(serviced.segments.len(), 1);
        msg_reply(&mut portrefs, &serviced).unwrap();
        assert_eq!(portrefs.get(client).unwrap().state(), State::IoDone);
    }

    #[test_case]
    fn msg_err_tags_the_sysmsg_and_frees_the_portref_to_send_again() {
        let mut ports: PortTable = Arena::new();
        let mut portrefs: PortrefTable = Arena::new();
        let port = msg_port(&mut ports).unwrap();
        let client = msg_connect(&mut ports, &mut portrefs, port).unwrap();
        let request = msg_receive(&mut ports, port).unwrap().unwrap();
        msg_accept(&ports, &mut portrefs, port, &request).unwrap();

        msg_send(&mut ports, &mut portrefs, client, 1, 0, 0, &[]).unwrap();
        let serviced = msg_receive(&mut ports, port).unwrap().unwrap();
        let failed = msg_err(&mut portrefs, serviced, "EIO").unwrap();
        assert_eq!(failed.error, Some("EIO"));
        assert_eq!(portrefs.get(client).unwrap().state(), State::IoDone);
    }

    #[test_case]
    fn disconnect_drops_the_last_reference_and_frees_the_port() {
        let mut ports: PortTable = Arena::new();
        let mut portrefs: PortrefTable = Arena::new();
        let port = msg_port(&mut ports).unwrap();
        let client = msg_connect(&mut ports, &mut portrefs, port).unwrap();
        let request = msg_receive(&mut ports, port).unwrap().unwrap();
        msg_accept(&ports, &mut portrefs, port, &request).unwrap();

        let freed_port = msg_disconnect(&mut ports, &mut portrefs, client).unwrap();
        assert!(freed_port);
        assert!(portrefs.get(client).is_none());
        assert!(ports.get(port).is_none());
    }

    #[test_case]
    fn clone_keeps_the_port_alive_with_two_references() {
        let mut ports: PortTable = Arena::new();
        let mut portrefs: PortrefTable = Arena::new();
        let port = msg_port(&mut ports).unwrap();
        let original = msg_connect(&mut ports, &mut portrefs, port).unwrap();
        let accept_req = msg_receive(&mut ports, port).unwrap().unwrap();
        msg_accept(&ports, &mut portrefs, port, &accept_req).unwrap();

        let dup = clone_portref(&mut ports, &mut portrefs, original).unwrap();
        let dup_req = msg_receive(&mut ports, port).unwrap().unwrap();
        assert_eq!(dup_req.op, vsta_abi::op::Op::Dup.bits());
        msg_accept(&ports, &mut portrefs, port, &dup_req).unwrap();

        // Dropping the original leaves the port alive for `dup`.
        assert!(!msg_disconnect(&mut ports, &mut portrefs, original).unwrap());
        assert!(ports.get(port).is_some());
        assert!(msg_disconnect(&mut ports, &mut portrefs, dup).unwrap());
        assert!(ports.get(port).is_none());
    }

    #[test_case]
    fn port_depart_nulls_every_portref_pointing_at_it() {
        let mut ports: PortTable = Arena::new();
        let mut portrefs: PortrefTable = Arena::new();
        let port = msg_port(&mut ports).unwrap();
        let client = msg_connect(&mut ports, &mut portrefs, port).unwrap();
        let request = msg_receive(&mut ports, port).unwrap().unwrap();
        msg_accept(&ports, &mut portrefs, port, &request).unwrap();

        port_depart(&mut ports, &mut portrefs, port);
        assert!(ports.get(port).is_none());
        assert!(portrefs.get(client).unwrap().port().is_none());
    }
}
