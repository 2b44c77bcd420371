/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Wire encoding for the ptrace command loop (spec §4.11): single-step,
//! breakpoint set/clear, register and memory read/write, event-string
//! peek/poke, mask update. Fixed-size frames, no allocation, so both the
//! kernel side and a host debugger client can encode/decode them without a
//! heap.

/// Maximum bytes a memory read/write or an event-string peek/poke carries
/// in one frame.
pub const MAX_PAYLOAD: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Attach,
    Detach,
    /// Let the stopped thread run until the next debug trap.
    Continue,
    /// Execute exactly one instruction then stop again.
    Step,
    SetBreakpoint { addr: u64 },
    ClearBreakpoint { addr: u64 },
    ReadReg { reg: u8 },
    WriteReg { reg: u8, value: u64 },
    ReadMem { addr: u64, len: u16 },
    WriteMem { addr: u64, len: u16, data: [u8; MAX_PAYLOAD] },
    /// Read the thread's current system or process event string.
    PeekEvent,
    /// Overwrite the thread's process event string.
    PokeEvent { len: u8, data: [u8; MAX_PAYLOAD] },
    SetMask { mask: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ok,
    /// Thread stopped at `pc`, e.g. after `Step` or hitting a breakpoint.
    Stopped { pc: u64 },
    RegValue(u64),
    MemData { len: u16, data: [u8; MAX_PAYLOAD] },
    Event { len: u8, data: [u8; MAX_PAYLOAD] },
    Err(u8),
}

const TAG_ATTACH: u8 = 0;
const TAG_DETACH: u8 = 1;
const TAG_CONTINUE: u8 = 2;
const TAG_STEP: u8 = 3;
const TAG_SET_BP: u8 = 4;
const TAG_CLEAR_BP: u8 = 5;
const TAG_READ_REG: u8 = 6;
const TAG_WRITE_REG: u8 = 7;
const TAG_READ_MEM: u8 = 8;
const TAG_WRITE_MEM: u8 = 9;
const TAG_PEEK_EVENT: u8 = 10;
const TAG_POKE_EVENT: u8 = 11;
const TAG_SET_MASK: u8 = 12;

impl Command {
    /// Encode into `out`, returning the number of bytes written. `out` must
    /// be at least [`MAX_PAYLOAD`] + 16 bytes, the largest frame
    /// ([`Command::WriteMem`]) can ever produce.
    pub fn encode(&self, out: &mut [u8]) -> usize {
        match *self {
            Command::Attach => {
                out[0] = TAG_ATTACH;
                1
            }
            Command::Detach => {
                out[0] = TAG_DETACH;
                1
            }
            Command::Continue => {
                out[0] = TAG_CONTINUE;
                1
            }
            Command::Step => {
                out[0] = TAG_STEP;
                1
            }
            Command::SetBreakpoint { addr } => {
                out[0] = TAG_SET_BP;
                out[1..9].copy_from_slice(&addr.to_le_bytes());
                9
            }
            Command::ClearBreakpoint { addr } => {
                out[0] = TAG_CLEAR_BP;
                out[1..9].copy_from_slice(&addr.to_le_bytes());
                9
            }
            Command::ReadReg { reg } => {
                out[0] = TAG_READ_REG;
                out[1] = reg;
                2
            }
            Command::WriteReg { reg, value } => {
                out[0] = TAG_WRITE_REG;
                out[1] = reg;
                out[2..10].copy_from_slice(&value.to_le_bytes());
                10
            }
            Command::ReadMem { addr, len } => {
                out[0] = TAG_READ_MEM;
                out[1..9].copy_from_slice(&addr.to_le_bytes());
                out[9..11].copy_from_slice(&len.to_le_bytes());
                11
            }
            Command::WriteMem { addr, len, data } => {
                out[0] = TAG_WRITE_MEM;
                out[1..9].copy_from_slice(&addr.to_le_bytes());
                out[9..11].copy_from_slice(&len.to_le_bytes());
                out[11..11 + MAX_PAYLOAD].copy_from_slice(&data);
                11 + MAX_PAYLOAD
            }
            Command::PeekEvent => {
                out[0] = TAG_PEEK_EVENT;
                1
            }
            Command::PokeEvent { len, data } => {
                out[0] = TAG_POKE_EVENT;
                out[1] = len;
                out[2..2 + MAX_PAYLOAD].copy_from_slice(&data);
                2 + MAX_PAYLOAD
            }
            Command::SetMask { mask } => {
                out[0] = TAG_SET_MASK;
                out[1..5].copy_from_slice(&mask.to_le_bytes());
                5
            }
        }
    }

    pub fn decode(buf: &[u8]) -> Option<Command> {
        let tag = *buf.first()?;
        Some(match tag {
            TAG_ATTACH => Command::Attach,
            TAG_DETACH => Command::Detach,
            TAG_CONTINUE => Command::Continue,
            TAG_STEP => Command::Step,
            TAG_SET_BP => Command::SetBreakpoint {
                addr: u64::from_le_bytes(buf.get(1..9)?.try_into().ok()?),
            },
            TAG_CLEAR_BP => Command::ClearBreakpoint {
                addr: u64::from_le_bytes(buf.get(1..9)?.try_into().ok()?),
            },
            TAG_READ_REG => Command::ReadReg { reg: *buf.get(1)? },
            TAG_WRITE_REG => Command::WriteReg {
                reg: *buf.get(1)?,
                value: u64::from_le_bytes(buf.get(2..10)?.try_into().ok()?),
            },
            TAG_READ_MEM => Command::ReadMem {
                addr: u64::from_le_bytes(buf.get(1..9)?.try_into().ok()?),
                len: u16::from_le_bytes(buf.get(9..11)?.try_into().ok()?),
            },
            TAG_WRITE_MEM => {
                let addr = u64::from_le_bytes(buf.get(1..9)?.try_into().ok()?);
                let len = u16::from_le_bytes(buf.get(9..11)?.try_into().ok()?);
                let mut data = [0u8; MAX_PAYLOAD];
                data.copy_from_slice(buf.get(11..11 + MAX_PAYLOAD)?);
                Command::WriteMem { addr, len, data }
            }
            TAG_PEEK_EVENT => Command::PeekEvent,
            TAG_POKE_EVENT => {
                let len = *buf.get(1)?;
                let mut data = [0u8; MAX_PAYLOAD];
                data.copy_from_slice(buf.get(2..2 + MAX_PAYLOAD)?);
                Command::PokeEvent { len, data }
            }
            TAG_SET_MASK => Command::SetMask {
                mask: u32::from_le_bytes(buf.get(1..5)?.try_into().ok()?),
            },
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_fixed_size_command() {
        let mut buf = [0u8; 128];
        for cmd in [
            Command::Attach,
            Command::Detach,
            Command::Continue,
            Command::Step,
            Command::SetBreakpoint { addr: 0x4000 },
            Command::ClearBreakpoint { addr: 0x4000 },
            Command::ReadReg { reg: 3 },
            Command::WriteReg { reg: 3, value: 42 },
            Command::ReadMem { addr: 0x8000, len: 16 },
            Command::PeekEvent,
            Command::SetMask { mask: 0xff },
        ] {
            let n = cmd.encode(&mut buf);
            assert_eq!(Command::decode(&buf[..n]), Some(cmd));
        }
    }

    #[test]
    fn round_trips_payload_carrying_commands() {
        let mut buf = [0u8; 128];
        let mut data = [0u8; MAX_PAYLOAD];
        data[0] = 0xab;
        let cmd = Command::WriteMem { addr: 0x1000, len: 1, data };
        let n = cmd.encode(&mut buf);
        assert_eq!(Command::decode(&buf[..n]), Some(cmd));

        let cmd = Command::PokeEvent { len: 4, data };
        let n = cmd.encode(&mut buf);
        assert_eq!(Command::decode(&buf[..n]), Some(cmd));
    }

    #[test]
    fn decode_rejects_truncated_frames() {
        let buf = [TAG_SET_BP, 1, 2, 3];
        assert_eq!(Command::decode(&buf), None);
    }
}
