/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Host debugger client: issues one ptrace command loop exchange (spec
//! §4.11) over a serial or TCP transport and prints the reply.

use {
    anyhow::{anyhow, Result},
    clap::{Parser, Subcommand},
    fehler::throws,
    std::time::Duration,
    tokio::io::{AsyncReadExt, AsyncWriteExt},
    tokio_serial::SerialPortBuilderExt,
    vsta_abi::ptrace::{Command as PtraceCommand, Reply as PtraceReply, MAX_PAYLOAD},
};

#[derive(Parser)]
#[command(name = "vstadbg", about = "Drive a VSTa kernel's ptrace command loop")]
struct Cli {
    /// Serial device (e.g. /dev/ttyUSB0) or `tcp:host:port`.
    #[arg(long)]
    transport: String,

    /// Baud rate, only meaningful for a serial transport.
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    Attach,
    Detach,
    Continue,
    Step,
    Break { addr: String },
    ClearBreak { addr: String },
    ReadReg { reg: u8 },
    WriteReg { reg: u8, value: u64 },
    ReadMem { addr: String, len: u16 },
    PeekEvent,
    SetMask { mask: u32 },
}

fn parse_addr(s: &str) -> Result<u64> {
    let s = s.trim_start_matches("0x");
    u64::from_str_radix(s, 16).map_err(|e| anyhow!("bad address {s}: {e}"))
}

impl Cmd {
    fn into_ptrace(self) -> Result<PtraceCommand> {
        Ok(match self {
            Cmd::Attach => PtraceCommand::Attach,
            Cmd::Detach => PtraceCommand::Detach,
            Cmd::Continue => PtraceCommand::Continue,
            Cmd::Step => PtraceCommand::Step,
            Cmd::Break { addr } => PtraceCommand::SetBreakpoint { addr: parse_addr(&addr)? },
            Cmd::ClearBreak { addr } => PtraceCommand::ClearBreakpoint { addr: parse_addr(&addr)? },
            Cmd::ReadReg { reg } => PtraceCommand::ReadReg { reg },
            Cmd::WriteReg { reg, value } => PtraceCommand::WriteReg { reg, value },
            Cmd::ReadMem { addr, len } => PtraceCommand::ReadMem { addr: parse_addr(&addr)?, len },
            Cmd::PeekEvent => PtraceCommand::PeekEvent,
            Cmd::SetMask { mask } => PtraceCommand::SetMask { mask },
        })
    }
}

/// Either half of the transport this client can speak over, unified behind
/// plain read/write so the command-loop logic below doesn't care which one
/// it got.
enum Transport {
    Serial(tokio_serial::SerialStream),
    Tcp(tokio::net::TcpStream),
}

impl Transport {
    #[throws(anyhow::Error)]
    async fn open(spec: &str, baud: u32) -> Self {
        if let Some(addr) = spec.strip_prefix("tcp:") {
            Transport::Tcp(tokio::net::TcpStream::connect(addr).await?)
        } else {
            Transport::Serial(tokio_serial::new(spec, baud).open_native_async()?)
        }
    }

    #[throws(anyhow::Error)]
    async fn write_all(&mut self, buf: &[u8]) {
        match self {
            Transport::Serial(s) => s.write_all(buf).await?,
            Transport::Tcp(s) => s.write_all(buf).await?,
        }
    }

    #[throws(anyhow::Error)]
    async fn read_exact(&mut self, buf: &mut [u8]) {
        match self {
            Transport::Serial(s) => {
                s.read_exact(buf).await?;
            }
            Transport::Tcp(s) => {
                s.read_exact(buf).await?;
            }
        }
    }
}

/// Frame size large enough for the biggest command/reply this ABI defines
/// ([`PtraceCommand::WriteMem`]: an 11-byte header plus [`MAX_PAYLOAD`]).
const FRAME_LEN: usize = 11 + MAX_PAYLOAD;

fn decode_reply(buf: &[u8]) -> Result<PtraceReply> {
    let tag = *buf.first().ok_or_else(|| anyhow!("empty reply"))?;
    Ok(match tag {
        0 => PtraceReply::Ok,
        1 => PtraceReply::Stopped {
            pc: u64::from_le_bytes(buf[1..9].try_into()?),
        },
        2 => PtraceReply::RegValue(u64::from_le_bytes(buf[1..9].try_into()?)),
        3 => {
            let len = u16::from_le_bytes(buf[1..3].try_into()?);
            let mut data = [0u8; MAX_PAYLOAD];
            data.copy_from_slice(&buf[3..3 + MAX_PAYLOAD]);
            PtraceReply::MemData { len, data }
        }
        4 => {
            let len = buf[1];
            let mut data = [0u8; MAX_PAYLOAD];
            data.copy_from_slice(&buf[2..2 + MAX_PAYLOAD]);
            PtraceReply::Event { len, data }
        }
        5 => PtraceReply::Err(buf[1]),
        other => return Err(anyhow!("unrecognised reply tag {other}")),
    })
}

fn print_reply(reply: &PtraceReply) {
    match reply {
        PtraceReply::Ok => println!("ok"),
        PtraceReply::Stopped { pc } => println!("stopped at {pc:#x}"),
        PtraceReply::RegValue(v) => println!("{v:#x}"),
        PtraceReply::MemData { len, data } => {
            println!("{} byte(s): {:02x?}", len, &data[..*len as usize])
        }
        PtraceReply::Event { len, data } => {
            let text = String::from_utf8_lossy(&data[..*len as usize]);
            println!("event: {text}")
        }
        PtraceReply::Err(code) => println!("error (code {code})"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut transport = Transport::open(&cli.transport, cli.baud).await?;

    let ptrace_cmd = cli.command.into_ptrace()?;
    let mut out = [0u8; FRAME_LEN];
    let n = ptrace_cmd.encode(&mut out);
    log::debug!("sending {n} byte command frame");
    transport.write_all(&out[..n]).await?;

    let mut in_buf = [0u8; FRAME_LEN];
    tokio::time::timeout(Duration::from_secs(5), transport.read_exact(&mut in_buf))
        .await
        .map_err(|_| anyhow!("timed out waiting for a reply"))??;

    print_reply(&decode_reply(&in_buf)?);
    Ok(())
}
