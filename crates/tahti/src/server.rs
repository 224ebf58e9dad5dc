//! Control-socket listener and protocol negotiator
//!
//! Binds the configured address, accepts exactly one controller, and drives
//! the three-phase handshake: `hei` (dialect check), `ota se` (bytecode
//! transfer, checksum, parse), then linger. The reply is `joo` on success and
//! `ei` on any failure; a failed negotiation is final for the process.

use crate::{
    config::RunConfig,
    error::WireError,
    wire,
    wire::parse::{ParseContext, parse},
};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpSocket, TcpStream},
};
use tracing::{debug, error, trace};

/// Connection phases, in protocol order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Hei,
    OtaSe,
    Linger,
}

/// Accepts the controller connection and negotiates the schedule into the
/// configuration. On success the connection is parked in the configuration
/// and left open.
pub(crate) async fn negotiate(config: &RunConfig, addr: SocketAddr) -> Result<(), WireError> {
    let listener = bind(addr)?;
    let (mut stream, peer) = listener.accept().await?;
    // a single controller per process: a protocol error on this connection
    // must not be papered over by accepting another one
    drop(listener);
    debug!(target: "wire", %peer, "controller connected");

    match converse(config, &mut stream).await {
        Ok(()) => {
            debug!(target: "wire", "negotiation complete, lingering");
            config.adopt_control(stream);
            Ok(())
        }
        Err(err) => {
            error!(target: "wire", %err, "negotiation failed");
            if let Err(err) = stream.write_all(wire::EI).await {
                debug!(target: "wire", %err, "peer gone before refusal could be sent");
            }
            Err(err)
        }
    }
}

fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(128)
}

async fn converse(config: &RunConfig, stream: &mut TcpStream) -> Result<(), WireError> {
    let mut phase = Phase::Hei;
    loop {
        phase = match phase {
            Phase::Hei => {
                check_hei(stream).await?;
                Phase::OtaSe
            }
            Phase::OtaSe => {
                take_schedule(config, stream).await?;
                Phase::Linger
            }
            Phase::Linger => return Ok(()),
        };
    }
}

/// `hei` + dialect; replies `joo` when the dialect is spoken here.
async fn check_hei(stream: &mut TcpStream) -> Result<(), WireError> {
    let mut packet = [0u8; wire::HEI_LEN];
    stream.read_exact(&mut packet).await?;
    if &packet[..3] != wire::HEI {
        return Err(WireError::BadMagic("hei"));
    }
    let dialect = u16::from_be_bytes([packet[3], packet[4]]);
    if dialect != wire::DIALECT {
        return Err(WireError::UnknownDialect(dialect));
    }
    stream.write_all(wire::JOO).await?;
    Ok(())
}

/// `ota se` header, bytecode payload, `loppu` trailer; replies `joo` once the
/// schedule is parsed and installed.
async fn take_schedule(config: &RunConfig, stream: &mut TcpStream) -> Result<(), WireError> {
    let mut header = [0u8; wire::OTA_SE_LEN];
    stream.read_exact(&mut header).await?;
    if &header[..6] != wire::OTA_SE {
        return Err(WireError::BadMagic("ota se"));
    }
    let length = u32::from_be_bytes([header[6], header[7], header[8], header[9]]);
    let crc = u32::from_be_bytes([header[10], header[11], header[12], header[13]]);

    let mut bytecode = vec![0u8; length as usize];
    stream.read_exact(&mut bytecode).await?;

    let computed = crc32fast::hash(&bytecode);
    if computed != crc {
        return Err(WireError::CrcMismatch { header: crc, computed });
    }

    let ctx = ParseContext {
        num_states: config.num_states(),
        num_callbacks: config.num_callbacks(),
    };
    let schedule = parse(&ctx, &bytecode)?;
    trace!(target: "wire", epochs = schedule.epochs.len(), bytes = bytecode.len(), "schedule accepted");
    config.set_schedule(schedule);

    let mut trailer = [0u8; wire::LOPPU.len()];
    stream.read_exact(&mut trailer).await?;
    if &trailer != wire::LOPPU {
        return Err(WireError::BadMagic("loppu"));
    }

    stream.write_all(wire::JOO).await?;
    Ok(())
}
