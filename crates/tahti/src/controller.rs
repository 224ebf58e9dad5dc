//! Controller-side client
//!
//! The other end of the control protocol, for test harnesses and scripts
//! that drive a library under test: connect to the embedded listener, greet
//! it, and deliver a compiled schedule.

use crate::{
    error::WireError,
    schedule::Schedule,
    wire,
    wire::encode::encode,
};
use bytes::BufMut;
use std::{net::SocketAddr, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::sleep,
};
use tracing::debug;

/// A connected controller.
pub struct Controller {
    stream: TcpStream,
}

// === impl Controller ===

impl Controller {
    /// Connects to the library's control listener.
    ///
    /// The listener comes up on the library's scheduler thread, so a
    /// controller started alongside the application usually races it; refused
    /// connections are retried briefly before giving up.
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let mut last = None;
        for _ in 0..50 {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(Self { stream }),
                Err(err) => {
                    last = Some(err);
                    sleep(Duration::from_millis(100)).await;
                }
            }
        }
        Err(last.unwrap_or_else(|| std::io::Error::other("connect retries exhausted")))
    }

    /// Compiles and delivers a schedule, running the full handshake.
    pub async fn send_schedule(&mut self, schedule: &Schedule) -> Result<(), WireError> {
        self.send_bytecode(&encode(schedule)).await
    }

    /// Delivers raw bytecode, running the full handshake.
    pub async fn send_bytecode(&mut self, bytecode: &[u8]) -> Result<(), WireError> {
        let mut hei = Vec::new();
        hei.put_slice(wire::HEI);
        hei.put_u16(wire::DIALECT);
        self.stream.write_all(&hei).await?;
        self.read_reply().await?;
        debug!(target: "wire", "greeting accepted");

        let mut packet = Vec::new();
        packet.put_slice(wire::OTA_SE);
        packet.put_u32(bytecode.len() as u32);
        packet.put_u32(crc32fast::hash(bytecode));
        packet.put_slice(bytecode);
        packet.put_slice(wire::LOPPU);
        self.stream.write_all(&packet).await?;
        self.read_reply().await?;
        debug!(target: "wire", bytes = bytecode.len(), "schedule accepted");
        Ok(())
    }

    /// Reads a `joo`/`ei` verdict. The two replies differ in length, so the
    /// shared prefix length is read first.
    async fn read_reply(&mut self) -> Result<(), WireError> {
        let mut prefix = [0u8; 2];
        self.stream.read_exact(&mut prefix).await?;
        match &prefix {
            b"jo" => {
                let mut tail = [0u8; 1];
                self.stream.read_exact(&mut tail).await?;
                if tail == [b'o'] { Ok(()) } else { Err(WireError::BadReply) }
            }
            b"ei" => Err(WireError::Refused),
            _ => Err(WireError::BadReply),
        }
    }
}
