//! Transport socket adapter for the radio's stream API.
//!
//! Wraps one TCP connection and exposes framed reads and writes. The adapter
//! has no protocol knowledge beyond the framing envelope; decoding happens at
//! the `ingest::decode` boundary. A zero-length read is surfaced as
//! `Ok(None)` -- the clean-close signal the lifecycle manager reacts to
//! immediately instead of waiting for the silence watchdog.

use anyhow::{anyhow, Result};
use log::{debug, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::framer::{frame_payload, StreamFramer};

/// Open the stream socket to the radio and split it into framed halves.
pub async fn connect(host: &str, port: u16) -> Result<(TransportReader, TransportWriter)> {
    let addr = format!("{}:{}", host, port);
    debug!("Opening radio transport to {}", addr);
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| anyhow!("Failed to open radio transport {}: {}", addr, e))?;
    stream.set_nodelay(true).ok();
    let (read_half, write_half) = stream.into_split();
    Ok((
        TransportReader {
            read_half,
            framer: StreamFramer::new(),
            chunk: [0u8; 1024],
        },
        TransportWriter { write_half },
    ))
}

pub struct TransportReader {
    read_half: OwnedReadHalf,
    framer: StreamFramer,
    chunk: [u8; 1024],
}

impl TransportReader {
    /// Read until one whole frame is available.
    ///
    /// Returns `Ok(Some(frame))` for a complete payload, `Ok(None)` when the
    /// peer closed the stream cleanly (zero-length read), `Err` on I/O error.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.framer.next_frame() {
                trace!("RX frame {} bytes", frame.len());
                return Ok(Some(frame));
            }
            let n = self
                .read_half
                .read(&mut self.chunk)
                .await
                .map_err(|e| anyhow!("Radio transport read error: {}", e))?;
            if n == 0 {
                debug!("Radio transport peer closed the stream");
                return Ok(None);
            }
            self.framer.push(&self.chunk[..n]);
        }
    }
}

pub struct TransportWriter {
    write_half: OwnedWriteHalf,
}

impl TransportWriter {
    /// Frame and write one payload.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let framed = frame_payload(payload);
        self.write_half
            .write_all(&framed)
            .await
            .map_err(|e| anyhow!("Radio transport write error: {}", e))?;
        self.write_half
            .flush()
            .await
            .map_err(|e| anyhow!("Radio transport flush error: {}", e))?;
        trace!("TX frame {} bytes", payload.len());
        Ok(())
    }
}
