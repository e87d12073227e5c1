//! Compression and checksum plumbing for the archive pipeline.
//!
//! The producer side of a push is a chain of synchronous writers:
//! `tar::Builder -> GzEncoder -> HashingWriter -> ChannelWriter`. The hashing
//! writer sits after the encoder so the checksum and size describe the exact
//! bytes handed to the uploader.

use bytes::Bytes;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use tokio::sync::mpsc;

/// Gzip level used for archives; CPU time competes with network time.
pub const COMPRESSION_LEVEL: u32 = 1;

/// Returns the compression setting used for every archive.
pub fn archive_compression() -> Compression {
    Compression::new(COMPRESSION_LEVEL)
}

/// Item carried by the producer/consumer handoff channel.
pub type Chunk = io::Result<Bytes>;

/// Writer that counts bytes and calculates a SHA256 checksum while writing.
pub struct HashingWriter<W: Write> {
    writer: W,
    hasher: Sha256,
    bytes_written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: Sha256::new(),
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flushes and returns the inner writer, the byte count and the hex checksum.
    pub fn finish(mut self) -> io::Result<(W, u64, String)> {
        self.writer.flush()?;
        let checksum = format!("{:x}", self.hasher.finalize());
        Ok((self.writer, self.bytes_written, checksum))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Blocking writer that hands fixed-size chunks to a bounded channel.
///
/// A full channel blocks the writer until the consumer catches up. Must not
/// be used from inside an async context.
pub struct ChannelWriter {
    tx: mpsc::Sender<Chunk>,
    buffer: Vec<u8>,
    chunk_size: usize,
}

impl ChannelWriter {
    pub fn new(tx: mpsc::Sender<Chunk>, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            tx,
            buffer: Vec::with_capacity(chunk_size),
            chunk_size,
        }
    }

    /// Sends any buffered bytes and closes this end of the channel.
    pub fn close(mut self) -> io::Result<()> {
        self.send_buffer()
    }

    fn send_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.chunk_size));
        self.tx
            .blocking_send(Ok(Bytes::from(chunk)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive consumer closed"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.chunk_size - self.buffer.len();
        let n = room.min(buf.len());
        self.buffer.extend_from_slice(&buf[..n]);
        if self.buffer.len() >= self.chunk_size {
            self.send_buffer()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffer()
    }
}
