//! Framed sub-blocks within one continuous byte stream.
//!
//! Two byte values are reserved. Inside a block every literal occurrence of
//! either is preceded by [`ESCAPE`]; an unescaped [`TERMINATE`] ends the
//! block. A reader sees end-of-file at the terminator while the underlying
//! stream stays open, and [`BlockReader::skip_to_end`] moves past whatever a
//! cell deserializer left unread. A serializer that reads too few bytes
//! therefore cannot desynchronize the cells that follow it.
//!
//! Blocks nest: a block written inside another block is escaped once more by
//! the outer writer and unescaped once more by the outer reader.

use std::io::{self, Read, Write};

use bytes::{BufMut, BytesMut};

/// Escape marker.
pub const ESCAPE: u8 = 0x1B;

/// End-of-block marker.
pub const TERMINATE: u8 = 0x17;

/// Writes one escaped block. Call [`finish`](Self::finish) to terminate it.
pub struct BlockWriter<W: Write> {
    inner: W,
    scratch: BytesMut,
}

impl<W: Write> BlockWriter<W> {
    /// Starts a new block on `inner`.
    pub fn new(inner: W) -> Self {
        Self { inner, scratch: BytesMut::new() }
    }

    /// Writes the terminator and returns the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.write_all(&[TERMINATE])?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for BlockWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scratch.clear();
        self.scratch.reserve(buf.len() + buf.len() / 8 + 1);
        for &b in buf {
            if b == ESCAPE || b == TERMINATE {
                self.scratch.put_u8(ESCAPE);
            }
            self.scratch.put_u8(b);
        }
        self.inner.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reads one escaped block, reporting end-of-file at its terminator.
pub struct BlockReader<R: Read> {
    inner: R,
    finished: bool,
}

impl<R: Read> BlockReader<R> {
    /// Starts reading a block from `inner`.
    pub fn new(inner: R) -> Self {
        Self { inner, finished: false }
    }

    /// Returns true once the terminator has been consumed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Discards the rest of the block and returns how many payload bytes
    /// were skipped.
    pub fn skip_to_end(&mut self) -> io::Result<u64> {
        let mut skipped = 0u64;
        let mut chunk = [0u8; 256];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                return Ok(skipped);
            }
            skipped += n as u64;
        }
    }
}

impl<R: Read> Read for BlockReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished || buf.is_empty() {
            return Ok(0);
        }
        let mut n = 0;
        while n < buf.len() {
            match read_byte(&mut self.inner)? {
                TERMINATE => {
                    self.finished = true;
                    break;
                }
                ESCAPE => {
                    buf[n] = read_byte(&mut self.inner)?;
                    n += 1;
                }
                b => {
                    buf[n] = b;
                    n += 1;
                }
            }
        }
        Ok(n)
    }
}

/// Reads exactly one byte; end of stream is an `UnexpectedEof` error.
pub fn read_byte<R: Read + ?Sized>(input: &mut R) -> io::Result<u8> {
    let mut byte = [0u8; 1];
    input.read_exact(&mut byte)?;
    Ok(byte[0])
}
