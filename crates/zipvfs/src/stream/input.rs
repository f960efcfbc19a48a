//! Readers over entry data.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::sync::Arc;

use flate2::{Decompress, FlushDecompress, Status};

use super::pool::Pooled;
use crate::store::{RandomAccessStore, ReaderLease};

const INPUT_BUFFER: usize = 8 * 1024;

/// Raw bytes of one entry's data region.
#[derive(Debug)]
pub(crate) enum Source {
    Memory(Cursor<Arc<[u8]>>),
    Archive(ArchiveSlice),
    Staged(BufReader<File>),
}

impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Memory(cursor) => cursor.read(buf),
            Self::Archive(slice) => slice.read(buf),
            Self::Staged(file) => file.read(buf),
        }
    }
}

/// A bounded window of the archive file.
///
/// Holds a reader lease until the window is exhausted or the reader is
/// dropped.
#[derive(Debug)]
pub(crate) struct ArchiveSlice {
    lease: Option<ReaderLease>,
    pos: u64,
    remaining: u64,
}

impl ArchiveSlice {
    pub fn new(lease: ReaderLease, pos: u64, len: u64) -> Self {
        Self {
            lease: Some(lease),
            pos,
            remaining: len,
        }
    }
}

impl Read for ArchiveSlice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(lease) = self.lease.as_ref() else {
            return Ok(0);
        };
        if self.remaining == 0 || buf.is_empty() {
            if self.remaining == 0 {
                self.lease = None;
            }
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = lease.store().read_at(&mut buf[..want], self.pos)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive ended inside entry data",
            ));
        }
        self.pos += n as u64;
        self.remaining -= n as u64;
        if self.remaining == 0 {
            self.lease = None;
        }
        Ok(n)
    }
}

/// Raw DEFLATE decoder over a [`Source`].
///
/// When the source runs dry before the stream ends, a single zero byte is
/// fed to the inflater so it can flush its final block.
#[derive(Debug)]
pub(crate) struct InflatingReader<R> {
    inner: R,
    inflater: Pooled<Decompress>,
    buf: Box<[u8]>,
    start: usize,
    end: usize,
    input_done: bool,
    padded: bool,
    finished: bool,
}

impl<R: Read> InflatingReader<R> {
    pub fn new(inner: R, inflater: Pooled<Decompress>) -> Self {
        Self {
            inner,
            inflater,
            buf: vec![0u8; INPUT_BUFFER].into_boxed_slice(),
            start: 0,
            end: 0,
            input_done: false,
            padded: false,
            finished: false,
        }
    }
}

impl<R: Read> Read for InflatingReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            if self.finished {
                return Ok(0);
            }
            if self.start == self.end && !self.input_done {
                let n = self.inner.read(&mut self.buf)?;
                if n == 0 {
                    self.input_done = true;
                } else {
                    self.start = 0;
                    self.end = n;
                }
            }

            const PAD: [u8; 1] = [0];
            let from_buffer = self.start < self.end;
            let input: &[u8] = if from_buffer {
                &self.buf[self.start..self.end]
            } else if !self.padded {
                &PAD
            } else {
                &[]
            };

            let before_in = self.inflater.total_in();
            let before_out = self.inflater.total_out();
            let status = self
                .inflater
                .decompress(input, out, FlushDecompress::None)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let consumed = (self.inflater.total_in() - before_in) as usize;
            let produced = (self.inflater.total_out() - before_out) as usize;

            if from_buffer {
                self.start += consumed;
            } else {
                self.padded = true;
            }

            if status == Status::StreamEnd {
                self.finished = true;
            }
            if produced > 0 {
                return Ok(produced);
            }
            if self.finished {
                return Ok(0);
            }
            if input.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "deflate stream ended early",
                ));
            }
        }
    }
}

/// Reader over the uncompressed content of one entry.
#[derive(Debug)]
pub struct EntryReader {
    inner: ReaderKind,
    size: u64,
}

#[derive(Debug)]
enum ReaderKind {
    Raw(Source),
    Inflating(InflatingReader<Source>),
}

impl EntryReader {
    pub(crate) fn raw(source: Source, size: u64) -> Self {
        Self {
            inner: ReaderKind::Raw(source),
            size,
        }
    }

    pub(crate) fn inflating(source: Source, inflater: Pooled<Decompress>, size: u64) -> Self {
        Self {
            inner: ReaderKind::Inflating(InflatingReader::new(source, inflater)),
            size,
        }
    }

    /// Uncompressed size of the entry.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            ReaderKind::Raw(source) => source.read(buf),
            ReaderKind::Inflating(reader) => reader.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::pool::Pools;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn memory(data: Vec<u8>) -> Source {
        Source::Memory(Cursor::new(Arc::from(data)))
    }

    #[test]
    fn test_inflate() {
        let pools = Pools::new(2);
        let text = b"hello hello hello hello".repeat(100);
        let mut reader = EntryReader::inflating(
            memory(deflate(&text)),
            pools.inflaters.acquire(),
            text.len() as u64,
        );
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, text);
        drop(reader);
        assert_eq!(pools.inflaters.idle_count(), 1);
    }

    #[test]
    fn test_inflate_truncated() {
        let pools = Pools::new(2);
        let data: Vec<u8> = (0..5000u32).flat_map(|i| i.to_le_bytes()).collect();
        let mut compressed = deflate(&data);
        compressed.truncate(compressed.len() / 2);
        let mut reader = EntryReader::inflating(memory(compressed), pools.inflaters.acquire(), 0);
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }

    #[test]
    fn test_raw() {
        let mut reader = EntryReader::raw(memory(b"stored".to_vec()), 6);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "stored");
        assert_eq!(reader.size(), 6);
    }
}
