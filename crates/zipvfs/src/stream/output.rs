//! Writers producing entry data.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;

use flate2::{Compress, FlushCompress, Status};
use zipvfs_common::crc::Crc32;

use super::pool::{Pooled, Pools};
use crate::entry::{Content, Entry, EntryState};
use crate::error::Result;
use crate::filesystem::Shared;
use crate::staging::StagingFile;
use crate::zip::CompressionMethod;

const OUTPUT_BUFFER: usize = 8 * 1024;

/// CRC and sizes of encoded entry data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DataSizes {
    pub crc32: u32,
    pub size: u64,
    pub compressed_size: u64,
}

/// Compresses (or stores) uncompressed bytes into `inner`, tracking CRC-32
/// and both sizes.
pub(crate) struct EntryEncoder<W: Write> {
    inner: W,
    deflater: Option<Pooled<Compress>>,
    crc: Crc32,
    bytes_in: u64,
    bytes_out: u64,
    buf: Vec<u8>,
}

impl<W: Write> EntryEncoder<W> {
    pub fn new(inner: W, method: CompressionMethod, pools: &Pools) -> Self {
        let deflater = match method {
            CompressionMethod::Store => None,
            CompressionMethod::Deflate => Some(pools.deflaters.acquire()),
        };
        Self {
            inner,
            buf: if deflater.is_some() {
                vec![0u8; OUTPUT_BUFFER]
            } else {
                Vec::new()
            },
            deflater,
            crc: Crc32::new(),
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    /// Flush the compressor and return the sink with the final sizes.
    pub fn finish(mut self) -> io::Result<(W, DataSizes)> {
        if let Some(deflater) = self.deflater.as_mut() {
            loop {
                let before_out = deflater.total_out();
                let status = deflater
                    .compress(&[], &mut self.buf, FlushCompress::Finish)
                    .map_err(io::Error::other)?;
                let produced = (deflater.total_out() - before_out) as usize;
                self.inner.write_all(&self.buf[..produced])?;
                self.bytes_out += produced as u64;
                if status == Status::StreamEnd {
                    break;
                }
            }
        }
        self.inner.flush()?;
        let sizes = DataSizes {
            crc32: self.crc.finalize(),
            size: self.bytes_in,
            compressed_size: self.bytes_out,
        };
        Ok((self.inner, sizes))
    }
}

impl<W: Write> Write for EntryEncoder<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.deflater.as_mut() {
            None => {
                self.inner.write_all(data)?;
                self.bytes_out += data.len() as u64;
            }
            Some(deflater) => {
                let mut input = data;
                while !input.is_empty() {
                    let before_in = deflater.total_in();
                    let before_out = deflater.total_out();
                    deflater
                        .compress(input, &mut self.buf, FlushCompress::None)
                        .map_err(io::Error::other)?;
                    let consumed = (deflater.total_in() - before_in) as usize;
                    let produced = (deflater.total_out() - before_out) as usize;
                    self.inner.write_all(&self.buf[..produced])?;
                    self.bytes_out += produced as u64;
                    input = &input[consumed..];
                }
            }
        }
        self.crc.update(data);
        self.bytes_in += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Destination of a writer's compressed bytes.
#[derive(Debug)]
pub(crate) enum Sink {
    Memory(Vec<u8>),
    Staged {
        file: StagingFile,
        writer: BufWriter<File>,
    },
}

impl Sink {
    pub fn staged(file: StagingFile) -> io::Result<Self> {
        let writer = BufWriter::new(file.open_write()?);
        Ok(Self::Staged { file, writer })
    }

    fn into_content(self) -> io::Result<Content> {
        match self {
            Self::Memory(bytes) => Ok(Content::Bytes(Arc::from(bytes))),
            Self::Staged { file, mut writer } => {
                writer.flush()?;
                Ok(Content::Staged(file))
            }
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Memory(bytes) => bytes.write(buf),
            Self::Staged { writer, .. } => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Memory(_) => Ok(()),
            Self::Staged { writer, .. } => writer.flush(),
        }
    }
}

/// Writer for the content of a new or replaced entry.
///
/// Data is compressed as it is written. The entry becomes visible in the
/// filesystem when the writer is finished or dropped.
pub struct EntryWriter {
    shared: Arc<Shared>,
    entry: Option<Entry>,
    encoder: Option<EntryEncoder<Sink>>,
}

impl EntryWriter {
    pub(crate) fn new(shared: Arc<Shared>, entry: Entry, sink: Sink) -> Self {
        let encoder = EntryEncoder::new(sink, entry.method, &shared.pools);
        Self {
            shared,
            entry: Some(entry),
            encoder: Some(encoder),
        }
    }

    /// Complete the entry and publish it to the filesystem. Calling this
    /// again has no effect.
    pub fn finish(&mut self) -> Result<()> {
        let (Some(encoder), Some(mut entry)) = (self.encoder.take(), self.entry.take()) else {
            return Ok(());
        };
        let (sink, sizes) = encoder.finish()?;
        entry.crc32 = sizes.crc32;
        entry.size = sizes.size;
        entry.compressed_size = sizes.compressed_size;
        entry.state = EntryState::New(sink.into_content()?);
        self.shared.commit(entry)
    }

    /// Drop everything written so far without publishing the entry.
    pub(crate) fn discard(&mut self) {
        self.encoder = None;
        self.entry = None;
    }
}

impl Write for EntryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "entry writer already finished",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for EntryWriter {
    fn drop(&mut self) {
        if self.encoder.is_some() {
            if let Err(err) = self.finish() {
                log::warn!("failed to finish entry on drop: {err}");
            }
        }
    }
}

impl std::fmt::Debug for EntryWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryWriter")
            .field("entry", &self.entry.as_ref().map(Entry::display_name))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::DeflateDecoder;
    use std::io::Read;

    #[test]
    fn test_store_tracks_crc_and_sizes() {
        let pools = Pools::new(1);
        let mut encoder = EntryEncoder::new(Vec::new(), CompressionMethod::Store, &pools);
        encoder.write_all(b"hello").unwrap();
        let (out, sizes) = encoder.finish().unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(sizes.crc32, 0x3610a686);
        assert_eq!(sizes.size, 5);
        assert_eq!(sizes.compressed_size, 5);
    }

    #[test]
    fn test_deflate_round_trip() {
        let pools = Pools::new(1);
        let data = b"abcdefgh".repeat(10_000);
        let mut encoder = EntryEncoder::new(Vec::new(), CompressionMethod::Deflate, &pools);
        for chunk in data.chunks(777) {
            encoder.write_all(chunk).unwrap();
        }
        let (out, sizes) = encoder.finish().unwrap();
        assert_eq!(sizes.size, data.len() as u64);
        assert_eq!(sizes.compressed_size, out.len() as u64);
        assert!(out.len() < data.len() / 10);
        assert_eq!(pools.deflaters.idle_count(), 1);

        let mut decoded = Vec::new();
        DeflateDecoder::new(&out[..]).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_empty_deflate_stream() {
        let pools = Pools::new(1);
        let encoder = EntryEncoder::new(Vec::new(), CompressionMethod::Deflate, &pools);
        let (out, sizes) = encoder.finish().unwrap();
        assert_eq!(sizes.size, 0);
        assert_eq!(sizes.crc32, 0);
        assert!(!out.is_empty());
    }
}
