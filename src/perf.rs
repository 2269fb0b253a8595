//! Performance utilities: ordered parallel frame compression and a
//! write-buffer that can seek back for header patching.
//!
//! # Parallel compression
//!
//! [`compress_frames`] compresses a batch of independent frames.  With the
//! `parallel` feature it fans out over Rayon; the indexed `collect` keeps
//! results in input order, so callers can write them straight to the output
//! stream without any reordering step.  Without the feature it runs the same
//! work sequentially.
//!
//! # Write buffer
//!
//! [`WriteBuffer`] accumulates small writes (header, metadata, seek-table
//! fields) and flushes to the underlying writer in large chunks.  Seeking
//! flushes first, so the reserve-then-patch header write works through it.

use std::io::{self, Seek, SeekFrom, Write};

use xxhash_rust::xxh64::xxh64;

use crate::codec::Compressor;
use crate::error::EncodeError;

// ── Frame compression ────────────────────────────────────────────────────────

/// A compressed frame produced by [`compress_frames`].
#[derive(Debug)]
pub struct CompressedFrame {
    /// Position of this frame in the whole encode (0-based).
    pub index:     usize,
    /// Low 32 bits of XXH64(seed 0) over the uncompressed bytes, or 0.
    pub checksum:  u32,
    /// Uncompressed byte count.
    pub orig_size: usize,
    /// Compressed bytes: one standalone Zstandard frame.
    pub payload:   Vec<u8>,
}

/// Seekable-format frame checksum.
pub fn frame_checksum(data: &[u8]) -> u32 {
    xxh64(data, 0) as u32
}

/// Compress `frames`, numbering them from `first_index`.
///
/// Returns one [`CompressedFrame`] per input frame in the same order.  The
/// first failing frame aborts the batch.
pub fn compress_frames(
    frames:      &[Vec<u8>],
    first_index: usize,
    compressor:  &dyn Compressor,
    checksums:   bool,
) -> Result<Vec<CompressedFrame>, EncodeError> {
    let one = |(i, frame): (usize, &Vec<u8>)| -> Result<CompressedFrame, EncodeError> {
        let index    = first_index + i;
        let checksum = if checksums { frame_checksum(frame) } else { 0 };
        let payload  = compressor.compress(frame)
            .map_err(|source| EncodeError::Compression { frame: index, source })?;
        Ok(CompressedFrame { index, checksum, orig_size: frame.len(), payload })
    };

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        if frames.len() > 1 {
            return frames.par_iter().enumerate().map(one).collect();
        }
    }

    frames.iter().enumerate().map(one).collect()
}

// ── Write buffer ─────────────────────────────────────────────────────────────

/// Buffered writer with configurable flush threshold.
///
/// Unlike `std::io::BufWriter`, this exposes `bytes_written()` and bypasses
/// the buffer entirely for writes at least `capacity` long, which is the
/// common case for compressed frames.
pub struct WriteBuffer<W: Write> {
    inner:         W,
    buf:           Vec<u8>,
    capacity:      usize,
    bytes_written: u64,
}

impl<W: Write> WriteBuffer<W> {
    pub fn new(inner: W, capacity: usize) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(capacity),
            capacity,
            bytes_written: 0,
        }
    }

    /// Total bytes accepted through `write`, including still-buffered ones.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush and return the inner writer.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.flush_buf()?;
        Ok(self.inner)
    }

    fn flush_buf(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.inner.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }
}

impl<W: Write> Write for WriteBuffer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() >= self.capacity {
            self.flush_buf()?;
            self.inner.write_all(buf)?;
        } else {
            self.buf.extend_from_slice(buf);
            if self.buf.len() >= self.capacity {
                self.flush_buf()?;
            }
        }
        self.bytes_written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buf()?;
        self.inner.flush()
    }
}

impl<W: Write + Seek> Seek for WriteBuffer<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.flush_buf()?;
        self.inner.seek(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecError, ZstdCompressor};
    use std::io::Cursor;

    struct Failing;
    impl Compressor for Failing {
        fn name(&self) -> &'static str { "failing" }
        fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
            if data.first() == Some(&0xFF) {
                Err(CodecError::Compression("refused".into()))
            } else {
                Ok(data.to_vec())
            }
        }
        fn compress_bound(&self, len: usize) -> usize { len }
    }

    #[test]
    fn checksum_is_low_half_of_xxh64() {
        assert_eq!(frame_checksum(b""), 0x51D8_E999);
        assert_eq!(frame_checksum(b"abc"), (0x44BC_2CF5_AD77_0999u64 & 0xFFFF_FFFF) as u32);
    }

    #[test]
    fn frames_keep_input_order() {
        let frames: Vec<Vec<u8>> = (0u8..8).map(|i| vec![i; 1000 + i as usize]).collect();
        let out = compress_frames(&frames, 5, &ZstdCompressor::default(), true).unwrap();
        assert_eq!(out.len(), 8);
        for (i, cf) in out.iter().enumerate() {
            assert_eq!(cf.index, 5 + i);
            assert_eq!(cf.orig_size, frames[i].len());
            assert_eq!(cf.checksum, frame_checksum(&frames[i]));
            assert_eq!(zstd::decode_all(cf.payload.as_slice()).unwrap(), frames[i]);
        }
    }

    #[test]
    fn failure_names_the_frame() {
        let frames = vec![vec![1u8; 4], vec![0xFF; 4], vec![2u8; 4]];
        match compress_frames(&frames, 10, &Failing, false) {
            Err(EncodeError::Compression { frame, .. }) => assert_eq!(frame, 11),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn write_buffer_flushes_before_seek() {
        let mut wb = WriteBuffer::new(Cursor::new(Vec::new()), 8);
        wb.write_all(b"hello").unwrap();
        wb.write_all(b" world!").unwrap();
        wb.seek(SeekFrom::Start(0)).unwrap();
        wb.write_all(b"J").unwrap();
        assert_eq!(wb.bytes_written(), 13);
        let inner = wb.into_inner().unwrap().into_inner();
        assert_eq!(&inner, b"Jello world!");
    }
}
