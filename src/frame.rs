//! Seekable frame encoder.
//!
//! [`FrameEncoder`] accepts the source stream in arbitrary slices, cuts it
//! into `frame_size` units, compresses each unit as an independent Zstandard
//! frame and records a [`SeekEntry`] for it.  [`FrameEncoder::finish`] emits
//! the short trailing frame (if any) and the seek-table trailer.
//!
//! With `batch_frames > 1`, full frames are held back until a batch is ready
//! and compressed together through [`compress_frames`]; they still reach the
//! writer in source order.

use std::io::Write;

use tracing::debug;

use crate::codec::{CodecError, Compressor};
use crate::error::EncodeError;
use crate::perf::{compress_frames, CompressedFrame};
use crate::seek_table::{SeekEntry, SeekTable, MAX_FRAMES};

/// Largest decompressed frame a seekable-format reader accepts (1 GiB).
pub const MAX_FRAME_SIZE: usize = 0x4000_0000;

pub struct FrameEncoder<'c, W: Write> {
    writer:           W,
    compressor:       &'c dyn Compressor,
    frame_size:       usize,
    checksums:        bool,
    batch_frames:     usize,
    buffer:           Vec<u8>,
    /// Full frames waiting for a batch compression.
    pending:          Vec<Vec<u8>>,
    entries:          Vec<SeekEntry>,
    total_compressed: u64,
}

/// Result of [`FrameEncoder::finish`].
#[derive(Debug)]
pub struct FrameSummary<W> {
    pub writer:          W,
    pub seek_table:      SeekTable,
    /// Frames plus trailer, in bytes.
    pub compressed_size: u64,
}

impl<'c, W: Write> FrameEncoder<'c, W> {
    pub fn new(
        writer:     W,
        compressor: &'c dyn Compressor,
        frame_size: usize,
        checksums:  bool,
    ) -> Result<Self, EncodeError> {
        validate_frame_size(frame_size, compressor)?;
        Ok(Self {
            writer,
            compressor,
            frame_size,
            checksums,
            batch_frames:     1,
            buffer:           Vec::with_capacity(frame_size.min(crate::container::READ_BUFFER_SIZE)),
            pending:          Vec::new(),
            entries:          Vec::new(),
            total_compressed: 0,
        })
    }

    /// Compress up to `n` full frames per batch (clamped to at least 1).
    pub fn with_batch_frames(mut self, n: usize) -> Self {
        self.batch_frames = n.max(1);
        self
    }

    /// Entries for frames already written.
    pub fn entries(&self) -> &[SeekEntry] {
        &self.entries
    }

    /// Append `data`, flushing every time a full frame accumulates.
    pub fn feed(&mut self, mut data: &[u8]) -> Result<(), EncodeError> {
        while !data.is_empty() {
            let take = data.len().min(self.frame_size - self.buffer.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.buffer.len() == self.frame_size {
                let full = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.frame_size));
                self.pending.push(full);
                if self.pending.len() >= self.batch_frames {
                    self.flush_pending()?;
                }
            }
        }
        Ok(())
    }

    /// Compress and write whatever is buffered, even a short frame.
    /// A no-op when nothing is buffered.
    pub fn flush_frame(&mut self) -> Result<(), EncodeError> {
        if !self.buffer.is_empty() {
            let partial = std::mem::take(&mut self.buffer);
            self.pending.push(partial);
        }
        self.flush_pending()
    }

    /// Flush the trailing frame and append the seek-table trailer.
    pub fn finish(mut self) -> Result<FrameSummary<W>, EncodeError> {
        self.flush_frame()?;

        let seek_table = SeekTable::new(std::mem::take(&mut self.entries), self.checksums);
        let trailer = seek_table.write(&mut self.writer)?;
        self.total_compressed += trailer as u64;
        self.writer.flush()?;

        debug!(
            frames = seek_table.entries.len(),
            trailer_bytes = trailer,
            compressed = self.total_compressed,
            "seek table written"
        );
        Ok(FrameSummary {
            writer:          self.writer,
            seek_table,
            compressed_size: self.total_compressed,
        })
    }

    fn flush_pending(&mut self) -> Result<(), EncodeError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if self.entries.len() + self.pending.len() > MAX_FRAMES {
            return Err(EncodeError::Config(format!(
                "input needs more than {MAX_FRAMES} frames at frame size {}",
                self.frame_size
            )));
        }

        let frames = std::mem::take(&mut self.pending);
        for frame in compress_frames(&frames, self.entries.len(), self.compressor, self.checksums)? {
            self.write_frame(frame)?;
        }
        Ok(())
    }

    fn write_frame(&mut self, frame: CompressedFrame) -> Result<(), EncodeError> {
        let compressed_size = compressed_size(frame.index, frame.payload.len())?;
        self.writer.write_all(&frame.payload)?;

        debug!(
            frame = frame.index,
            decompressed = frame.orig_size,
            compressed = compressed_size,
            "frame written"
        );
        self.entries.push(SeekEntry {
            compressed_size,
            decompressed_size: frame.orig_size as u32,
            checksum:          frame.checksum,
        });
        self.total_compressed += compressed_size as u64;
        Ok(())
    }
}

/// Seek-table size of a compressed frame.  A compressor that overshoots
/// 32 bits has failed that frame.
fn compressed_size(index: usize, len: usize) -> Result<u32, EncodeError> {
    u32::try_from(len).map_err(|_| EncodeError::Compression {
        frame:  index,
        source: CodecError::Compression(format!(
            "{len} compressed bytes exceed the 32-bit seek-table field"
        )),
    })
}

/// Reject frame sizes a seekable-format reader could not index.
pub fn validate_frame_size(frame_size: usize, compressor: &dyn Compressor) -> Result<(), EncodeError> {
    if frame_size == 0 {
        return Err(EncodeError::Config("frame size must be positive".into()));
    }
    if frame_size > MAX_FRAME_SIZE {
        return Err(EncodeError::Config(format!(
            "frame size {frame_size} exceeds the {MAX_FRAME_SIZE}-byte limit"
        )));
    }
    if compressor.compress_bound(frame_size) > u32::MAX as usize {
        return Err(EncodeError::Config(format!(
            "{} output for {frame_size}-byte frames may not fit a 32-bit size",
            compressor.name()
        )));
    }
    Ok(())
}
