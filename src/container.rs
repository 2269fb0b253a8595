//! Container builder: the encode entry point.
//!
//! ```no_run
//! use z3ds::container::{encode, EncodeOptions};
//!
//! let summary = encode("game.cci", "game.zcci", &EncodeOptions::default(), None)?;
//! println!("{} frames", summary.frame_count);
//! # Ok::<(), z3ds::EncodeError>(())
//! ```
//!
//! # Sequence
//! 1. sniff the source tag (unless supplied) and pick a frame size
//! 2. assemble metadata: tool identity, UTC timestamp, frame size, extras
//! 3. write the header with `compressed_size` unset
//! 4. write metadata and zero padding to a 16-byte boundary
//! 5. stream the source through [`FrameEncoder`] in fixed read chunks
//! 6. finish frames and append the seek-table trailer
//! 7. seek back and rewrite the header with the final sizes
//!
//! Nothing is written atomically.  On error the destination is left partial.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace};

use crate::codec::{Compressor, ZstdCompressor, DEFAULT_COMPRESSION_LEVEL};
use crate::error::EncodeError;
use crate::frame::{FrameEncoder, FrameSummary};
use crate::header::{padded_metadata_size, Z3dsHeader};
use crate::metadata::Metadata;
use crate::perf::WriteBuffer;
use crate::seek_table::SeekTable;
use crate::sniff::{self, Magic};

/// Source read chunk: 64 KiB.  Independent of the frame size.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;
/// Output write-buffer capacity: 1 MiB.
pub const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

pub const TOOL_NAME: &str = concat!("z3ds ", env!("CARGO_PKG_VERSION"));

pub mod keys {
    pub const COMPRESSOR:     &str = "compressor";
    pub const DATE:           &str = "date";
    pub const MAX_FRAME_SIZE: &str = "maxframesize";
}

// ── Progress ─────────────────────────────────────────────────────────────────

/// Observer called after every source read with `(processed, total)` bytes.
///
/// Runs synchronously on the encode path; a slow observer stalls the encode.
pub trait ProgressObserver {
    fn on_progress(&mut self, processed: u64, total: u64);
}

impl<F: FnMut(u64, u64)> ProgressObserver for F {
    fn on_progress(&mut self, processed: u64, total: u64) {
        self(processed, total)
    }
}

// ── EncodeOptions ────────────────────────────────────────────────────────────

/// Configuration for [`ContainerBuilder`].
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Tag written as `underlying_magic`.  Sniffed from the source when unset.
    pub underlying_magic: Option<Magic>,
    /// Frame size in bytes.  Defaults per tag when unset.
    pub frame_size:       Option<usize>,
    pub level:            i32,
    /// Embed per-frame XXH64 checksums in the seek table.
    pub checksums:        bool,
    /// Full frames compressed per batch.  Values above 1 only run in
    /// parallel when built with the `parallel` feature.
    pub batch_frames:     usize,
    /// Extra metadata items, applied after (and able to override) the
    /// derived ones.
    pub metadata:         Vec<(String, Vec<u8>)>,
    /// Timestamp for the `date` item.  Current UTC time when unset.
    pub timestamp:        Option<DateTime<Utc>>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            underlying_magic: None,
            frame_size:       None,
            level:            DEFAULT_COMPRESSION_LEVEL,
            checksums:        true,
            batch_frames:     1,
            metadata:         Vec::new(),
            timestamp:        None,
        }
    }
}

// ── EncodeSummary ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSummary {
    pub header:        Z3dsHeader,
    pub frame_size:    usize,
    pub frame_count:   usize,
    pub seek_table:    SeekTable,
    /// Metadata bytes before padding.
    pub metadata_len:  usize,
}

// ── ContainerBuilder ─────────────────────────────────────────────────────────

pub struct ContainerBuilder {
    underlying_magic: Magic,
    frame_size:       usize,
    checksums:        bool,
    batch_frames:     usize,
    metadata:         Metadata,
    compressor:       Box<dyn Compressor>,
}

impl ContainerBuilder {
    /// Resolve options against an already-known tag.
    pub fn new(underlying_magic: Magic, opts: &EncodeOptions) -> Result<Self, EncodeError> {
        let compressor = ZstdCompressor::new(opts.level)
            .map_err(|e| EncodeError::Config(e.to_string()))?;
        Self::with_compressor(underlying_magic, opts, Box::new(compressor))
    }

    /// Same as [`ContainerBuilder::new`] with a caller-supplied compressor.
    pub fn with_compressor(
        underlying_magic: Magic,
        opts:             &EncodeOptions,
        compressor:       Box<dyn Compressor>,
    ) -> Result<Self, EncodeError> {
        let frame_size = opts.frame_size.unwrap_or_else(|| sniff::default_frame_size(underlying_magic));
        crate::frame::validate_frame_size(frame_size, compressor.as_ref())?;

        let date = opts.timestamp.unwrap_or_else(Utc::now);
        let mut metadata = Metadata::new();
        metadata.add(keys::COMPRESSOR, TOOL_NAME);
        metadata.add(keys::DATE, iso8601(&date));
        metadata.add(keys::MAX_FRAME_SIZE, frame_size.to_string());
        for (name, value) in &opts.metadata {
            trace!(name = %name, len = value.len(), "extra metadata item");
            metadata.add(name, value.clone());
        }

        Ok(Self {
            underlying_magic,
            frame_size,
            checksums:    opts.checksums,
            batch_frames: opts.batch_frames,
            metadata,
            compressor,
        })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Encode `total` bytes from `source` into `dest`, starting at the
    /// current position of `dest`.
    ///
    /// Fewer than `total` source bytes is an error; bytes past `total` are
    /// not read.  `dest` is left positioned at the end of the container.
    pub fn encode_stream<R: Read, W: Write + Seek>(
        &self,
        source:   R,
        total:    u64,
        mut dest: W,
        mut progress: Option<&mut dyn ProgressObserver>,
    ) -> Result<EncodeSummary, EncodeError> {
        let metadata_bytes = self.metadata.serialize();
        let padded = padded_metadata_size(metadata_bytes.len());
        let mut header = Z3dsHeader::new(self.underlying_magic, total);
        header.metadata_size = u32::try_from(padded)
            .map_err(|_| EncodeError::Format(format!("metadata block of {padded} bytes is too large")))?;

        info!(
            magic = %self.underlying_magic,
            frame_size = self.frame_size,
            uncompressed = total,
            "encoding container"
        );

        let header_pos = dest.stream_position()?;
        header.write(&mut dest)?;
        dest.write_all(&metadata_bytes)?;
        dest.write_all(&vec![0u8; padded - metadata_bytes.len()])?;

        let mut frames = FrameEncoder::new(&mut dest, self.compressor.as_ref(), self.frame_size, self.checksums)?
            .with_batch_frames(self.batch_frames);

        let mut source = source.take(total);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut processed = 0u64;
        while processed < total {
            let n = match source.read(&mut buf) {
                Ok(0)  => break,
                Ok(n)  => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            frames.feed(&buf[..n])?;
            processed += n as u64;
            if let Some(p) = progress.as_deref_mut() {
                p.on_progress(processed, total);
            }
        }
        if processed != total {
            return Err(EncodeError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source ended after {processed} of {total} bytes"),
            )));
        }

        let FrameSummary { seek_table, compressed_size, .. } = frames.finish()?;
        header.compressed_size = compressed_size;

        let end = dest.stream_position()?;
        dest.seek(SeekFrom::Start(header_pos))?;
        header.write(&mut dest)?;
        dest.seek(SeekFrom::Start(end))?;
        dest.flush()?;

        info!(
            frames = seek_table.entries.len(),
            compressed = header.compressed_size,
            "container complete"
        );
        Ok(EncodeSummary {
            frame_size:   self.frame_size,
            frame_count:  seek_table.entries.len(),
            seek_table,
            metadata_len: metadata_bytes.len(),
            header,
        })
    }
}

/// Encode the file at `source` into a new container at `dest`.
///
/// The tag is sniffed from `source` unless `opts.underlying_magic` is set.
pub fn encode<P: AsRef<Path>, Q: AsRef<Path>>(
    source:   P,
    dest:     Q,
    opts:     &EncodeOptions,
    progress: Option<&mut dyn ProgressObserver>,
) -> Result<EncodeSummary, EncodeError> {
    let source = source.as_ref();
    let magic = opts.underlying_magic.unwrap_or_else(|| sniff::detect(source));
    let builder = ContainerBuilder::new(magic, opts)?;

    let input = File::open(source)?;
    let total = input.metadata()?.len();
    let mut output = WriteBuffer::new(File::create(dest.as_ref())?, WRITE_BUFFER_SIZE);
    let summary = builder.encode_stream(input, total, &mut output, progress)?;
    debug!(bytes = output.bytes_written(), path = %dest.as_ref().display(), "syncing output");
    output.into_inner()?.sync_all()?;
    Ok(summary)
}

fn iso8601(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
