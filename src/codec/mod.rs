//! Frame compressor seam.
//!
//! The container only needs `compress(bytes) -> bytes` plus a worst-case
//! size bound.  Every frame must be a standalone Zstandard frame so that a
//! seekable-format reader can decode it in isolation; [`ZstdCompressor`] is
//! the only production implementation.

use thiserror::Error;

/// Default Zstd compression level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Invalid compression level {level} (supported {min}..={max})")]
    InvalidLevel { level: i32, min: i32, max: i32 },
}

// ── Compressor trait ─────────────────────────────────────────────────────────

pub trait Compressor: Send + Sync {
    fn name(&self) -> &'static str;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    /// Largest output `compress` can produce for `len` input bytes.
    fn compress_bound(&self, len: usize) -> usize;
}

// ── Zstandard ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    pub fn new(level: i32) -> Result<Self, CodecError> {
        let range = zstd::compression_level_range();
        if !range.contains(&level) {
            return Err(CodecError::InvalidLevel {
                level,
                min: *range.start(),
                max: *range.end(),
            });
        }
        Ok(Self { level })
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self { level: DEFAULT_COMPRESSION_LEVEL }
    }
}

impl Compressor for ZstdCompressor {
    fn name(&self) -> &'static str { "zstd" }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::bulk::compress(data, self.level).map_err(|e| CodecError::Compression(e.to_string()))
    }

    fn compress_bound(&self, len: usize) -> usize {
        zstd::zstd_safe::compress_bound(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zstd_frames_decode_standalone() {
        let c = ZstdCompressor::default();
        let data: Vec<u8> = (0u8..=255).cycle().take(10_000).collect();
        let frame = c.compress(&data).unwrap();
        assert!(frame.len() <= c.compress_bound(data.len()));
        assert_eq!(zstd::decode_all(frame.as_slice()).unwrap(), data);
    }

    #[test]
    fn level_outside_range_is_rejected() {
        assert!(ZstdCompressor::new(3).is_ok());
        assert!(matches!(ZstdCompressor::new(1000), Err(CodecError::InvalidLevel { level: 1000, .. })));
    }
}
