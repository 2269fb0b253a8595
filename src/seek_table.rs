//! Zstandard seekable-format trailer.
//!
//! # Layout
//! ```text
//! skippable_magic: u32 LE = 0x184D2A5E
//! frame_size:      u32 LE  (bytes that follow: entries + footer)
//! entry*:          compressed_size: u32 | decompressed_size: u32 | [checksum: u32]
//! frame_count:     u32 LE
//! descriptor:      u8      (bit 7 = checksums present, bits 2..=6 reserved)
//! seekable_magic:  u32 LE = 0x8F92EAB1
//! ```
//!
//! Entries appear in the order their frames were written, so frame offsets
//! are recovered by prefix-summing `compressed_size`.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;

pub const SKIPPABLE_MAGIC:       u32   = 0x184D_2A5E;
pub const SEEKABLE_MAGIC:        u32   = 0x8F92_EAB1;
pub const SKIPPABLE_HEADER_SIZE: usize = 8;
pub const FOOTER_SIZE:           usize = 9;
pub const CHECKSUM_FLAG:         u8    = 0x80;
const RESERVED_BITS:             u8    = 0x7C;

/// Most frames a seek table may index.
pub const MAX_FRAMES: usize = 0x800_0000;

#[derive(Error, Debug)]
pub enum SeekTableError {
    #[error("Invalid seekable magic: 0x{0:08X}")]
    InvalidSeekableMagic(u32),
    #[error("Invalid skippable frame magic: 0x{0:08X}")]
    InvalidSkippableMagic(u32),
    #[error("Reserved descriptor bits set: 0x{0:02X}")]
    ReservedBits(u8),
    #[error("Seek table length mismatch: frame declares {declared} bytes, {frame_count} entries need {expected}")]
    LengthMismatch { declared: u32, expected: usize, frame_count: u32 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekEntry {
    pub compressed_size:   u32,
    pub decompressed_size: u32,
    /// Low 32 bits of XXH64(seed 0) over the uncompressed frame.
    pub checksum:          u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeekTable {
    pub entries:   Vec<SeekEntry>,
    pub checksums: bool,
}

impl SeekTable {
    pub fn new(entries: Vec<SeekEntry>, checksums: bool) -> Self {
        Self { entries, checksums }
    }

    pub fn entry_size(&self) -> usize {
        entry_size(self.checksums)
    }

    pub fn descriptor(&self) -> u8 {
        if self.checksums { CHECKSUM_FLAG } else { 0 }
    }

    /// Bytes the trailer occupies on disk; zero when there are no entries.
    pub fn encoded_len(&self) -> usize {
        if self.entries.is_empty() {
            return 0;
        }
        SKIPPABLE_HEADER_SIZE + self.payload_len()
    }

    fn payload_len(&self) -> usize {
        self.entries.len() * self.entry_size() + FOOTER_SIZE
    }

    /// Write the trailer.  Writes nothing when there are no entries.
    /// Returns the number of bytes written.
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<usize> {
        if self.entries.is_empty() {
            return Ok(0);
        }
        writer.write_u32::<LittleEndian>(SKIPPABLE_MAGIC)?;
        writer.write_u32::<LittleEndian>(self.payload_len() as u32)?;
        for entry in &self.entries {
            writer.write_u32::<LittleEndian>(entry.compressed_size)?;
            writer.write_u32::<LittleEndian>(entry.decompressed_size)?;
            if self.checksums {
                writer.write_u32::<LittleEndian>(entry.checksum)?;
            }
        }
        writer.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        writer.write_u8(self.descriptor())?;
        writer.write_u32::<LittleEndian>(SEEKABLE_MAGIC)?;
        Ok(self.encoded_len())
    }

    /// Locate and decode the trailer at the end of `reader`.
    pub fn read_from_end<R: Read + Seek>(mut reader: R) -> Result<Self, SeekTableError> {
        reader.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let frame_count = reader.read_u32::<LittleEndian>()?;
        let descriptor  = reader.read_u8()?;
        let magic       = reader.read_u32::<LittleEndian>()?;
        if magic != SEEKABLE_MAGIC {
            return Err(SeekTableError::InvalidSeekableMagic(magic));
        }
        if descriptor & RESERVED_BITS != 0 {
            return Err(SeekTableError::ReservedBits(descriptor));
        }
        let checksums = descriptor & CHECKSUM_FLAG != 0;
        let payload   = frame_count as usize * entry_size(checksums) + FOOTER_SIZE;

        reader.seek(SeekFrom::End(-((SKIPPABLE_HEADER_SIZE + payload) as i64)))?;
        let skippable = reader.read_u32::<LittleEndian>()?;
        if skippable != SKIPPABLE_MAGIC {
            return Err(SeekTableError::InvalidSkippableMagic(skippable));
        }
        let declared = reader.read_u32::<LittleEndian>()?;
        if declared as usize != payload {
            return Err(SeekTableError::LengthMismatch { declared, expected: payload, frame_count });
        }

        let mut entries = Vec::with_capacity(frame_count as usize);
        for _ in 0..frame_count {
            entries.push(SeekEntry {
                compressed_size:   reader.read_u32::<LittleEndian>()?,
                decompressed_size: reader.read_u32::<LittleEndian>()?,
                checksum:          if checksums { reader.read_u32::<LittleEndian>()? } else { 0 },
            });
        }
        Ok(Self { entries, checksums })
    }

    /// Offset of each frame relative to the first, plus the end offset.
    pub fn frame_offsets(&self) -> Vec<u64> {
        let mut offsets = Vec::with_capacity(self.entries.len() + 1);
        let mut pos = 0u64;
        offsets.push(pos);
        for e in &self.entries {
            pos += e.compressed_size as u64;
            offsets.push(pos);
        }
        offsets
    }

    pub fn total_compressed(&self) -> u64 {
        self.entries.iter().map(|e| e.compressed_size as u64).sum()
    }

    pub fn total_decompressed(&self) -> u64 {
        self.entries.iter().map(|e| e.decompressed_size as u64).sum()
    }
}

fn entry_size(checksums: bool) -> usize {
    if checksums { 12 } else { 8 }
}
