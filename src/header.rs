use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

use crate::sniff::Magic;

pub const MAGIC: &[u8; 4] = b"Z3DS";
pub const VERSION: u8 = 1;
/// On-disk size of [`Z3dsHeader`].  Never varies.
pub const HEADER_SIZE: usize = 0x20;
/// The metadata block is padded with zeros up to a multiple of this.
pub const METADATA_ALIGN: usize = 16;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Invalid magic number")]
    InvalidMagic,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),
    #[error("Unexpected header size: {0} (expected {HEADER_SIZE})")]
    InvalidHeaderSize(u16),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Fixed 32-byte container header.
///
/// Written twice during an encode: once with `compressed_size` unset, then
/// again at the same offset once the frames and trailer are out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Z3dsHeader {
    pub magic:             [u8; 4],
    pub underlying_magic:  Magic,
    pub version:           u8,
    pub reserved:          u8,
    pub header_size:       u16,
    pub metadata_size:     u32,
    pub compressed_size:   u64,
    pub uncompressed_size: u64,
}

impl Z3dsHeader {
    pub fn new(underlying_magic: Magic, uncompressed_size: u64) -> Self {
        Self {
            magic:             *MAGIC,
            underlying_magic,
            version:           VERSION,
            reserved:          0,
            header_size:       HEADER_SIZE as u16,
            metadata_size:     0,
            compressed_size:   0,
            uncompressed_size,
        }
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_all(self.underlying_magic.as_bytes())?;
        writer.write_u8(self.version)?;
        writer.write_u8(self.reserved)?;
        writer.write_u16::<LittleEndian>(self.header_size)?;
        writer.write_u32::<LittleEndian>(self.metadata_size)?;
        writer.write_u64::<LittleEndian>(self.compressed_size)?;
        writer.write_u64::<LittleEndian>(self.uncompressed_size)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, HeaderError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(HeaderError::InvalidMagic);
        }
        let mut underlying = [0u8; 4];
        reader.read_exact(&mut underlying)?;
        let version = reader.read_u8()?;
        if version != VERSION {
            return Err(HeaderError::UnsupportedVersion(version));
        }
        let reserved = reader.read_u8()?;
        let header_size = reader.read_u16::<LittleEndian>()?;
        if header_size as usize != HEADER_SIZE {
            return Err(HeaderError::InvalidHeaderSize(header_size));
        }
        Ok(Self {
            magic,
            underlying_magic:  Magic(underlying),
            version,
            reserved,
            header_size,
            metadata_size:     reader.read_u32::<LittleEndian>()?,
            compressed_size:   reader.read_u64::<LittleEndian>()?,
            uncompressed_size: reader.read_u64::<LittleEndian>()?,
        })
    }

    /// Byte offset of the first compressed frame, relative to the header.
    pub fn body_offset(&self) -> u64 {
        HEADER_SIZE as u64 + self.metadata_size as u64
    }
}

/// Round `len` up to the next [`METADATA_ALIGN`] boundary.
pub fn padded_metadata_size(len: usize) -> usize {
    len.div_ceil(METADATA_ALIGN) * METADATA_ALIGN
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_is_32_bytes_little_endian() {
        let mut header = Z3dsHeader::new(Magic::NCSD, 0x0102_0304_0506_0708);
        header.metadata_size   = 0x40;
        header.compressed_size = 0x1122;

        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[0..4], b"Z3DS");
        assert_eq!(&buf[4..8], b"NCSD");
        assert_eq!(buf[8], VERSION);
        assert_eq!(buf[9], 0);
        assert_eq!(&buf[10..12], &[0x20, 0x00]);
        assert_eq!(&buf[12..16], &[0x40, 0, 0, 0]);
        assert_eq!(&buf[16..24], &[0x22, 0x11, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&buf[24..32], &[8, 7, 6, 5, 4, 3, 2, 1]);

        let back = Z3dsHeader::read(Cursor::new(&buf)).unwrap();
        assert_eq!(back, header);
        assert_eq!(back.body_offset(), 0x60);
    }

    #[test]
    fn rejects_foreign_magic_and_version() {
        let mut buf = Vec::new();
        Z3dsHeader::new(Magic::UNKNOWN, 0).write(&mut buf).unwrap();

        let mut bad_magic = buf.clone();
        bad_magic[0] = b'X';
        assert!(matches!(Z3dsHeader::read(Cursor::new(&bad_magic)), Err(HeaderError::InvalidMagic)));

        let mut bad_version = buf.clone();
        bad_version[8] = 9;
        assert!(matches!(
            Z3dsHeader::read(Cursor::new(&bad_version)),
            Err(HeaderError::UnsupportedVersion(9))
        ));

        assert!(matches!(Z3dsHeader::read(Cursor::new(&buf[..20])), Err(HeaderError::Io(_))));
    }

    #[test]
    fn metadata_padding() {
        assert_eq!(padded_metadata_size(0), 0);
        assert_eq!(padded_metadata_size(1), 16);
        assert_eq!(padded_metadata_size(16), 16);
        assert_eq!(padded_metadata_size(17), 32);
    }
}
