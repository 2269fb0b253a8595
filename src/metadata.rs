//! Self-describing key → blob table stored right after the header.
//!
//! # Layout
//! ```text
//! version: u8
//! item*:   type: u8 | name_len: u8 | data_len: u16 LE | name | data
//! end:     four zero bytes (type = END)
//! ```
//!
//! Names are raw bytes and need not be UTF-8.  Names longer than 255 bytes
//! are cut when added, so two names sharing that prefix are the same key.
//! Values longer than 65535 bytes are cut on serialization.  Neither ever
//! fails an encode.
//!
//! Items keep insertion order, so identical tables serialize to identical
//! bytes.  Re-adding an existing name replaces its value in place.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;

pub const METADATA_VERSION: u8 = 1;

pub const ITEM_HEADER_SIZE: usize = 4;
pub const MAX_NAME_LEN:     usize = u8::MAX as usize;
pub const MAX_DATA_LEN:     usize = u16::MAX as usize;

/// Item type codes.  Anything other than `BINARY` is skipped on parse.
pub mod item_type {
    pub const END:    u8 = 0;
    pub const BINARY: u8 = 1;
}

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Truncated metadata item at offset {offset}: needs {needed} bytes, {available} remain")]
    Truncated { offset: usize, needed: usize, available: usize },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    items: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `name`, or overwrite its value if already present.
    /// Only the first [`MAX_NAME_LEN`] bytes of `name` are kept.
    pub fn add(&mut self, name: impl AsRef<[u8]>, data: impl Into<Vec<u8>>) {
        let name = clamp_name(name.as_ref());
        let data = data.into();
        match self.items.iter_mut().find(|(n, _)| n.as_slice() == name) {
            Some((_, slot)) => *slot = data,
            None            => self.items.push((name.to_vec(), data)),
        }
    }

    pub fn get(&self, name: impl AsRef<[u8]>) -> Option<&[u8]> {
        let name = clamp_name(name.as_ref());
        self.items.iter().find(|(n, _)| n.as_slice() == name).map(|(_, d)| d.as_slice())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.items.iter().map(|(n, d)| (n.as_slice(), d.as_slice()))
    }

    /// Encode the table.  An empty table encodes to zero bytes.
    pub fn serialize(&self) -> Vec<u8> {
        if self.items.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(self.encoded_len());
        // Writes into a Vec cannot fail.
        let _ = self.write(&mut out);
        out
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u8(METADATA_VERSION)?;
        for (name, data) in &self.items {
            let data = &data[..data.len().min(MAX_DATA_LEN)];
            writer.write_u8(item_type::BINARY)?;
            writer.write_u8(name.len() as u8)?;
            writer.write_u16::<LittleEndian>(data.len() as u16)?;
            writer.write_all(name)?;
            writer.write_all(data)?;
        }
        writer.write_all(&[0u8; ITEM_HEADER_SIZE])?;
        Ok(())
    }

    /// Decode a table produced by [`Metadata::serialize`].
    ///
    /// A block whose version byte is not [`METADATA_VERSION`] decodes as an
    /// empty table.  Decoding stops at the first END item or at a clean end
    /// of buffer; a header or payload cut short is an error.
    pub fn parse(bytes: &[u8]) -> Result<Self, MetadataError> {
        let mut meta = Self::new();
        let Some((&version, _)) = bytes.split_first() else {
            return Ok(meta);
        };
        if version != METADATA_VERSION {
            return Ok(meta);
        }

        let mut cur = Cursor::new(bytes);
        cur.set_position(1);
        loop {
            let left = remaining(&cur, bytes);
            if left == 0 {
                break;
            }
            require(&cur, ITEM_HEADER_SIZE, left)?;

            let kind     = cur.read_u8()?;
            let name_len = cur.read_u8()? as usize;
            let data_len = cur.read_u16::<LittleEndian>()? as usize;
            if kind == item_type::END {
                break;
            }

            require(&cur, name_len + data_len, remaining(&cur, bytes))?;
            if kind != item_type::BINARY {
                cur.set_position(cur.position() + (name_len + data_len) as u64);
                continue;
            }

            let mut name = vec![0u8; name_len];
            let mut data = vec![0u8; data_len];
            cur.read_exact(&mut name)?;
            cur.read_exact(&mut data)?;
            meta.add(name, data);
        }
        Ok(meta)
    }

    fn encoded_len(&self) -> usize {
        let items: usize = self.items.iter()
            .map(|(n, d)| ITEM_HEADER_SIZE + n.len() + d.len().min(MAX_DATA_LEN))
            .sum();
        1 + items + ITEM_HEADER_SIZE
    }
}

fn clamp_name(name: &[u8]) -> &[u8] {
    &name[..name.len().min(MAX_NAME_LEN)]
}

fn remaining(cur: &Cursor<&[u8]>, bytes: &[u8]) -> usize {
    bytes.len().saturating_sub(cur.position() as usize)
}

fn require(cur: &Cursor<&[u8]>, needed: usize, available: usize) -> Result<(), MetadataError> {
    if needed > available {
        return Err(MetadataError::Truncated {
            offset: cur.position() as usize,
            needed,
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_keeps_a_single_entry() {
        let mut meta = Metadata::new();
        meta.add("k", "v");
        meta.add("k", "w");

        let back = Metadata::parse(&meta.serialize()).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back.get("k"), Some(&b"w"[..]));
    }

    #[test]
    fn byte_layout_and_order() {
        let mut meta = Metadata::new();
        meta.add("ab", vec![1, 2, 3]);
        meta.add("c", Vec::new());

        assert_eq!(meta.serialize(), vec![
            1,
            1, 2, 3, 0, b'a', b'b', 1, 2, 3,
            1, 1, 0, 0, b'c',
            0, 0, 0, 0,
        ]);
        let back = Metadata::parse(&meta.serialize()).unwrap();
        let names: Vec<&[u8]> = back.iter().map(|(n, _)| n).collect();
        assert_eq!(names, [&b"ab"[..], &b"c"[..]]);
    }

    #[test]
    fn empty_table_is_zero_bytes() {
        assert!(Metadata::new().serialize().is_empty());
        assert!(Metadata::parse(&[]).unwrap().is_empty());
    }

    #[test]
    fn oversized_fields_are_truncated() {
        let mut meta = Metadata::new();
        meta.add("n".repeat(300), vec![7u8; 70_000]);

        let bytes = meta.serialize();
        assert_eq!(bytes.len(), 1 + 4 + 255 + 65535 + 4);

        let back = Metadata::parse(&bytes).unwrap();
        let (name, data) = back.iter().next().unwrap();
        assert_eq!(name.len(), 255);
        assert_eq!(data.len(), 65535);
    }

    #[test]
    fn names_sharing_a_truncated_prefix_are_one_key() {
        let prefix = "n".repeat(MAX_NAME_LEN);
        let mut meta = Metadata::new();
        meta.add(format!("{prefix}x"), "first");
        meta.add(format!("{prefix}y"), "second");
        assert_eq!(meta.len(), 1);

        let back = Metadata::parse(&meta.serialize()).unwrap();
        assert_eq!(back, meta);
        assert_eq!(back.get(&prefix), Some(&b"second"[..]));
    }

    #[test]
    fn non_utf8_names_survive_a_round_trip() {
        let bytes = [
            1,
            1, 1, 1, 0, 0xFF, b'a',
            1, 1, 1, 0, 0xFE, b'b',
            0, 0, 0, 0,
        ];
        let meta = Metadata::parse(&bytes).unwrap();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta.get([0xFF]), Some(&b"a"[..]));
        assert_eq!(meta.get([0xFE]), Some(&b"b"[..]));
        assert_eq!(meta.serialize(), bytes);
    }

    #[test]
    fn wrong_version_yields_empty() {
        let mut meta = Metadata::new();
        meta.add("k", "v");
        let mut bytes = meta.serialize();
        bytes[0] = 0xEE;
        assert!(Metadata::parse(&bytes).unwrap().is_empty());
    }

    #[test]
    fn unknown_item_types_are_skipped() {
        let bytes = [
            1,
            7, 1, 2, 0, b'x', 0xAA, 0xBB,
            1, 1, 1, 0, b'y', 0x42,
            0, 0, 0, 0,
        ];
        let meta = Metadata::parse(&bytes).unwrap();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta.get("y"), Some(&[0x42][..]));
    }

    #[test]
    fn stops_at_end_item_and_ignores_padding() {
        let mut meta = Metadata::new();
        meta.add("k", "v");
        let mut bytes = meta.serialize();
        bytes.resize(32, 0);
        assert_eq!(Metadata::parse(&bytes).unwrap(), meta);
    }

    #[test]
    fn clean_end_of_buffer_without_end_item() {
        let bytes = [1, 1, 1, 1, 0, b'a', b'z'];
        let meta = Metadata::parse(&bytes).unwrap();
        assert_eq!(meta.get("a"), Some(&b"z"[..]));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let bytes = [1, 1, 1, 9, 0, b'a', 1, 2];
        assert!(matches!(
            Metadata::parse(&bytes),
            Err(MetadataError::Truncated { needed: 10, available: 3, .. })
        ));

        let partial_header = [1, 1, 1];
        assert!(matches!(
            Metadata::parse(&partial_header),
            Err(MetadataError::Truncated { needed: 4, available: 2, .. })
        ));
    }
}
