use std::io;
use thiserror::Error;

use crate::codec::CodecError;
use crate::header::HeaderError;
use crate::metadata::MetadataError;
use crate::seek_table::SeekTableError;

/// Failure of a container encode.
///
/// No partial success exists: after any of these the destination holds an
/// unspecified, non-conforming container and should be discarded.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Compression of frame {frame} failed: {source}")]
    Compression { frame: usize, #[source] source: CodecError },
    #[error("Format error: {0}")]
    Format(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<MetadataError> for EncodeError {
    fn from(e: MetadataError) -> Self {
        EncodeError::Format(e.to_string())
    }
}

impl From<HeaderError> for EncodeError {
    fn from(e: HeaderError) -> Self {
        match e {
            HeaderError::Io(io) => EncodeError::Io(io),
            other               => EncodeError::Format(other.to_string()),
        }
    }
}

impl From<SeekTableError> for EncodeError {
    fn from(e: SeekTableError) -> Self {
        match e {
            SeekTableError::Io(io) => EncodeError::Io(io),
            other                  => EncodeError::Format(other.to_string()),
        }
    }
}
