//! Source-image classification.
//!
//! Sniffing is advisory: an unreadable or unrecognised file yields
//! [`Magic::UNKNOWN`], never an error.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

/// Offset of the NCCH/NCSD magic inside a CXI or CCI image.
const NCCH_MAGIC_OFFSET: u64 = 0x100;
/// First byte of a DER `SEQUENCE`, which is how a CIA certificate chain starts.
const ASN1_SEQUENCE: u8 = 0x30;

/// Frame size for NCSD-tagged images (CCI and CIA).
pub const LARGE_FRAME_SIZE: usize = 32 * 1024 * 1024;
/// Frame size for everything else.
pub const SMALL_FRAME_SIZE: usize = 1024 * 1024;

/// Four-byte identifier of the wrapped source format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Magic(pub [u8; 4]);

impl Magic {
    pub const THREEDSX: Magic = Magic(*b"3DSX");
    pub const NCCH:     Magic = Magic(*b"NCCH");
    pub const NCSD:     Magic = Magic(*b"NCSD");
    pub const UNKNOWN:  Magic = Magic(*b"UNKN");

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Parse a tag from exactly four ASCII bytes (CLI `--magic`).
    pub fn from_tag(s: &str) -> Option<Self> {
        <[u8; 4]>::try_from(s.as_bytes()).ok().map(Magic)
    }
}

impl fmt::Display for Magic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

/// Classify the file at `path` by its magic bytes and, for CIA, extension.
pub fn detect<P: AsRef<Path>>(path: P) -> Magic {
    let path = path.as_ref();
    let mut file = match File::open(path) {
        Ok(f)  => f,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot open file for sniffing");
            return Magic::UNKNOWN;
        }
    };

    let head = read_window(&mut file, 0);
    if head == Some(Magic::THREEDSX.0) {
        return Magic::THREEDSX;
    }

    match read_window(&mut file, NCCH_MAGIC_OFFSET).map(Magic) {
        Some(m) if m == Magic::NCCH || m == Magic::NCSD => return m,
        _ => {}
    }

    // CIA has no magic of its own; it is treated as NCSD for frame sizing.
    if let Some(head) = head {
        if head[0] == ASN1_SEQUENCE && has_extension(path, "cia") {
            return Magic::NCSD;
        }
    }

    Magic::UNKNOWN
}

/// Default frame size for a tag: large for NCSD, small for the rest.
pub fn default_frame_size(magic: Magic) -> usize {
    if magic == Magic::NCSD {
        LARGE_FRAME_SIZE
    } else {
        SMALL_FRAME_SIZE
    }
}

fn read_window(file: &mut File, offset: u64) -> Option<[u8; 4]> {
    let mut window = [0u8; 4];
    file.seek(SeekFrom::Start(offset)).ok()?;
    file.read_exact(&mut window).ok()?;
    Some(window)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}
