pub mod header;
pub mod metadata;
pub mod sniff;
pub mod codec;
pub mod frame;
pub mod seek_table;
pub mod perf;
pub mod container;
pub mod error;

pub use header::Z3dsHeader;
pub use metadata::Metadata;
pub use sniff::{Magic, detect, default_frame_size};
pub use codec::{Compressor, ZstdCompressor};
pub use frame::FrameEncoder;
pub use seek_table::{SeekEntry, SeekTable};
pub use container::{ContainerBuilder, EncodeOptions, EncodeSummary, ProgressObserver, encode};
pub use error::EncodeError;
