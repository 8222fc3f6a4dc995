use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
/// An error which occurred within the present crate
#[allow(clippy::module_name_repetitions)]
pub enum ArchiveError {
    /// A tile coordinate is out of range for its zoom level
    #[error("coordinate ({x}, {y}) is out of range for zoom level {z}")]
    InvalidCoordinate {
        /// Zoom level
        z: u8,
        /// Column
        x: u32,
        /// Row
        y: u32,
    },

    /// A tile id lies beyond the supported zoom range
    #[error("tile id {0} lies beyond the supported zoom range")]
    InvalidTileId(u64),

    /// A serialized directory failed its framing check
    #[error("malformed directory: {0}")]
    MalformedDirectory(&'static str),

    /// The root directory cannot be shrunk to fit its byte budget
    #[error("root directory ({size} bytes) cannot be shrunk to fit its budget of {budget} bytes")]
    DirectorySizeExceeded {
        /// Smallest root size reached
        size: usize,
        /// Byte budget the root had to fit
        budget: usize,
    },

    /// A bounded header string field exceeds its fixed width
    #[error("value for header field '{field}' is {len} bytes, which exceeds the limit of {limit}")]
    FieldTooLong {
        /// Name of the header field
        field: &'static str,
        /// Length of the rejected value
        len: usize,
        /// Fixed width of the field
        limit: usize,
    },

    /// The destination file is present and overwriting was not requested
    #[error("destination file {0} already exists")]
    FileExists(PathBuf),

    /// The source tile store is corrupt or a referenced row is missing
    #[error("tile store integrity failure: {0}")]
    StoreIntegrity(String),

    /// Unable to perform a compression operation without a compression scheme
    #[error("a required compression scheme wasn't set")]
    CompressionSchemeNotSet,

    /// The archive declares a spec version this crate does not understand
    #[error("unsupported archive spec version {0}")]
    UnsupportedVersion(u16),
}
