mod compression;
mod read_directories;
mod tile_id;
mod write_directories;

pub use compression::{compress, decompress, decompress_async};
pub use read_directories::read_directories_rec;
pub use tile_id::{tile_coord, tile_id, TileCoord, MAX_ZOOM};
pub use write_directories::{
    build_directory_tree, DirectoryTree, OverflowStrategy, MAX_ROOT_DIR_LENGTH,
};

/// A byte range within a section of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetLength {
    /// Start of the range, relative to the section base
    pub offset: u64,
    /// Length of the range in bytes
    pub length: u32,
}

impl OffsetLength {
    pub const fn new(offset: u64, length: u32) -> Self {
        Self { offset, length }
    }
}
