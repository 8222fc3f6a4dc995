use anyhow::Result;
use tracing::{debug, trace};

use crate::{error::ArchiveError, header::HEADER_BYTES, Compression, Directory, Entry};

/// Default byte budget for the compressed root directory.
///
/// Chosen so that header plus root directory fit in a single 16 KiB read.
pub const MAX_ROOT_DIR_LENGTH: usize = 16_384 - HEADER_BYTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
/// Strategies to divide entries into leaf directories when the root
/// directory overflows its byte budget.
pub enum OverflowStrategy {
    /// Move all entries to leaf directories, so the root contains only
    /// pointers to leaves.
    ///
    /// Doubles the leaf chunk size until the root fits its budget.
    OnlyLeafPointers {
        /// Initial number of entries per leaf (default 4096)
        start_size: usize,
    },
}

impl Default for OverflowStrategy {
    fn default() -> Self {
        Self::OnlyLeafPointers { start_size: 4096 }
    }
}

impl OverflowStrategy {
    /// Retrieve the initial leaf chunk size.
    pub const fn leaf_size(&self) -> usize {
        match self {
            Self::OnlyLeafPointers { start_size } => *start_size,
        }
    }
}

/// The serialized directory tree of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTree {
    /// Compressed root directory
    pub root_bytes: Vec<u8>,
    /// Concatenated compressed leaf pages, empty if the root holds all
    /// entries directly
    pub leaf_bytes: Vec<u8>,
    /// Number of leaf pages
    pub num_leaves: usize,
}

/// Builds the root and leaf directory sections for a sorted entry list.
///
/// If the whole list fits `max_root_length` once serialized and compressed,
/// it becomes the root and no leaves exist. Otherwise the list is cut into
/// contiguous chunks that become leaf pages, and the root holds one pointer
/// entry per page; the chunk size doubles until the root fits.
///
/// # Errors
/// Will return [`ArchiveError::DirectorySizeExceeded`] if even a single leaf
/// cannot produce a root within the budget, or [`Err`] if `compression` is
/// [`Compression::Unknown`].
pub fn build_directory_tree(
    all_entries: &[Entry],
    compression: Compression,
    overflow_strategy: OverflowStrategy,
    max_root_length: usize,
) -> Result<DirectoryTree> {
    let root_bytes = Directory::from(all_entries.to_vec()).to_compressed_bytes(compression)?;

    if root_bytes.len() <= max_root_length {
        trace!(
            root_len = root_bytes.len(),
            entries = all_entries.len(),
            "root directory fits without leaves"
        );
        return Ok(DirectoryTree {
            root_bytes,
            leaf_bytes: Vec::new(),
            num_leaves: 0,
        });
    }

    let mut leaf_size = overflow_strategy.leaf_size().max(1);

    loop {
        let mut root_entries = Vec::with_capacity(all_entries.len().div_ceil(leaf_size));
        let mut leaf_bytes = Vec::new();

        for chunk in all_entries.chunks(leaf_size) {
            let page = Directory::from(chunk.to_vec()).to_compressed_bytes(compression)?;

            root_entries.push(Entry {
                tile_id: chunk[0].tile_id,
                offset: leaf_bytes.len() as u64,
                length: u32::try_from(page.len())?,
                run_length: 0,
            });
            leaf_bytes.extend_from_slice(&page);
        }

        let num_leaves = root_entries.len();
        let root_bytes = Directory::from(root_entries).to_compressed_bytes(compression)?;

        if root_bytes.len() <= max_root_length {
            debug!(
                num_leaves,
                leaf_size,
                root_len = root_bytes.len(),
                leaf_len = leaf_bytes.len(),
                "split directory into leaves"
            );
            return Ok(DirectoryTree {
                root_bytes,
                leaf_bytes,
                num_leaves,
            });
        }

        if leaf_size >= all_entries.len() {
            return Err(ArchiveError::DirectorySizeExceeded {
                size: root_bytes.len(),
                budget: max_root_length,
            }
            .into());
        }

        leaf_size *= 2;
    }
}
