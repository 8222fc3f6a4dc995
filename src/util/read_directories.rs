use std::{
    collections::HashMap,
    io::SeekFrom,
    ops::{Bound, RangeBounds},
};

use ahash::RandomState;
use anyhow::Result;
use async_recursion::async_recursion;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, BufReader};
use tracing::trace;

use crate::{util::OffsetLength, Compression, Directory};

/// Recursively expands a directory page and its leaves into a flat tile map.
///
/// `(offset, length)` is the page's own byte range within the file;
/// `leaf_base` is the file offset of the leaf directory section, which
/// pointer entries are relative to. Entries outside `filter` are skipped,
/// as are whole leaf pages that cannot intersect it.
///
/// # Errors
/// Will return [`Err`] on I/O failure or if a page fails to parse.
#[async_recursion]
pub async fn read_directories_rec<R, F>(
    reader: &mut BufReader<R>,
    tiles: &mut HashMap<u64, OffsetLength, RandomState>,
    compression: Compression,
    (offset, length): (u64, u64),
    leaf_base: u64,
    filter: &F,
) -> Result<()>
where
    R: AsyncRead + AsyncSeek + Send + Sync + Unpin,
    F: RangeBounds<u64> + Sync + Send,
{
    reader.seek(SeekFrom::Start(offset)).await?;

    let mut page_bytes = vec![0u8; usize::try_from(length)?];
    reader.read_exact(&mut page_bytes).await?;

    let directory = Directory::from_compressed_bytes(&page_bytes, compression)?;
    trace!(offset, length, entries = directory.len(), "expanded directory page");

    for (i, entry) in directory.iter().enumerate() {
        if entry.run_length == 0 {
            // pointer entry; the next entry's id bounds the ids this leaf can hold
            let upper = directory.get(i + 1).map(|next| next.tile_id);
            if !leaf_may_intersect(filter, entry.tile_id, upper) {
                continue;
            }

            read_directories_rec(
                reader,
                tiles,
                compression,
                (leaf_base + entry.offset, u64::from(entry.length)),
                leaf_base,
                filter,
            )
            .await?;
        } else {
            for run_index in 0..u64::from(entry.run_length) {
                let tile_id = entry.tile_id + run_index;
                if filter.contains(&tile_id) {
                    tiles.insert(tile_id, OffsetLength::new(entry.offset, entry.length));
                }
            }
        }
    }

    Ok(())
}

/// Whether a leaf page holding ids in `[start, upper)` can contain an id
/// within `filter`. An unknown upper bound is treated as unbounded.
fn leaf_may_intersect(filter: &impl RangeBounds<u64>, start: u64, upper: Option<u64>) -> bool {
    let below_end = match filter.end_bound() {
        Bound::Unbounded => true,
        Bound::Included(&end) => start <= end,
        Bound::Excluded(&end) => start < end,
    };

    let above_start = match (filter.start_bound(), upper) {
        (Bound::Unbounded, _) | (_, None) => true,
        (Bound::Included(&first), Some(upper)) => upper > first,
        (Bound::Excluded(&first), Some(upper)) => {
            first.checked_add(1).map_or(false, |first| upper > first)
        }
    };

    below_end && above_start
}
