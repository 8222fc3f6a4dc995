use std::{collections::HashMap, io::SeekFrom, ops::RangeBounds, sync::Arc};

use ahash::RandomState;
use anyhow::Result;
use deku::DekuContainerRead;
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, BufReader},
    sync::RwLock,
};

use crate::{
    error::ArchiveError,
    header::HEADER_BYTES,
    util::{decompress_async, read_directories_rec, tile_coord, tile_id, OffsetLength, TileCoord},
    Compression, Header,
};

/// Reads an archive: header, metadata and the fully expanded directory.
///
/// Directories are expanded once at construction into a flat map from tile
/// id to tile byte range; tile contents are read on demand.
#[allow(clippy::module_name_repetitions)]
pub struct ArchiveReader<R> {
    reader: Arc<RwLock<BufReader<R>>>,
    pub header: Header,
    pub metadata: Option<Value>,
    pub tiles: HashMap<u64, OffsetLength, RandomState>,
}

impl<R> ArchiveReader<R>
where
    R: AsyncRead + AsyncSeek + Send + Sync + Unpin,
{
    /// Opens an archive from a reader.
    ///
    /// # Errors
    /// Will return [`ArchiveError::UnsupportedVersion`] for a spec version
    /// other than 3, or an error if the header, metadata or a directory page
    /// fails to parse.
    pub async fn new(reader: R) -> Result<Self> {
        Self::new_partially(reader, ..).await
    }

    /// Opens an archive, expanding only tile ids within `filter`.
    ///
    /// Leaf pages that cannot intersect the filter are never fetched, which
    /// keeps start-up cheap when only a small id range is needed. Tiles
    /// outside the range appear as missing.
    ///
    /// # Errors
    /// See [`new`](Self::new).
    pub async fn new_partially(
        reader: R,
        filter: impl RangeBounds<u64> + Sync + Send,
    ) -> Result<Self> {
        let mut buf_reader = BufReader::new(reader);

        let mut header_chunk = [0u8; HEADER_BYTES];
        buf_reader.read_exact(&mut header_chunk).await?;
        let (_, header) = Header::from_bytes((header_chunk.as_slice(), 0))?;

        if header.spec_version != 3 {
            return Err(ArchiveError::UnsupportedVersion(header.spec_version).into());
        }

        let metadata = if header.json_metadata_length == 0 {
            None
        } else {
            buf_reader
                .seek(SeekFrom::Start(header.json_metadata_offset))
                .await?;

            let mut metadata_bytes = vec![0u8; usize::try_from(header.json_metadata_length)?];
            buf_reader.read_exact(&mut metadata_bytes).await?;

            Some(
                parse_metadata(
                    header.internal_compression,
                    BufReader::new(metadata_bytes.as_slice()),
                )
                .await?,
            )
        };

        let mut tiles = HashMap::<u64, OffsetLength, RandomState>::default();

        read_directories_rec(
            &mut buf_reader,
            &mut tiles,
            header.internal_compression,
            (header.root_directory_offset, header.root_directory_length),
            header.leaf_directories_offset,
            &filter,
        )
        .await?;

        Ok(Self {
            reader: Arc::new(RwLock::new(buf_reader)),
            header,
            metadata,
            tiles,
        })
    }

    /// Number of tiles addressed by the expanded directory.
    pub fn num_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// All addressed coordinates, ascending by tile id.
    ///
    /// # Errors
    /// Will return [`Err`] if the archive contains a tile id beyond the
    /// supported zoom range.
    pub fn coordinates(&self) -> Result<Vec<TileCoord>> {
        let mut ids: Vec<u64> = self.tiles.keys().copied().collect();
        ids.sort_unstable();

        ids.into_iter().map(tile_coord).collect()
    }

    /// Reads the raw bytes of one tile.
    ///
    /// The bytes are returned as stored; decompressing according to
    /// [`Header::tile_compression`] is the caller's concern. Returns
    /// [`None`] for a coordinate the archive does not address.
    ///
    /// # Errors
    /// Will return [`ArchiveError::InvalidCoordinate`] for an out-of-range
    /// coordinate, or an error on I/O failure.
    pub async fn tile_data(&self, z: u8, x: u32, y: u32) -> Result<Option<Vec<u8>>> {
        let tile_id = tile_id(z, x, y)?;

        let Some(range) = self.tiles.get(&tile_id) else {
            return Ok(None);
        };

        let mut reader = self.reader.write().await;
        reader
            .seek(SeekFrom::Start(self.header.tile_data_offset + range.offset))
            .await?;

        let mut data = vec![0u8; range.length as usize];
        reader.read_exact(&mut data).await?;

        Ok(Some(data))
    }
}

// manual impl so the inner reader type needs no Debug bound
impl<R> std::fmt::Debug for ArchiveReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("header", &self.header)
            .field("metadata", &self.metadata)
            .field("num_tiles", &self.tiles.len())
            .finish_non_exhaustive()
    }
}

/// Decompresses and parses the JSON metadata blob.
///
/// # Errors
/// Will return an error if the blob fails to decompress or is not valid
/// JSON.
pub async fn parse_metadata(
    internal_compression: Compression,
    metadata_reader: BufReader<&[u8]>,
) -> Result<Value> {
    let mut decompression_reader = decompress_async(internal_compression, metadata_reader)?;

    let mut json_bytes = Vec::new();
    decompression_reader.read_to_end(&mut json_bytes).await?;

    Ok(serde_json::from_slice(&json_bytes[..])?)
}
