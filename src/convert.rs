use std::{collections::HashMap, path::PathBuf};

use ahash::RandomState;
use anyhow::Result;
use tracing::debug;

use crate::{
    error::ArchiveError,
    store::TileStore,
    util::{tile_id, OffsetLength, TileCoord},
    writer::{ArchiveStats, ArchiveWriter, Metadata, WriterOptions},
    Compression, LatLng, TileType,
};

/// Configuration for [`convert_store`].
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Remove an existing destination file instead of failing
    pub overwrite: bool,
    /// Directory for the tile staging file
    pub staging_dir: Option<PathBuf>,
    /// Format of tile contents
    pub tile_type: TileType,
    /// Compression of tile contents, as stored in the source
    pub tile_compression: Compression,
    /// Compression of directories and metadata
    pub internal_compression: Compression,
    /// JSON metadata blob for the archive
    pub metadata: Option<Metadata>,
    /// Bounding box of available tiles, south-west then north-east corner
    pub bounds: Option<(LatLng, LatLng)>,
    /// Default position and zoom for map views
    pub center: Option<(LatLng, u8)>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            staging_dir: None,
            tile_type: TileType::Unknown,
            tile_compression: Compression::Unknown,
            internal_compression: Compression::GZip,
            metadata: None,
            bounds: None,
            center: None,
        }
    }
}

/// Converts a tile store into a clustered, deduplicated archive.
///
/// Coordinates are sorted by tile id so tile data lands in curve order,
/// content is staged once per distinct hash, and runs of consecutive ids
/// sharing one content coalesce into single directory entries. Zoom bounds
/// come from the data; spatial bounds, center and metadata come from
/// `options`.
///
/// # Errors
/// Will return [`ArchiveError::StoreIntegrity`] if the source store fails
/// its integrity check or a referenced lookup is missing; no partial archive
/// is left behind in that case beyond the incomplete staging file.
pub async fn convert_store(
    store: &impl TileStore,
    dest: impl Into<PathBuf>,
    options: ConvertOptions,
) -> Result<ArchiveStats> {
    store.check_integrity().await?;

    let stored = store.coordinates().await?;

    let mut ids = Vec::with_capacity(stored.len());
    for coord in stored {
        let curve = if store.flipped_rows() {
            flip_row(coord)?
        } else {
            coord
        };
        ids.push((tile_id(curve.z, curve.x, curve.y)?, coord));
    }
    ids.sort_unstable_by_key(|(id, _)| *id);

    debug!(tiles = ids.len(), flipped = store.flipped_rows(), "converting tile store");

    let mut writer = ArchiveWriter::create(
        dest,
        WriterOptions {
            overwrite: options.overwrite,
            staging_dir: options.staging_dir,
            tile_type: options.tile_type,
            tile_compression: options.tile_compression,
            internal_compression: options.internal_compression,
        },
    )
    .await?;

    let mut seen = HashMap::<String, OffsetLength, RandomState>::default();
    let mut zoom_range: Option<(u8, u8)> = None;

    for (id, coord) in ids {
        let hash = store.content_hash(coord).await?;

        let at = if let Some(at) = seen.get(&hash) {
            *at
        } else {
            let content = store.content(&hash).await?;
            let at = writer.stage_content(&content).await?;
            seen.insert(hash, at);
            at
        };

        writer.push_tile_entry(id, at);

        zoom_range = Some(zoom_range.map_or((coord.z, coord.z), |(min, max)| {
            (min.min(coord.z), max.max(coord.z))
        }));
    }

    if let Some((min_zoom, max_zoom)) = zoom_range {
        writer.set_zoom_range(min_zoom, max_zoom);
    }
    if let Some((min, max)) = options.bounds {
        writer.set_bounds(min, max);
    }
    if let Some((center, center_zoom)) = options.center {
        writer.set_center(center, center_zoom);
    }
    if let Some(metadata) = options.metadata {
        writer.set_metadata(metadata);
    }

    writer.finalize().await
}

/// Converts a bottom-up (TMS) row to the curve's top-down convention.
fn flip_row(coord: TileCoord) -> Result<TileCoord> {
    let rows = 1u32
        .checked_shl(u32::from(coord.z))
        .ok_or(ArchiveError::InvalidCoordinate {
            z: coord.z,
            x: coord.x,
            y: coord.y,
        })?;

    let y = rows
        .checked_sub(coord.y + 1)
        .ok_or(ArchiveError::InvalidCoordinate {
            z: coord.z,
            x: coord.x,
            y: coord.y,
        })?;

    Ok(TileCoord::new(coord.z, coord.x, y))
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use anyhow::Result;
    use async_trait::async_trait;
    use temp_dir::TempDir;
    use tokio::fs::File;

    use super::{convert_store, flip_row, ConvertOptions};
    use crate::{
        error::ArchiveError,
        reader::ArchiveReader,
        store::{FolderStore, TileStore},
        util::TileCoord,
        Compression, TileType,
    };

    /// An in-memory store keyed on blake3 content hashes.
    struct MemoryStore {
        tiles: HashMap<TileCoord, Vec<u8>>,
        flipped: bool,
        corrupt: bool,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                tiles: HashMap::new(),
                flipped: false,
                corrupt: false,
            }
        }

        fn insert(&mut self, z: u8, x: u32, y: u32, data: impl Into<Vec<u8>>) {
            self.tiles.insert(TileCoord::new(z, x, y), data.into());
        }
    }

    #[async_trait]
    impl TileStore for MemoryStore {
        async fn check_integrity(&self) -> Result<()> {
            if self.corrupt {
                return Err(ArchiveError::StoreIntegrity("corrupt test store".into()).into());
            }
            Ok(())
        }

        async fn coordinates(&self) -> Result<Vec<TileCoord>> {
            Ok(self.tiles.keys().copied().collect())
        }

        async fn content_hash(&self, coord: TileCoord) -> Result<String> {
            let data = self
                .tiles
                .get(&coord)
                .ok_or_else(|| ArchiveError::StoreIntegrity("missing coordinate".into()))?;
            Ok(blake3::hash(data).to_hex().to_string())
        }

        async fn content(&self, hash: &str) -> Result<Vec<u8>> {
            self.tiles
                .values()
                .find(|data| blake3::hash(data).to_hex().to_string() == hash)
                .cloned()
                .ok_or_else(|| ArchiveError::StoreIntegrity("missing content".into()).into())
        }

        fn flipped_rows(&self) -> bool {
            self.flipped
        }
    }

    fn options() -> ConvertOptions {
        ConvertOptions {
            tile_type: TileType::Png,
            tile_compression: Compression::None,
            ..ConvertOptions::default()
        }
    }

    #[test]
    fn test_flip_row() -> Result<()> {
        assert_eq!(flip_row(TileCoord::new(0, 0, 0))?, TileCoord::new(0, 0, 0));
        assert_eq!(flip_row(TileCoord::new(2, 1, 0))?, TileCoord::new(2, 1, 3));
        assert_eq!(flip_row(TileCoord::new(2, 1, 3))?, TileCoord::new(2, 1, 0));

        assert!(flip_row(TileCoord::new(2, 0, 4)).is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_convert_dedupes_and_coalesces() -> Result<()> {
        let dir = TempDir::new()?;
        let dest = dir.path().join("out.pmtiles");

        let mut store = MemoryStore::new();
        store.insert(0, 0, 0, b"root".to_vec());
        // the four zoom 1 tiles are ids 1..=4 and share content
        for (x, y) in [(0, 0), (0, 1), (1, 1), (1, 0)] {
            store.insert(1, x, y, b"ocean".to_vec());
        }

        let stats = convert_store(&store, &dest, options()).await?;

        assert_eq!(stats.addressed_tiles, 5);
        assert_eq!(stats.tile_entries, 2);
        assert_eq!(stats.tile_contents, 2);
        assert_eq!(stats.tile_bytes, 9);

        let archive = ArchiveReader::new(File::open(&dest).await?).await?;
        assert!(archive.header.clustered);
        assert_eq!(archive.header.num_tile_entries, 2);
        assert_eq!(archive.header.min_zoom, 0);
        assert_eq!(archive.header.max_zoom, 1);
        assert_eq!(archive.num_tiles(), 5);
        assert_eq!(archive.tile_data(1, 1, 0).await?, Some(b"ocean".to_vec()));

        Ok(())
    }

    #[tokio::test]
    async fn test_convert_flipped_rows() -> Result<()> {
        let dir = TempDir::new()?;
        let dest = dir.path().join("out.pmtiles");

        let mut store = MemoryStore::new();
        store.flipped = true;
        // row 3 in TMS is row 0 in the curve's convention
        store.insert(2, 0, 3, b"north west".to_vec());

        convert_store(&store, &dest, options()).await?;

        let archive = ArchiveReader::new(File::open(&dest).await?).await?;
        assert_eq!(archive.coordinates()?, vec![TileCoord::new(2, 0, 0)]);

        Ok(())
    }

    #[tokio::test]
    async fn test_convert_corrupt_store_is_fatal() -> Result<()> {
        let dir = TempDir::new()?;
        let dest = dir.path().join("out.pmtiles");

        let mut store = MemoryStore::new();
        store.corrupt = true;
        store.insert(0, 0, 0, b"root".to_vec());

        let err = convert_store(&store, &dest, options()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::StoreIntegrity(_))
        ));
        assert!(!dest.exists());

        Ok(())
    }

    #[tokio::test]
    async fn test_convert_folder_store() -> Result<()> {
        let tiles = TempDir::new()?;
        for (z, x, y, data) in [
            (0u8, 0u32, 0u32, b"a".as_slice()),
            (1, 0, 0, b"b"),
            (1, 0, 1, b"c"),
            (1, 1, 0, b"b"),
        ] {
            let dir = tiles.path().join(z.to_string()).join(x.to_string());
            std::fs::create_dir_all(&dir)?;
            std::fs::write(dir.join(format!("{y}.png")), data)?;
        }

        let out = TempDir::new()?;
        let dest = out.path().join("out.pmtiles");

        let store = FolderStore::open(tiles.path())?;
        let stats = convert_store(&store, &dest, options()).await?;

        assert_eq!(stats.addressed_tiles, 4);
        assert_eq!(stats.tile_contents, 3);

        let archive = ArchiveReader::new(File::open(&dest).await?).await?;
        assert_eq!(archive.num_tiles(), 4);
        assert_eq!(archive.tile_data(1, 1, 0).await?, Some(b"b".to_vec()));

        Ok(())
    }
}
