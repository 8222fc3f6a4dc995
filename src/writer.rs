use std::path::{Path, PathBuf};

use anyhow::Result;
use deku::DekuContainerWrite;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
};
use tracing::{debug, trace};

use crate::{
    error::ArchiveError,
    header::HEADER_BYTES,
    util::{
        build_directory_tree, compress, tile_id, OffsetLength, OverflowStrategy,
        MAX_ROOT_DIR_LENGTH,
    },
    Compression, Entry, Header, LatLng, TileType,
};

/// The JSON metadata blob stored alongside the header.
///
/// `vector_layers` and `tilestats` are opaque fragments produced by an
/// external collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    #[serde(default)]
    pub generator: String,
    #[serde(default)]
    pub generator_options: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_layers: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tilestats: Option<Value>,
}

/// Configuration for [`ArchiveWriter::create`].
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Remove an existing destination file instead of failing
    pub overwrite: bool,
    /// Directory for the tile staging file; defaults to the destination's
    /// parent directory
    pub staging_dir: Option<PathBuf>,
    /// Format of tile contents
    pub tile_type: TileType,
    /// Compression of tile contents, as supplied by the caller
    pub tile_compression: Compression,
    /// Compression of directories and metadata
    pub internal_compression: Compression,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            staging_dir: None,
            tile_type: TileType::Unknown,
            tile_compression: Compression::Unknown,
            internal_compression: Compression::GZip,
        }
    }
}

/// Counters reported by [`ArchiveWriter::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Coordinates addressed, including duplicates
    pub addressed_tiles: u64,
    /// Directory entries after run coalescing
    pub tile_entries: u64,
    /// Distinct tile contents staged
    pub tile_contents: u64,
    /// Bytes in the tile data section
    pub tile_bytes: u64,
    /// Leaf directory pages written
    pub num_leaves: usize,
}

/// Writes an archive incrementally.
///
/// Tile bytes are appended to a staging file next to the destination, since
/// the final section offsets depend on directory and metadata sizes that are
/// only known once every tile has been seen. [`finalize`](Self::finalize)
/// assembles the destination file and removes the staging file.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct ArchiveWriter {
    dest: PathBuf,
    staging_path: PathBuf,
    staging: BufWriter<File>,

    pub header: Header,
    pub metadata: Option<Metadata>,

    entries: Vec<Entry>,
    running_offset: u64,
    addressed_tiles: u64,
    tile_contents: u64,
}

impl ArchiveWriter {
    /// Opens a destination path for writing.
    ///
    /// # Errors
    /// Will return [`ArchiveError::FileExists`] if the destination exists and
    /// `overwrite` was not requested, or an error if the staging file cannot
    /// be created.
    pub async fn create(dest: impl Into<PathBuf>, options: WriterOptions) -> Result<Self> {
        let dest = dest.into();

        if dest.exists() {
            if options.overwrite {
                tokio::fs::remove_file(&dest).await?;
            } else {
                return Err(ArchiveError::FileExists(dest).into());
            }
        }

        let staging_dir = options
            .staging_dir
            .or_else(|| dest.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        let staging_name = dest
            .file_name()
            .map_or_else(|| "archive".to_string(), |n| n.to_string_lossy().into_owned());
        let staging_path = staging_dir.join(format!("{staging_name}.tmp"));

        trace!(dest = %dest.display(), staging = %staging_path.display(), "opening writer");

        let staging = BufWriter::new(File::create(&staging_path).await?);

        Ok(Self {
            dest,
            staging_path,
            staging,
            header: Header {
                tile_type: options.tile_type,
                tile_compression: options.tile_compression,
                internal_compression: options.internal_compression,
                ..Header::default()
            },
            metadata: None,
            entries: Vec::new(),
            running_offset: 0,
            addressed_tiles: 0,
            tile_contents: 0,
        })
    }

    /// Stages a tile for the given coordinate.
    ///
    /// The bytes should already be compressed according to the writer's tile
    /// compression; they are staged verbatim. Identical content written twice
    /// is stored twice; deduplication is the converter's concern.
    ///
    /// # Errors
    /// Will return [`ArchiveError::InvalidCoordinate`] for an out-of-range
    /// coordinate, or an error if the staging write fails.
    pub async fn write_tile(&mut self, z: u8, x: u32, y: u32, data: &[u8]) -> Result<()> {
        let tile_id = tile_id(z, x, y)?;
        let at = self.stage_content(data).await?;
        self.push_tile_entry(tile_id, at);

        Ok(())
    }

    /// Appends raw content to the staging file and returns its byte range.
    ///
    /// Lower-level building block for callers that dedupe content across
    /// tiles; most callers want [`write_tile`](Self::write_tile).
    ///
    /// # Errors
    /// Will return [`Err`] if the content is larger than 4 GiB or the
    /// staging write fails.
    pub async fn stage_content(&mut self, data: &[u8]) -> Result<OffsetLength> {
        let length = u32::try_from(data.len())?;
        self.staging.write_all(data).await?;

        let at = OffsetLength::new(self.running_offset, length);
        self.running_offset += u64::from(length);
        self.tile_contents += 1;

        Ok(at)
    }

    /// Records a directory entry for `tile_id` at the staged range `at`.
    ///
    /// A tile id that directly continues the previous entry's run with the
    /// same byte range extends that run instead of adding an entry.
    pub fn push_tile_entry(&mut self, tile_id: u64, at: OffsetLength) {
        self.addressed_tiles += 1;

        if let Some(last) = self.entries.last_mut() {
            if tile_id == last.tile_id + u64::from(last.run_length)
                && last.offset == at.offset
                && last.length == at.length
            {
                last.run_length += 1;
                return;
            }
        }

        self.entries.push(Entry {
            tile_id,
            offset: at.offset,
            length: at.length,
            run_length: 1,
        });
    }

    /// Sets the JSON metadata blob.
    pub fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata = Some(metadata);
    }

    /// Sets the bounding box of available tiles.
    pub fn set_bounds(&mut self, min: LatLng, max: LatLng) {
        self.header.min_pos = min;
        self.header.max_pos = max;
    }

    /// Sets the default position and zoom for map views.
    pub fn set_center(&mut self, center: LatLng, zoom: u8) {
        self.header.center_pos = center;
        self.header.center_zoom = zoom;
    }

    /// Sets the zoom bounds of available tiles.
    pub fn set_zoom_range(&mut self, min_zoom: u8, max_zoom: u8) {
        self.header.min_zoom = min_zoom;
        self.header.max_zoom = max_zoom;
    }

    /// Number of coordinates addressed so far, including duplicates.
    pub const fn num_addressed_tiles(&self) -> u64 {
        self.addressed_tiles
    }

    /// Assembles the destination file and consumes the writer.
    ///
    /// Sections are laid out in dependency order: header, root directory,
    /// metadata, leaf directories, then the staged tile data streamed
    /// verbatim. The staging file is removed afterwards.
    ///
    /// # Errors
    /// Will return [`ArchiveError::DirectorySizeExceeded`] if the root
    /// directory cannot fit its budget, or an error on I/O failure.
    ///
    /// # Panics
    /// Panics if the serialized header does not have its fixed size; this
    /// indicates a layout bug, not a recoverable condition.
    pub async fn finalize(self) -> Result<ArchiveStats> {
        let Self {
            dest,
            staging_path,
            mut staging,
            mut header,
            metadata,
            mut entries,
            running_offset,
            addressed_tiles,
            tile_contents,
        } = self;

        staging.flush().await?;
        drop(staging);

        entries.sort_unstable_by_key(|entry| entry.tile_id);
        let clustered = entries.windows(2).all(|w| w[1].offset >= w[0].offset);

        let tree = build_directory_tree(
            &entries,
            header.internal_compression,
            OverflowStrategy::default(),
            MAX_ROOT_DIR_LENGTH,
        )?;

        let metadata_bytes = compress(
            header.internal_compression,
            &serde_json::to_vec(&metadata.unwrap_or_default())?,
        )?;

        header.root_directory_offset = HEADER_BYTES as u64;
        header.root_directory_length = tree.root_bytes.len() as u64;
        header.json_metadata_offset =
            header.root_directory_offset + header.root_directory_length;
        header.json_metadata_length = metadata_bytes.len() as u64;
        header.leaf_directories_offset =
            header.json_metadata_offset + header.json_metadata_length;
        header.leaf_directories_length = tree.leaf_bytes.len() as u64;
        header.tile_data_offset =
            header.leaf_directories_offset + header.leaf_directories_length;
        header.tile_data_length = running_offset;
        header.num_addressed_tiles = addressed_tiles;
        header.num_tile_entries = entries.len() as u64;
        header.num_tile_content = tile_contents;
        header.clustered = clustered;

        let header_bytes = header.to_bytes()?;
        assert_eq!(header_bytes.len(), HEADER_BYTES);

        debug!(
            root_len = header.root_directory_length,
            metadata_len = header.json_metadata_length,
            leaves_len = header.leaf_directories_length,
            tile_data_len = header.tile_data_length,
            num_leaves = tree.num_leaves,
            "assembling archive"
        );

        let mut output = BufWriter::new(File::create(&dest).await?);
        output.write_all(&header_bytes).await?;
        output.write_all(&tree.root_bytes).await?;
        output.write_all(&metadata_bytes).await?;
        output.write_all(&tree.leaf_bytes).await?;

        let mut staged = File::open(&staging_path).await?;
        let tile_bytes = tokio::io::copy(&mut staged, &mut output).await?;
        output.flush().await?;
        drop(staged);

        tokio::fs::remove_file(&staging_path).await?;

        Ok(ArchiveStats {
            addressed_tiles,
            tile_entries: header.num_tile_entries,
            tile_contents,
            tile_bytes,
            num_leaves: tree.num_leaves,
        })
    }
}

#[cfg(test)]
mod test {
    use anyhow::Result;
    use temp_dir::TempDir;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    use super::{ArchiveWriter, WriterOptions};
    use crate::{error::ArchiveError, util::OffsetLength, Compression, TileType};

    fn init_logging() {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "debug".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    }

    fn options() -> WriterOptions {
        WriterOptions {
            tile_type: TileType::Png,
            tile_compression: Compression::None,
            ..WriterOptions::default()
        }
    }

    #[tokio::test]
    async fn test_existing_destination_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let dest = dir.path().join("out.pmtiles");
        std::fs::write(&dest, b"occupied")?;

        let err = ArchiveWriter::create(&dest, options()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::FileExists(path)) if *path == dest
        ));

        let writer = ArchiveWriter::create(
            &dest,
            WriterOptions {
                overwrite: true,
                ..options()
            },
        )
        .await?;
        writer.finalize().await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_entry_coalescing() -> Result<()> {
        let dir = TempDir::new()?;
        let mut writer =
            ArchiveWriter::create(dir.path().join("out.pmtiles"), options()).await?;

        let at = writer.stage_content(&[1, 3, 3, 7]).await?;
        for tile_id in 0..5 {
            writer.push_tile_entry(tile_id, at);
        }

        assert_eq!(writer.num_addressed_tiles(), 5);

        let stats = writer.finalize().await?;
        assert_eq!(stats.addressed_tiles, 5);
        assert_eq!(stats.tile_entries, 1);
        assert_eq!(stats.tile_contents, 1);
        assert_eq!(stats.tile_bytes, 4);

        Ok(())
    }

    #[tokio::test]
    async fn test_coalescing_requires_adjacency() -> Result<()> {
        let dir = TempDir::new()?;
        let mut writer =
            ArchiveWriter::create(dir.path().join("out.pmtiles"), options()).await?;

        let at = writer.stage_content(&[1, 3, 3, 7]).await?;
        writer.push_tile_entry(0, at);
        writer.push_tile_entry(2, at); // gap in ids breaks the run
        writer.push_tile_entry(3, OffsetLength::new(at.offset, 2)); // different range

        let stats = writer.finalize().await?;
        assert_eq!(stats.tile_entries, 3);

        Ok(())
    }

    #[tokio::test]
    async fn test_write_tile_does_not_dedupe() -> Result<()> {
        init_logging();

        let dir = TempDir::new()?;
        let mut writer =
            ArchiveWriter::create(dir.path().join("out.pmtiles"), options()).await?;

        writer.write_tile(1, 0, 0, &[1, 3, 3, 7]).await?;
        writer.write_tile(1, 0, 1, &[1, 3, 3, 7]).await?;

        let stats = writer.finalize().await?;
        assert_eq!(stats.addressed_tiles, 2);
        assert_eq!(stats.tile_entries, 2);
        assert_eq!(stats.tile_contents, 2);
        assert_eq!(stats.tile_bytes, 8);

        Ok(())
    }

    #[tokio::test]
    async fn test_staging_file_removed_after_finalize() -> Result<()> {
        let dir = TempDir::new()?;
        let dest = dir.path().join("out.pmtiles");
        let staging = dir.path().join("out.pmtiles.tmp");

        let mut writer = ArchiveWriter::create(&dest, options()).await?;
        writer.write_tile(0, 0, 0, &[42]).await?;
        assert!(staging.exists());

        writer.finalize().await?;
        assert!(!staging.exists());
        assert!(dest.exists());

        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_coordinate_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let mut writer =
            ArchiveWriter::create(dir.path().join("out.pmtiles"), options()).await?;

        assert!(writer.write_tile(0, 1, 0, &[1]).await.is_err());

        Ok(())
    }
}
