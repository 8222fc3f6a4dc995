use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use ahash::RandomState;
use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::{error::ArchiveError, util::TileCoord};

/// A source of tiles for conversion into an archive.
///
/// Content is addressed in two steps: a coordinate resolves to a content
/// hash, and the hash resolves to the raw bytes. Identical content shares a
/// hash, which is what the converter's deduplication keys on.
#[async_trait]
pub trait TileStore {
    /// Verifies the store is internally consistent.
    ///
    /// # Errors
    /// Will return [`ArchiveError::StoreIntegrity`] if it is not; the caller
    /// treats this as fatal.
    async fn check_integrity(&self) -> Result<()>;

    /// All stored coordinates, in the store's own row convention.
    async fn coordinates(&self) -> Result<Vec<TileCoord>>;

    /// The content hash of the tile at `coord`.
    ///
    /// # Errors
    /// Will return [`ArchiveError::StoreIntegrity`] if the coordinate is not
    /// present.
    async fn content_hash(&self, coord: TileCoord) -> Result<String>;

    /// The raw bytes for a content hash.
    ///
    /// # Errors
    /// Will return [`ArchiveError::StoreIntegrity`] if the hash references
    /// no stored content.
    async fn content(&self, hash: &str) -> Result<Vec<u8>>;

    /// Whether rows count from the bottom of the tile grid (TMS) rather
    /// than the top.
    fn flipped_rows(&self) -> bool {
        false
    }
}

/// A [`TileStore`] over a `{z}/{x}/{y}.<ext>` directory tree.
///
/// The tree is indexed and content-hashed once at construction; files that
/// do not parse as tile paths are ignored.
pub struct FolderStore {
    root: PathBuf,
    tms_rows: bool,
    coord_hashes: HashMap<TileCoord, String, RandomState>,
    hash_paths: HashMap<String, PathBuf, RandomState>,
}

impl FolderStore {
    /// Indexes a tile folder whose rows count from the top (XYZ).
    ///
    /// # Errors
    /// Will return [`Err`] if a tile file cannot be read while hashing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(root.into(), false)
    }

    /// Indexes a tile folder whose rows count from the bottom (TMS).
    ///
    /// # Errors
    /// Will return [`Err`] if a tile file cannot be read while hashing.
    pub fn open_tms(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(root.into(), true)
    }

    fn open_with(root: PathBuf, tms_rows: bool) -> Result<Self> {
        let mut coord_hashes = HashMap::<TileCoord, String, RandomState>::default();
        let mut hash_paths = HashMap::<String, PathBuf, RandomState>::default();

        for entry in WalkDir::new(&root)
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(coord) = extract_zxy(entry.path()) else {
                trace!(path = %entry.path().display(), "skipping non-tile file");
                continue;
            };

            let hash = blake3::Hasher::new()
                .update_mmap_rayon(entry.path())?
                .finalize()
                .to_hex()
                .to_string();

            hash_paths.insert(hash.clone(), entry.path().to_path_buf());
            coord_hashes.insert(coord, hash);
        }

        debug!(
            root = %root.display(),
            tiles = coord_hashes.len(),
            contents = hash_paths.len(),
            "indexed tile folder"
        );

        Ok(Self {
            root,
            tms_rows,
            coord_hashes,
            hash_paths,
        })
    }

    /// Number of indexed tiles.
    pub fn num_tiles(&self) -> usize {
        self.coord_hashes.len()
    }
}

#[async_trait]
impl TileStore for FolderStore {
    async fn check_integrity(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(ArchiveError::StoreIntegrity(format!(
                "tile folder {} is gone",
                self.root.display()
            ))
            .into());
        }

        for path in self.hash_paths.values() {
            if !path.is_file() {
                return Err(ArchiveError::StoreIntegrity(format!(
                    "indexed tile {} is gone",
                    path.display()
                ))
                .into());
            }
        }

        Ok(())
    }

    async fn coordinates(&self) -> Result<Vec<TileCoord>> {
        Ok(self.coord_hashes.keys().copied().collect())
    }

    async fn content_hash(&self, coord: TileCoord) -> Result<String> {
        self.coord_hashes.get(&coord).cloned().ok_or_else(|| {
            ArchiveError::StoreIntegrity(format!(
                "no tile at z{} x{} y{}",
                coord.z, coord.x, coord.y
            ))
            .into()
        })
    }

    async fn content(&self, hash: &str) -> Result<Vec<u8>> {
        let path = self.hash_paths.get(hash).ok_or_else(|| {
            ArchiveError::StoreIntegrity(format!("no content for hash {hash}"))
        })?;

        Ok(tokio::fs::read(path).await?)
    }

    fn flipped_rows(&self) -> bool {
        self.tms_rows
    }
}

/// Parses the trailing `{z}/{x}/{y}.<ext>` components of a tile path.
fn extract_zxy(path: &Path) -> Option<TileCoord> {
    let mut components = path.components().rev();

    let file_name = components.next()?.as_os_str().to_str()?;
    let y = file_name.split('.').next()?.parse::<u32>().ok()?;
    let x = components.next()?.as_os_str().to_str()?.parse::<u32>().ok()?;
    let z = components.next()?.as_os_str().to_str()?.parse::<u8>().ok()?;

    Some(TileCoord::new(z, x, y))
}

#[cfg(test)]
mod test {
    use anyhow::Result;
    use std::path::Path;
    use temp_dir::TempDir;

    use super::{extract_zxy, FolderStore, TileStore};
    use crate::{error::ArchiveError, util::TileCoord};

    fn write_tile(root: &Path, z: u8, x: u32, y: u32, data: &[u8]) -> Result<()> {
        let dir = root.join(z.to_string()).join(x.to_string());
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(format!("{y}.png")), data)?;
        Ok(())
    }

    #[test]
    fn test_extract_zxy() {
        assert_eq!(
            extract_zxy(Path::new("/tiles/14/14969/6467.png")),
            Some(TileCoord::new(14, 14969, 6467))
        );
        assert_eq!(
            extract_zxy(Path::new("3/2/1.mvt")),
            Some(TileCoord::new(3, 2, 1))
        );
        assert_eq!(extract_zxy(Path::new("/tiles/readme.txt")), None);
        assert_eq!(extract_zxy(Path::new("/tiles/x/y/not-a-tile.png")), None);
    }

    #[tokio::test]
    async fn test_folder_store_indexing() -> Result<()> {
        let dir = TempDir::new()?;
        write_tile(dir.path(), 0, 0, 0, b"root")?;
        write_tile(dir.path(), 1, 0, 0, b"child")?;
        write_tile(dir.path(), 1, 1, 0, b"child")?;
        std::fs::write(dir.path().join("metadata.json"), b"{}")?;

        let store = FolderStore::open(dir.path())?;
        store.check_integrity().await?;

        assert_eq!(store.num_tiles(), 3);

        let mut coordinates = store.coordinates().await?;
        coordinates.sort_unstable();
        assert_eq!(
            coordinates,
            vec![
                TileCoord::new(0, 0, 0),
                TileCoord::new(1, 0, 0),
                TileCoord::new(1, 1, 0),
            ]
        );

        // identical content shares one hash
        let first = store.content_hash(TileCoord::new(1, 0, 0)).await?;
        let second = store.content_hash(TileCoord::new(1, 1, 0)).await?;
        assert_eq!(first, second);
        assert_eq!(store.content(&first).await?, b"child");

        Ok(())
    }

    #[tokio::test]
    async fn test_missing_lookups_fail() -> Result<()> {
        let dir = TempDir::new()?;
        write_tile(dir.path(), 0, 0, 0, b"root")?;

        let store = FolderStore::open(dir.path())?;

        let err = store
            .content_hash(TileCoord::new(5, 1, 2))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::StoreIntegrity(_))
        ));

        assert!(store.content("definitely-not-a-hash").await.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_integrity_detects_removed_tile() -> Result<()> {
        let dir = TempDir::new()?;
        write_tile(dir.path(), 0, 0, 0, b"root")?;

        let store = FolderStore::open(dir.path())?;
        store.check_integrity().await?;

        std::fs::remove_file(dir.path().join("0/0/0.png"))?;

        let err = store.check_integrity().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::StoreIntegrity(_))
        ));

        Ok(())
    }
}
