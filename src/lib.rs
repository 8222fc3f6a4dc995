//! # `tilepack`
//!
//! Single-file, cloud-optimized tile archives built around Tokio.
//!
//! An archive concatenates a fixed header, a compressed root directory,
//! compressed JSON metadata, optional leaf directory pages and the raw tile
//! data. Tiles are addressed by a 64-bit id that orders coordinates by zoom
//! level and along a Hilbert curve within each level, so spatially near
//! tiles sit near each other on disk and directory deltas stay small.
//!
//! ## Examples
//!
//! ### Writing an archive from scratch
//! ```no_run
//! use tilepack::{writer::{ArchiveWriter, WriterOptions}, Compression, TileType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut writer = ArchiveWriter::create(
//!         "./basemap.pmtiles",
//!         WriterOptions {
//!             tile_type: TileType::Png,
//!             tile_compression: Compression::None,
//!             ..WriterOptions::default()
//!         },
//!     )
//!     .await?;
//!
//!     writer.write_tile(0, 0, 0, &[/* tile bytes */]).await?;
//!     writer.finalize().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ### Reading from a file
//! ```no_run
//! use tilepack::reader::ArchiveReader;
//! use tokio::fs::File;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let file = File::open("./basemap.pmtiles").await?;
//!     let archive = ArchiveReader::new(file).await?;
//!
//!     if let Some(tile) = archive.tile_data(0, 0, 0).await? {
//!         println!("{} bytes", tile.len());
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(clippy::cargo)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::multiple_crate_versions)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod directory;

mod header;

/// Utilities for reading and writing archives.
pub mod util;

/// Errors for the crate
pub mod error;

/// Reads an archive.
pub mod reader;

/// Writes an archive.
pub mod writer;

/// Tile sources for conversion.
pub mod store;

/// Converts a tile store into an archive.
pub mod convert;

pub use convert::{convert_store, ConvertOptions};
pub use directory::{Directory, Entry};
pub use error::ArchiveError;
pub use header::{Compression, FormatTag, Header, LatLng, TileType};
pub use reader::ArchiveReader;
pub use store::{FolderStore, TileStore};
pub use writer::{ArchiveStats, ArchiveWriter, Metadata, WriterOptions};
