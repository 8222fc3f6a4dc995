use deku::{
    bitvec::{BitSlice, BitVec, Msb0},
    prelude::*,
};

use crate::error::ArchiveError;

/// Serialized size of [`Header`] in bytes.
pub const HEADER_BYTES: usize = 153;

/// Fixed width of the bounded string fields in the header.
const TAG_WIDTH: usize = 10;

/// Scheme used to compress directories, metadata or tile contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Unknown or not yet decided
    #[default]
    Unknown,
    /// No compression
    None,
    /// Gzip
    GZip,
    /// Brotli
    Brotli,
    /// Zstandard
    Zstd,
}

impl Compression {
    /// The header tag for this scheme.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::None => "none",
            Self::GZip => "gzip",
            Self::Brotli => "br",
            Self::Zstd => "zstd",
        }
    }

    fn from_tag(tag: &str) -> Self {
        match tag {
            "none" => Self::None,
            "gzip" => Self::GZip,
            "br" => Self::Brotli,
            "zstd" => Self::Zstd,
            _ => Self::Unknown,
        }
    }

    fn read_field(rest: &BitSlice<u8, Msb0>) -> Result<(&BitSlice<u8, Msb0>, Self), DekuError> {
        let (rest, tag) = read_tag_bytes(rest)?;
        Ok((rest, Self::from_tag(&tag)))
    }

    fn write_field(self, output: &mut BitVec<u8, Msb0>) -> Result<(), DekuError> {
        write_tag_bytes(output, self.tag())
    }
}

/// A validated tile format tag, at most [`TAG_WIDTH`] bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatTag(String);

impl FormatTag {
    /// Creates a format tag, enforcing the fixed header field width.
    ///
    /// # Errors
    /// Will return [`ArchiveError::FieldTooLong`] if `tag` exceeds the width.
    pub fn new(tag: impl Into<String>) -> Result<Self, ArchiveError> {
        let tag = tag.into();
        if tag.len() > TAG_WIDTH {
            return Err(ArchiveError::FieldTooLong {
                field: "tile_type",
                len: tag.len(),
                limit: TAG_WIDTH,
            });
        }
        Ok(Self(tag))
    }

    // read side only; the wire field already bounds the length
    fn from_trusted(tag: String) -> Self {
        Self(tag)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Format of the tile contents in an archive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TileType {
    /// Unknown or not yet decided
    #[default]
    Unknown,
    /// Mapbox vector tiles
    Mvt,
    /// PNG images
    Png,
    /// JPEG images
    Jpeg,
    /// WebP images
    Webp,
    /// AVIF images
    Avif,
    /// Any other format, carried verbatim in the header tag
    Other(FormatTag),
}

impl TileType {
    /// The header tag for this tile type.
    pub fn tag(&self) -> &str {
        match self {
            Self::Unknown => "",
            Self::Mvt => "pbf",
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
            Self::Avif => "avif",
            Self::Other(tag) => tag.as_str(),
        }
    }

    /// Creates a [`TileType::Other`] from a free-form tag.
    ///
    /// # Errors
    /// Will return [`ArchiveError::FieldTooLong`] if `tag` does not fit the
    /// fixed header field.
    pub fn other(tag: impl Into<String>) -> Result<Self, ArchiveError> {
        Ok(Self::Other(FormatTag::new(tag)?))
    }

    fn from_tag(tag: &str) -> Self {
        match tag {
            "" => Self::Unknown,
            "pbf" => Self::Mvt,
            "png" => Self::Png,
            "jpg" => Self::Jpeg,
            "webp" => Self::Webp,
            "avif" => Self::Avif,
            other => Self::Other(FormatTag::from_trusted(other.to_string())),
        }
    }

    fn read_field(rest: &BitSlice<u8, Msb0>) -> Result<(&BitSlice<u8, Msb0>, Self), DekuError> {
        let (rest, tag) = read_tag_bytes(rest)?;
        Ok((rest, Self::from_tag(&tag)))
    }

    fn write_field(&self, output: &mut BitVec<u8, Msb0>) -> Result<(), DekuError> {
        write_tag_bytes(output, self.tag())
    }
}

/// A position on the map, stored as a pair of 1e7 fixed-point integers on
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatLng {
    /// Longitude in degrees
    pub longitude: f64,
    /// Latitude in degrees
    pub latitude: f64,
}

impl LatLng {
    pub const fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

/// The fixed-layout record at the start of every archive.
///
/// All multi-byte integers are little-endian. Populated incrementally by the
/// writer and serialized exactly once, when every section size is known.
#[derive(Debug, Clone, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little", magic = b"PM")]
pub struct Header {
    /// Version of the archive layout
    pub spec_version: u16,

    pub root_directory_offset: u64,
    pub root_directory_length: u64,
    pub json_metadata_offset: u64,
    pub json_metadata_length: u64,
    pub leaf_directories_offset: u64,
    pub leaf_directories_length: u64,
    pub tile_data_offset: u64,
    pub tile_data_length: u64,

    /// Total coordinates addressed, including duplicates
    pub num_addressed_tiles: u64,
    /// Directory entries after run coalescing
    pub num_tile_entries: u64,
    /// Distinct tile contents stored
    pub num_tile_content: u64,

    /// Whether tile data is laid out in ascending tile-id order
    #[deku(
        reader = "read_bool_byte(deku::rest)",
        writer = "write_bool_byte(deku::output, self.clustered)"
    )]
    pub clustered: bool,

    /// Compression of directories and metadata
    #[deku(
        reader = "Compression::read_field(deku::rest)",
        writer = "Compression::write_field(self.internal_compression, deku::output)"
    )]
    pub internal_compression: Compression,

    /// Compression of tile contents
    #[deku(
        reader = "Compression::read_field(deku::rest)",
        writer = "Compression::write_field(self.tile_compression, deku::output)"
    )]
    pub tile_compression: Compression,

    /// Format of tile contents
    #[deku(
        reader = "TileType::read_field(deku::rest)",
        writer = "TileType::write_field(&self.tile_type, deku::output)"
    )]
    pub tile_type: TileType,

    pub min_zoom: u8,
    pub max_zoom: u8,

    /// South-west corner of the bounding box of available tiles
    #[deku(
        reader = "read_latlng(deku::rest)",
        writer = "write_latlng(deku::output, self.min_pos)"
    )]
    pub min_pos: LatLng,
    /// North-east corner of the bounding box of available tiles
    #[deku(
        reader = "read_latlng(deku::rest)",
        writer = "write_latlng(deku::output, self.max_pos)"
    )]
    pub max_pos: LatLng,

    /// Default zoom for map views
    pub center_zoom: u8,
    /// Default position for map views
    #[deku(
        reader = "read_latlng(deku::rest)",
        writer = "write_latlng(deku::output, self.center_pos)"
    )]
    pub center_pos: LatLng,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            spec_version: 3,
            root_directory_offset: 0,
            root_directory_length: 0,
            json_metadata_offset: 0,
            json_metadata_length: 0,
            leaf_directories_offset: 0,
            leaf_directories_length: 0,
            tile_data_offset: 0,
            tile_data_length: 0,
            num_addressed_tiles: 0,
            num_tile_entries: 0,
            num_tile_content: 0,
            clustered: false,
            internal_compression: Compression::GZip,
            tile_compression: Compression::Unknown,
            tile_type: TileType::Unknown,
            min_zoom: 0,
            max_zoom: 0,
            min_pos: LatLng::default(),
            max_pos: LatLng::default(),
            center_zoom: 0,
            center_pos: LatLng::default(),
        }
    }
}

fn read_bool_byte(rest: &BitSlice<u8, Msb0>) -> Result<(&BitSlice<u8, Msb0>, bool), DekuError> {
    let (rest, byte) = u8::read(rest, ())?;
    Ok((rest, byte != 0))
}

fn write_bool_byte(output: &mut BitVec<u8, Msb0>, value: bool) -> Result<(), DekuError> {
    u8::from(value).write(output, ())
}

fn read_e7(rest: &BitSlice<u8, Msb0>) -> Result<(&BitSlice<u8, Msb0>, f64), DekuError> {
    let (rest, raw) = i32::read(rest, deku::ctx::Endian::Little)?;
    Ok((rest, f64::from(raw) / 10_000_000.0))
}

#[allow(clippy::cast_possible_truncation)]
fn write_e7(output: &mut BitVec<u8, Msb0>, value: f64) -> Result<(), DekuError> {
    let raw = (value * 10_000_000.0).round() as i32;
    raw.write(output, deku::ctx::Endian::Little)
}

fn read_latlng(rest: &BitSlice<u8, Msb0>) -> Result<(&BitSlice<u8, Msb0>, LatLng), DekuError> {
    let (rest, longitude) = read_e7(rest)?;
    let (rest, latitude) = read_e7(rest)?;
    Ok((rest, LatLng::new(longitude, latitude)))
}

fn write_latlng(output: &mut BitVec<u8, Msb0>, value: LatLng) -> Result<(), DekuError> {
    write_e7(output, value.longitude)?;
    write_e7(output, value.latitude)
}

fn read_tag_bytes(rest: &BitSlice<u8, Msb0>) -> Result<(&BitSlice<u8, Msb0>, String), DekuError> {
    let (mut rest, len) = u8::read(rest, ())?;

    let mut raw = [0u8; TAG_WIDTH];
    for slot in &mut raw {
        let (r, byte) = u8::read(rest, ())?;
        *slot = byte;
        rest = r;
    }

    let len = usize::from(len).min(TAG_WIDTH);
    let tag = core::str::from_utf8(&raw[..len])
        .map_err(|_| DekuError::Parse("header tag field is not valid UTF-8".to_string()))?;

    Ok((rest, tag.to_string()))
}

#[allow(clippy::cast_possible_truncation)]
fn write_tag_bytes(output: &mut BitVec<u8, Msb0>, tag: &str) -> Result<(), DekuError> {
    let bytes = tag.as_bytes();
    if bytes.len() > TAG_WIDTH {
        return Err(DekuError::InvalidParam(format!(
            "header tag '{tag}' exceeds {TAG_WIDTH} bytes"
        )));
    }

    (bytes.len() as u8).write(output, ())?;
    for i in 0..TAG_WIDTH {
        bytes.get(i).copied().unwrap_or(0).write(output, ())?;
    }

    Ok(())
}
