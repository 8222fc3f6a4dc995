use anyhow::Result;

use crate::error::ArchiveError;

/// Highest zoom level the 64-bit tile id space can address.
pub const MAX_ZOOM: u8 = 31;

/// A tile position in the XYZ addressing scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    /// Zoom level
    pub z: u8,
    /// Column
    pub x: u32,
    /// Row
    pub y: u32,
}

impl TileCoord {
    pub const fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }
}

/// Converts a tile coordinate to its global 64-bit tile id.
///
/// Ids are ordered by zoom level first and along a Hilbert curve within
/// each level, so spatially near tiles receive near ids.
///
/// # Errors
/// Will return [`ArchiveError::InvalidCoordinate`] if `x` or `y` is out of
/// range for `z`, or `z` exceeds [`MAX_ZOOM`].
pub fn tile_id(z: u8, x: u32, y: u32) -> Result<u64> {
    if z > MAX_ZOOM || u64::from(x) >= 1 << z || u64::from(y) >= 1 << z {
        return Err(ArchiveError::InvalidCoordinate { z, x, y }.into());
    }

    // number of tiles on all levels below z
    let acc = ((1u64 << (2 * z)) - 1) / 3;

    let mut tx = i64::from(x);
    let mut ty = i64::from(y);
    let mut d = 0i64;

    let mut s = if z == 0 { 0 } else { 1i64 << (z - 1) };
    while s > 0 {
        let rx = i64::from((tx & s) > 0);
        let ry = i64::from((ty & s) > 0);
        d += s * s * ((3 * rx) ^ ry);
        rotate(s, &mut tx, &mut ty, rx, ry);
        s /= 2;
    }

    #[allow(clippy::cast_sign_loss)]
    Ok(acc + d as u64)
}

/// Converts a global tile id back to its tile coordinate.
///
/// Inverse of [`tile_id`].
///
/// # Errors
/// Will return [`ArchiveError::InvalidTileId`] if `id` addresses a tile
/// beyond zoom level [`MAX_ZOOM`].
pub fn tile_coord(id: u64) -> Result<TileCoord> {
    let mut acc = 0u64;

    for z in 0..=MAX_ZOOM {
        let num_tiles = 1u64 << (2 * z);
        if acc + num_tiles > id {
            return Ok(coord_on_level(z, id - acc));
        }
        acc += num_tiles;
    }

    Err(ArchiveError::InvalidTileId(id).into())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
fn coord_on_level(z: u8, pos: u64) -> TileCoord {
    let n = 1i64 << z;
    let mut t = pos as i64;
    let mut tx = 0i64;
    let mut ty = 0i64;

    let mut s = 1i64;
    while s < n {
        let rx = 1 & (t / 2);
        let ry = 1 & (t ^ rx);
        rotate(s, &mut tx, &mut ty, rx, ry);
        tx += s * rx;
        ty += s * ry;
        t /= 4;
        s *= 2;
    }

    TileCoord::new(z, tx as u32, ty as u32)
}

fn rotate(n: i64, x: &mut i64, y: &mut i64, rx: i64, ry: i64) {
    if ry == 0 {
        if rx == 1 {
            *x = n - 1 - *x;
            *y = n - 1 - *y;
        }
        std::mem::swap(x, y);
    }
}
