use std::{io::Cursor, ops::Deref};

use anyhow::Result;
use integer_encoding::{VarIntReader, VarIntWriter};

use crate::{
    error::ArchiveError,
    util::{compress, decompress},
    Compression,
};

/// One record of a directory.
///
/// With `run_length > 0` the entry addresses the tiles
/// `[tile_id, tile_id + run_length)`, all sharing the byte range
/// `[offset, offset + length)` in the tile data section. With
/// `run_length == 0` the entry is a pointer to a leaf directory page at
/// `[offset, offset + length)` within the leaf directory section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub tile_id: u64,
    pub offset: u64,
    pub length: u32,
    pub run_length: u32,
}

/// A sequence of entries sorted strictly ascending by tile id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Directory(Vec<Entry>);

impl From<Vec<Entry>> for Directory {
    fn from(entries: Vec<Entry>) -> Self {
        Self(entries)
    }
}

impl Deref for Directory {
    type Target = [Entry];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Directory {
    /// Serializes the directory into its five varint columns.
    ///
    /// Tile ids are delta-encoded and offsets use adjacency elision: an
    /// offset that exactly continues the previous entry's byte range is
    /// written as `0`, any other offset as `offset + 1`.
    ///
    /// # Errors
    /// Will return [`Err`] on a failed write to the in-memory buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        debug_assert!(
            self.0.windows(2).all(|w| w[0].tile_id < w[1].tile_id),
            "directory entries must be sorted strictly ascending by tile id"
        );

        let mut buf = Vec::with_capacity(self.0.len() * 4 + 1);

        buf.write_varint(self.0.len() as u64)?;

        let mut last_id = 0u64;
        for entry in &self.0 {
            buf.write_varint(entry.tile_id - last_id)?;
            last_id = entry.tile_id;
        }

        for entry in &self.0 {
            buf.write_varint(u64::from(entry.run_length))?;
        }

        for entry in &self.0 {
            buf.write_varint(u64::from(entry.length))?;
        }

        let mut previous: Option<&Entry> = None;
        for entry in &self.0 {
            let contiguous = previous
                .map_or(false, |prev| entry.offset == prev.offset + u64::from(prev.length));
            if contiguous {
                buf.write_varint(0u64)?;
            } else {
                buf.write_varint(entry.offset + 1)?;
            }
            previous = Some(entry);
        }

        Ok(buf)
    }

    /// Parses a directory from its serialized form.
    ///
    /// This is a strict framing parse: truncated columns, trailing bytes or
    /// inconsistent column values are rejected, not skipped.
    ///
    /// # Errors
    /// Will return [`ArchiveError::MalformedDirectory`] if the buffer is not
    /// exactly one serialized directory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);

        let count: u64 = reader
            .read_varint()
            .map_err(|_| ArchiveError::MalformedDirectory("missing entry count"))?;
        let count = usize::try_from(count)
            .map_err(|_| ArchiveError::MalformedDirectory("entry count out of range"))?;

        // each entry needs at least one byte per column
        if count.saturating_mul(4) > bytes.len() {
            return Err(ArchiveError::MalformedDirectory("entry count exceeds buffer").into());
        }

        let mut entries = vec![
            Entry {
                tile_id: 0,
                offset: 0,
                length: 0,
                run_length: 0,
            };
            count
        ];

        let mut last_id = 0u64;
        for (i, entry) in entries.iter_mut().enumerate() {
            let delta: u64 = reader
                .read_varint()
                .map_err(|_| ArchiveError::MalformedDirectory("truncated tile id column"))?;
            last_id = if i == 0 {
                delta
            } else {
                last_id
                    .checked_add(delta)
                    .ok_or(ArchiveError::MalformedDirectory("tile id overflow"))?
            };
            entry.tile_id = last_id;
        }

        for entry in &mut entries {
            let run_length: u64 = reader
                .read_varint()
                .map_err(|_| ArchiveError::MalformedDirectory("truncated run length column"))?;
            entry.run_length = u32::try_from(run_length)
                .map_err(|_| ArchiveError::MalformedDirectory("run length out of range"))?;
        }

        for entry in &mut entries {
            let length: u64 = reader
                .read_varint()
                .map_err(|_| ArchiveError::MalformedDirectory("truncated length column"))?;
            entry.length = u32::try_from(length)
                .map_err(|_| ArchiveError::MalformedDirectory("length out of range"))?;
        }

        for i in 0..entries.len() {
            let value: u64 = reader
                .read_varint()
                .map_err(|_| ArchiveError::MalformedDirectory("truncated offset column"))?;
            entries[i].offset = if value == 0 {
                if i == 0 {
                    return Err(
                        ArchiveError::MalformedDirectory("adjacency sentinel on first entry")
                            .into(),
                    );
                }
                let prev = entries[i - 1];
                prev.offset + u64::from(prev.length)
            } else {
                value - 1
            };
        }

        if reader.position() != bytes.len() as u64 {
            return Err(ArchiveError::MalformedDirectory("trailing bytes after columns").into());
        }

        Ok(Self(entries))
    }

    /// Serializes and compresses the directory.
    ///
    /// # Errors
    /// Will return [`Err`] if `compression` is [`Compression::Unknown`] or
    /// serialization fails.
    pub fn to_compressed_bytes(&self, compression: Compression) -> Result<Vec<u8>> {
        compress(compression, &self.to_bytes()?)
    }

    /// Decompresses and parses a directory.
    ///
    /// # Errors
    /// Will return [`Err`] if decompression fails or the decompressed bytes
    /// are not exactly one serialized directory.
    pub fn from_compressed_bytes(bytes: &[u8], compression: Compression) -> Result<Self> {
        Self::from_bytes(&decompress(compression, bytes)?)
    }
}
