use std::io::{Read, Write};

use anyhow::Result;
use async_compression::tokio::bufread::{BrotliDecoder, GzipDecoder, ZstdDecoder};
use tokio::io::{AsyncBufRead, AsyncRead};

use crate::{error::ArchiveError, Compression};

/// Compresses a byte buffer with the given scheme.
///
/// [`Compression::None`] passes the bytes through unchanged.
///
/// # Errors
/// Will return [`ArchiveError::CompressionSchemeNotSet`] if `compression` is
/// [`Compression::Unknown`], or an error if the underlying codec fails.
pub fn compress(compression: Compression, data: &[u8]) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::GZip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        Compression::Brotli => {
            let mut output = Vec::new();
            {
                let mut writer = brotli::CompressorWriter::new(&mut output, 4096, 9, 22);
                writer.write_all(data)?;
            }
            Ok(output)
        }
        Compression::Zstd => Ok(zstd::encode_all(data, 0)?),
        Compression::Unknown => Err(ArchiveError::CompressionSchemeNotSet.into()),
    }
}

/// Decompresses a byte buffer with the given scheme.
///
/// Inverse of [`compress`].
///
/// # Errors
/// Will return [`ArchiveError::CompressionSchemeNotSet`] if `compression` is
/// [`Compression::Unknown`], or an error if the input is not valid for the
/// scheme.
pub fn decompress(compression: Compression, data: &[u8]) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::GZip => {
            let mut output = Vec::new();
            flate2::read::GzDecoder::new(data).read_to_end(&mut output)?;
            Ok(output)
        }
        Compression::Brotli => {
            let mut output = Vec::new();
            brotli::Decompressor::new(data, 4096).read_to_end(&mut output)?;
            Ok(output)
        }
        Compression::Zstd => Ok(zstd::decode_all(data)?),
        Compression::Unknown => Err(ArchiveError::CompressionSchemeNotSet.into()),
    }
}

/// Wraps an async reader in a streaming decompressor for the given scheme.
///
/// # Errors
/// Will return [`ArchiveError::CompressionSchemeNotSet`] if `compression` is
/// [`Compression::Unknown`].
pub fn decompress_async<'a, R: AsyncBufRead + Unpin + Send + 'a>(
    compression: Compression,
    reader: R,
) -> Result<Box<dyn AsyncRead + Unpin + Send + 'a>> {
    match compression {
        Compression::None => Ok(Box::new(reader)),
        Compression::GZip => Ok(Box::new(GzipDecoder::new(reader))),
        Compression::Brotli => Ok(Box::new(BrotliDecoder::new(reader))),
        Compression::Zstd => Ok(Box::new(ZstdDecoder::new(reader))),
        Compression::Unknown => Err(ArchiveError::CompressionSchemeNotSet.into()),
    }
}

#[cfg(test)]
mod test {
    use anyhow::Result;
    use tokio::io::{AsyncReadExt, BufReader};

    use super::{compress, decompress, decompress_async};
    use crate::{error::ArchiveError, Compression};

    const PAYLOAD: &[u8] = b"the quick brown fox jumps over the lazy dog, twice over";

    #[test]
    fn test_round_trip_all_schemes() -> Result<()> {
        for compression in [
            Compression::None,
            Compression::GZip,
            Compression::Brotli,
            Compression::Zstd,
        ] {
            let compressed = compress(compression, PAYLOAD)?;
            assert_eq!(decompress(compression, &compressed)?, PAYLOAD);
        }

        Ok(())
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        let err = compress(Compression::Unknown, PAYLOAD).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::CompressionSchemeNotSet)
        ));

        assert!(decompress(Compression::Unknown, PAYLOAD).is_err());
    }

    #[tokio::test]
    async fn test_decompress_async() -> Result<()> {
        for compression in [Compression::GZip, Compression::Brotli, Compression::Zstd] {
            let compressed = compress(compression, PAYLOAD)?;
            let mut reader =
                decompress_async(compression, BufReader::new(compressed.as_slice()))?;

            let mut output = Vec::new();
            reader.read_to_end(&mut output).await?;
            assert_eq!(output, PAYLOAD);
        }

        Ok(())
    }
}
