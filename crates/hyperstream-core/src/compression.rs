//! Framed, optional Zstandard compression (C4).
//!
//! The stream is self-describing: a single flag byte precedes the payload,
//! `0x00` for raw passthrough or `0x01` for a Zstandard frame. The decoder
//! never needs to be told the mode out of band.

use std::path::Path;

use async_compression::tokio::bufread::{ZstdDecoder, ZstdEncoder};
use async_compression::Level;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{HyperstreamError, Result};

const ZSTD_LEVEL: i32 = 3;

const RAW_FLAG: u8 = 0x00;
const ZSTD_FLAG: u8 = 0x01;

/// Extensions the sender never bothers compressing: already-compressed
/// archives, media, and office document formats.
const SKIP_COMPRESSION_EXTENSIONS: &[&str] = &[
    "zip", "gz", "tgz", "bz2", "xz", "zst", "7z", "rar", "jpg", "jpeg", "png", "gif", "webp",
    "mp3", "mp4", "mkv", "mov", "avi", "flac", "ogg", "docx", "xlsx", "pptx", "pdf",
];

/// Decides whether the sender should enable compression for a top-level
/// source path, based solely on its file extension (case-insensitive).
/// Directories and unknown extensions enable compression.
pub fn should_compress(source: &Path) -> bool {
    match source.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => !SKIP_COMPRESSION_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => true,
    }
}

/// Emits the flag byte followed by either a raw copy or a Zstandard frame of
/// everything read from `reader`.
pub async fn compress_encode<R, W>(enabled: bool, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if enabled {
        writer.write_u8(ZSTD_FLAG).await?;
        let mut encoder =
            ZstdEncoder::with_quality(BufReader::new(reader), Level::Precise(ZSTD_LEVEL));
        tokio::io::copy(&mut encoder, &mut writer).await?;
    } else {
        writer.write_u8(RAW_FLAG).await?;
        let mut reader = reader;
        tokio::io::copy(&mut reader, &mut writer).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Reads the flag byte, then decompresses (or copies) the remainder of
/// `reader` into `writer`.
pub async fn compress_decode<R, W>(mut reader: R, mut writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let flag = reader.read_u8().await?;
    match flag {
        RAW_FLAG => {
            tokio::io::copy(&mut reader, &mut writer).await?;
        }
        ZSTD_FLAG => {
            let mut decoder = ZstdDecoder::new(BufReader::new(reader));
            copy_decompressed(&mut decoder, &mut writer).await?;
        }
        other => return Err(HyperstreamError::InvalidCompressionFlag(other)),
    }
    writer.flush().await?;
    Ok(())
}

async fn copy_decompressed<R, W>(decoder: &mut R, writer: &mut W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tokio::io::copy(decoder, writer)
        .await
        .map_err(|e| HyperstreamError::DecompressionError(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn skip_set_disables_known_media_extensions() {
        assert!(!should_compress(&PathBuf::from("photo.JPG")));
        assert!(!should_compress(&PathBuf::from("archive.zip")));
    }

    #[test]
    fn unknown_extensions_and_directories_enable_compression() {
        assert!(should_compress(&PathBuf::from("notes.txt")));
        assert!(should_compress(&PathBuf::from("some_directory")));
    }

    #[tokio::test]
    async fn roundtrips_when_enabled() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let mut encoded = Vec::new();
        compress_encode(true, payload.as_slice(), &mut encoded)
            .await
            .unwrap();
        assert_eq!(encoded[0], ZSTD_FLAG);
        let mut decoded = Vec::new();
        compress_decode(encoded.as_slice(), &mut decoded)
            .await
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn roundtrips_when_disabled() {
        let payload = b"raw bytes".to_vec();
        let mut encoded = Vec::new();
        compress_encode(false, payload.as_slice(), &mut encoded)
            .await
            .unwrap();
        assert_eq!(encoded[0], RAW_FLAG);
        assert_eq!(&encoded[1..], payload.as_slice());
        let mut decoded = Vec::new();
        compress_decode(encoded.as_slice(), &mut decoded)
            .await
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn invalid_flag_byte_is_rejected() {
        let bogus = vec![0x42, 1, 2, 3];
        let mut decoded = Vec::new();
        let err = compress_decode(bogus.as_slice(), &mut decoded)
            .await
            .unwrap_err();
        assert!(matches!(err, HyperstreamError::InvalidCompressionFlag(0x42)));
    }

    #[tokio::test]
    async fn truncated_zstd_frame_fails_decompression() {
        let payload = b"data that will be compressed and then cut short".repeat(50);
        let mut encoded = Vec::new();
        compress_encode(true, payload.as_slice(), &mut encoded)
            .await
            .unwrap();
        encoded.truncate(encoded.len() - 10);
        let mut decoded = Vec::new();
        let err = compress_decode(encoded.as_slice(), &mut decoded)
            .await
            .unwrap_err();
        assert!(matches!(err, HyperstreamError::DecompressionError(_)));
    }
}
