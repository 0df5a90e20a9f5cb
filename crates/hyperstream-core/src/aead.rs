//! Chunked AES-256-GCM stream codec (C5) — the crux of the wire protocol.
//!
//! Wire format: `nonce_prefix(4) chunk* end_marker(4 zero bytes)`, where
//! `chunk := length_be32 ciphertext(length) tag(16)`. The decoder never
//! emits plaintext before a chunk's tag has verified.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{HyperstreamError, Result};
use crate::key::AeadKey;

pub const CHUNK_SIZE: usize = 64 * 1024;
const TAG_LEN: usize = 16;
const NONCE_PREFIX_LEN: usize = 4;

fn build_nonce(prefix: &[u8; NONCE_PREFIX_LEN], counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..4].copy_from_slice(prefix);
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Encrypts `reader` chunk by chunk into `writer`, returning the number of
/// bytes written to `writer` (the post-encryption progress counter).
pub async fn aead_encode<R, W>(key: &AeadKey, mut reader: R, mut writer: W) -> Result<u64>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let mut prefix = [0u8; NONCE_PREFIX_LEN];
    rand::rng().fill_bytes(&mut prefix);
    writer.write_all(&prefix).await?;
    let mut bytes_written: u64 = NONCE_PREFIX_LEN as u64;

    let mut counter: u64 = 0;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut filled = 0usize;

    loop {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled > 0 {
                bytes_written +=
                    encrypt_and_write(&cipher, &prefix, &mut counter, &buf[..filled], &mut writer)
                        .await?;
                filled = 0;
            }
            break;
        }
        filled += n;
        if filled == CHUNK_SIZE {
            bytes_written +=
                encrypt_and_write(&cipher, &prefix, &mut counter, &buf[..filled], &mut writer)
                    .await?;
            filled = 0;
        }
    }

    writer.write_u32(0).await?;
    bytes_written += 4;
    writer.flush().await?;
    Ok(bytes_written)
}

async fn encrypt_and_write<W>(
    cipher: &Aes256Gcm,
    prefix: &[u8; NONCE_PREFIX_LEN],
    counter: &mut u64,
    plaintext: &[u8],
    writer: &mut W,
) -> Result<u64>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    if *counter == u64::MAX {
        return Err(HyperstreamError::ChunkCounterExhausted);
    }
    let nonce = build_nonce(prefix, *counter);
    *counter += 1;
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .expect("AES-256-GCM encryption under a valid key never fails");

    writer.write_u32(plaintext.len() as u32).await?;
    writer.write_all(&sealed).await?;
    Ok(4 + sealed.len() as u64)
}

/// Decrypts the AEAD stream read from `reader` into `writer`, verifying every
/// chunk's tag before any plaintext is emitted.
pub async fn aead_decode<R, W>(key: &AeadKey, mut reader: R, mut writer: W) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let mut prefix = [0u8; NONCE_PREFIX_LEN];
    read_exact_or_truncated(&mut reader, &mut prefix).await?;

    let mut counter: u64 = 0;
    loop {
        let len = match read_u32_or_eof(&mut reader).await? {
            None => return Err(HyperstreamError::TruncatedStream),
            Some(len) => len,
        };
        if len == 0 {
            break;
        }
        if len as usize > CHUNK_SIZE {
            return Err(HyperstreamError::ChunkTooLarge(len));
        }

        let mut sealed = vec![0u8; len as usize + TAG_LEN];
        read_exact_or_truncated(&mut reader, &mut sealed).await?;

        let nonce = build_nonce(&prefix, counter);
        counter += 1;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), sealed.as_ref())
            .map_err(|_| HyperstreamError::AuthenticationFailure)?;

        writer.write_all(&plaintext).await?;
    }

    writer.flush().await?;

    let mut probe = [0u8; 1];
    match reader.read(&mut probe).await? {
        0 => Ok(()),
        _ => Err(HyperstreamError::TrailingBytesAfterEnd),
    }
}

async fn read_exact_or_truncated<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<()> {
    reader
        .read_exact(buf)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => HyperstreamError::TruncatedStream,
            _ => HyperstreamError::Io(e),
        })
}

async fn read_u32_or_eof<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut read = 0usize;
    while read < 4 {
        let n = reader.read(&mut buf[read..]).await?;
        if n == 0 {
            if read == 0 {
                return Ok(None);
            }
            return Err(HyperstreamError::TruncatedStream);
        }
        read += n;
    }
    Ok(Some(u32::from_be_bytes(buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::TopicKey;

    async fn roundtrip(key: &AeadKey, plaintext: &[u8]) -> Vec<u8> {
        let mut encoded = Vec::new();
        aead_encode(key, plaintext, &mut encoded).await.unwrap();
        let mut decoded = Vec::new();
        aead_decode(key, encoded.as_slice(), &mut decoded)
            .await
            .unwrap();
        decoded
    }

    #[tokio::test]
    async fn empty_input_roundtrips() {
        let key = TopicKey::generate().derive();
        assert_eq!(roundtrip(&key, b"").await, b"");
    }

    #[tokio::test]
    async fn small_input_roundtrips() {
        let key = TopicKey::generate().derive();
        assert_eq!(roundtrip(&key, b"Hello, HyperStream!").await, b"Hello, HyperStream!");
    }

    #[tokio::test]
    async fn multi_chunk_input_roundtrips() {
        let key = TopicKey::generate().derive();
        let plaintext: Vec<u8> = (0..200 * 1024).map(|i| (i % 256) as u8).collect();
        assert_eq!(roundtrip(&key, &plaintext).await, plaintext);
    }

    #[tokio::test]
    async fn wrong_key_fails_authentication() {
        let key1 = TopicKey::generate().derive();
        let key2 = TopicKey::generate().derive();
        let mut encoded = Vec::new();
        aead_encode(&key1, &b"secret payload"[..], &mut encoded)
            .await
            .unwrap();
        let mut decoded = Vec::new();
        let err = aead_decode(&key2, encoded.as_slice(), &mut decoded)
            .await
            .unwrap_err();
        assert!(matches!(err, HyperstreamError::AuthenticationFailure));
    }

    #[tokio::test]
    async fn tampered_stream_fails_authentication() {
        let key = TopicKey::generate().derive();
        let mut encoded = Vec::new();
        aead_encode(&key, &b"integrity matters"[..], &mut encoded)
            .await
            .unwrap();
        let flip_at = encoded.len() / 2;
        encoded[flip_at] ^= 0x01;
        let mut decoded = Vec::new();
        let err = aead_decode(&key, encoded.as_slice(), &mut decoded)
            .await
            .unwrap_err();
        assert!(matches!(err, HyperstreamError::AuthenticationFailure));
    }

    #[tokio::test]
    async fn truncated_stream_is_detected() {
        let key = TopicKey::generate().derive();
        let mut encoded = Vec::new();
        aead_encode(&key, &b"not quite enough"[..], &mut encoded)
            .await
            .unwrap();
        encoded.truncate(encoded.len() - 5);
        let mut decoded = Vec::new();
        let err = aead_decode(&key, encoded.as_slice(), &mut decoded)
            .await
            .unwrap_err();
        assert!(matches!(err, HyperstreamError::TruncatedStream));
    }

    #[tokio::test]
    async fn trailing_bytes_after_end_marker_are_rejected() {
        let key = TopicKey::generate().derive();
        let mut encoded = Vec::new();
        aead_encode(&key, &b"done"[..], &mut encoded).await.unwrap();
        encoded.push(0xFF);
        let mut decoded = Vec::new();
        let err = aead_decode(&key, encoded.as_slice(), &mut decoded)
            .await
            .unwrap_err();
        assert!(matches!(err, HyperstreamError::TrailingBytesAfterEnd));
    }
}
