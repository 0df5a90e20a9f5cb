//! Streaming, POSIX-USTAR-compatible archive codec (C3).
//!
//! Built on `tar::Header` for record construction/parsing, but driven by a
//! hand-rolled async loop: the `tar` crate's own `Builder`/`Archive` types
//! are synchronous and would block the executor on every entry.

use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tar::{EntryType, Header};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use walkdir::WalkDir;

use crate::error::{HyperstreamError, Result};

const BLOCK_SIZE: usize = 512;

/// `(totalSize, fileCount, isDirectory)`, computed without reading any file
/// content. Must agree with what [`archive_pack`] actually streams.
pub async fn probe_metadata(source: &Path) -> Result<(u64, u32, bool)> {
    let source = source.to_path_buf();
    tokio::task::spawn_blocking(move || probe_metadata_blocking(&source))
        .await
        .expect("probe task does not panic")
}

/// A top-level source path that is itself a symlink is dereferenced, here and
/// in [`archive_pack`], so both agree on whether it is a file or a
/// directory — `symlink_metadata` alone would make this function report
/// `fileCount=1` for a symlink-to-file while `archive_pack` emitted nothing,
/// breaking the preamble/stream agreement property. Symlinks encountered
/// while *walking* a directory are a different matter and remain skipped.
fn root_metadata(source: &Path) -> Result<std::fs::Metadata> {
    std::fs::metadata(source).map_err(HyperstreamError::Io)
}

fn probe_metadata_blocking(source: &Path) -> Result<(u64, u32, bool)> {
    let root_meta = root_metadata(source)?;
    if root_meta.is_dir() {
        let mut total_size = 0u64;
        let mut file_count = 0u32;
        for entry in WalkDir::new(source).sort_by_file_name() {
            let entry = entry.map_err(|e| HyperstreamError::Io(e.into()))?;
            let file_type = entry.file_type();
            if file_type.is_symlink() || file_type.is_dir() {
                continue;
            }
            if file_type.is_file() {
                total_size += entry.metadata().map_err(|e| HyperstreamError::Io(e.into()))?.len();
                file_count += 1;
            }
        }
        Ok((total_size, file_count, true))
    } else if root_meta.is_file() {
        Ok((root_meta.len(), 1, false))
    } else {
        Err(HyperstreamError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a regular file or directory", source.display()),
        )))
    }
}

/// Streams `source` (a single file or a directory tree) into `writer` as a
/// USTAR-compatible archive. Symlinks and other non-regular entries are
/// skipped, never emitted.
pub async fn archive_pack<W>(source: &Path, writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let source_owned = source.to_path_buf();
    let root_meta = tokio::task::spawn_blocking(move || root_metadata(&source_owned))
        .await
        .expect("root metadata task does not panic")?;

    if root_meta.is_dir() {
        let parent = source.parent().unwrap_or_else(|| Path::new(""));
        let mut entries: Vec<PathBuf> = WalkDir::new(source)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_type().is_symlink())
            .map(|e| e.path().to_path_buf())
            .collect();
        entries.sort();

        for path in entries {
            let rel = path.strip_prefix(parent).unwrap_or(&path);
            let name = relative_name(rel);
            let meta = fs::symlink_metadata(&path).await?;
            if meta.is_dir() {
                write_directory_entry(writer, &name, &meta).await?;
            } else if meta.is_file() {
                write_file_entry(writer, &path, &name, &meta).await?;
            }
        }
    } else if root_meta.is_file() {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        write_file_entry(writer, source, &name, &root_meta).await?;
    } else {
        return Err(HyperstreamError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a regular file or directory", source.display()),
        )));
    }

    writer.write_all(&[0u8; BLOCK_SIZE * 2]).await?;
    writer.flush().await?;
    Ok(())
}

fn relative_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn mtime_secs(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn mode_bits(meta: &std::fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o7777
    }
    #[cfg(not(unix))]
    {
        if meta.permissions().readonly() {
            0o444
        } else {
            0o644
        }
    }
}

async fn write_directory_entry<W>(writer: &mut W, name: &str, meta: &std::fs::Metadata) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut header = Header::new_ustar();
    let dir_name = format!("{}/", name.trim_end_matches('/'));
    header.set_path(&dir_name).map_err(HyperstreamError::Io)?;
    header.set_size(0);
    header.set_mode(mode_bits(meta));
    header.set_mtime(mtime_secs(meta));
    header.set_entry_type(EntryType::Directory);
    header.set_cksum();
    writer.write_all(header.as_bytes()).await?;
    Ok(())
}

async fn write_file_entry<W>(
    writer: &mut W,
    path: &Path,
    name: &str,
    meta: &std::fs::Metadata,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut header = Header::new_ustar();
    header.set_path(name).map_err(HyperstreamError::Io)?;
    header.set_size(meta.len());
    header.set_mode(mode_bits(meta));
    header.set_mtime(mtime_secs(meta));
    header.set_entry_type(EntryType::Regular);
    header.set_cksum();
    writer.write_all(header.as_bytes()).await?;

    let mut file = fs::File::open(path).await?;
    let mut remaining = meta.len();
    let mut buf = vec![0u8; BLOCK_SIZE * 16];
    while remaining > 0 {
        let to_read = buf.len().min(remaining as usize);
        let n = file.read(&mut buf[..to_read]).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }

    let padding = padding_len(meta.len());
    if padding > 0 {
        writer.write_all(&vec![0u8; padding]).await?;
    }
    Ok(())
}

fn padding_len(size: u64) -> usize {
    let rem = (size % BLOCK_SIZE as u64) as usize;
    if rem == 0 {
        0
    } else {
        BLOCK_SIZE - rem
    }
}

/// Validates an archive entry name against traversal outside `destination`.
fn sanitize_name(name: &str) -> Result<PathBuf> {
    let path = Path::new(name.trim_end_matches('/'));
    if path.is_absolute() {
        return Err(HyperstreamError::UnsafeArchivePath {
            name: name.to_string(),
        });
    }
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(HyperstreamError::UnsafeArchivePath {
                    name: name.to_string(),
                })
            }
        }
    }
    Ok(path.to_path_buf())
}

/// Consumes an archive stream from `reader`, materializing it under
/// `destination`. Rejects any entry whose name would escape `destination`
/// before any write happens.
pub async fn archive_extract<R>(reader: &mut R, destination: &Path) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    fs::create_dir_all(destination).await?;
    let mut block = [0u8; BLOCK_SIZE];

    loop {
        if !read_block(reader, &mut block).await? {
            return Err(HyperstreamError::TruncatedStream);
        }
        if block.iter().all(|&b| b == 0) {
            let mut trailing = [0u8; BLOCK_SIZE];
            let _ = read_block(reader, &mut trailing).await;
            break;
        }

        let header = Header::from_byte_slice(&block);
        let raw_path = header
            .path()
            .map_err(|e| HyperstreamError::ArchiveFormatError(e.to_string()))?;
        let name = raw_path.to_string_lossy().into_owned();
        let entry_type = header.entry_type();
        let size = header
            .size()
            .map_err(|e| HyperstreamError::ArchiveFormatError(e.to_string()))?;
        let mode = header
            .mode()
            .map_err(|e| HyperstreamError::ArchiveFormatError(e.to_string()))?;

        let relative = sanitize_name(&name)?;
        let out_path = destination.join(&relative);

        if entry_type == EntryType::Directory {
            fs::create_dir_all(&out_path).await?;
            set_mode(&out_path, mode).await;
            skip_padded(reader, 0).await?;
        } else if entry_type == EntryType::Regular {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let mut file = fs::File::create(&out_path).await?;
            copy_exact(reader, &mut file, size).await?;
            set_mode(&out_path, mode).await;
        } else {
            skip_padded(reader, size).await?;
        }
    }

    Ok(())
}

/// Reads one 512-byte block. Returns `Ok(false)` only on a clean EOF at the
/// very start of the block; a short read partway through is truncation.
async fn read_block<R: AsyncRead + Unpin>(reader: &mut R, block: &mut [u8; BLOCK_SIZE]) -> Result<bool> {
    let mut read = 0usize;
    while read < BLOCK_SIZE {
        let n = reader.read(&mut block[read..]).await?;
        if n == 0 {
            return Ok(false);
        }
        read += n;
    }
    Ok(true)
}

async fn copy_exact<R, W>(reader: &mut R, writer: &mut W, size: u64) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut remaining = size;
    let mut buf = vec![0u8; BLOCK_SIZE * 16];
    while remaining > 0 {
        let to_read = buf.len().min(remaining as usize);
        let n = reader.read(&mut buf[..to_read]).await?;
        if n == 0 {
            return Err(HyperstreamError::TruncatedStream);
        }
        writer.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }
    skip_padding(reader, size).await
}

async fn skip_padded<R: AsyncRead + Unpin>(reader: &mut R, size: u64) -> Result<()> {
    if size > 0 {
        let mut remaining = size;
        let mut buf = vec![0u8; BLOCK_SIZE * 16];
        while remaining > 0 {
            let to_read = buf.len().min(remaining as usize);
            let n = reader.read(&mut buf[..to_read]).await?;
            if n == 0 {
                return Err(HyperstreamError::TruncatedStream);
            }
            remaining -= n as u64;
        }
    }
    skip_padding(reader, size).await
}

async fn skip_padding<R: AsyncRead + Unpin>(reader: &mut R, size: u64) -> Result<()> {
    let padding = padding_len(size);
    if padding > 0 {
        let mut buf = vec![0u8; padding];
        reader.read_exact(&mut buf).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => HyperstreamError::TruncatedStream,
            _ => HyperstreamError::Io(e),
        })?;
    }
    Ok(())
}

async fn set_mode(path: &Path, mode: u32) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::fs as tfs;
    use tokio::io::AsyncWriteExt as _;

    #[tokio::test]
    async fn single_file_roundtrips() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let src_file = src_dir.path().join("hello.txt");
        tfs::write(&src_file, b"Hello, HyperStream!").await.unwrap();

        let mut archive = Vec::new();
        archive_pack(&src_file, &mut archive).await.unwrap();
        archive_extract(&mut archive.as_slice(), dst_dir.path())
            .await
            .unwrap();

        let extracted = tfs::read(dst_dir.path().join("hello.txt")).await.unwrap();
        assert_eq!(extracted, b"Hello, HyperStream!");
    }

    #[tokio::test]
    async fn directory_with_subdir_roundtrips() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let root = src_dir.path().join("project");
        tfs::create_dir_all(root.join("sub")).await.unwrap();
        tfs::write(root.join("a.txt"), b"A").await.unwrap();
        tfs::write(root.join("b.txt"), b"BB").await.unwrap();
        tfs::write(root.join("sub/c.txt"), b"CCC").await.unwrap();

        let mut archive = Vec::new();
        archive_pack(&root, &mut archive).await.unwrap();
        archive_extract(&mut archive.as_slice(), dst_dir.path())
            .await
            .unwrap();

        assert_eq!(
            tfs::read(dst_dir.path().join("project/a.txt")).await.unwrap(),
            b"A"
        );
        assert_eq!(
            tfs::read(dst_dir.path().join("project/b.txt")).await.unwrap(),
            b"BB"
        );
        assert_eq!(
            tfs::read(dst_dir.path().join("project/sub/c.txt")).await.unwrap(),
            b"CCC"
        );
    }

    #[tokio::test]
    async fn probe_matches_packed_totals() {
        let src_dir = tempdir().unwrap();
        let root = src_dir.path().join("project");
        tfs::create_dir_all(root.join("sub")).await.unwrap();
        tfs::write(root.join("a.txt"), b"A").await.unwrap();
        tfs::write(root.join("b.txt"), b"BB").await.unwrap();
        tfs::write(root.join("sub/c.txt"), b"CCC").await.unwrap();

        let (total_size, file_count, is_directory) = probe_metadata(&root).await.unwrap();
        assert_eq!(total_size, 6);
        assert_eq!(file_count, 3);
        assert!(is_directory);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn top_level_symlink_to_file_agrees_between_probe_and_pack() {
        use std::os::unix::fs::symlink;

        let src_dir = tempdir().unwrap();
        let target = src_dir.path().join("real.txt");
        tfs::write(&target, b"Hello, HyperStream!").await.unwrap();
        let link = src_dir.path().join("link.txt");
        symlink(&target, &link).unwrap();

        let (total_size, file_count, is_directory) = probe_metadata(&link).await.unwrap();
        assert_eq!(total_size, 20);
        assert_eq!(file_count, 1);
        assert!(!is_directory);

        let mut archive = Vec::new();
        archive_pack(&link, &mut archive).await.unwrap();

        let dst_dir = tempdir().unwrap();
        archive_extract(&mut archive.as_slice(), dst_dir.path())
            .await
            .unwrap();
        let extracted = tfs::read(dst_dir.path().join("link.txt")).await.unwrap();
        assert_eq!(extracted, b"Hello, HyperStream!");
    }

    #[tokio::test]
    async fn path_traversal_entry_is_rejected() {
        let dst_dir = tempdir().unwrap();
        let mut header = Header::new_ustar();
        header.set_path("../etc/evil").unwrap();
        header.set_size(0);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        header.set_cksum();

        let mut archive = Vec::new();
        archive.extend_from_slice(header.as_bytes());
        archive.extend_from_slice(&[0u8; BLOCK_SIZE * 2]);

        let err = archive_extract(&mut archive.as_slice(), dst_dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, HyperstreamError::UnsafeArchivePath { .. }));
    }
}
