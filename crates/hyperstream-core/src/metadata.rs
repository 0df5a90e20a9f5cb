//! The cleartext preamble line sent before the encrypted payload.
//!
//! Advisory only: the receiver reads this before any decryption happens, so
//! it is not integrity-protected and MUST NOT drive security decisions.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{HyperstreamError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetadata {
    #[serde(rename = "totalSize")]
    pub total_size: u64,
    #[serde(rename = "fileCount")]
    pub file_count: u32,
    #[serde(rename = "isDirectory")]
    pub is_directory: bool,
    pub compressed: bool,
}

impl TransferMetadata {
    /// Serializes as a single JSON object followed by `\n` and writes it.
    pub async fn write<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut line = serde_json::to_vec(self).map_err(|e| HyperstreamError::Io(e.into()))?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Reads bytes up to and including the first `\n`, then parses it.
    pub async fn read<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(HyperstreamError::TruncatedStream);
        }
        serde_json::from_str(line.trim_end_matches('\n')).map_err(|e| HyperstreamError::Io(e.into()))
    }
}
