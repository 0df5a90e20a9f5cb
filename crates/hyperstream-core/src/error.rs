//! The error kinds surfaced by every component of the transfer pipeline.
//!
//! One variant per row of spec §7. Nothing here is recovered locally: the
//! orchestrator (`hyperstream-sender`/`hyperstream-receiver`) short-circuits
//! on the first error and tears the session down.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HyperstreamError>;

#[derive(Debug, Error)]
pub enum HyperstreamError {
    #[error("share key must decode to 32 bytes")]
    InvalidKeyLength,

    #[error("no peer joined the topic within the rendezvous timeout")]
    RendezvousTimeout,

    #[error("rendezvous failed: {cause}")]
    RendezvousFailed { cause: String },

    #[error("AEAD chunk failed authentication")]
    AuthenticationFailure,

    #[error("stream ended before the AEAD end marker")]
    TruncatedStream,

    #[error("bytes observed on the socket after the AEAD end marker")]
    TrailingBytesAfterEnd,

    #[error("compression frame flag byte {0:#04x} is not 0x00 or 0x01")]
    InvalidCompressionFlag(u8),

    #[error("zstd decoder rejected the frame: {0}")]
    DecompressionError(String),

    #[error("archive entry {name:?} escapes the destination directory")]
    UnsafeArchivePath { name: String },

    #[error("malformed archive: {0}")]
    ArchiveFormatError(String),

    #[error("a chunk declared a length of {0} bytes, exceeding the 65536 byte cap")]
    ChunkTooLarge(u32),

    #[error("the AEAD chunk counter would overflow under the current key")]
    ChunkCounterExhausted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("transfer cancelled")]
    Cancelled,
}
