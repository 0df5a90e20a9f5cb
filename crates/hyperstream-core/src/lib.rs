//! Wire framing, crypto, compression, and archive codecs shared by the
//! HyperStream send/receive pipeline.
//!
//! This crate is protocol-only: it has no notion of a CLI, a config file, or
//! a filesystem destination policy beyond what archive extraction requires.
//! `hyperstream-sender` and `hyperstream-receiver` compose these pieces into
//! the two directions of a transfer.

pub mod aead;
pub mod archive;
pub mod compression;
pub mod error;
pub mod key;
pub mod metadata;
pub mod rendezvous;

pub use error::{HyperstreamError, Result};
pub use key::{AeadKey, TopicKey};
pub use metadata::TransferMetadata;
pub use rendezvous::{Rendezvous, Socket};
