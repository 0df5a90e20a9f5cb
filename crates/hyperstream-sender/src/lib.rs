//! Sender-side transfer orchestrator (C6).
//!
//! Composes probe → preamble → archive → compress → encrypt → socket, and
//! drives the middle three stages concurrently so the whole chain runs at
//! the rate the socket drains rather than buffering whole files in memory.

use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use hyperstream_core::error::{HyperstreamError, Result};
use hyperstream_core::key::{AeadKey, TopicKey};
use hyperstream_core::metadata::TransferMetadata;
use hyperstream_core::rendezvous::{Rendezvous, Socket};
use hyperstream_core::{aead, archive, compression};
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

/// Observer for transfer progress, exposed so an external CLI or TUI can
/// render it without the pipeline knowing anything about presentation.
pub trait ProgressSubscriber: Send + Sync {
    fn on_progress(&self, bytes_transferred: u64, total_size: u64);
    fn on_complete(&self);
}

/// A subscriber that does nothing, used when the caller doesn't care.
pub struct NoopSubscriber;

impl ProgressSubscriber for NoopSubscriber {
    fn on_progress(&self, _bytes_transferred: u64, _total_size: u64) {}
    fn on_complete(&self) {}
}

/// Wraps an `AsyncWrite` and counts bytes written to it. The sender's
/// progress counter is post-encryption (bytes actually placed on the
/// socket), per the resolved design note on progress counting.
struct CountingWriter<W> {
    inner: W,
    counter: Arc<AtomicU64>,
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CountingWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            self.counter.fetch_add(*n as u64, Ordering::Relaxed);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Runs archive → compress → encrypt concurrently over bounded pipes into
/// `writer`, returning the number of post-encryption bytes written.
///
/// This is the unit the wire-level tests exercise directly, without any
/// rendezvous or socket involved.
pub async fn run_send_pipeline<W>(
    source: &Path,
    aead_key: &AeadKey,
    compressed: bool,
    writer: W,
) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    const PIPE_CAPACITY: usize = 256 * 1024;

    let (archive_tx, archive_rx) = tokio::io::duplex(PIPE_CAPACITY);
    let (compress_tx, compress_rx) = tokio::io::duplex(PIPE_CAPACITY);

    let source = source.to_path_buf();
    let pack_fut = async move {
        let mut archive_tx = archive_tx;
        archive::archive_pack(&source, &mut archive_tx).await
    };

    let compress_fut = async move {
        let mut compress_tx = compress_tx;
        compression::compress_encode(compressed, archive_rx, &mut compress_tx).await
    };

    let encrypt_fut = async move { aead::aead_encode(aead_key, compress_rx, writer).await };

    let (_, _, bytes_written) = tokio::try_join!(pack_fut, compress_fut, encrypt_fut)?;
    Ok(bytes_written)
}

/// Sends `source` to whichever peer joins the returned topic. Generates a
/// fresh topic if `topic` is `None`. Returns the topic actually used.
///
/// `cancel` mirrors the teacher's `is_cancelled` flag: setting it from
/// another task (e.g. a Ctrl+C handler) aborts rendezvous and the pipeline at
/// their next yield point and returns `HyperstreamError::Cancelled`.
pub async fn send(
    source: &Path,
    topic: Option<TopicKey>,
    progress: Option<Arc<dyn ProgressSubscriber>>,
    cancel: Arc<AtomicBool>,
) -> Result<TopicKey> {
    let topic = topic.unwrap_or_else(TopicKey::generate);
    let aead_key = topic.derive();
    let progress = progress.unwrap_or_else(|| Arc::new(NoopSubscriber));

    let (total_size, file_count, is_directory) = archive::probe_metadata(source).await?;
    let compressed = compression::should_compress(source);
    let metadata = TransferMetadata {
        total_size,
        file_count,
        is_directory,
        compressed,
    };

    info!(topic = %topic.display(), total_size, file_count, compressed, "starting send");

    let rendezvous = Rendezvous::bind().await?;
    let result = send_inner(&rendezvous, &topic, &aead_key, source, &metadata, progress, cancel).await;
    rendezvous.destroy().await;

    result?;
    Ok(topic)
}

async fn send_inner(
    rendezvous: &Rendezvous,
    topic: &TopicKey,
    aead_key: &AeadKey,
    source: &Path,
    metadata: &TransferMetadata,
    progress: Arc<dyn ProgressSubscriber>,
    cancel: Arc<AtomicBool>,
) -> Result<()> {
    let counter = Arc::new(AtomicU64::new(0));
    let ticker = spawn_progress_ticker(counter.clone(), metadata.total_size, progress.clone());

    let result = tokio::select! {
        biased;
        _ = watch_cancellation(cancel) => {
            warn!("send cancelled");
            Err(HyperstreamError::Cancelled)
        }
        result = send_attempt(rendezvous, topic, aead_key, source, metadata, counter) => result,
    };

    ticker.abort();
    progress.on_complete();
    result
}

async fn send_attempt(
    rendezvous: &Rendezvous,
    topic: &TopicKey,
    aead_key: &AeadKey,
    source: &Path,
    metadata: &TransferMetadata,
    counter: Arc<AtomicU64>,
) -> Result<()> {
    let mut socket: Socket = rendezvous.connect_as_sender(topic).await?;
    metadata.write(&mut socket).await?;
    debug!("preamble flushed, beginning pipeline");

    let writer = CountingWriter {
        inner: socket,
        counter,
    };
    run_send_pipeline(source, aead_key, metadata.compressed, writer)
        .await
        .map(|_| ())
}

/// Polls `cancel` until it is set. Raced against the in-flight rendezvous +
/// pipeline attempt via `tokio::select!` in [`send_inner`].
async fn watch_cancellation(cancel: Arc<AtomicBool>) {
    loop {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn spawn_progress_ticker(
    counter: Arc<AtomicU64>,
    total_size: u64,
    progress: Arc<dyn ProgressSubscriber>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(200));
        loop {
            interval.tick().await;
            progress.on_progress(counter.load(Ordering::Relaxed), total_size);
        }
    })
}
