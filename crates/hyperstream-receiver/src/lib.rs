//! Receiver-side transfer orchestrator (C6).
//!
//! Reads the cleartext preamble, then feeds every remaining byte — buffered
//! leftovers from the preamble read included — through decrypt → decompress
//! → extract, concurrently and backpressure-correct.

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
use tokio::io::{AsyncRead, BufReader, ReadBuf};
use tracing::{debug, info, warn};

pub trait ProgressSubscriber: Send + Sync {
    fn on_progress(&self, bytes_transferred: u64, total_size: u64);
    fn on_complete(&self);
}

pub struct NoopSubscriber;

impl ProgressSubscriber for NoopSubscriber {
    fn on_progress(&self, _bytes_transferred: u64, _total_size: u64) {}
    fn on_complete(&self) {}
}

/// Wraps an `AsyncRead` and counts bytes read from it, for the receiver's
/// post-preamble progress counter.
struct CountingReader<R> {
    inner: R,
    counter: Arc<AtomicU64>,
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if poll.is_ready() {
            let gained = buf.filled().len() - before;
            self.counter.fetch_add(gained as u64, Ordering::Relaxed);
        }
        poll
    }
}

/// Runs decrypt → decompress → extract concurrently over bounded pipes,
/// materializing the archive under `destination`.
pub async fn run_receive_pipeline<R>(
    aead_key: &AeadKey,
    reader: R,
    destination: &Path,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    const PIPE_CAPACITY: usize = 256 * 1024;

    let (compress_tx, compress_rx) = tokio::io::duplex(PIPE_CAPACITY);
    let (archive_tx, mut archive_rx) = tokio::io::duplex(PIPE_CAPACITY);

    let decrypt_fut = async move {
        let mut compress_tx = compress_tx;
        aead::aead_decode(aead_key, reader, &mut compress_tx).await
    };

    let decompress_fut = async move {
        let mut archive_tx = archive_tx;
        compression::compress_decode(compress_rx, &mut archive_tx).await
    };

    let destination = destination.to_path_buf();
    let extract_fut =
        async move { archive::archive_extract(&mut archive_rx, &destination).await };

    tokio::try_join!(decrypt_fut, decompress_fut, extract_fut)?;
    Ok(())
}

/// Joins `topic`'s rendezvous, receives one transfer, and materializes it
/// under `destination`. Returns the (advisory) preamble metadata.
///
/// `cancel` mirrors the teacher's `is_cancelled` flag: setting it from
/// another task (e.g. a Ctrl+C handler) aborts rendezvous and the pipeline at
/// their next yield point and returns `HyperstreamError::Cancelled`.
pub async fn receive(
    topic: TopicKey,
    destination: &Path,
    progress: Option<Arc<dyn ProgressSubscriber>>,
    cancel: Arc<AtomicBool>,
) -> Result<TransferMetadata> {
    let aead_key = topic.derive();
    let progress = progress.unwrap_or_else(|| Arc::new(NoopSubscriber));

    info!(topic = %topic.display(), "waiting for sender");

    let rendezvous = Rendezvous::bind().await?;
    let result = receive_inner(&rendezvous, &topic, &aead_key, destination, progress, cancel).await;
    rendezvous.destroy().await;
    result
}

async fn receive_inner(
    rendezvous: &Rendezvous,
    topic: &TopicKey,
    aead_key: &AeadKey,
    destination: &Path,
    progress: Arc<dyn ProgressSubscriber>,
    cancel: Arc<AtomicBool>,
) -> Result<TransferMetadata> {
    let counter = Arc::new(AtomicU64::new(0));
    // Unknown until the preamble arrives; `receive_attempt` fills it in.
    let total_size = Arc::new(AtomicU64::new(0));
    let ticker = spawn_progress_ticker(counter.clone(), total_size.clone(), progress.clone());

    let result = tokio::select! {
        biased;
        _ = watch_cancellation(cancel) => {
            warn!("receive cancelled");
            Err(HyperstreamError::Cancelled)
        }
        result = receive_attempt(rendezvous, topic, aead_key, destination, counter, total_size) => result,
    };

    ticker.abort();
    progress.on_complete();
    result
}

async fn receive_attempt(
    rendezvous: &Rendezvous,
    topic: &TopicKey,
    aead_key: &AeadKey,
    destination: &Path,
    counter: Arc<AtomicU64>,
    total_size: Arc<AtomicU64>,
) -> Result<TransferMetadata> {
    let socket: Socket = rendezvous.connect_as_receiver(topic).await?;
    let mut reader = BufReader::new(socket);
    let metadata = TransferMetadata::read(&mut reader).await?;
    debug!(?metadata, "preamble received");
    total_size.store(metadata.total_size, Ordering::Relaxed);

    let counting_reader = CountingReader {
        inner: reader,
        counter,
    };
    run_receive_pipeline(aead_key, counting_reader, destination)
        .await
        .map(|_| metadata)
}

/// Polls `cancel` until it is set. Raced against the in-flight rendezvous +
/// pipeline attempt via `tokio::select!` in [`receive_inner`].
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
    total_size: Arc<AtomicU64>,
    progress: Arc<dyn ProgressSubscriber>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(200));
        loop {
            interval.tick().await;
            progress.on_progress(counter.load(Ordering::Relaxed), total_size.load(Ordering::Relaxed));
        }
    })
}
