//! Streaming NAR pipeline: hash, compress, hash, upload.
//!
//! Every stage is an [`AsyncRead`] wrapping the one before it, so the HTTP
//! body pulls bytes through the chain on demand and nothing holds more than
//! one buffer's worth of the NAR. Digests are reported once the stream they
//! observe reaches EOF.

use crate::api::NarBody;
use crate::error::PushError;
use async_compression::Level;
use async_compression::tokio::bufread::{XzEncoder, ZstdEncoder};
use ferry_core::config::CompressionConfig;
use ferry_core::hash::{ContentHash, NarHasher};
use ferry_core::narinfo::Compression;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncBufRead, AsyncRead, BufReader, ReadBuf};
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;

const BUFFER_SIZE: usize = 64 * 1024;

/// Passes bytes through unchanged while hashing and counting them.
pub struct HashingReader<R> {
    inner: R,
    hasher: Option<NarHasher>,
    done: Option<oneshot::Sender<(ContentHash, u64)>>,
}

/// Digest of a stream wrapped by [`HashingReader`], available after EOF.
#[derive(Debug)]
pub struct StreamDigest {
    rx: oneshot::Receiver<(ContentHash, u64)>,
}

/// Wrap `inner` in a hashing stage.
pub fn hashing_reader<R: AsyncRead + Unpin>(inner: R) -> (HashingReader<R>, StreamDigest) {
    let (tx, rx) = oneshot::channel();
    let reader = HashingReader {
        inner,
        hasher: Some(NarHasher::new()),
        done: Some(tx),
    };
    (reader, StreamDigest { rx })
}

impl<R> HashingReader<R> {
    fn finish(&mut self) {
        if let (Some(hasher), Some(done)) = (self.hasher.take(), self.done.take()) {
            let _ = done.send(hasher.finalize());
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        let read = &buf.filled()[before..];
        if !read.is_empty() {
            if let Some(hasher) = this.hasher.as_mut() {
                hasher.update(read);
            }
        } else if buf.remaining() > 0 {
            // No bytes into a non-full buffer: EOF.
            this.finish();
        }
        Poll::Ready(Ok(()))
    }
}

impl StreamDigest {
    /// Hash and length of everything that passed through.
    ///
    /// Fails with [`PushError::IncompleteStream`] if the stream was dropped
    /// or abandoned before EOF.
    pub fn finish(mut self) -> Result<(ContentHash, u64), PushError> {
        self.rx.try_recv().map_err(|_| PushError::IncompleteStream)
    }
}

/// Wrap a buffered reader in the configured encoder.
pub fn compressor<R>(reader: R, config: CompressionConfig) -> Box<dyn AsyncRead + Send + Unpin>
where
    R: AsyncBufRead + Send + Unpin + 'static,
{
    let level = Level::Precise(config.level);
    match config.method {
        Compression::Xz => Box::new(XzEncoder::with_quality(reader, level)),
        Compression::Zstd => Box::new(ZstdEncoder::with_quality(reader, level)),
    }
}

/// A wired pipeline for one upload attempt.
pub struct NarPipeline {
    /// Compressed bytes, ready to be used as a request body.
    pub body: NarBody,
    /// Digest of the uncompressed NAR.
    pub nar: StreamDigest,
    /// Digest of the compressed file.
    pub file: StreamDigest,
}

/// Build `source -> hash -> compress -> hash -> body`.
pub fn nar_pipeline<R>(source: R, compression: CompressionConfig) -> NarPipeline
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let (raw, nar) = hashing_reader(source);
    let compressed = compressor(BufReader::with_capacity(BUFFER_SIZE, raw), compression);
    let (hashed, file) = hashing_reader(compressed);
    NarPipeline {
        body: Box::pin(ReaderStream::with_capacity(hashed, BUFFER_SIZE)),
        nar,
        file,
    }
}
