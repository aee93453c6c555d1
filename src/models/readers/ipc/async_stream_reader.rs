//! # Async record batch reader
//!
//! High-level wrapper over [`GBatchStreamDecoder`] for Tokio and other async runtimes.
//! Reads either IPC protocol from any chunked byte stream, or from an [`AsyncRead`]
//! via [`AsyncStreamReader::from_reader`].

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use minarrow::Vec64;
use tokio::io::AsyncRead;

use crate::constants::DEFAULT_FRAME_ALLOCATION_SIZE;
use crate::enums::{BufferChunkSize, IPCMessageProtocol};
use crate::error::Result;
use crate::models::decoders::ipc::batch_stream::GBatchStreamDecoder;
use crate::models::dictionary::memo::DictionaryMemo;
use crate::models::streams::disk::{DiskByteStream, ReaderByteStream};
use crate::models::types::record_batch::RecordBatch;
use crate::models::types::schema::Schema;
use crate::options::ReadOptions;
use crate::traits::stream_buffer::StreamBuffer;

/// Async reader over `Vec<u8>` chunks.
pub type AsyncStreamReader<S> = GAsyncStreamReader<S, Vec<u8>>;

/// Async reader over 64-byte aligned `Vec64<u8>` chunks.
pub type AsyncStreamReader64<S> = GAsyncStreamReader<S, Vec64<u8>>;

/// Generic async record batch reader.
///
/// Yields batches in stream order. A record that fails to decode is reported and skipped;
/// framing and I/O errors end the stream.
pub struct GAsyncStreamReader<S, B>
where
    S: Stream<Item = std::result::Result<B, io::Error>> + Unpin + Send,
    B: StreamBuffer,
{
    streamer: GBatchStreamDecoder<S, B>,
    finished: bool,
}

impl<S, B> GAsyncStreamReader<S, B>
where
    S: Stream<Item = std::result::Result<B, io::Error>> + Unpin + Send,
    B: StreamBuffer + Unpin,
{
    pub fn new(source: S, protocol: IPCMessageProtocol, options: ReadOptions) -> Self {
        Self::with_capacity(source, DEFAULT_FRAME_ALLOCATION_SIZE, protocol, options)
    }

    pub fn with_capacity(
        source: S,
        initial_capacity: usize,
        protocol: IPCMessageProtocol,
        options: ReadOptions,
    ) -> Self {
        Self {
            streamer: GBatchStreamDecoder::new(source, initial_capacity, protocol, options),
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The protocol in effect; file input read in stream mode reports `File`.
    pub fn protocol(&self) -> IPCMessageProtocol {
        self.streamer.inner.decoder().protocol()
    }

    /// The schema, once observed.
    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.streamer.schema()
    }

    pub fn dictionaries(&self) -> &DictionaryMemo {
        self.streamer.memo()
    }

    /// Reads every remaining batch.
    pub async fn read_all(&mut self) -> Result<Vec<RecordBatch>> {
        self.read_batches(None).await
    }

    /// Reads up to `n` batches, or all remaining ones when `n` is `None`.
    pub async fn read_batches(&mut self, n: Option<usize>) -> Result<Vec<RecordBatch>> {
        let mut batches = Vec::new();
        while n.is_none_or(|max| batches.len() < max) {
            match self.next().await {
                Some(batch) => batches.push(batch?),
                None => break,
            }
        }
        Ok(batches)
    }
}

impl<R: AsyncRead + Unpin + Send> GAsyncStreamReader<ReaderByteStream<R>, Vec64<u8>> {
    /// Reads from any [`AsyncRead`], such as a socket or a duplex pipe half.
    pub fn from_reader(reader: R, protocol: IPCMessageProtocol, options: ReadOptions) -> Self {
        Self::new(ReaderByteStream::new(reader, BufferChunkSize::InMemory), protocol, options)
    }
}

impl GAsyncStreamReader<DiskByteStream, Vec64<u8>> {
    /// Opens an IPC file or stream on disk; the protocol is detected from the leading magic.
    pub async fn open(path: impl AsRef<Path>, options: ReadOptions) -> Result<Self> {
        let source = DiskByteStream::open(path, BufferChunkSize::FileIO).await?;
        Ok(Self::new(source, IPCMessageProtocol::Stream, options))
    }
}

impl<S, B> Stream for GAsyncStreamReader<S, B>
where
    S: Stream<Item = std::result::Result<B, io::Error>> + Unpin + Send,
    B: StreamBuffer + Unpin,
{
    type Item = Result<RecordBatch>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match Pin::new(&mut this.streamer).poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Ok(batch))) => Poll::Ready(Some(Ok(batch))),
            Poll::Ready(Some(Err(e))) => {
                if e.is_fatal() {
                    this.finished = true;
                }
                Poll::Ready(Some(Err(e)))
            }
        }
    }
}
