//! # Asynchronous chunked byte sources
//!
//! Wraps any [`AsyncRead`] in a [`Stream`] of fixed-size 64-byte aligned chunks, the input
//! shape the async IPC decoders consume.
//!
//! - [`ReaderByteStream`] works over sockets, pipes and in-memory duplex halves.
//! - [`DiskByteStream`] opens a file and reads it through a Tokio [`BufReader`].
//! - Chunk size is controlled by [`BufferChunkSize`].

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use minarrow::{Vec64, vec64};
use tokio::fs::File;
use tokio::io::{AsyncRead, BufReader, ReadBuf};

use crate::enums::BufferChunkSize;

/// Chunked stream over a file on disk.
pub type DiskByteStream = ReaderByteStream<BufReader<File>>;

/// A `Stream` that reads an [`AsyncRead`] in chunks of at most `chunk_size` bytes.
pub struct ReaderByteStream<R> {
    reader: R,
    eof: bool,
    /// Staging buffer, handed out on each successful read.
    buf: Vec64<u8>,
    chunk_size: usize,
}

impl<R: AsyncRead + Unpin> ReaderByteStream<R> {
    pub fn new(reader: R, size: BufferChunkSize) -> Self {
        let chunk_size = size.chunk_size().max(1);
        Self {
            reader,
            eof: false,
            buf: vec64![0u8; chunk_size],
            chunk_size,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl DiskByteStream {
    /// Opens `path` for chunked reading.
    pub async fn open(path: impl AsRef<Path>, size: BufferChunkSize) -> io::Result<Self> {
        let file = File::open(path).await?;
        Ok(ReaderByteStream::new(BufReader::with_capacity(size.chunk_size().max(1), file), size))
    }
}

impl<R: AsyncRead + Unpin> Stream for ReaderByteStream<R> {
    type Item = Result<Vec64<u8>, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();
        if me.eof {
            return Poll::Ready(None);
        }

        let chunk_size = me.chunk_size;
        let mut read_buf = ReadBuf::new(&mut me.buf[..chunk_size]);
        match Pin::new(&mut me.reader).poll_read(cx, &mut read_buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(())) => {
                let n = read_buf.filled().len();
                if n == 0 {
                    me.eof = true;
                    return Poll::Ready(None);
                }
                let mut out = std::mem::replace(&mut me.buf, vec64![0u8; chunk_size]);
                out.truncate(n);
                Poll::Ready(Some(Ok(out)))
            }
            Poll::Ready(Err(e)) => {
                me.eof = true;
                Poll::Ready(Some(Err(e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn test_disk_stream_custom_chunks() {
        const FILE_SIZE: usize = 1024 * 1024;
        const CHUNK: usize = 128 * 1024;

        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0x55u8; FILE_SIZE]).unwrap();
        tmp.flush().unwrap();

        let mut s = DiskByteStream::open(tmp.path(), BufferChunkSize::Custom(CHUNK))
            .await
            .unwrap();
        let mut total = 0usize;
        while let Some(chunk) = s.next().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= CHUNK);
            assert!(chunk.iter().all(|b| *b == 0x55));
            total += chunk.len();
        }
        assert_eq!(total, FILE_SIZE);
    }

    #[tokio::test]
    async fn test_reader_stream_over_duplex() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            for i in 0..10u8 {
                tx.write_all(&[i; 50]).await.unwrap();
            }
        });
        let mut s = ReaderByteStream::new(rx, BufferChunkSize::Custom(32));
        let mut all = Vec::new();
        while let Some(chunk) = s.next().await {
            all.extend_from_slice(&chunk.unwrap());
        }
        writer.await.unwrap();
        assert_eq!(all.len(), 500);
        assert_eq!(all[499], 9);
    }
}
