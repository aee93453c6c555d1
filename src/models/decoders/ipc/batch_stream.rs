//! # Arrow IPC batch stream decoder
//!
//! Asynchronous decoder that consumes chunked Arrow IPC bytes and yields [`RecordBatch`]es.
//!
//! - Accepts both protocols ([`IPCMessageProtocol`]). File input is read through its
//!   message section; the footer is not needed and is never buffered.
//! - Works with standard 8-byte buffers (`Vec<u8>`) and 64-byte aligned buffers (`Vec64<u8>`).
//! - Public aliases: [`BatchStreamDecoder`] (8-byte) and [`BatchStreamDecoder64`] (64-byte).
//!
//! Internally wraps a [`FramedByteStream`] with an [`ArrowIPCFrameDecoder`] and feeds each
//! frame to a [`StreamDecoder`], which owns the schema and dictionary memo.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use minarrow::Vec64;

use crate::enums::{BatchState, IPCMessageProtocol};
use crate::error::{IpcError, Result};
use crate::models::decoders::ipc::message::StreamDecoder;
use crate::models::decoders::ipc::protocol::ArrowIPCFrameDecoder;
use crate::models::dictionary::memo::DictionaryMemo;
use crate::models::streams::framed_byte_stream::FramedByteStream;
use crate::models::types::record_batch::RecordBatch;
use crate::models::types::schema::Schema;
use crate::options::ReadOptions;
use crate::traits::stream_buffer::StreamBuffer;

/// Batch decoder over `Vec<u8>` chunks.
///
/// The usual choice for sources produced by other Arrow implementations.
pub type BatchStreamDecoder<S> = GBatchStreamDecoder<S, Vec<u8>>;

/// Batch decoder over 64-byte aligned `Vec64<u8>` chunks.
///
/// Bodies are always copied into 64-byte aligned allocations before decoding, so this only
/// saves a reallocation when the source already hands out `Vec64` chunks.
pub type BatchStreamDecoder64<S> = GBatchStreamDecoder<S, Vec64<u8>>;

/// Generic decoder yielding record batches from an asynchronous stream of IPC bytes.
pub struct GBatchStreamDecoder<S, B>
where
    S: Stream<Item = std::result::Result<B, io::Error>> + Unpin + Send,
    B: StreamBuffer,
{
    pub(crate) inner: FramedByteStream<S, ArrowIPCFrameDecoder<B>, B>,
    decoder: StreamDecoder,
    options: ReadOptions,
    pub protocol: IPCMessageProtocol,
}

impl<S, B> GBatchStreamDecoder<S, B>
where
    S: Stream<Item = std::result::Result<B, io::Error>> + Unpin + Send,
    B: StreamBuffer,
{
    /// - `stream`: source of IPC bytes, in chunks of any size.
    /// - `initial_capacity`: initial allocation of the rolling frame buffer.
    /// - `protocol`: [`IPCMessageProtocol::Stream`] also accepts file input and switches
    ///   to file rules when it sees the leading magic.
    pub fn new(
        stream: S,
        initial_capacity: usize,
        protocol: IPCMessageProtocol,
        options: ReadOptions,
    ) -> Self {
        let mut decoder = StreamDecoder::new(options.clone());
        decoder.set_protocol(protocol);
        Self {
            inner: FramedByteStream::new(stream, ArrowIPCFrameDecoder::new(protocol), initial_capacity),
            decoder,
            options,
            protocol,
        }
    }

    /// The decoded schema, once the schema message has been seen.
    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.decoder.schema()
    }

    pub fn memo(&self) -> &DictionaryMemo {
        self.decoder.memo()
    }

    pub fn state(&self) -> BatchState {
        self.decoder.state()
    }
}

impl<S, B> Stream for GBatchStreamDecoder<S, B>
where
    S: Stream<Item = std::result::Result<B, io::Error>> + Unpin + Send,
    B: StreamBuffer + Unpin,
{
    type Item = Result<RecordBatch>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match this.decoder.state() {
                BatchState::Done | BatchState::Failed => return Poll::Ready(None),
                _ => {}
            }
            if let Err(e) = this.options.check_cancelled() {
                this.decoder.poison();
                return Poll::Ready(Some(Err(e)));
            }

            let frame = match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    return match this.decoder.finish() {
                        Ok(()) => Poll::Ready(None),
                        Err(e) => Poll::Ready(Some(Err(e))),
                    };
                }
                Poll::Ready(Some(Err(e))) => {
                    this.decoder.poison();
                    return Poll::Ready(Some(Err(IpcError::from(e))));
                }
                Poll::Ready(Some(Ok(frame))) => frame,
            };

            if this.inner.decoder().protocol() == IPCMessageProtocol::File {
                this.decoder.set_protocol(IPCMessageProtocol::File);
            }
            let (metadata, body) = frame.into_parts();
            match this.decoder.decode(metadata.as_ref(), &body) {
                Ok(Some(batch)) => return Poll::Ready(Some(Ok(batch))),
                Ok(None) => continue,
                Err(e) => return Poll::Ready(Some(Err(e))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use futures_util::stream;

    use super::*;
    use crate::models::encoders::ipc::batch_stream::BatchStreamEncoder;
    use crate::models::types::array_data::ArrayData;
    use crate::models::types::datatype::DataType;
    use crate::models::types::schema::Field;
    use crate::options::WriteOptions;

    fn encode(protocol: IPCMessageProtocol, batches: &[RecordBatch]) -> Vec<u8> {
        let mut enc =
            BatchStreamEncoder::new(Arc::clone(&batches[0].schema), protocol, WriteOptions::default()).unwrap();
        for b in batches {
            enc.write_record_batch_frame(b).unwrap();
        }
        enc.finish().unwrap();
        let mut out = Vec::new();
        while let Some(f) = enc.pop_frame() {
            out.extend_from_slice(&f);
        }
        out
    }

    fn batch(values: &[Option<i64>]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, true)]));
        RecordBatch::try_new(schema, vec![ArrayData::from_options(values)]).unwrap()
    }

    fn chunked(bytes: &[u8], size: usize) -> impl Stream<Item = io::Result<Vec<u8>>> + Unpin + Send {
        let chunks: Vec<io::Result<Vec<u8>>> = bytes.chunks(size).map(|c| Ok(c.to_vec())).collect();
        stream::iter(chunks)
    }

    #[tokio::test]
    async fn test_decodes_stream_in_small_chunks() {
        let batches = vec![batch(&[Some(1), None]), batch(&[Some(3)])];
        let bytes = encode(IPCMessageProtocol::Stream, &batches);
        let mut dec = BatchStreamDecoder::new(chunked(&bytes, 5), 64, IPCMessageProtocol::Stream, ReadOptions::default());
        let mut got = Vec::new();
        while let Some(b) = dec.next().await {
            got.push(b.unwrap());
        }
        assert_eq!(got, batches);
        assert_eq!(dec.state(), BatchState::Done);
    }

    #[tokio::test]
    async fn test_decodes_file_without_reading_footer() {
        let batches = vec![batch(&[Some(9)])];
        let bytes = encode(IPCMessageProtocol::File, &batches);
        let mut dec = BatchStreamDecoder::new(chunked(&bytes, 7), 64, IPCMessageProtocol::File, ReadOptions::default());
        let got: Vec<_> = dec.by_ref().collect().await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].as_ref().unwrap(), &batches[0]);
    }

    #[tokio::test]
    async fn test_truncated_input_is_an_error() {
        let bytes = encode(IPCMessageProtocol::Stream, &[batch(&[Some(1)])]);
        let cut = &bytes[..bytes.len() - 12];
        let mut dec = BatchStreamDecoder::new(chunked(cut, 16), 64, IPCMessageProtocol::Stream, ReadOptions::default());
        let mut saw_err = false;
        while let Some(item) = dec.next().await {
            if let Err(e) = item {
                assert!(matches!(e, IpcError::Truncated(_)));
                saw_err = true;
            }
        }
        assert!(saw_err);
    }
}
