//! # Generic async framed byte stream
//!
//! Adapts any chunked byte source into a stream of protocol frames using a
//! [`FrameDecoder`].
//!
//! - Buffers partial input and yields complete frames as soon as available.
//! - Stops once the decoder reports it is done, ignoring trailing bytes such as a file footer.
//! - Leftover bytes at end of input are a truncated frame.

use futures_core::Stream;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::enums::DecodeResult;
use crate::traits::frame_decoder::FrameDecoder;
use crate::traits::stream_buffer::StreamBuffer;

/// Asynchronous framed byte stream adapter.
///
/// Converts a chunked byte source (any `Stream` of `io::Result<B>`) into a stream of frames.
/// The rolling buffer is drained only after a successful decode, so a decoder
/// returning [`DecodeResult::NeedMore`] always sees the same prefix again with more
/// bytes appended.
///
/// ```ignore
/// let framed = FramedByteStream::new(chunks, ArrowIPCFrameDecoder::new(protocol), 64 * 1024);
/// ```
pub struct FramedByteStream<S, D, B>
where
    S: Stream<Item = io::Result<B>> + Send + Unpin,
    D: FrameDecoder,
    B: StreamBuffer,
{
    pub(crate) inner: S,
    decoder: D,
    buf: B,
    /// Input ended or an error was returned.
    terminated: bool,
}

impl<S, D, B> FramedByteStream<S, D, B>
where
    S: Stream<Item = io::Result<B>> + Send + Unpin,
    D: FrameDecoder,
    B: StreamBuffer,
{
    pub fn new(stream: S, decoder: D, initial_capacity: usize) -> Self {
        Self {
            inner: stream,
            decoder,
            buf: B::with_capacity(initial_capacity),
            terminated: false,
        }
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Bytes received but not yet consumed by a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl<S, D, B> Stream for FramedByteStream<S, D, B>
where
    S: Stream<Item = io::Result<B>> + Send + Unpin,
    D: FrameDecoder + Unpin,
    B: StreamBuffer + Unpin,
{
    type Item = Result<D::Frame, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();
        if me.terminated {
            return Poll::Ready(None);
        }

        loop {
            if me.decoder.is_done() {
                me.terminated = true;
                me.buf = B::default();
                return Poll::Ready(None);
            }
            match me.decoder.decode(me.buf.as_ref()) {
                Ok(DecodeResult::Frame { frame, consumed }) => {
                    me.buf.drain(0..consumed);
                    return Poll::Ready(Some(Ok(frame)));
                }
                Ok(DecodeResult::NeedMore) => {}
                Err(e) => {
                    me.terminated = true;
                    me.buf = B::default();
                    return Poll::Ready(Some(Err(e)));
                }
            }

            match Pin::new(&mut me.inner).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => {
                    me.buf.extend_from_slice(chunk.as_ref());
                }
                Poll::Ready(Some(Err(e))) => {
                    me.terminated = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    me.terminated = true;
                    if me.buf.is_empty() {
                        return Poll::Ready(None);
                    }
                    let left = me.buf.len();
                    me.buf = B::default();
                    return Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("truncated frame at end of stream ({left} bytes left over)"),
                    ))));
                }
            }
        }
    }
}
