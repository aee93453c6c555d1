use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_sink::Sink;
use minarrow::Vec64;
use tokio::io::AsyncWrite;

use crate::enums::{IPCMessageProtocol, WriterState};
use crate::error::{IpcError, Result};
use crate::models::encoders::ipc::batch_stream::{GBatchStreamEncoder, WriteStats};
use crate::models::types::record_batch::RecordBatch;
use crate::models::types::schema::Schema;
use crate::options::WriteOptions;
use crate::traits::stream_buffer::StreamBuffer;

/// Async record batch sink padding buffers to 8 bytes, the layout other Arrow
/// implementations write.
pub type BatchSink<W> = GBatchSink<W, Vec<u8>>;

/// Async record batch sink padding buffers to 64 bytes.
pub type BatchSink64<W> = GBatchSink<W, Vec64<u8>>;

/// Generic asynchronous record batch sink over any [`AsyncWrite`].
///
/// Handles IPC framing, schema, dictionary messages and, for the file protocol, the
/// footer. `start_send` only encodes; bytes reach `W` on `poll_flush` and `poll_close`.
/// An I/O error poisons the sink; closing it afterwards shuts `W` down without a footer.
pub struct GBatchSink<W, B>
where
    W: AsyncWrite + Unpin + Send,
    B: StreamBuffer + 'static,
{
    pub(crate) inner: GBatchStreamEncoder<B>,
    pub(crate) destination: W,
    /// Frame currently being written
    frame_buf: Option<B>,
    /// Bytes of `frame_buf` already written
    frame_pos: usize,
}

impl<W, B> GBatchSink<W, B>
where
    W: AsyncWrite + Unpin + Send,
    B: StreamBuffer + Unpin + 'static,
{
    pub fn new(
        destination: W,
        schema: Arc<Schema>,
        protocol: IPCMessageProtocol,
        options: WriteOptions,
    ) -> Result<Self> {
        Ok(Self {
            inner: GBatchStreamEncoder::new(schema, protocol, options)?,
            destination,
            frame_buf: None,
            frame_pos: 0,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.inner.schema()
    }

    pub fn protocol(&self) -> IPCMessageProtocol {
        self.inner.protocol
    }

    pub fn stats(&self) -> WriteStats {
        self.inner.stats()
    }

    pub fn sink_mut(&mut self) -> &mut W {
        &mut self.destination
    }

    pub fn into_inner(self) -> W {
        self.destination
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        loop {
            if self.frame_buf.is_none() {
                match self.inner.pop_frame() {
                    Some(frame) => {
                        self.frame_pos = 0;
                        self.frame_buf = Some(frame);
                    }
                    None => return Poll::Ready(Ok(())),
                }
            }
            let Some(buf) = self.frame_buf.as_ref() else {
                continue;
            };
            let chunk = &buf.as_ref()[self.frame_pos..];
            match Pin::new(&mut self.destination).poll_write(cx, chunk) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(0)) => {
                    return Poll::Ready(Err(self.fail(std::io::ErrorKind::WriteZero.into())));
                }
                Poll::Ready(Ok(n)) => {
                    self.frame_pos += n;
                    if self.frame_pos >= buf.as_ref().len() {
                        self.frame_buf = None;
                        self.frame_pos = 0;
                    }
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(self.fail(e))),
            }
        }
    }

    fn fail(&mut self, e: std::io::Error) -> IpcError {
        self.inner.poison();
        self.frame_buf = None;
        IpcError::from(e)
    }
}

impl<W, B> Sink<RecordBatch> for GBatchSink<W, B>
where
    W: AsyncWrite + Unpin + Send,
    B: StreamBuffer + Unpin + 'static,
{
    type Error = IpcError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        match self.inner.state.write_error() {
            Some(e) => Poll::Ready(Err(e)),
            None => Poll::Ready(Ok(())),
        }
    }

    fn start_send(self: Pin<&mut Self>, batch: RecordBatch) -> Result<()> {
        self.get_mut().inner.write_record_batch_frame(&batch)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let this = self.get_mut();
        if this.inner.state == WriterState::Failed {
            return Poll::Ready(Err(IpcError::Poisoned));
        }
        std::task::ready!(this.poll_drain(cx))?;
        let flushed = std::task::ready!(Pin::new(&mut this.destination).poll_flush(cx));
        Poll::Ready(flushed.map_err(|e| this.fail(e)))
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let this = self.get_mut();
        if !this.inner.is_finished() {
            let failed = this.inner.state == WriterState::Failed;
            this.inner.finish()?;
            if failed {
                this.frame_buf = None;
                while this.inner.pop_frame().is_some() {}
            }
        }
        std::task::ready!(this.poll_drain(cx))?;
        std::task::ready!(Pin::new(&mut this.destination).poll_flush(cx)).map_err(IpcError::from)?;
        Pin::new(&mut this.destination)
            .poll_shutdown(cx)
            .map_err(IpcError::from)
    }
}
