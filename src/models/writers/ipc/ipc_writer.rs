//! # Blocking IPC writer core
//!
//! Drives a [`GBatchStreamEncoder`] and copies every queued frame into a
//! [`std::io::Write`]. [`FileWriter`] and [`StreamWriter`] fix the protocol on top of it.
//!
//! [`FileWriter`]: crate::models::writers::ipc::file_writer::FileWriter
//! [`StreamWriter`]: crate::models::writers::ipc::stream_writer::StreamWriter

use std::io::Write;
use std::sync::Arc;

use tracing::debug;

use crate::enums::{IPCMessageProtocol, WriterState};
use crate::error::{IpcError, Result};
use crate::models::encoders::ipc::batch_stream::{GBatchStreamEncoder, WriteStats};
use crate::models::types::record_batch::RecordBatch;
use crate::models::types::schema::Schema;
use crate::options::WriteOptions;
use crate::traits::stream_buffer::StreamBuffer;

/// Protocol-agnostic blocking writer.
///
/// Nothing is written until the first batch (or [`finish`](Self::finish)). A failed write
/// to `W` poisons the writer; `finish` then closes it without a footer.
pub struct GIpcWriter<W: Write, B: StreamBuffer + 'static> {
    inner: W,
    encoder: GBatchStreamEncoder<B>,
}

impl<W: Write, B: StreamBuffer + 'static> GIpcWriter<W, B> {
    pub fn try_new(
        inner: W,
        schema: Arc<Schema>,
        protocol: IPCMessageProtocol,
        options: WriteOptions,
    ) -> Result<Self> {
        Ok(Self {
            inner,
            encoder: GBatchStreamEncoder::new(schema, protocol, options)?,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.encoder.schema()
    }

    pub fn protocol(&self) -> IPCMessageProtocol {
        self.encoder.protocol
    }

    pub fn stats(&self) -> WriteStats {
        self.encoder.stats()
    }

    pub fn is_finished(&self) -> bool {
        self.encoder.state == WriterState::Closed
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Encodes `batch`, with any dictionary messages it needs, and writes it out.
    pub fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        self.encoder.write_record_batch_frame(batch)?;
        self.drain()
    }

    /// Writes the closing frames and flushes. Calling it again is a no-op.
    pub fn finish(&mut self) -> Result<()> {
        if self.encoder.state == WriterState::Closed {
            return Ok(());
        }
        let failed = self.encoder.state == WriterState::Failed;
        self.encoder.finish()?;
        if failed {
            debug!("writer closed without a footer after an earlier failure");
            return Ok(());
        }
        self.drain()?;
        self.inner.flush().map_err(|e| {
            self.encoder.poison();
            IpcError::from(e)
        })
    }

    /// Finishes and returns the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        Ok(self.inner)
    }

    fn drain(&mut self) -> Result<()> {
        while let Some(frame) = self.encoder.pop_frame() {
            if let Err(e) = self.inner.write_all(frame.as_ref()) {
                self.encoder.poison();
                return Err(e.into());
            }
        }
        Ok(())
    }
}
