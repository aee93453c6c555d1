//! # Stream writer
//!
//! Blocking writer for the Arrow IPC stream format: schema, dictionary and record messages,
//! then the end-of-stream marker.

use std::io::Write;
use std::sync::Arc;

use minarrow::Vec64;

use crate::enums::IPCMessageProtocol;
use crate::error::Result;
use crate::models::encoders::ipc::batch_stream::WriteStats;
use crate::models::types::record_batch::RecordBatch;
use crate::models::types::schema::Schema;
use crate::models::writers::ipc::ipc_writer::GIpcWriter;
use crate::options::WriteOptions;
use crate::traits::stream_buffer::StreamBuffer;

pub type StreamWriter<W> = GStreamWriter<W, Vec<u8>>;

pub type StreamWriter64<W> = GStreamWriter<W, Vec64<u8>>;

/// Writes the IPC stream format to any [`Write`].
///
/// A dictionary that grows by appending is sent as a delta; any other change is sent as a
/// replacement, which the stream format allows.
pub struct GStreamWriter<W: Write, B: StreamBuffer + 'static> {
    inner: GIpcWriter<W, B>,
}

impl<W: Write, B: StreamBuffer + 'static> GStreamWriter<W, B> {
    pub fn try_new(inner: W, schema: Arc<Schema>, options: WriteOptions) -> Result<Self> {
        Ok(Self {
            inner: GIpcWriter::try_new(inner, schema, IPCMessageProtocol::Stream, options)?,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.inner.schema()
    }

    pub fn stats(&self) -> WriteStats {
        self.inner.stats()
    }

    pub fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        self.inner.write(batch)
    }

    /// Writes the end-of-stream marker (and the schema, if nothing was written yet).
    pub fn finish(&mut self) -> Result<()> {
        self.inner.finish()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    pub fn get_ref(&self) -> &W {
        self.inner.get_ref()
    }

    /// Finishes the stream and returns the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.inner.into_inner()
    }
}
