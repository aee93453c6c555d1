//! # File writer
//!
//! Blocking writer for the Arrow IPC file format: opening magic, schema, dictionary and
//! record messages, then the footer with its block index and the closing magic.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
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

/// File writer padding buffers to 8 bytes.
pub type FileWriter<W> = GFileWriter<W, Vec<u8>>;

/// File writer padding buffers to 64 bytes.
pub type FileWriter64<W> = GFileWriter<W, Vec64<u8>>;

/// Writes the IPC file format to any [`Write`].
///
/// Changing a dictionary other than by appending fails with
/// [`IpcError::UnsupportedDictionaryReplacement`]; appends become delta batches.
/// Dropping the writer without [`finish`](Self::finish) leaves a file without a footer.
///
/// [`IpcError::UnsupportedDictionaryReplacement`]: crate::error::IpcError::UnsupportedDictionaryReplacement
pub struct GFileWriter<W: Write, B: StreamBuffer + 'static> {
    inner: GIpcWriter<W, B>,
}

impl GFileWriter<BufWriter<File>, Vec<u8>> {
    /// Creates (or truncates) `path`.
    pub fn create(path: impl AsRef<Path>, schema: Arc<Schema>, options: WriteOptions) -> Result<Self> {
        Self::try_new(BufWriter::new(File::create(path)?), schema, options)
    }
}

impl<W: Write, B: StreamBuffer + 'static> GFileWriter<W, B> {
    pub fn try_new(inner: W, schema: Arc<Schema>, options: WriteOptions) -> Result<Self> {
        Ok(Self {
            inner: GIpcWriter::try_new(inner, schema, IPCMessageProtocol::File, options)?,
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

    /// Writes the footer. A writer finished before any batch produces a valid empty file.
    pub fn finish(&mut self) -> Result<()> {
        self.inner.finish()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    pub fn get_ref(&self) -> &W {
        self.inner.get_ref()
    }

    /// Finishes the file and returns the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.inner.into_inner()
    }
}
