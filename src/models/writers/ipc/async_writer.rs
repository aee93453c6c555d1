//! # Async batch writer
//!
//! High-level async methods over a [`GBatchSink`], plus helpers that write a set of
//! batches to a file on disk.

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::sink::SinkExt;
use minarrow::Vec64;
use tokio::fs::File;
use tokio::io::AsyncWrite;

use crate::enums::IPCMessageProtocol;
use crate::error::{IpcError, Result};
use crate::models::encoders::ipc::batch_stream::WriteStats;
use crate::models::sinks::batch_sink::GBatchSink;
use crate::models::types::record_batch::RecordBatch;
use crate::models::types::schema::Schema;
use crate::options::WriteOptions;

/// Async writer for record batches over any [`AsyncWrite`].
///
/// Writes with 64-byte buffer padding; readers accept any multiple of 8.
pub struct AsyncBatchWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    sink: GBatchSink<W, Vec64<u8>>,
}

impl<W> AsyncBatchWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        destination: W,
        schema: Arc<Schema>,
        protocol: IPCMessageProtocol,
        options: WriteOptions,
    ) -> Result<Self> {
        Ok(Self {
            sink: GBatchSink::new(destination, schema, protocol, options)?,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.sink.schema()
    }

    pub fn protocol(&self) -> IPCMessageProtocol {
        self.sink.protocol()
    }

    pub fn stats(&self) -> WriteStats {
        self.sink.stats()
    }

    /// Writes one batch and flushes it to the destination.
    pub async fn write(&mut self, batch: RecordBatch) -> Result<()> {
        SinkExt::send(&mut self.sink, batch).await
    }

    /// Writes every batch, then closes the output.
    pub async fn write_all<I>(&mut self, batches: I) -> Result<()>
    where
        I: IntoIterator<Item = RecordBatch>,
    {
        let mut sink = Pin::new(&mut self.sink);
        for batch in batches {
            SinkExt::feed(&mut sink, batch).await?;
        }
        SinkExt::close(&mut sink).await
    }

    /// Writes the end-of-stream marker or footer and shuts the destination down.
    ///
    /// Calling it again is a no-op.
    pub async fn finish(&mut self) -> Result<()> {
        SinkExt::close(&mut self.sink).await
    }

    pub fn into_inner(self) -> W {
        self.sink.into_inner()
    }
}

/// Writes `batches` to `path` in the IPC file format.
pub async fn write_batches_to_file(
    path: impl AsRef<Path>,
    batches: &[RecordBatch],
    options: WriteOptions,
) -> Result<()> {
    let schema = batches
        .first()
        .map(|b| Arc::clone(&b.schema))
        .ok_or_else(|| IpcError::InvalidArgument("no batches to write; pass a schema instead".into()))?;
    write_file_with_schema(path, schema, batches, options).await
}

/// Writes `batches` to `path` in the IPC file format, producing a valid file even when
/// `batches` is empty.
pub async fn write_file_with_schema(
    path: impl AsRef<Path>,
    schema: Arc<Schema>,
    batches: &[RecordBatch],
    options: WriteOptions,
) -> Result<()> {
    let file = File::create(path).await?;
    let mut writer = AsyncBatchWriter::new(file, schema, IPCMessageProtocol::File, options)?;
    writer.write_all(batches.iter().cloned()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::readers::ipc::file_reader::FileReader;
    use crate::models::types::array_data::ArrayData;
    use crate::models::types::datatype::DataType;
    use crate::models::types::schema::Field;
    use crate::options::ReadOptions;

    #[tokio::test]
    async fn test_write_batches_to_file_roundtrip() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![
                ArrayData::from_primitive(&[1i64, 2, 3]),
                ArrayData::from_str_options(&[Some("a"), None, Some("c")]),
            ],
        )
        .unwrap();
        let tmp = tempfile::NamedTempFile::new().unwrap();
        write_batches_to_file(tmp.path(), &[batch.clone(), batch.clone()], WriteOptions::default())
            .await
            .unwrap();

        let r = FileReader::open(tmp.path(), ReadOptions::default()).unwrap();
        assert_eq!(r.num_records(), 2);
        for got in r.batches() {
            assert_eq!(got.unwrap(), batch);
        }
    }

    #[tokio::test]
    async fn test_empty_batches_need_a_schema() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let err = write_batches_to_file(tmp.path(), &[], WriteOptions::default()).await.unwrap_err();
        assert!(matches!(err, IpcError::InvalidArgument(_)));
    }
}
