//! # Random-access file reader
//!
//! Reads the IPC file format from any [`ReadAt`] source. The footer is parsed once on open
//! and every dictionary block is applied to the memo; after that the reader only needs
//! `&self` to decode a record, so distinct records can be decoded from several threads.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow_ipc as fb;
use minarrow::Vec64;
use tracing::debug;

use crate::constants::{
    ARROW_MAGIC_NUMBER, CONTINUATION_SENTINEL, FILE_CLOSING_MAGIC_LEN, FILE_OPENING_MAGIC_LEN,
    FOOTER_SIZE_PREFIX, IPC_ALIGNMENT, MIN_FILE_LEN,
};
use crate::enums::IPCMessageProtocol;
use crate::error::{IpcError, Result};
use crate::models::decoders::ipc::loader::{apply_dictionary_batch, read_record_batch};
use crate::models::decoders::ipc::schema::{metadata_from_fb, schema_from_fb, version_from_fb};
use crate::models::dictionary::memo::DictionaryMemo;
use crate::models::frames::ipc_message::{FooterBlockMeta, IpcMessage};
use crate::models::types::array_data::Buffer;
use crate::models::types::datatype::{Endianness, MetadataVersion};
use crate::models::types::record_batch::RecordBatch;
use crate::models::types::schema::{Metadata, Schema};
use crate::options::ReadOptions;
use crate::traits::read_at::ReadAt;

/// Reader for the Arrow IPC file format.
///
/// ```ignore
/// let reader = FileReader::open("data.arrow", ReadOptions::default())?;
/// for i in 0..reader.num_records() {
///     let batch = reader.read_record(i)?;
///     println!("{} rows", batch.num_rows());
/// }
/// ```
pub struct FileReader<R> {
    source: R,
    options: ReadOptions,
    schema: Arc<Schema>,
    version: MetadataVersion,
    custom_metadata: Metadata,
    dictionary_blocks: Vec<FooterBlockMeta>,
    record_blocks: Vec<FooterBlockMeta>,
    memo: DictionaryMemo,
    swap: bool,
    /// Slot filled by [`FileReader::record`].
    current: Option<RecordBatch>,
}

impl FileReader<File> {
    /// Opens a file on disk.
    pub fn open(path: impl AsRef<Path>, options: ReadOptions) -> Result<Self> {
        Self::try_new(File::open(path)?, options)
    }
}

impl<R: ReadAt> FileReader<R> {
    /// Parses the footer and loads every dictionary.
    pub fn try_new(source: R, options: ReadOptions) -> Result<Self> {
        options.check_cancelled()?;
        let size = source.size()?;
        if size < MIN_FILE_LEN as u64 {
            return Err(IpcError::NotArrowFile(format!("{size} bytes is too short for an Arrow file")));
        }

        let mut opening = [0u8; FILE_CLOSING_MAGIC_LEN];
        source.read_exact_at(0, &mut opening)?;
        let mut trailer = [0u8; FOOTER_SIZE_PREFIX + FILE_CLOSING_MAGIC_LEN];
        let trailer_start = size - trailer.len() as u64;
        source.read_exact_at(trailer_start, &mut trailer)?;
        if trailer[FOOTER_SIZE_PREFIX..] != *ARROW_MAGIC_NUMBER {
            return Err(IpcError::NotArrowFile("missing closing magic".into()));
        }
        if opening != *ARROW_MAGIC_NUMBER {
            return Err(IpcError::NotArrowFile("missing opening magic".into()));
        }

        let footer_len = i32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let max_footer = trailer_start - FILE_OPENING_MAGIC_LEN as u64;
        if footer_len <= 0 || footer_len as u64 > max_footer {
            return Err(IpcError::InconsistentFileMetadata(format!(
                "footer length {footer_len} out of range (file is {size} bytes)"
            )));
        }
        let footer_start = trailer_start - footer_len as u64;
        let mut footer_bytes = vec![0u8; footer_len as usize];
        options.check_cancelled()?;
        source.read_exact_at(footer_start, &mut footer_bytes)?;

        let footer = fb::root_as_footer(&footer_bytes)?;
        let version = version_from_fb(footer.version())?;
        let fb_schema = footer
            .schema()
            .ok_or_else(|| IpcError::InconsistentFileMetadata("footer has no schema".into()))?;
        let mut schema = schema_from_fb(fb_schema)?;
        if let Some(expected) = &options.schema {
            if **expected != schema {
                return Err(IpcError::SchemaMismatch(format!("expected {expected}, found {schema}")));
            }
        }
        let custom_metadata = metadata_from_fb(footer.custom_metadata());
        let blocks = |list: Option<flatbuffers::Vector<'_, fb::Block>>| -> Result<Vec<FooterBlockMeta>> {
            list.map(|v| v.iter().map(|b| check_block(b, footer_start)).collect())
                .unwrap_or_else(|| Ok(Vec::new()))
        };
        let dictionary_blocks = blocks(footer.dictionaries())?;
        let record_blocks = blocks(footer.recordBatches())?;
        debug!(
            dictionaries = dictionary_blocks.len(),
            records = record_blocks.len(),
            footer_len,
            "footer parsed"
        );

        let memo = DictionaryMemo::from_schema(&schema)?;
        let swap = options.ensure_native_endian && !schema.endianness.is_native();
        if swap {
            schema.endianness = Endianness::native();
        }

        let mut reader = Self {
            source,
            options,
            schema: Arc::new(schema),
            version,
            custom_metadata,
            dictionary_blocks,
            record_blocks,
            memo,
            swap,
            current: None,
        };
        reader.load_dictionaries()?;
        Ok(reader)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Metadata version declared by the footer.
    pub fn version(&self) -> MetadataVersion {
        self.version
    }

    /// Custom metadata carried by the footer.
    pub fn custom_metadata(&self) -> &Metadata {
        &self.custom_metadata
    }

    pub fn num_records(&self) -> usize {
        self.record_blocks.len()
    }

    pub fn num_dictionaries(&self) -> usize {
        self.dictionary_blocks.len()
    }

    pub fn dictionaries(&self) -> &DictionaryMemo {
        &self.memo
    }

    pub fn get_ref(&self) -> &R {
        &self.source
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    /// Decodes record `i` into the reader's slot and borrows it.
    ///
    /// The slot is replaced by the next call; clone the batch to keep it.
    pub fn record(&mut self, i: usize) -> Result<&RecordBatch> {
        let batch = self.read_record(i)?;
        Ok(self.current.insert(batch))
    }

    /// Decodes record `i` into an owned batch.
    pub fn read_record(&self, i: usize) -> Result<RecordBatch> {
        let block = *self.record_blocks.get(i).ok_or_else(|| {
            IpcError::InvalidArgument(format!("record {i} out of range ({} records)", self.num_records()))
        })?;
        let msg = self.read_block(block)?;
        let message = msg.header()?;
        let version = version_from_fb(message.version())?;
        let batch = message.header_as_record_batch().ok_or_else(|| {
            IpcError::InvalidData(format!("block {i} is not a record batch message"))
        })?;
        read_record_batch(batch, &msg.body, &self.schema, &self.memo, version, self.swap)
    }

    /// Iterates over every record in file order.
    pub fn batches(&self) -> impl Iterator<Item = Result<RecordBatch>> + '_ {
        (0..self.num_records()).map(move |i| self.read_record(i))
    }

    fn load_dictionaries(&mut self) -> Result<()> {
        for (i, block) in self.dictionary_blocks.iter().enumerate() {
            let msg = self.read_block(*block)?;
            let message = msg.header()?;
            let version = version_from_fb(message.version())?;
            let batch = message.header_as_dictionary_batch().ok_or_else(|| {
                IpcError::InvalidData(format!("dictionary block {i} is not a dictionary message"))
            })?;
            apply_dictionary_batch(
                batch,
                &msg.body,
                &mut self.memo,
                version,
                self.swap,
                IPCMessageProtocol::File,
            )?;
        }
        Ok(())
    }

    /// Reads the framed message a footer block points at.
    fn read_block(&self, block: FooterBlockMeta) -> Result<IpcMessage> {
        self.options.check_cancelled()?;
        let mut metadata = vec![0u8; block.metadata_len as usize];
        self.source.read_exact_at(block.offset, &mut metadata)?;
        if metadata.len() < 4 {
            return Err(IpcError::BadFraming("block too short for a length prefix".into()));
        }
        let prefix = if u32::from_le_bytes([metadata[0], metadata[1], metadata[2], metadata[3]])
            == CONTINUATION_SENTINEL
        {
            8
        } else {
            4
        };
        if metadata.len() < prefix {
            return Err(IpcError::BadFraming("block too short for a length prefix".into()));
        }
        let len_at = prefix - 4;
        let meta_len = i32::from_le_bytes([
            metadata[len_at],
            metadata[len_at + 1],
            metadata[len_at + 2],
            metadata[len_at + 3],
        ]);
        if meta_len <= 0 || prefix + meta_len as usize > metadata.len() {
            return Err(IpcError::BadFraming(format!(
                "message length {meta_len} does not fit block metadata length {}",
                block.metadata_len
            )));
        }
        metadata.truncate(prefix + meta_len as usize);
        metadata.drain(..prefix);

        let body_len = block.body_len as usize;
        let mut body = Vec64::with_capacity(body_len);
        body.0.resize(body_len, 0);
        self.source
            .read_exact_at(block.offset + block.metadata_len as u64, &mut body.0[..])?;
        Ok(IpcMessage {
            metadata: Arc::from(metadata),
            body: Buffer::from_vec64(body),
        })
    }
}

/// Validates one footer block against alignment and the footer position.
fn check_block(block: &fb::Block, footer_start: u64) -> Result<FooterBlockMeta> {
    let (offset, metadata_len, body_len) = (block.offset(), block.metaDataLength(), block.bodyLength());
    let align = IPC_ALIGNMENT as i64;
    if offset < 0 || metadata_len <= 0 || body_len < 0 {
        return Err(IpcError::InconsistentFileMetadata(format!(
            "negative block ({offset}, {metadata_len}, {body_len})"
        )));
    }
    if offset % align != 0 || metadata_len as i64 % align != 0 || body_len % align != 0 {
        return Err(IpcError::InconsistentFileMetadata(format!(
            "unaligned block ({offset}, {metadata_len}, {body_len})"
        )));
    }
    let end = offset as u64 + metadata_len as u64 + body_len as u64;
    if end > footer_start {
        return Err(IpcError::InconsistentFileMetadata(format!(
            "block ends at {end}, past the footer at {footer_start}"
        )));
    }
    Ok(FooterBlockMeta {
        offset: offset as u64,
        metadata_len: metadata_len as u32,
        body_len: body_len as u64,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::models::types::array_data::ArrayData;
    use crate::models::types::datatype::DataType;
    use crate::models::types::schema::Field;
    use crate::models::writers::ipc::file_writer::FileWriter;
    use crate::options::WriteOptions;
    use crate::test_helpers::{all_types_batch, roundtrip_file, roundtrip_stream};

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]))
    }

    fn write_file(batches: &[RecordBatch], options: WriteOptions) -> Vec<u8> {
        let mut w = FileWriter::try_new(Cursor::new(Vec::new()), schema(), options).unwrap();
        for b in batches {
            w.write(b).unwrap();
        }
        w.finish().unwrap();
        w.into_inner().unwrap().into_inner()
    }

    #[test]
    fn test_random_access_and_slot() {
        let b0 = RecordBatch::try_new(schema(), vec![ArrayData::from_primitive(&[1i32, 2, 3])]).unwrap();
        let b1 = RecordBatch::try_new(schema(), vec![ArrayData::from_options(&[Some(10i32), None])]).unwrap();
        let bytes = write_file(&[b0.clone(), b1.clone()], WriteOptions::default());

        let mut r = FileReader::try_new(bytes, ReadOptions::default()).unwrap();
        assert_eq!(r.num_records(), 2);
        assert_eq!(r.num_dictionaries(), 0);
        assert_eq!(r.read_record(1).unwrap(), b1);
        assert_eq!(r.record(0).unwrap(), &b0);
        assert!(matches!(r.read_record(2), Err(IpcError::InvalidArgument(_))));
    }

    #[test]
    fn test_footer_custom_metadata() {
        let mut md = Metadata::new();
        md.insert("origin".into(), "unit-test".into());
        let bytes = write_file(&[], WriteOptions::default().with_custom_metadata(md.clone()));
        let r = FileReader::try_new(bytes, ReadOptions::default()).unwrap();
        assert_eq!(r.num_records(), 0);
        assert_eq!(r.custom_metadata(), &md);
        assert_eq!(r.version(), MetadataVersion::V5);
    }

    #[test]
    fn test_not_an_arrow_file() {
        let err = FileReader::try_new(vec![0u8; 64], ReadOptions::default()).err().unwrap();
        assert!(matches!(err, IpcError::NotArrowFile(_)));
        let err = FileReader::try_new(b"ARROW1".to_vec(), ReadOptions::default()).err().unwrap();
        assert!(matches!(err, IpcError::NotArrowFile(_)));
    }

    #[test]
    fn test_footer_length_out_of_range() {
        let mut bytes = write_file(&[], WriteOptions::default());
        let at = bytes.len() - 10;
        bytes[at..at + 4].copy_from_slice(&i32::MAX.to_le_bytes());
        let err = FileReader::try_new(bytes, ReadOptions::default()).err().unwrap();
        assert!(matches!(err, IpcError::InconsistentFileMetadata(_)));
    }

    #[test]
    fn test_unaligned_block_rejected() {
        let footer_start = 1024;
        let ok = fb::Block::new(8, 16, 24);
        assert!(check_block(&ok, footer_start).is_ok());
        let bad = fb::Block::new(12, 16, 24);
        assert!(matches!(
            check_block(&bad, footer_start),
            Err(IpcError::InconsistentFileMetadata(_))
        ));
        let past = fb::Block::new(1000, 16, 24);
        assert!(matches!(
            check_block(&past, footer_start),
            Err(IpcError::InconsistentFileMetadata(_))
        ));
    }

    #[test]
    fn test_all_types_roundtrip() {
        let batch = all_types_batch();
        let got = roundtrip_file(&[batch.clone(), batch.slice(1, 2)], WriteOptions::default(), ReadOptions::default())
            .unwrap();
        assert_eq!(got, vec![batch.clone(), batch.slice(1, 2)]);
        let got = roundtrip_stream(&[batch.clone()], WriteOptions::default(), ReadOptions::default()).unwrap();
        assert_eq!(got, vec![batch]);
    }

    #[test]
    fn test_opposite_endian_file_is_transparent() {
        let batch = all_types_batch();
        let write = WriteOptions::default().with_endianness(Endianness::native().flip());
        let read = ReadOptions::default().with_ensure_native_endian(true);
        let got = roundtrip_file(&[batch.clone()], write, read).unwrap();
        assert_eq!(got, vec![batch]);
    }
}
