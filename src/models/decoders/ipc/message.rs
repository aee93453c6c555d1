//! # Message reading and dispatch
//!
//! - [`MessageReader`] pulls framed messages off any [`std::io::Read`], one at a time.
//! - [`StreamDecoder`] consumes messages in stream order (schema, dictionaries, records)
//!   and turns record messages into [`RecordBatch`]es. The synchronous
//!   [`StreamReader`] and the asynchronous [`GBatchStreamDecoder`] both drive one.
//!
//! [`StreamReader`]: crate::models::readers::ipc::stream_reader::StreamReader
//! [`GBatchStreamDecoder`]: crate::models::decoders::ipc::batch_stream::GBatchStreamDecoder

use std::io::{self, Read};
use std::sync::Arc;

use arrow_ipc as fb;
use minarrow::Vec64;
use tracing::{debug, warn};

use crate::constants::{
    ARROW_MAGIC_NUMBER_PADDED, CONTINUATION_SENTINEL, FILE_OPENING_MAGIC_LEN, READ_CHUNK_LEN,
};
use crate::enums::{BatchState, IPCMessageProtocol, MessageType};
use crate::error::{IpcError, Result};
use crate::models::decoders::ipc::loader::{apply_dictionary_batch, read_record_batch};
use crate::models::decoders::ipc::schema::{schema_from_fb, version_from_fb};
use crate::models::dictionary::memo::DictionaryMemo;
use crate::models::frames::ipc_message::IpcMessage;
use crate::models::types::array_data::Buffer;
use crate::models::types::datatype::{Endianness, MetadataVersion};
use crate::models::types::record_batch::RecordBatch;
use crate::models::types::schema::Schema;
use crate::options::ReadOptions;
use crate::utils::align_8;

/// Reads framed messages from a sequential byte source.
///
/// Accepts the continuation-marker framing and the legacy 4-byte prefix. Input that
/// opens with the file magic is read as the message section of a file.
pub struct MessageReader<R> {
    inner: R,
    options: ReadOptions,
    started: bool,
    finished: bool,
    /// Set once the input opened with the file magic.
    file_magic: bool,
    /// Bytes consumed so far.
    position: u64,
}

impl<R: Read> MessageReader<R> {
    pub fn new(inner: R, options: ReadOptions) -> Self {
        Self {
            inner,
            options,
            started: false,
            finished: false,
            file_magic: false,
            position: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// `File` once the input has been seen to open with the file magic, else `Stream`.
    pub fn protocol(&self) -> IPCMessageProtocol {
        if self.file_magic {
            IPCMessageProtocol::File
        } else {
            IPCMessageProtocol::Stream
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Next message, or `None` at the end-of-stream marker or a clean end of input.
    pub fn read_message(&mut self) -> Result<Option<IpcMessage>> {
        if self.finished {
            return Ok(None);
        }
        self.options.check_cancelled()?;

        let mut word = [0u8; 4];
        if !self.read_or_eof(&mut word)? {
            self.finished = true;
            return Ok(None);
        }
        if !self.started {
            self.started = true;
            if word == ARROW_MAGIC_NUMBER_PADDED[..4] {
                let mut rest = [0u8; FILE_OPENING_MAGIC_LEN - 4];
                self.read_exact(&mut rest)?;
                if rest != ARROW_MAGIC_NUMBER_PADDED[4..] {
                    return Err(IpcError::BadFraming("input starts with a damaged file magic".into()));
                }
                self.file_magic = true;
                if !self.read_or_eof(&mut word)? {
                    self.finished = true;
                    return Ok(None);
                }
            }
        }
        if u32::from_le_bytes(word) == CONTINUATION_SENTINEL {
            self.read_exact(&mut word)?;
        }
        let meta_len = i32::from_le_bytes(word);
        if meta_len < 0 {
            return Err(IpcError::BadFraming(format!("negative metadata length {meta_len}")));
        }
        if meta_len == 0 {
            self.finished = true;
            return Ok(None);
        }

        let meta_len = meta_len as usize;
        let mut metadata = Vec::with_capacity(meta_len.min(READ_CHUNK_LEN));
        let got = (&mut self.inner).take(meta_len as u64).read_to_end(&mut metadata)?;
        self.position += got as u64;
        if got < meta_len {
            return Err(IpcError::Truncated(format!(
                "message metadata declares {meta_len} bytes, input holds {got}"
            )));
        }
        let body_len = {
            let message = fb::root_as_message(&metadata)?;
            message.bodyLength()
        };
        if body_len < 0 {
            return Err(IpcError::BadFraming(format!("negative body length {body_len}")));
        }
        let body_len = body_len as usize;

        self.options.check_cancelled()?;
        // Grows with the input so a forged length cannot force one huge allocation.
        let mut body = Vec64::with_capacity(body_len.min(READ_CHUNK_LEN));
        while body.0.len() < body_len {
            let start = body.0.len();
            body.0.resize(start + (body_len - start).min(READ_CHUNK_LEN), 0);
            self.read_exact(&mut body.0[start..])?;
        }
        let pad = align_8(body_len);
        if pad > 0 {
            let mut skip = [0u8; 8];
            self.read_exact(&mut skip[..pad])?;
        }
        debug!(meta_len, body_len, position = self.position, "message read");
        Ok(Some(IpcMessage {
            metadata: Arc::from(metadata),
            body: Buffer::from_vec64(body),
        }))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Fills `buf`, or returns `false` if the input ends before its first byte.
    fn read_or_eof(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => {
                    return Err(IpcError::Truncated(format!(
                        "input ended {filled} bytes into a message prefix"
                    )));
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.position += filled as u64;
        Ok(true)
    }
}

/// Stream-order message state machine.
///
/// Feed it each message with [`StreamDecoder::decode`]; it returns a batch for every
/// record message and `None` for everything else.
#[derive(Debug)]
pub struct StreamDecoder {
    state: BatchState,
    options: ReadOptions,
    protocol: IPCMessageProtocol,
    schema: Option<Arc<Schema>>,
    memo: DictionaryMemo,
    version: MetadataVersion,
    swap: bool,
}

impl StreamDecoder {
    pub fn new(options: ReadOptions) -> Self {
        Self {
            state: BatchState::NeedSchema,
            options,
            protocol: IPCMessageProtocol::Stream,
            schema: None,
            memo: DictionaryMemo::new(),
            version: MetadataVersion::default(),
            swap: false,
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// The schema, once the schema message has been decoded.
    ///
    /// When byte swapping is active the schema reports host endianness.
    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    pub fn memo(&self) -> &DictionaryMemo {
        &self.memo
    }

    /// Metadata version of the last message decoded.
    pub fn version(&self) -> MetadataVersion {
        self.version
    }

    /// Whether record buffers are swapped to host order.
    pub fn swaps_endianness(&self) -> bool {
        self.swap
    }

    /// Input carried file framing; dictionary replacement is then refused.
    pub(crate) fn set_protocol(&mut self, protocol: IPCMessageProtocol) {
        self.protocol = protocol;
    }

    /// Marks the end of input.
    ///
    /// Fails when the schema never arrived.
    pub fn finish(&mut self) -> Result<()> {
        match self.state {
            BatchState::NeedSchema => {
                self.state = BatchState::Failed;
                Err(IpcError::Truncated("input ended before the schema message".into()))
            }
            BatchState::Failed => Err(IpcError::Poisoned),
            _ => {
                self.state = BatchState::Done;
                Ok(())
            }
        }
    }

    /// Marks the decoder unusable after a framing or byte-source error.
    pub fn poison(&mut self) {
        self.state = BatchState::Failed;
    }

    /// Processes one message.
    ///
    /// An empty metadata slice is the end-of-stream marker.
    pub fn decode(&mut self, metadata: &[u8], body: &Buffer) -> Result<Option<RecordBatch>> {
        match self.state {
            BatchState::Failed => return Err(IpcError::Poisoned),
            BatchState::Done => return Ok(None),
            _ => {}
        }
        if metadata.is_empty() {
            return self.finish().map(|_| None);
        }
        let result = self.decode_message(metadata, body);
        if let Err(e) = &result {
            if e.is_fatal() {
                self.state = BatchState::Failed;
            }
        }
        result
    }

    fn decode_message(&mut self, metadata: &[u8], body: &Buffer) -> Result<Option<RecordBatch>> {
        let message = fb::root_as_message(metadata)?;
        self.version = version_from_fb(message.version())?;
        let message_type = MessageType::from(message.header_type());
        debug!(?message_type, meta_len = metadata.len(), body_len = body.len(), "message");

        match message_type {
            MessageType::Schema => {
                if self.state != BatchState::NeedSchema {
                    return Err(IpcError::InvalidData("unexpected second schema message".into()));
                }
                let fb_schema = message
                    .header_as_schema()
                    .ok_or_else(|| IpcError::InvalidData("schema message without schema".into()))?;
                let mut schema = schema_from_fb(fb_schema)?;
                if let Some(expected) = &self.options.schema {
                    if **expected != schema {
                        return Err(IpcError::SchemaMismatch(format!(
                            "expected {expected}, found {schema}"
                        )));
                    }
                }
                self.memo = DictionaryMemo::from_schema(&schema)?;
                if self.options.ensure_native_endian && !schema.endianness.is_native() {
                    self.swap = true;
                    schema.endianness = Endianness::native();
                }
                let remaining = self.memo.num_dictionaries();
                debug!(fields = schema.fields.len(), dictionaries = remaining, swap = self.swap, "schema decoded");
                self.schema = Some(Arc::new(schema));
                self.state = if remaining == 0 {
                    BatchState::Ready
                } else {
                    BatchState::NeedDictionaries { remaining }
                };
                Ok(None)
            }
            MessageType::DictionaryBatch => {
                if self.state == BatchState::NeedSchema {
                    return Err(IpcError::InvalidData("dictionary batch before the schema".into()));
                }
                let batch = message
                    .header_as_dictionary_batch()
                    .ok_or_else(|| IpcError::InvalidData("dictionary message without batch".into()))?;
                apply_dictionary_batch(batch, body, &mut self.memo, self.version, self.swap, self.protocol)?;
                if let BatchState::NeedDictionaries { remaining } = self.state {
                    self.state = if remaining <= 1 {
                        BatchState::Ready
                    } else {
                        BatchState::NeedDictionaries { remaining: remaining - 1 }
                    };
                }
                Ok(None)
            }
            MessageType::RecordBatch => {
                let schema = match (&self.state, &self.schema) {
                    (BatchState::Ready, Some(schema)) => Arc::clone(schema),
                    (BatchState::NeedDictionaries { .. }, _) => {
                        let missing = self
                            .memo
                            .ids()
                            .into_iter()
                            .find(|id| !self.memo.has_array(*id))
                            .unwrap_or_default();
                        return Err(IpcError::MissingDictionary(missing));
                    }
                    _ => return Err(IpcError::InvalidData("record batch before the schema".into())),
                };
                let batch = message
                    .header_as_record_batch()
                    .ok_or_else(|| IpcError::InvalidData("record message without batch".into()))?;
                read_record_batch(batch, body, &schema, &self.memo, self.version, self.swap).map(Some)
            }
            MessageType::Tensor | MessageType::Unknown => {
                warn!(?message_type, "skipping unsupported message");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::models::encoders::ipc::batch_stream::BatchStreamEncoder;
    use crate::models::types::array_data::ArrayData;
    use crate::models::types::datatype::DataType;
    use crate::models::types::schema::Field;
    use crate::options::WriteOptions;

    fn stream_bytes(protocol: IPCMessageProtocol, batches: &[RecordBatch]) -> Vec<u8> {
        let schema = Arc::clone(&batches[0].schema);
        let mut enc = BatchStreamEncoder::new(schema, protocol, WriteOptions::default()).unwrap();
        for b in batches {
            enc.write_record_batch_frame(b).unwrap();
        }
        enc.finish().unwrap();
        let mut out = Vec::new();
        while let Some(frame) = enc.pop_frame() {
            out.extend_from_slice(&frame);
        }
        out
    }

    fn int_batch(values: &[i32]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
        RecordBatch::try_new(schema, vec![ArrayData::from_primitive(values)]).unwrap()
    }

    #[test]
    fn test_reader_counts_messages_then_stops() {
        let bytes = stream_bytes(IPCMessageProtocol::Stream, &[int_batch(&[1, 2, 3])]);
        let mut reader = MessageReader::new(Cursor::new(&bytes), ReadOptions::default());
        assert!(reader.read_message().unwrap().is_some());
        assert!(reader.read_message().unwrap().is_some());
        assert!(reader.read_message().unwrap().is_none());
        assert!(reader.read_message().unwrap().is_none());
        assert_eq!(reader.position(), bytes.len() as u64);
    }

    #[test]
    fn test_reader_reads_file_message_section() {
        let bytes = stream_bytes(IPCMessageProtocol::File, &[int_batch(&[7])]);
        let mut reader = MessageReader::new(Cursor::new(bytes), ReadOptions::default());
        let mut decoder = StreamDecoder::new(ReadOptions::default());
        let mut batches = Vec::new();
        while let Some(msg) = reader.read_message().unwrap() {
            if let Some(b) = decoder.decode(&msg.metadata, &msg.body).unwrap() {
                batches.push(b);
            }
        }
        assert_eq!(batches, vec![int_batch(&[7])]);
    }

    #[test]
    fn test_reader_truncated_prefix() {
        let mut reader = MessageReader::new(Cursor::new(vec![0xFF, 0xFF]), ReadOptions::default());
        assert!(matches!(reader.read_message(), Err(IpcError::Truncated(_))));
    }

    #[test]
    fn test_oversized_body_length_is_truncation() {
        let values: Vec<i32> = (0..999).collect();
        let bytes = stream_bytes(IPCMessageProtocol::Stream, &[int_batch(&values)]);
        let mut reader = MessageReader::new(Cursor::new(&bytes), ReadOptions::default());
        reader.read_message().unwrap().unwrap();
        let record_start = reader.position() as usize;
        let meta_len = u32::from_le_bytes(bytes[record_start + 4..record_start + 8].try_into().unwrap()) as usize;
        let metadata = &bytes[record_start + 8..record_start + 8 + meta_len];

        // 999 values pad to a 4000 byte body, a value no other field holds.
        let declared = fb::root_as_message(metadata).unwrap().bodyLength();
        assert_eq!(declared, 4000);
        let needle = declared.to_le_bytes();
        assert_eq!(metadata.windows(8).filter(|w| *w == needle).count(), 1);
        let at = metadata.windows(8).position(|w| w == needle).unwrap();
        let mut forged = bytes[..record_start + 8 + meta_len].to_vec();
        forged[record_start + 8 + at..record_start + 16 + at].copy_from_slice(&(1i64 << 62).to_le_bytes());
        forged.extend_from_slice(&[0u8; 16]);

        let mut reader = MessageReader::new(Cursor::new(forged), ReadOptions::default());
        reader.read_message().unwrap().unwrap();
        assert!(matches!(reader.read_message(), Err(IpcError::Truncated(_))));
    }

    #[test]
    fn test_oversized_metadata_length_is_truncation() {
        let mut bytes = CONTINUATION_SENTINEL.to_le_bytes().to_vec();
        bytes.extend_from_slice(&i32::MAX.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 32]);
        let mut reader = MessageReader::new(Cursor::new(bytes), ReadOptions::default());
        assert!(matches!(reader.read_message(), Err(IpcError::Truncated(_))));
    }

    #[test]
    fn test_record_before_schema_is_rejected() {
        let bytes = stream_bytes(IPCMessageProtocol::Stream, &[int_batch(&[1])]);
        let mut reader = MessageReader::new(Cursor::new(bytes), ReadOptions::default());
        let _schema = reader.read_message().unwrap().unwrap();
        let record = reader.read_message().unwrap().unwrap();
        let mut decoder = StreamDecoder::new(ReadOptions::default());
        assert!(matches!(
            decoder.decode(&record.metadata, &record.body),
            Err(IpcError::InvalidData(_))
        ));
    }

    #[test]
    fn test_expected_schema_mismatch() {
        let bytes = stream_bytes(IPCMessageProtocol::Stream, &[int_batch(&[1])]);
        let other = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, true)]));
        let mut reader = MessageReader::new(Cursor::new(bytes), ReadOptions::default());
        let schema_msg = reader.read_message().unwrap().unwrap();
        let mut decoder = StreamDecoder::new(ReadOptions::default().with_schema(other));
        assert!(matches!(
            decoder.decode(&schema_msg.metadata, &schema_msg.body),
            Err(IpcError::SchemaMismatch(_))
        ));
    }
}
