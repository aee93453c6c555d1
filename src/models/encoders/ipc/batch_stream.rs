use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use flatbuffers::FlatBufferBuilder;
use futures_core::Stream;
use minarrow::Vec64;
use tracing::debug;

use crate::enums::{IPCMessageProtocol, MessageType, WriterState};
use crate::error::{IpcError, Result};
use crate::models::encoders::ipc::protocol::{IPCFrame, IPCFrameEncoder};
use crate::models::encoders::ipc::record::{EncodedRecord, RecordEncoder};
use crate::models::encoders::ipc::schema::{
    RecordBatchMeta, build_dictionary_message, build_footer, build_record_batch_message,
    build_schema_message,
};
use crate::models::frames::ipc_message::FooterBlockMeta;
use crate::models::types::array_data::ArrayData;
use crate::models::types::concat::delta_of;
use crate::models::types::datatype::DataType;
use crate::models::types::record_batch::RecordBatch;
use crate::models::types::schema::{Metadata, Schema};
use crate::options::WriteOptions;
use crate::traits::frame_encoder::FrameEncoder;
use crate::traits::stream_buffer::StreamBuffer;

/// Pull-based Arrow IPC encoder producing frames in a standard `Vec<u8>` buffer.
///
/// See [`GBatchStreamEncoder`] for further details.
pub type BatchStreamEncoder = GBatchStreamEncoder<Vec<u8>>;

/// Pull-based Arrow IPC encoder producing frames in a SIMD-aligned `Vec64<u8>` buffer.
///
/// See [`GBatchStreamEncoder`] for further details.
pub type BatchStreamEncoder64 = GBatchStreamEncoder<Vec64<u8>>;

/// Counters for the messages an encoder has produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub num_messages: usize,
    pub num_record_batches: usize,
    pub num_dictionary_batches: usize,
    pub num_dictionary_deltas: usize,
    pub num_replaced_dictionaries: usize,
}

/// Low-level, pull-based Arrow IPC writer producing encoded frames.
///
/// Incrementally serialises [`RecordBatch`]es as IPC frames using any buffer implementing
/// [`StreamBuffer`], for both the Arrow *File* and *Stream* [IPC protocols](https://arrow.apache.org/docs/format/Columnar.html#serialization-and-interprocess-communication-ipc).
///
/// Dictionaries are discovered from the columns themselves. For every dictionary id the
/// encoder remembers the last value array it wrote and, on the next batch:
/// - writes nothing if the array is unchanged,
/// - writes a delta if the previous array is a prefix of the new one,
/// - otherwise writes a replacement (stream) or fails with
///   [`IpcError::UnsupportedDictionaryReplacement`] (file).
///
/// Encoded frames queue up in order and are handed out through [`Stream::poll_next`] or
/// [`GBatchStreamEncoder::pop_frame`]. The higher-level [`FileWriter`], [`StreamWriter`]
/// and [`GBatchSink`] wrap this type for synchronous and asynchronous byte sinks.
///
/// [`FileWriter`]: crate::models::writers::ipc::file_writer::FileWriter
/// [`StreamWriter`]: crate::models::writers::ipc::stream_writer::StreamWriter
/// [`GBatchSink`]: crate::models::sinks::batch_sink::GBatchSink
pub struct GBatchStreamEncoder<B>
where
    B: StreamBuffer + 'static,
{
    /// Arrow IPC protocol (file or stream)
    pub protocol: IPCMessageProtocol,

    /// Current state of the writer (Fresh, SchemaDone, Closed, etc)
    pub state: WriterState,

    schema: Arc<Schema>,

    options: WriteOptions,

    encoder: RecordEncoder,

    /// Last dictionary array written per id
    written_dictionaries: HashMap<i64, Arc<ArrayData>>,

    /// FlatBuffer builder instance for serialisation
    fbb: FlatBufferBuilder<'static>,

    // ----- File format only -----
    /// Block metadata for all record batches
    blocks_record_batches: Vec<FooterBlockMeta>,

    /// Block metadata for all dictionary batches
    blocks_dictionaries: Vec<FooterBlockMeta>,

    // ----- Streaming/buffering -----
    /// Queue of encoded IPC frames pending emission
    out_frames: VecDeque<B>,

    /// Total bytes encoded so far
    global_offset: usize,

    stats: WriteStats,

    /// True once the closing frame is queued
    finished: bool,

    /// Stored task waker for waking up poll_next when new data is pushed
    waker: Option<Waker>,
}

impl<B> GBatchStreamEncoder<B>
where
    B: StreamBuffer,
{
    /// Construct a new encoder for `schema`.
    ///
    /// Fails when the options name a codec that is not compiled in.
    pub fn new(schema: Arc<Schema>, protocol: IPCMessageProtocol, options: WriteOptions) -> Result<Self> {
        let encoder = RecordEncoder::new(&options)?;
        Ok(Self {
            protocol,
            state: WriterState::Fresh,
            schema,
            options,
            encoder,
            written_dictionaries: HashMap::new(),
            fbb: FlatBufferBuilder::with_capacity(4096),
            blocks_record_batches: Vec::new(),
            blocks_dictionaries: Vec::new(),
            out_frames: VecDeque::new(),
            global_offset: 0,
            stats: WriteStats::default(),
            finished: false,
            waker: None,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn stats(&self) -> WriteStats {
        self.stats
    }

    /// Bytes encoded so far, including queued frames.
    pub fn bytes_encoded(&self) -> usize {
        self.global_offset
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Takes the oldest queued frame.
    pub fn pop_frame(&mut self) -> Option<B> {
        self.out_frames.pop_front()
    }

    /// Marks the encoder unusable after its output could not be delivered.
    pub fn poison(&mut self) {
        if self.state != WriterState::Closed {
            self.state = WriterState::Failed;
        }
    }

    /// Serialises and emits the Arrow schema as the initial IPC frame.
    pub fn write_schema_frame(&mut self) -> Result<()> {
        if let Some(e) = self.state.write_error() {
            return Err(e);
        }
        if self.state == WriterState::SchemaDone {
            return Ok(());
        }
        let stream_metadata = match self.protocol {
            IPCMessageProtocol::Stream => self.options.custom_metadata.clone(),
            IPCMessageProtocol::File => Metadata::new(),
        };
        let meta = build_schema_message(
            &mut self.fbb,
            &self.schema,
            self.options.metadata_version,
            self.options.endianness,
            &stream_metadata,
        )?;
        self.emit_frame(&meta, &[], MessageType::Schema)?;
        self.state = WriterState::SchemaDone;
        Ok(())
    }

    /// Write one [`RecordBatch`], preceded by the schema and any dictionary it needs.
    ///
    /// # Errors
    /// `InvalidArgument` if the batch schema differs from the writer's, `Closed` after
    /// [`finish`](Self::finish), dictionary errors as described on the type.
    pub fn write_record_batch_frame(&mut self, batch: &RecordBatch) -> Result<()> {
        if let Some(e) = self.state.write_error() {
            return Err(e);
        }
        self.options.check_cancelled()?;
        if batch.schema.fields != self.schema.fields {
            return Err(IpcError::InvalidArgument(format!(
                "batch schema {} does not match writer schema {}",
                batch.schema, self.schema
            )));
        }
        let mut dictionaries = Vec::new();
        for column in &batch.columns {
            collect_dictionaries(column, &mut dictionaries)?;
        }
        if self.state == WriterState::Fresh {
            self.write_schema_frame()?;
        }
        for (id, values) in dictionaries {
            self.write_dictionary_frame_if_needed(id, values)?;
        }

        let record = self.encoder.encode::<B>(batch.length, &batch.columns)?;
        let meta = self.record_message(&record, None);
        self.emit_frame(&meta, record.body.as_ref(), MessageType::RecordBatch)?;
        self.stats.num_record_batches += 1;
        Ok(())
    }

    /// Writes the dictionary batch `id` needs, if any.
    fn write_dictionary_frame_if_needed(&mut self, id: i64, values: Arc<ArrayData>) -> Result<()> {
        let (payload, is_delta) = match self.written_dictionaries.get(&id) {
            None => (values.clone(), false),
            Some(prev) if Arc::ptr_eq(prev, &values) || **prev == *values => return Ok(()),
            Some(prev) => match delta_of(prev, &values) {
                Some(delta) => (Arc::new(delta), true),
                None if self.protocol == IPCMessageProtocol::File => {
                    return Err(IpcError::UnsupportedDictionaryReplacement(id));
                }
                None => (values.clone(), false),
            },
        };
        let replaced = !is_delta && self.written_dictionaries.contains_key(&id);

        let record = self.encoder.encode::<B>(payload.len, std::slice::from_ref(payload.as_ref()))?;
        let meta = self.record_message(&record, Some((id, is_delta)));
        self.emit_frame(&meta, record.body.as_ref(), MessageType::DictionaryBatch)?;
        debug!(id, len = payload.len, is_delta, replaced, "dictionary batch written");

        self.stats.num_dictionary_batches += 1;
        if is_delta {
            self.stats.num_dictionary_deltas += 1;
        }
        if replaced {
            self.stats.num_replaced_dictionaries += 1;
        }
        self.written_dictionaries.insert(id, values);
        Ok(())
    }

    fn record_message(&mut self, record: &EncodedRecord<B>, dictionary: Option<(i64, bool)>) -> Vec<u8> {
        let meta = RecordBatchMeta {
            length: record.length,
            nodes: &record.nodes,
            buffers: &record.buffers,
            variadic_counts: &record.variadic_counts,
            codec: self.encoder.codec(),
        };
        let version = self.encoder.version();
        match dictionary {
            Some((id, is_delta)) => {
                build_dictionary_message(&mut self.fbb, version, id, is_delta, &meta, record.body.len())
            }
            None => build_record_batch_message(&mut self.fbb, version, &meta, record.body.len()),
        }
    }

    /// Encodes and queues a single Arrow IPC frame.
    ///
    /// For the file protocol, the first frame carries the opening magic and every
    /// dictionary or record frame is logged as a footer block.
    fn emit_frame(&mut self, meta: &[u8], body: &[u8], message_type: MessageType) -> Result<()> {
        let is_first = self.stats.num_messages == 0;
        let frame = IPCFrame {
            meta,
            body,
            protocol: self.protocol,
            is_first,
            is_last: false,
            footer_bytes: None,
        };
        let start = self.global_offset;
        let (encoded, ipc_frame_metadata) = IPCFrameEncoder::encode::<B>(&mut self.global_offset, &frame)?;
        debug_assert_eq!(encoded.len(), ipc_frame_metadata.frame_len());

        if self.protocol == IPCMessageProtocol::File {
            let block = FooterBlockMeta {
                offset: (start + ipc_frame_metadata.magic_len) as u64,
                // yes - includes the header
                metadata_len: (ipc_frame_metadata.header_len + ipc_frame_metadata.metadata_total_len()) as u32,
                body_len: ipc_frame_metadata.body_total_len() as u64,
            };
            match message_type {
                MessageType::DictionaryBatch => self.blocks_dictionaries.push(block),
                MessageType::RecordBatch => self.blocks_record_batches.push(block),
                _ => {}
            }
        }
        debug!(
            ?message_type,
            metadata_len = ipc_frame_metadata.metadata_total_len(),
            body_len = ipc_frame_metadata.body_total_len(),
            "frame encoded"
        );
        self.stats.num_messages += 1;
        self.push_frame(encoded);
        Ok(())
    }

    fn push_frame(&mut self, frame: B) {
        self.out_frames.push_back(frame);
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }

    /// Finalise the output: the end-of-stream marker for streams, or the footer and
    /// closing magic for files.
    ///
    /// Calling it again is a no-op. After a failure, the encoder closes without a
    /// footer. A stream closed before any batch still carries its schema.
    pub fn finish(&mut self) -> Result<()> {
        match self.state {
            WriterState::Closed => return Ok(()),
            WriterState::Failed => {
                self.close();
                return Ok(());
            }
            WriterState::Fresh if self.protocol == IPCMessageProtocol::Stream => {
                self.write_schema_frame()?;
            }
            _ => {}
        }
        let footer_bytes = match self.protocol {
            IPCMessageProtocol::File => Some(build_footer(
                &mut self.fbb,
                self.options.metadata_version,
                &self.schema,
                self.options.endianness,
                &self.blocks_dictionaries,
                &self.blocks_record_batches,
                &self.options.custom_metadata,
            )?),
            IPCMessageProtocol::Stream => None,
        };
        let frame = IPCFrame {
            meta: &[],
            body: &[],
            protocol: self.protocol,
            is_first: self.stats.num_messages == 0,
            is_last: true,
            footer_bytes: footer_bytes.as_deref(),
        };
        let (closing, _) = IPCFrameEncoder::encode::<B>(&mut self.global_offset, &frame)?;
        debug!(
            records = self.blocks_record_batches.len(),
            dictionaries = self.blocks_dictionaries.len(),
            total = self.global_offset,
            "output finished"
        );
        self.push_frame(closing);
        self.close();
        Ok(())
    }

    fn close(&mut self) {
        self.state = WriterState::Closed;
        self.finished = true;
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

/// Pushes `(id, values)` for every dictionary in `arr`, nested dictionaries first.
///
/// Columns sharing an id must carry equal values within one batch; anything else is
/// `InvalidArgument` since a single dictionary batch cannot serve both.
fn collect_dictionaries(arr: &ArrayData, out: &mut Vec<(i64, Arc<ArrayData>)>) -> Result<()> {
    if let (DataType::Dictionary { id, .. }, Some(values)) = (arr.data_type.storage_type(), &arr.dictionary) {
        collect_dictionaries(values, out)?;
        match out.iter().find(|(seen, _)| seen == id) {
            None => out.push((*id, Arc::clone(values))),
            Some((_, first)) if Arc::ptr_eq(first, values) || **first == **values => {}
            Some(_) => {
                return Err(IpcError::InvalidArgument(format!(
                    "columns share dictionary id {id} but carry different values"
                )));
            }
        }
    }
    for child in &arr.children {
        collect_dictionaries(child, out)?;
    }
    Ok(())
}

impl<B> Stream for GBatchStreamEncoder<B>
where
    B: StreamBuffer + Unpin + 'static,
{
    type Item = Result<B>;

    /// Yields one frame per call, in the order they were written.
    /// Returns `None` after `finish()` has been called and all frames have been yielded.
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(frame) = this.out_frames.pop_front() {
            Poll::Ready(Some(Ok(frame)))
        } else if this.finished {
            Poll::Ready(None)
        } else {
            this.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}
