//! # Array loader
//!
//! Rebuilds [`ArrayData`] from a record batch or dictionary batch message.
//!
//! The message carries two flat lists that mirror a pre-order walk of the schema: one
//! field node `(length, null_count)` per array, and one buffer descriptor
//! `(offset, length)` per wire buffer slot. The loader walks the schema the same way,
//! consuming nodes and descriptors as each type's layout dictates. Buffers are zero-copy
//! slices of the message body unless they are compressed or byte-swapped.

use std::sync::Arc;

use arrow_ipc as fb;
use flatbuffers::Vector;
use tracing::{debug, trace};

use crate::compression::{CompressionCodec, decode_buffer};
use crate::constants::{IPC_ALIGNMENT, MAX_NESTING_DEPTH};
use crate::enums::{DictionaryUpdate, IPCMessageProtocol};
use crate::error::{IpcError, Result};
use crate::models::dictionary::memo::DictionaryMemo;
use crate::models::endian::{SwapDirection, swap_buffers};
use crate::models::types::array_data::{ArrayData, Buffer, Layout};
use crate::models::types::datatype::{DataType, MetadataVersion, UnionMode};
use crate::models::types::record_batch::RecordBatch;
use crate::models::types::schema::{FieldPosition, Schema};

/// Cursor over the nodes and buffer descriptors of one message.
pub(crate) struct ArrayLoader<'a> {
    nodes: Vector<'a, fb::FieldNode>,
    buffers: Vector<'a, fb::Buffer>,
    variadic_counts: Option<Vector<'a, i64>>,
    node_index: usize,
    buffer_index: usize,
    variadic_index: usize,
    body: &'a Buffer,
    codec: CompressionCodec,
    version: MetadataVersion,
    memo: &'a DictionaryMemo,
    swap: bool,
}

impl<'a> ArrayLoader<'a> {
    pub(crate) fn new(
        batch: fb::RecordBatch<'a>,
        body: &'a Buffer,
        memo: &'a DictionaryMemo,
        version: MetadataVersion,
        swap: bool,
    ) -> Result<Self> {
        let nodes = batch
            .nodes()
            .ok_or_else(|| IpcError::InvalidData("record batch has no field nodes".into()))?;
        let buffers = batch
            .buffers()
            .ok_or_else(|| IpcError::InvalidData("record batch has no buffer descriptors".into()))?;
        let codec = match batch.compression() {
            None => CompressionCodec::None,
            Some(compression) => {
                if compression.method() != fb::BodyCompressionMethod::BUFFER {
                    return Err(IpcError::UnknownCodec(format!(
                        "body compression method {}",
                        compression.method().0
                    )));
                }
                CompressionCodec::from_fb(compression.codec())?
            }
        };
        Ok(Self {
            nodes,
            buffers,
            variadic_counts: batch.variadicBufferCounts(),
            node_index: 0,
            buffer_index: 0,
            variadic_index: 0,
            body,
            codec,
            version,
            memo,
            swap,
        })
    }

    fn next_node(&mut self) -> Result<(usize, usize)> {
        if self.node_index >= self.nodes.len() {
            return Err(IpcError::InvalidData(format!(
                "message has {} field nodes, the schema needs more",
                self.nodes.len()
            )));
        }
        let node = self.nodes.get(self.node_index);
        self.node_index += 1;
        let len = usize::try_from(node.length())
            .map_err(|_| IpcError::InvalidData(format!("negative field length {}", node.length())))?;
        let null_count = usize::try_from(node.null_count())
            .map_err(|_| IpcError::InvalidData(format!("negative null count {}", node.null_count())))?;
        Ok((len, null_count))
    }

    /// Resolves the next buffer descriptor against the body, decompressing if needed.
    fn next_buffer(&mut self) -> Result<Buffer> {
        if self.buffer_index >= self.buffers.len() {
            return Err(IpcError::InvalidData(format!(
                "message has {} buffers, the schema needs more",
                self.buffers.len()
            )));
        }
        let desc = self.buffers.get(self.buffer_index);
        let index = self.buffer_index;
        self.buffer_index += 1;

        let (offset, length) = (desc.offset(), desc.length());
        if offset < 0 || length < 0 {
            return Err(IpcError::InvalidData(format!(
                "buffer {index} has negative offset {offset} or length {length}"
            )));
        }
        if offset % IPC_ALIGNMENT as i64 != 0 {
            return Err(IpcError::BadAlignment {
                what: "buffer offset",
                value: offset,
            });
        }
        let region = self.body.slice(offset as usize, length as usize).ok_or_else(|| {
            IpcError::Truncated(format!(
                "buffer {index} at {offset}+{length} runs past the {}-byte body",
                self.body.len()
            ))
        })?;
        trace!(index, offset, length, codec = self.codec.name(), "buffer");
        match self.codec {
            CompressionCodec::None => Ok(region),
            codec => decode_buffer(&region, codec),
        }
    }

    /// Validity slot; dropped when the node reports no nulls.
    fn next_validity(&mut self, len: usize, null_count: usize) -> Result<Option<Buffer>> {
        let bitmap = self.next_buffer()?;
        if null_count == 0 {
            return Ok(None);
        }
        if bitmap.is_empty() {
            return Err(IpcError::InvalidData(format!(
                "array of {len} with {null_count} nulls has no validity bitmap"
            )));
        }
        Ok(Some(bitmap))
    }

    fn next_variadic_count(&mut self) -> Result<usize> {
        let counts = self
            .variadic_counts
            .ok_or_else(|| IpcError::InvalidData("view array without variadic buffer counts".into()))?;
        if self.variadic_index >= counts.len() {
            return Err(IpcError::InvalidData("too few variadic buffer counts".into()));
        }
        let n = counts.get(self.variadic_index);
        self.variadic_index += 1;
        usize::try_from(n).map_err(|_| IpcError::InvalidData(format!("negative variadic buffer count {n}")))
    }

    /// Loads one array of type `data_type` and its children.
    pub(crate) fn load(&mut self, data_type: &DataType, position: FieldPosition, depth: usize) -> Result<ArrayData> {
        if depth > MAX_NESTING_DEPTH {
            return Err(IpcError::NestingDepthExceeded(MAX_NESTING_DEPTH));
        }
        let (len, null_count) = self.next_node()?;
        let layout = Layout::of(data_type)?;
        let legacy_validity = self.version < MetadataVersion::V5;

        let mut buffers = Vec::with_capacity(layout.fixed_slots());
        match layout {
            Layout::Null => {}
            Layout::Boolean | Layout::FixedWidth(_) | Layout::Dictionary { .. } => {
                buffers.push(self.next_validity(len, null_count)?);
                buffers.push(Some(self.next_buffer()?));
            }
            Layout::VarBinary { .. } | Layout::ListView { .. } => {
                buffers.push(self.next_validity(len, null_count)?);
                buffers.push(Some(self.next_buffer()?));
                buffers.push(Some(self.next_buffer()?));
            }
            Layout::View => {
                buffers.push(self.next_validity(len, null_count)?);
                buffers.push(Some(self.next_buffer()?));
                for _ in 0..self.next_variadic_count()? {
                    buffers.push(Some(self.next_buffer()?));
                }
            }
            Layout::List { .. } => {
                buffers.push(self.next_validity(len, null_count)?);
                buffers.push(Some(self.next_buffer()?));
            }
            Layout::FixedSizeList(_) | Layout::Struct => {
                buffers.push(self.next_validity(len, null_count)?);
            }
            Layout::Union(mode) => {
                if legacy_validity && !self.next_buffer()?.is_empty() {
                    return Err(IpcError::InvalidData(
                        "unions with a top-level validity bitmap are not supported".into(),
                    ));
                }
                buffers.push(Some(self.next_buffer()?));
                if mode == UnionMode::Dense {
                    buffers.push(Some(self.next_buffer()?));
                }
            }
            Layout::RunEndEncoded => {
                if legacy_validity {
                    self.next_buffer()?;
                }
            }
        }

        let fields = data_type.children();
        let mut children = Vec::with_capacity(fields.len());
        for (j, field) in fields.iter().enumerate() {
            children.push(self.load(&field.data_type, position.child(j), depth + 1)?);
        }

        let mut arr = ArrayData {
            data_type: data_type.clone(),
            len,
            null_count: 0,
            offset: 0,
            buffers,
            children,
            dictionary: None,
        };
        // Before the dictionary is attached: memo arrays are already in host order.
        if self.swap {
            swap_buffers(&mut arr, SwapDirection::ToNative)?;
        }
        if let DataType::Dictionary { id, .. } = data_type.storage_type() {
            let id = self.memo.id_for_position(&position).unwrap_or(*id);
            let values = self.memo.get_array(id).ok_or(IpcError::MissingDictionary(id))?;
            arr.dictionary = Some(Arc::clone(values));
        }
        arr.null_count = arr.compute_null_count();
        Ok(arr)
    }
}

/// Decodes a record batch message against `schema`.
pub(crate) fn read_record_batch(
    batch: fb::RecordBatch<'_>,
    body: &Buffer,
    schema: &Arc<Schema>,
    memo: &DictionaryMemo,
    version: MetadataVersion,
    swap: bool,
) -> Result<RecordBatch> {
    let length = usize::try_from(batch.length())
        .map_err(|_| IpcError::InvalidData(format!("negative record length {}", batch.length())))?;
    let mut loader = ArrayLoader::new(batch, body, memo, version, swap)?;
    let mut columns = Vec::with_capacity(schema.fields.len());
    for (i, field) in schema.fields.iter().enumerate() {
        let column = loader.load(&field.data_type, FieldPosition::root().child(i), 1)?;
        column.validate()?;
        columns.push(column);
    }
    RecordBatch::try_new_with_length(Arc::clone(schema), columns, length).map_err(|e| match e {
        IpcError::InvalidArgument(msg) => IpcError::InvalidData(msg),
        other => other,
    })
}

/// Decodes the values array of a dictionary batch.
///
/// Returns the id, the values and whether they are a delta.
pub(crate) fn read_dictionary_batch(
    batch: fb::DictionaryBatch<'_>,
    body: &Buffer,
    memo: &DictionaryMemo,
    version: MetadataVersion,
    swap: bool,
) -> Result<(i64, ArrayData, bool)> {
    let id = batch.id();
    let value_type = memo.get_type(id).ok_or_else(|| {
        IpcError::InvalidData(format!("dictionary batch for id {id}, which no schema field references"))
    })?;
    let data = batch
        .data()
        .ok_or_else(|| IpcError::InvalidData(format!("dictionary batch {id} has no data")))?;
    let position = memo
        .positions_for_id(id)
        .first()
        .cloned()
        .unwrap_or_default();
    let mut loader = ArrayLoader::new(data, body, memo, version, swap)?;
    let values = loader.load(value_type, position, 1)?;
    values.validate()?;
    Ok((id, values, batch.isDelta()))
}

/// Decodes a dictionary batch message and applies it to `memo`.
///
/// Files may only add or extend dictionaries; a replacement fails with
/// [`IpcError::UnsupportedReplacementInFile`].
pub(crate) fn apply_dictionary_batch(
    batch: fb::DictionaryBatch<'_>,
    body: &Buffer,
    memo: &mut DictionaryMemo,
    version: MetadataVersion,
    swap: bool,
    protocol: IPCMessageProtocol,
) -> Result<DictionaryUpdate> {
    let (id, values, is_delta) = read_dictionary_batch(batch, body, memo, version, swap)?;
    if protocol == IPCMessageProtocol::File && !is_delta && memo.has_array(id) {
        return Err(IpcError::UnsupportedReplacementInFile(id));
    }
    let len = values.len;
    let update = memo.apply(id, values, is_delta)?;
    debug!(id, ?update, len, "dictionary batch applied");
    Ok(update)
}
