//! # Record encoder
//!
//! Turns a set of columns into the `(nodes, buffers, body)` triple of a record batch or
//! dictionary batch message.
//!
//! Encoding runs in three passes:
//! 1. walk every column pre-order, emitting one field node per array and one raw piece
//!    per buffer slot, with sliced arrays rebased so that offsets start at zero;
//! 2. compress the pieces, on a worker pool when more than one thread is configured;
//! 3. lay the pieces out in the body, each padded to the stream buffer's alignment.
//!
//! Pieces are [`Buffer`] views wherever the input can be written as-is, so an unsliced,
//! uncompressed column is copied exactly once, into the body.

use arrow_ipc as fb;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::trace;

use crate::compression::{CompressionCodec, encode_buffer};
use crate::constants::DEFAULT_FRAME_ALLOCATION_SIZE;
use crate::error::{IpcError, Result};
use crate::models::endian::{SwapDirection, element_pattern, swap_groups, swap_views};
use crate::models::types::array_data::{ArrayData, Buffer, Layout, VIEW_LEN, read_offset, run_end_at};
use crate::models::types::datatype::{DataType, Endianness, MetadataVersion, UnionMode};
use crate::options::WriteOptions;
use crate::traits::stream_buffer::StreamBuffer;
use crate::utils::{align_to, bytes_for_bits, copy_bits};

/// Nodes, buffer descriptors and body of one encoded batch.
#[derive(Debug)]
pub struct EncodedRecord<B: StreamBuffer> {
    pub length: usize,
    pub nodes: Vec<fb::FieldNode>,
    pub buffers: Vec<fb::Buffer>,
    pub variadic_counts: Vec<i64>,
    pub body: B,
}

/// Column encoder configured from [`WriteOptions`].
pub struct RecordEncoder {
    codec: CompressionCodec,
    min_space_savings: Option<f64>,
    version: MetadataVersion,
    endianness: Endianness,
    pool: Option<ThreadPool>,
}

#[derive(Default)]
struct Collected {
    nodes: Vec<fb::FieldNode>,
    pieces: Vec<Buffer>,
    variadic_counts: Vec<i64>,
}

impl RecordEncoder {
    pub fn new(options: &WriteOptions) -> Result<Self> {
        options.validate()?;
        let pool = if options.codec != CompressionCodec::None && options.compress_concurrency > 1 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(options.compress_concurrency)
                .thread_name(|i| format!("arrowpipe-compress-{i}"))
                .build()
                .map_err(|e| IpcError::InvalidArgument(format!("compression pool: {e}")))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            codec: options.codec,
            min_space_savings: options.min_space_savings,
            version: options.metadata_version,
            endianness: options.endianness,
            pool,
        })
    }

    pub fn codec(&self) -> CompressionCodec {
        self.codec
    }

    pub fn version(&self) -> MetadataVersion {
        self.version
    }

    /// Encodes `columns` as one batch of `length` rows.
    pub fn encode<B: StreamBuffer>(&self, length: usize, columns: &[ArrayData]) -> Result<EncodedRecord<B>> {
        let mut collected = Collected::default();
        for column in columns {
            column.validate()?;
            self.collect(column, &mut collected)?;
        }
        let Collected {
            nodes,
            pieces,
            variadic_counts,
        } = collected;

        let mut body = B::with_capacity(DEFAULT_FRAME_ALLOCATION_SIZE);
        let mut buffers = Vec::with_capacity(pieces.len());
        if self.codec == CompressionCodec::None {
            for piece in &pieces {
                buffers.push(push_buffer(&mut body, piece));
            }
        } else {
            for framed in self.compress(&pieces)? {
                buffers.push(push_buffer(&mut body, &framed));
            }
        }
        trace!(
            length,
            nodes = nodes.len(),
            buffers = buffers.len(),
            body = body.len(),
            "record encoded"
        );
        Ok(EncodedRecord {
            length,
            nodes,
            buffers,
            variadic_counts,
            body,
        })
    }

    fn compress(&self, pieces: &[Buffer]) -> Result<Vec<Vec<u8>>> {
        let (codec, min) = (self.codec, self.min_space_savings);
        match &self.pool {
            Some(pool) => pool.install(|| {
                pieces
                    .par_iter()
                    .map(|p| encode_buffer(p, codec, min))
                    .collect::<Result<Vec<_>>>()
            }),
            None => pieces.iter().map(|p| encode_buffer(p, codec, min)).collect(),
        }
    }

    /// `piece` in the output byte order, reversing each group of `pattern` widths.
    ///
    /// Offsets and run ends are read in host order while collecting, so swapping
    /// happens per piece once a slot is final.
    fn ordered(&self, piece: Buffer, pattern: &[usize]) -> Buffer {
        if self.endianness.is_native() || pattern.is_empty() || pattern == [1] || piece.is_empty() {
            piece
        } else {
            swap_groups(&piece, pattern)
        }
    }

    /// Emits the node and the buffer pieces of `arr`, then of its children.
    fn collect(&self, arr: &ArrayData, out: &mut Collected) -> Result<()> {
        let (o, n) = (arr.offset, arr.len);
        out.nodes.push(fb::FieldNode::new(n as i64, arr.null_count as i64));
        let layout = Layout::of(&arr.data_type)?;
        let legacy_validity = self.version < MetadataVersion::V5;

        match layout {
            Layout::Null => {}
            Layout::Boolean => {
                out.pieces.push(validity_piece(arr));
                out.pieces.push(bit_piece(required(arr, 1)?, o, n));
            }
            Layout::FixedWidth(w) => {
                out.pieces.push(validity_piece(arr));
                let values = sub(arr, 1, o * w, n * w)?;
                out.pieces.push(self.ordered(values, element_pattern(arr.data_type.storage_type())));
            }
            Layout::Dictionary { index_width: w } => {
                out.pieces.push(validity_piece(arr));
                let indices = sub(arr, 1, o * w, n * w)?;
                out.pieces.push(self.ordered(indices, &[w]));
            }
            Layout::VarBinary { offset_width } => {
                out.pieces.push(validity_piece(arr));
                let (offsets, start, end) = rebased_offsets(arr, offset_width)?;
                out.pieces.push(self.ordered(offsets, &[offset_width]));
                out.pieces.push(sub(arr, 2, start, end - start)?);
            }
            Layout::View => {
                out.pieces.push(validity_piece(arr));
                let views = sub(arr, 1, o * VIEW_LEN, n * VIEW_LEN)?;
                if self.endianness.is_native() {
                    out.pieces.push(views);
                } else {
                    out.pieces.push(swap_views(&views, SwapDirection::FromNative));
                }
                let data: Vec<Buffer> = arr.buffers.iter().skip(2).flatten().cloned().collect();
                out.variadic_counts.push(data.len() as i64);
                out.pieces.extend(data);
            }
            Layout::List { offset_width } => {
                out.pieces.push(validity_piece(arr));
                let (offsets, start, end) = rebased_offsets(arr, offset_width)?;
                out.pieces.push(self.ordered(offsets, &[offset_width]));
                let child = child(arr, 0)?;
                self.collect(&child.slice(start, end - start), out)?;
            }
            Layout::ListView { offset_width } => {
                out.pieces.push(validity_piece(arr));
                let offsets = sub(arr, 1, o * offset_width, n * offset_width)?;
                let sizes = sub(arr, 2, o * offset_width, n * offset_width)?;
                out.pieces.push(self.ordered(offsets, &[offset_width]));
                out.pieces.push(self.ordered(sizes, &[offset_width]));
                self.collect(child(arr, 0)?, out)?;
            }
            Layout::FixedSizeList(k) => {
                out.pieces.push(validity_piece(arr));
                self.collect(&child(arr, 0)?.slice(o * k, n * k), out)?;
            }
            Layout::Struct => {
                out.pieces.push(validity_piece(arr));
                for c in &arr.children {
                    self.collect(&c.slice(o, n), out)?;
                }
            }
            Layout::Union(mode) => {
                if legacy_validity {
                    out.pieces.push(Buffer::empty());
                }
                out.pieces.push(sub(arr, 0, o, n)?);
                match mode {
                    UnionMode::Sparse => {
                        for c in &arr.children {
                            self.collect(&c.slice(o, n), out)?;
                        }
                    }
                    UnionMode::Dense => {
                        let offsets = sub(arr, 1, o * 4, n * 4)?;
                        out.pieces.push(self.ordered(offsets, &[4]));
                        for c in &arr.children {
                            self.collect(c, out)?;
                        }
                    }
                }
            }
            Layout::RunEndEncoded => {
                if legacy_validity {
                    out.pieces.push(Buffer::empty());
                }
                let (run_ends, values) = rebased_runs(arr)?;
                self.collect(&run_ends, out)?;
                self.collect(&values, out)?;
            }
        }
        Ok(())
    }
}

/// Appends `bytes` to the body padded to the buffer alignment, returning its descriptor.
#[inline(always)]
fn push_buffer<B: StreamBuffer>(body: &mut B, bytes: &[u8]) -> fb::Buffer {
    let offset = body.len();
    body.extend_from_slice(bytes);
    let len = bytes.len();
    // Each buffer keeps its offset aligned relative to the body start; the frame
    // encoder aligns the body start itself.
    let pad = align_to::<B>(len);
    if pad != 0 {
        body.extend_from_slice(&[0u8; 64][..pad]);
    }
    fb::Buffer::new(offset as i64, len as i64)
}

/// Validity bitmap rebased to offset zero, or empty when there are no nulls.
fn validity_piece(arr: &ArrayData) -> Buffer {
    match arr.validity() {
        Some(v) if arr.null_count > 0 => bit_piece(v, arr.offset, arr.len),
        _ => Buffer::empty(),
    }
}

fn bit_piece(bits: &Buffer, offset: usize, len: usize) -> Buffer {
    if offset == 0 {
        if let Some(prefix) = bits.slice(0, bytes_for_bits(len)) {
            return prefix;
        }
    }
    Buffer::from(copy_bits(bits, offset, len))
}

fn required(arr: &ArrayData, slot: usize) -> Result<&Buffer> {
    arr.buffer(slot)
        .ok_or_else(|| IpcError::InvalidData(format!("{}: buffer {slot} missing", arr.data_type)))
}

fn child(arr: &ArrayData, i: usize) -> Result<&ArrayData> {
    arr.children
        .get(i)
        .ok_or_else(|| IpcError::InvalidData(format!("{}: child {i} missing", arr.data_type)))
}

/// Zero-copy byte range of a buffer slot.
fn sub(arr: &ArrayData, slot: usize, start: usize, len: usize) -> Result<Buffer> {
    if len == 0 {
        return Ok(Buffer::empty());
    }
    required(arr, slot)?.slice(start, len).ok_or_else(|| {
        IpcError::InvalidData(format!(
            "{}: buffer {slot} is shorter than {} bytes",
            arr.data_type,
            start + len
        ))
    })
}

/// Offsets for `[offset, offset + len]` shifted to start at zero, plus the child range.
fn rebased_offsets(arr: &ArrayData, width: usize) -> Result<(Buffer, usize, usize)> {
    let (o, n) = (arr.offset, arr.len);
    if n == 0 {
        return Ok((Buffer::from(vec![0u8; width]), 0, 0));
    }
    let raw = sub(arr, 1, o * width, (n + 1) * width)?;
    let start = read_offset(&raw, 0, width);
    let end = read_offset(&raw, n, width);
    if end < start {
        return Err(IpcError::InvalidData(format!("{}: offsets decrease", arr.data_type)));
    }
    if start == 0 {
        return Ok((raw, start, end));
    }
    let rebased = if width == 4 {
        let values: Vec<i32> = (0..=n)
            .map(|i| (read_offset(&raw, i, 4) - start) as i32)
            .collect();
        Buffer::from_values(&values)
    } else {
        let values: Vec<i64> = (0..=n)
            .map(|i| (read_offset(&raw, i, 8) - start) as i64)
            .collect();
        Buffer::from_values(&values)
    };
    Ok((rebased, start, end))
}

/// Run ends clamped to the logical window and the matching slice of values.
fn rebased_runs(arr: &ArrayData) -> Result<(ArrayData, ArrayData)> {
    let run_ends = child(arr, 0)?;
    let values = child(arr, 1)?;
    let (o, n) = (arr.offset, arr.len);
    if o == 0 && (n == 0 || run_ends.len == 0 || last_run_end(run_ends) == n as i64) {
        return Ok((run_ends.clone(), values.clone()));
    }
    let (p0, p1) = if n == 0 {
        (0, 0)
    } else {
        (arr.run_index(0), arr.run_index(n - 1) + 1)
    };
    let ends: Vec<i64> = (p0..p1)
        .map(|k| (run_end_at(run_ends, k) - o as i64).min(n as i64))
        .collect();
    let rebased = match run_ends.data_type {
        DataType::Int16 => {
            let v: Vec<i16> = ends.iter().map(|e| *e as i16).collect();
            ArrayData::primitive_with_type(DataType::Int16, &v, None)
        }
        DataType::Int32 => {
            let v: Vec<i32> = ends.iter().map(|e| *e as i32).collect();
            ArrayData::primitive_with_type(DataType::Int32, &v, None)
        }
        _ => ArrayData::primitive_with_type(DataType::Int64, &ends, None),
    };
    Ok((rebased, values.slice(p0, p1 - p0)))
}

fn last_run_end(run_ends: &ArrayData) -> i64 {
    run_end_at(run_ends, run_ends.len - 1)
}
