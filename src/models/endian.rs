//! # Endianness adapter
//!
//! Byte-swaps every multi-byte value of an array tree so that data declared in one byte
//! order can be used in the other. Swapping always allocates fresh buffers; bitmaps, byte
//! payloads and fixed-size binary values are left untouched.

use std::sync::Arc;

use crate::error::Result;
use crate::models::types::array_data::{ArrayData, Buffer, Layout, MAX_INLINE_VIEW_LEN, VIEW_LEN};
use crate::models::types::datatype::{DataType, IntervalUnit, UnionMode};
use crate::models::types::record_batch::RecordBatch;

/// Which side of the swap is in host order.
///
/// Only matters for view arrays, whose inline length decides which words follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapDirection {
    /// Input is foreign, output is host order.
    ToNative,
    /// Input is host order, output is foreign.
    FromNative,
}

/// Byte-swaps every column of a batch.
pub fn swap_batch(batch: &RecordBatch, direction: SwapDirection) -> Result<RecordBatch> {
    let columns = batch
        .columns
        .iter()
        .map(|c| swap_array(c, direction))
        .collect::<Result<Vec<_>>>()?;
    Ok(RecordBatch {
        schema: Arc::clone(&batch.schema),
        length: batch.length,
        columns,
    })
}

/// Byte-swaps one array, its children and its dictionary.
pub fn swap_array(arr: &ArrayData, direction: SwapDirection) -> Result<ArrayData> {
    let mut out = arr.clone();
    swap_buffers(&mut out, direction)?;
    if let Some(dict) = &arr.dictionary {
        out.dictionary = Some(Arc::new(swap_array(dict, direction)?));
    }
    out.children = arr
        .children
        .iter()
        .map(|c| swap_array(c, direction))
        .collect::<Result<Vec<_>>>()?;
    Ok(out)
}

/// Byte-swaps the buffers `arr` owns directly, leaving children and dictionary alone.
pub(crate) fn swap_buffers(arr: &mut ArrayData, direction: SwapDirection) -> Result<()> {
    match Layout::of(&arr.data_type)? {
        Layout::Null | Layout::Boolean | Layout::Struct | Layout::FixedSizeList(_) | Layout::RunEndEncoded => {}
        Layout::FixedWidth(_) => {
            let pattern = element_pattern(arr.data_type.storage_type());
            swap_slot(arr, 1, pattern);
        }
        Layout::VarBinary { offset_width } | Layout::List { offset_width } => {
            swap_slot(arr, 1, &[offset_width]);
        }
        Layout::ListView { offset_width } => {
            swap_slot(arr, 1, &[offset_width]);
            swap_slot(arr, 2, &[offset_width]);
        }
        Layout::View => {
            if let Some(Some(views)) = arr.buffers.get_mut(1) {
                *views = swap_views(views, direction);
            }
        }
        Layout::Union(UnionMode::Dense) => swap_slot(arr, 1, &[4]),
        Layout::Union(UnionMode::Sparse) => {}
        Layout::Dictionary { index_width } => swap_slot(arr, 1, &[index_width]),
    }
    Ok(())
}

/// Widths of the byte groups reversed inside one element.
pub(crate) fn element_pattern(dt: &DataType) -> &'static [usize] {
    use DataType::*;
    match dt {
        Int16 | UInt16 | Float16 => &[2],
        Int32 | UInt32 | Float32 | Date32 | Time32(_) | Interval(IntervalUnit::YearMonth) => &[4],
        Interval(IntervalUnit::DayTime) => &[4, 4],
        Interval(IntervalUnit::MonthDayNano) => &[4, 4, 8],
        Int64 | UInt64 | Float64 | Date64 | Time64(_) | Timestamp(..) | Duration(_) => &[8],
        Decimal128 { .. } => &[16],
        Decimal256 { .. } => &[32],
        // single bytes and fixed size binary have no byte order
        _ => &[],
    }
}

fn swap_slot(arr: &mut ArrayData, slot: usize, pattern: &[usize]) {
    if pattern.is_empty() || pattern == [1] {
        return;
    }
    if let Some(Some(buf)) = arr.buffers.get_mut(slot) {
        *buf = swap_groups(buf, pattern);
    }
}

/// Reverses each group of `pattern` widths, repeated over the buffer.
///
/// A trailing partial element is copied unchanged.
pub(crate) fn swap_groups(bytes: &[u8], pattern: &[usize]) -> Buffer {
    let stride: usize = pattern.iter().sum();
    let mut out = bytes.to_vec();
    if stride == 0 {
        return Buffer::from(out);
    }
    for element in out.chunks_exact_mut(stride) {
        let mut at = 0;
        for &w in pattern {
            element[at..at + w].reverse();
            at += w;
        }
    }
    Buffer::from(out)
}

/// Swaps the length word of every view, plus buffer index and offset of out-of-line views.
pub(crate) fn swap_views(views: &[u8], direction: SwapDirection) -> Buffer {
    let mut out = views.to_vec();
    for view in out.chunks_exact_mut(VIEW_LEN) {
        let raw = [view[0], view[1], view[2], view[3]];
        let len = match direction {
            SwapDirection::FromNative => i32::from_ne_bytes(raw),
            SwapDirection::ToNative => i32::from_ne_bytes(raw).swap_bytes(),
        };
        view[0..4].reverse();
        if len > MAX_INLINE_VIEW_LEN as i32 {
            view[8..12].reverse();
            view[12..16].reverse();
        }
    }
    Buffer::from(out)
}
