//! Appending dictionary values and detecting append-only changes.
//!
//! Dictionary deltas only ever extend the value array, so concatenation is limited to
//! flat value types: null, boolean, fixed width and variable-width binary/utf8.

use crate::error::{IpcError, Result};
use crate::models::types::array_data::{ArrayData, Buffer, Layout, elem_eq, read_signed};
use crate::utils::{append_bits, bytes_for_bits, copy_bits, set_bit};

/// Concatenates `b` onto `a` into a fresh zero-offset array.
pub fn concat(a: &ArrayData, b: &ArrayData) -> Result<ArrayData> {
    if a.data_type != b.data_type {
        return Err(IpcError::InvalidArgument(format!(
            "cannot concatenate {} with {}",
            a.data_type, b.data_type
        )));
    }
    let len = a.len + b.len;
    let buffers = match Layout::of(&a.data_type)? {
        Layout::Null => Vec::new(),
        Layout::Boolean => {
            let mut values = copy_bits(slot(a, 1)?, a.offset, a.len);
            append_bits(&mut values, a.len, slot(b, 1)?, b.offset, b.len);
            vec![concat_validity(a, b), Some(Buffer::from(values))]
        }
        Layout::FixedWidth(w) => {
            let mut values = Vec::with_capacity(len * w);
            values.extend_from_slice(&slot(a, 1)?[a.offset * w..(a.offset + a.len) * w]);
            values.extend_from_slice(&slot(b, 1)?[b.offset * w..(b.offset + b.len) * w]);
            vec![concat_validity(a, b), Some(Buffer::from(values))]
        }
        Layout::VarBinary { offset_width } => {
            let mut offsets: Vec<i64> = Vec::with_capacity(len + 1);
            let mut values = Vec::new();
            offsets.push(0);
            for arr in [a, b] {
                let (offs, data) = (slot(arr, 1)?, slot(arr, 2)?);
                if arr.len == 0 {
                    continue;
                }
                let start = read_signed(offs, arr.offset, offset_width);
                let end = read_signed(offs, arr.offset + arr.len, offset_width);
                let base = values.len() as i64;
                for p in arr.offset + 1..=arr.offset + arr.len {
                    offsets.push(base + read_signed(offs, p, offset_width) - start);
                }
                values.extend_from_slice(&data[start as usize..end as usize]);
            }
            let offsets = if offset_width == 4 {
                let narrowed: Vec<i32> = offsets
                    .iter()
                    .map(|o| i32::try_from(*o))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|_| IpcError::InvalidArgument("concatenated values overflow 32-bit offsets".into()))?;
                Buffer::from_values(&narrowed)
            } else {
                Buffer::from_values(&offsets)
            };
            vec![concat_validity(a, b), Some(offsets), Some(Buffer::from(values))]
        }
        _ => {
            return Err(IpcError::InvalidArgument(format!(
                "dictionary deltas are not supported for value type {}",
                a.data_type
            )));
        }
    };
    ArrayData::try_new(a.data_type.clone(), len, buffers, Vec::new(), None)
}

/// True when every slot of `prev` equals the same slot of `cur`.
pub fn is_prefix(prev: &ArrayData, cur: &ArrayData) -> bool {
    prev.data_type == cur.data_type
        && prev.len <= cur.len
        && (0..prev.len).all(|i| elem_eq(prev, i, cur, i))
}

/// The appended tail of `cur` when `prev` is a strict prefix of it.
pub fn delta_of(prev: &ArrayData, cur: &ArrayData) -> Option<ArrayData> {
    (cur.len > prev.len && is_prefix(prev, cur)).then(|| cur.slice(prev.len, cur.len - prev.len))
}

fn slot(arr: &ArrayData, i: usize) -> Result<&Buffer> {
    arr.buffer(i)
        .ok_or_else(|| IpcError::InvalidData(format!("{}: buffer {i} missing", arr.data_type)))
}

fn concat_validity(a: &ArrayData, b: &ArrayData) -> Option<Buffer> {
    if a.null_count == 0 && b.null_count == 0 {
        return None;
    }
    let mut bits = Vec::with_capacity(bytes_for_bits(a.len + b.len));
    append_validity(&mut bits, 0, a);
    append_validity(&mut bits, a.len, b);
    Some(Buffer::from(bits))
}

fn append_validity(dst: &mut Vec<u8>, dst_len: usize, arr: &ArrayData) {
    match arr.validity() {
        Some(v) => append_bits(dst, dst_len, v, arr.offset, arr.len),
        None => {
            dst.resize(bytes_for_bits(dst_len + arr.len), 0);
            for i in 0..arr.len {
                set_bit(dst, dst_len + i);
            }
        }
    }
}
