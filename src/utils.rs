use crate::traits::stream_buffer::StreamBuffer;

/// Padding needed to bring `n` up to the stream buffer's alignment boundary.
#[inline(always)]
pub fn align_to<B: StreamBuffer>(n: usize) -> usize {
    let rem = n % B::ALIGN;
    if rem == 0 { 0 } else { B::ALIGN - rem }
}

/// Padding needed to bring `n` up to an 8-byte boundary.
#[inline]
pub fn align_8(n: usize) -> usize {
    let rem = n % 8;
    if rem == 0 { 0 } else { 8 - rem }
}

/// Number of bytes needed to hold `bits` bits.
#[inline]
pub fn bytes_for_bits(bits: usize) -> usize {
    bits.div_ceil(8)
}

/// Reads bit `i` of an LSB-first bitmap.
#[inline]
pub fn get_bit(bits: &[u8], i: usize) -> bool {
    (bits[i / 8] >> (i % 8)) & 1 != 0
}

/// Sets bit `i` of an LSB-first bitmap.
#[inline]
pub fn set_bit(bits: &mut [u8], i: usize) {
    bits[i / 8] |= 1 << (i % 8);
}

/// Counts the unset bits in `[offset, offset + len)` of a validity bitmap.
pub fn count_unset_bits(bits: &[u8], offset: usize, len: usize) -> usize {
    let mut set = 0usize;
    let mut i = offset;
    let end = offset + len;
    // leading bits up to a byte boundary
    while i < end && i % 8 != 0 {
        set += get_bit(bits, i) as usize;
        i += 1;
    }
    while i + 8 <= end {
        set += bits[i / 8].count_ones() as usize;
        i += 8;
    }
    while i < end {
        set += get_bit(bits, i) as usize;
        i += 1;
    }
    len - set
}

/// Copies `len` bits starting at `offset` into a fresh zero-offset bitmap.
pub fn copy_bits(bits: &[u8], offset: usize, len: usize) -> Vec<u8> {
    if offset % 8 == 0 {
        let start = offset / 8;
        let mut out = bits[start..start + bytes_for_bits(len)].to_vec();
        clear_trailing_bits(&mut out, len);
        return out;
    }
    let mut out = vec![0u8; bytes_for_bits(len)];
    for i in 0..len {
        if get_bit(bits, offset + i) {
            set_bit(&mut out, i);
        }
    }
    out
}

/// Appends `len` bits of `src` (starting at `src_offset`) after the first `dst_len` bits of `dst`.
pub fn append_bits(dst: &mut Vec<u8>, dst_len: usize, src: &[u8], src_offset: usize, len: usize) {
    dst.resize(bytes_for_bits(dst_len + len), 0);
    for i in 0..len {
        if get_bit(src, src_offset + i) {
            set_bit(dst, dst_len + i);
        }
    }
}

/// Zeroes the bits past `len` in the final byte.
#[inline]
fn clear_trailing_bits(bits: &mut [u8], len: usize) {
    let rem = len % 8;
    if rem != 0 {
        if let Some(last) = bits.last_mut() {
            *last &= (1u8 << rem) - 1;
        }
    }
}

/// Packs a sequence of bools into a bit-packed buffer (LSB0).
/// Returns a new Vec<u8>.
pub fn pack_bits<I>(iter: I, len: usize) -> Vec<u8>
where
    I: Iterator<Item = bool>,
{
    let mut buf = vec![0u8; bytes_for_bits(len)];
    for (i, v) in iter.enumerate().take(len) {
        if v {
            set_bit(&mut buf, i);
        }
    }
    buf
}
