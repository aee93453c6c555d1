//! Byte buffers shared by the async frame layer and the message encoders.

use minarrow::Vec64;

/// A growable byte buffer with a known body alignment.
///
/// `ALIGN` sets how far the encoders pad each body buffer, so the choice of buffer type
/// decides the alignment of the written IPC data. `Vec<u8>` gives the 8-byte minimum the
/// format requires; `Vec64<u8>` pads to 64 so decoded columns can be used for SIMD
/// without a copy. Readers accept either.
pub trait StreamBuffer: AsRef<[u8]> + Default + Extend<u8> + 'static {
    /// Body buffer alignment in bytes.
    const ALIGN: usize;

    fn with_capacity(n: usize) -> Self;

    fn reserve(&mut self, additional: usize);

    /// Drops `range` from the buffer, shifting the tail down.
    fn drain(&mut self, range: std::ops::Range<usize>);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn extend_from_slice(&mut self, data: &[u8]);

    fn push(&mut self, byte: u8);

    fn from_slice(data: &[u8]) -> Self;

    /// Hands the bytes over as a 64-byte aligned allocation, copying only when needed.
    fn into_vec64(self) -> Vec64<u8>;
}

impl StreamBuffer for Vec<u8> {
    const ALIGN: usize = 8;

    fn with_capacity(n: usize) -> Self {
        Vec::with_capacity(n)
    }

    fn reserve(&mut self, additional: usize) {
        Vec::reserve(self, additional);
    }

    fn drain(&mut self, range: std::ops::Range<usize>) {
        Vec::drain(self, range);
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn extend_from_slice(&mut self, data: &[u8]) {
        Vec::extend_from_slice(self, data)
    }

    fn push(&mut self, byte: u8) {
        Vec::push(self, byte)
    }

    fn from_slice(data: &[u8]) -> Self {
        data.to_vec()
    }

    fn into_vec64(self) -> Vec64<u8> {
        Vec64::from_slice(&self)
    }
}

impl StreamBuffer for Vec64<u8> {
    /// Only body buffers get 64-byte padding. Flatbuffer metadata and frame prefixes
    /// keep the 8-byte alignment of the format.
    const ALIGN: usize = 64;

    fn with_capacity(n: usize) -> Self {
        Vec64::with_capacity(n)
    }

    fn reserve(&mut self, additional: usize) {
        self.0.reserve(additional);
    }

    fn drain(&mut self, range: std::ops::Range<usize>) {
        self.0.drain(range);
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn extend_from_slice(&mut self, data: &[u8]) {
        self.0.extend_from_slice(data)
    }

    fn push(&mut self, byte: u8) {
        self.0.push(byte)
    }

    fn from_slice(data: &[u8]) -> Self {
        Vec64::from_slice(data)
    }

    fn into_vec64(self) -> Vec64<u8> {
        self
    }
}
