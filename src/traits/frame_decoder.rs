//! Incremental frame detection over a rolling byte buffer.
//!
//! The async readers accumulate chunks in a buffer and hand the whole unconsumed prefix
//! to a [`FrameDecoder`] after every chunk. The decoder reports either one complete
//! message and its byte span, or that it needs more input.

use std::io;

use crate::enums::DecodeResult;

/// Pull-based, non-allocating frame boundary detection.
///
/// The IPC decoder implements this for both the stream and the file protocol. Typed
/// failures travel inside the returned `io::Error` and are recovered by `IpcError::from`.
///
/// Implementations must not assume `buf` is retained between calls: on `NeedMore` the
/// caller keeps the bytes and calls again with a longer slice; on `Frame` it drops
/// exactly `consumed` bytes from the front.
pub trait FrameDecoder {
    type Frame;

    /// Tries to decode one frame from the start of `buf`.
    fn decode(&mut self, buf: &[u8]) -> io::Result<DecodeResult<Self::Frame>>;

    /// True once the protocol has signalled its end; trailing bytes are then ignored.
    fn is_done(&self) -> bool {
        false
    }
}
