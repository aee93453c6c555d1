//! # Generic Frame Encoder
//!
//! Turns protocol frames into on-the-wire bytes.
//!
//! The encoder owns the layout of one frame (prefixes, padding, trailers) and nothing else:
//! the caller keeps the running byte offset and decides where the bytes go. Writers, sinks
//! and the footer block bookkeeping all rely on the returned metadata to know exactly how
//! many bytes each section of a frame occupied.

use crate::error::Result;
use crate::traits::stream_buffer::StreamBuffer;

/// Serialises one frame into a fresh buffer.
///
/// ### Contract
/// - The encoder must not mutate the frame being encoded.
/// - The encoder must not retain references to input data after the call.
/// - `global_offset` is advanced by exactly the number of bytes returned.
pub trait FrameEncoder {
    /// The type of frame accepted by this encoder.
    type Frame<'a>;

    /// The section accounting produced for each frame.
    type Metadata;

    /// Encode a frame, producing both an output buffer and frame metadata.
    ///
    /// ### Args
    /// * `global_offset`: byte position of the frame within the whole output
    /// * `frame`: the frame being encoded
    fn encode<'a, B: StreamBuffer>(
        global_offset: &mut usize,
        frame: &Self::Frame<'a>,
    ) -> Result<(B, Self::Metadata)>;
}
