//! Arrow IPC Frame Decoder
//!
//! Decodes Arrow IPC (Inter-Process Communication) frames for both *file* and *stream* protocols,
//! as defined by the official [Apache Arrow Columnar IPC specification](https://arrow.apache.org/docs/format/Columnar.html#ipc-streaming-format).
//!
//! # Overview
//!
//! - **File protocol**: opening magic, then the same messages as a stream. Frames are read
//!   sequentially; the footer after the end-of-stream marker is left to [`FileReader`].
//! - **Stream protocol**: 8-byte continuation marker + length before each message, or the
//!   legacy 4-byte length without marker.
//!
//! The decoder works as a state machine, consuming input buffers and producing
//! [`ArrowIPCMessage`] instances as complete frames are detected.
//!
//! [`FileReader`]: crate::models::readers::ipc::file_reader::FileReader

use std::io;
use std::marker::PhantomData;

use arrow_ipc as fb;

use crate::constants::{
    ARROW_MAGIC_NUMBER, ARROW_MAGIC_NUMBER_PADDED, CONTINUATION_MARKER_LEN, CONTINUATION_SENTINEL,
    FILE_OPENING_MAGIC_LEN, METADATA_SIZE_PREFIX,
};
use crate::enums::{DecodeResult, DecodeState, IPCMessageProtocol};
use crate::error::IpcError;
use crate::models::frames::ipc_message::ArrowIPCMessage;
use crate::traits::frame_decoder::FrameDecoder;
use crate::traits::stream_buffer::StreamBuffer;
use crate::utils::align_8;

/// Decoder for Arrow IPC (file/stream) format state machine.
pub struct ArrowIPCFrameDecoder<B: StreamBuffer> {
    format: IPCMessageProtocol,
    state: DecodeState,
    /// True until the initial 8-byte file magic has been included
    /// in the `consumed` count of the first FILE frame.
    file_magic_unconsumed: bool,
    _phantom: PhantomData<B>,
}

impl<B: StreamBuffer> FrameDecoder for ArrowIPCFrameDecoder<B> {
    type Frame = ArrowIPCMessage<B>;

    fn decode(&mut self, buf: &[u8]) -> io::Result<DecodeResult<Self::Frame>> {
        loop {
            let step = match self.state {
                DecodeState::Initial => self.decode_initial(buf)?,
                DecodeState::ReadingMessageLength => self.decode_message_length(buf)?,
                DecodeState::ReadingBody {
                    prefix_len,
                    meta_len,
                    body_len,
                } => self.decode_body(buf, prefix_len, meta_len, body_len),
                DecodeState::Done => Some(DecodeResult::NeedMore),
            };
            if let Some(done) = step {
                return Ok(done);
            }
            // otherwise loop and continue progressing within the same input slice
        }
    }

    fn is_done(&self) -> bool {
        self.state == DecodeState::Done
    }
}

impl<B: StreamBuffer> ArrowIPCFrameDecoder<B> {
    /// `Stream` also accepts input that opens with the file magic.
    pub fn new(format: IPCMessageProtocol) -> Self {
        Self {
            format,
            state: DecodeState::Initial,
            file_magic_unconsumed: false,
            _phantom: PhantomData,
        }
    }

    /// The protocol in effect, after any auto-detection.
    pub fn protocol(&self) -> IPCMessageProtocol {
        self.format
    }

    #[inline]
    fn read_u32_le(buf: &[u8]) -> u32 {
        u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
    }

    #[inline]
    fn has_opening_file_magic(buf: &[u8]) -> bool {
        buf.len() >= FILE_OPENING_MAGIC_LEN && &buf[..FILE_OPENING_MAGIC_LEN] == ARROW_MAGIC_NUMBER_PADDED
    }

    /// For the *current* frame, return 8 only if FILE and the magic has not been counted yet.
    #[inline]
    fn current_base_offset(&self) -> usize {
        if self.file_magic_unconsumed {
            FILE_OPENING_MAGIC_LEN
        } else {
            0
        }
    }

    /// Handles the opening magic, required for File and detected for Stream.
    fn decode_initial(&mut self, buf: &[u8]) -> io::Result<Option<DecodeResult<ArrowIPCMessage<B>>>> {
        let probe = buf.len().min(ARROW_MAGIC_NUMBER.len());
        let may_be_magic = buf[..probe] == ARROW_MAGIC_NUMBER[..probe];
        match self.format {
            IPCMessageProtocol::File => {
                if buf.len() < FILE_OPENING_MAGIC_LEN {
                    if may_be_magic {
                        return Ok(Some(DecodeResult::NeedMore));
                    }
                    return Err(IpcError::NotArrowFile("missing opening magic".into()).into());
                }
                if !Self::has_opening_file_magic(buf) {
                    return Err(IpcError::NotArrowFile("invalid opening magic".into()).into());
                }
                self.file_magic_unconsumed = true;
            }
            IPCMessageProtocol::Stream => {
                // Some writers hand file output to stream readers.
                if may_be_magic && buf.len() < FILE_OPENING_MAGIC_LEN {
                    return Ok(Some(DecodeResult::NeedMore));
                }
                if Self::has_opening_file_magic(buf) {
                    self.format = IPCMessageProtocol::File;
                    self.file_magic_unconsumed = true;
                }
            }
        }
        self.state = DecodeState::ReadingMessageLength;
        Ok(None)
    }

    /// Parses the length prefix and the flatbuffer header of the next message.
    fn decode_message_length(&mut self, buf: &[u8]) -> io::Result<Option<DecodeResult<ArrowIPCMessage<B>>>> {
        let base_off = self.current_base_offset();
        if buf.len() < base_off + METADATA_SIZE_PREFIX {
            return Ok(Some(DecodeResult::NeedMore));
        }
        let has_marker = Self::read_u32_le(&buf[base_off..]) == CONTINUATION_SENTINEL;
        let prefix_len = if has_marker {
            CONTINUATION_MARKER_LEN + METADATA_SIZE_PREFIX
        } else {
            METADATA_SIZE_PREFIX
        };
        if buf.len() < base_off + prefix_len {
            return Ok(Some(DecodeResult::NeedMore));
        }
        let len_off = base_off + prefix_len - METADATA_SIZE_PREFIX;
        let meta_len = Self::read_u32_le(&buf[len_off..]) as i32;
        if meta_len < 0 {
            return Err(IpcError::BadFraming(format!("negative metadata length {meta_len}")).into());
        }
        let meta_len = meta_len as usize;

        // Zero length means end of stream, with or without marker
        if meta_len == 0 {
            self.state = DecodeState::Done;
            self.file_magic_unconsumed = false;
            return Ok(Some(DecodeResult::Frame {
                frame: ArrowIPCMessage::end_of_stream(),
                consumed: base_off + prefix_len,
            }));
        }

        let meta_start = base_off + prefix_len;
        if buf.len() < meta_start + meta_len {
            return Ok(Some(DecodeResult::NeedMore));
        }
        let message = fb::root_as_message(&buf[meta_start..meta_start + meta_len])
            .map_err(|e| io::Error::from(IpcError::from(e)))?;
        let body_len = message.bodyLength();
        if body_len < 0 {
            return Err(IpcError::BadFraming(format!("negative body length {body_len}")).into());
        }
        self.state = DecodeState::ReadingBody {
            prefix_len,
            meta_len,
            body_len: body_len as usize,
        };
        Ok(None)
    }

    /// Emits the frame once metadata, body and body padding are all buffered.
    fn decode_body(
        &mut self,
        buf: &[u8],
        prefix_len: usize,
        meta_len: usize,
        body_len: usize,
    ) -> Option<DecodeResult<ArrowIPCMessage<B>>> {
        let meta_start = self.current_base_offset() + prefix_len;
        let body_start = meta_start + meta_len;
        let consumed = body_start + body_len + align_8(body_len);
        if buf.len() < consumed {
            return Some(DecodeResult::NeedMore);
        }

        let message = B::from_slice(&buf[meta_start..body_start]);
        let body = B::from_slice(&buf[body_start..body_start + body_len]);

        // Prepare for next frame
        self.state = DecodeState::ReadingMessageLength;
        self.file_magic_unconsumed = false;

        Some(DecodeResult::Frame {
            frame: ArrowIPCMessage { message, body },
            consumed,
        })
    }
}

impl<B: StreamBuffer> Default for ArrowIPCFrameDecoder<B> {
    fn default() -> Self {
        ArrowIPCFrameDecoder::new(IPCMessageProtocol::Stream)
    }
}
