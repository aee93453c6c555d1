//! # IPC Frame Structures
//!
//! - [`ArrowIPCMessage`] holds one framed message as received: flatbuffer metadata and body.
//! - [`IPCFrameMetadata`] tracks byte lengths and padding of every section of an encoded
//!   frame; writers use it for footer block bookkeeping.
//! - [`FooterBlockMeta`] is one `(offset, metadata_length, body_length)` footer entry.

use std::sync::Arc;

use arrow_ipc as fb;

use crate::enums::MessageType;
use crate::error::Result;
use crate::models::types::array_data::Buffer;
use crate::traits::stream_buffer::StreamBuffer;

/// One Arrow IPC message: FlatBuffers metadata and its body.
///
/// An empty `message` is the end-of-stream marker.
#[derive(Debug)]
pub struct ArrowIPCMessage<B: StreamBuffer> {
    /// FlatBuffers-encoded Arrow message, including any trailing padding.
    pub message: B,
    /// Columnar data buffer payload.
    pub body: B,
}

impl<B: StreamBuffer> ArrowIPCMessage<B> {
    pub fn end_of_stream() -> Self {
        Self {
            message: B::default(),
            body: B::default(),
        }
    }

    #[inline]
    pub fn is_eos(&self) -> bool {
        self.message.is_empty()
    }

    /// Verifies and returns the flatbuffer `Message` table.
    pub fn header(&self) -> Result<fb::Message<'_>> {
        Ok(fb::root_as_message(self.message.as_ref())?)
    }

    pub fn message_type(&self) -> Result<MessageType> {
        Ok(self.header()?.header_type().into())
    }

    /// Splits into metadata bytes and a shareable, 64-byte aligned body.
    pub fn into_parts(self) -> (B, Buffer) {
        (self.message, Buffer::from_vec64(self.body.into_vec64()))
    }
}

/// Owned message as read by the synchronous readers.
#[derive(Debug, Clone)]
pub struct IpcMessage {
    pub metadata: Arc<[u8]>,
    pub body: Buffer,
}

impl IpcMessage {
    pub fn header(&self) -> Result<fb::Message<'_>> {
        Ok(fb::root_as_message(&self.metadata)?)
    }
}

/// Per-frame accounting metadata for Arrow IPC encoding.
///
/// Tracks lengths of all logical sections of an encoded frame
/// (header, metadata, body, footer, etc.) including any padding.
#[derive(Debug, Default, Clone, Copy)]
pub struct IPCFrameMetadata {
    /// Header size in bytes - continuation + metadata size prefix
    pub header_len: usize,
    /// Raw metadata length in bytes (excluding padding)
    pub meta_len: usize,
    /// Padding applied after metadata for alignment.
    pub meta_pad: usize,
    /// Raw body length in bytes (excluding padding)
    pub body_len: usize,
    /// Padding applied after body for alignment
    pub body_pad: usize,
    /// End-of-stream marker length in bytes, if present
    pub eos_len: usize,
    /// File footer length in bytes plus its size prefix, if present
    pub footer_len: usize,
    /// Length of Arrow magic bytes - opening or closing.
    pub magic_len: usize,
}

impl IPCFrameMetadata {
    /// Return total encoded frame length.
    pub fn frame_len(&self) -> usize {
        self.header_len
            + self.metadata_total_len()
            + self.body_total_len()
            + self.footer_eos_len()
            + self.magic_len
    }

    /// Return total metadata section length including padding.
    pub fn metadata_total_len(&self) -> usize {
        self.meta_len + self.meta_pad
    }

    /// Return total body length including padding.
    pub fn body_total_len(&self) -> usize {
        self.body_len + self.body_pad
    }

    /// Return combined length of EOS marker and footer.
    pub fn footer_eos_len(&self) -> usize {
        self.eos_len + self.footer_len
    }
}

/// One footer block: where a dictionary or record message starts and how long it is.
///
/// `metadata_len` covers the prefix, flatbuffer and padding; `body_len` the padded body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FooterBlockMeta {
    pub offset: u64,
    pub metadata_len: u32,
    pub body_len: u64,
}

impl FooterBlockMeta {
    pub fn to_fb(self) -> fb::Block {
        fb::Block::new(self.offset as i64, self.metadata_len as i32, self.body_len as i64)
    }
}
