use crate::error::IpcError;

/// The outcome of a single frame decoder step.
///
/// Communicates whether a full frame has been detected or whether more bytes are
/// required. Protocol errors are reported through the decoder's `Err` path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodeResult<F> {
    /// A complete logical frame was detected.
    ///
    /// - `frame`: The decoded frame of the target type.
    /// - `consumed`: The number of bytes from the buffer that should be discarded.
    Frame { frame: F, consumed: usize },

    /// The decoder requires more bytes to detect a full frame.
    ///
    /// No bytes should be removed from the buffer.
    NeedMore,
}

/// Arrow IPC frame decoding state machine.
///
/// Tracks marker consumption for both file and streaming modes so that a partially
/// received frame is not re-parsed on every poll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodeState {
    /// Initial state before reading any bytes.
    Initial,

    /// Ready to read the next message prefix.
    ReadingMessageLength,

    /// Message metadata parsed, waiting for the body bytes.
    ReadingBody {
        /// Bytes of prefix before the flatbuffer (4 legacy, 8 with continuation marker).
        prefix_len: usize,
        /// Flatbuffer length as announced by the prefix (padding included).
        meta_len: usize,
        /// Body length announced by the message.
        body_len: usize,
    },

    /// End-of-stream marker seen; nothing further is decoded.
    Done,
}

/// Specifies chunk sizing strategies for `DiskByteStream` and other stream sources.
///
/// Provides domain-appropriate defaults but allows override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BufferChunkSize {
    /// File I/O: Default is 1 MiB chunks.
    FileIO,

    /// In-memory streams: Default is 512 KiB.
    InMemory,

    /// Custom chunk size.
    Custom(usize),
}

impl BufferChunkSize {
    /// Returns the configured chunk size in bytes.
    pub fn chunk_size(self) -> usize {
        match self {
            BufferChunkSize::FileIO => 1024 * 1024, // 1 MiB
            BufferChunkSize::InMemory => 512 * 1024, // 512 KiB
            BufferChunkSize::Custom(n) => n.max(1),
        }
    }
}

/// Arrow framing protocol.
///
/// There are two variants: one for bounded files and one for unbounded streams.
/// Each defines its own termination markers, in line with the official
/// [Apache Arrow IPC specification](https://arrow.apache.org/docs/format/Columnar.html#ipc-streaming-format).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IPCMessageProtocol {
    /// **Unbounded**: Arrow IPC stream protocol.
    Stream,

    /// **Bounded**: Arrow IPC file protocol.
    File,
}

/// Arrow message types.
///
/// Maps directly to message headers defined by the Arrow IPC specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Schema definition message.
    Schema,

    /// Record batch payload.
    RecordBatch,

    /// Dictionary batch payload.
    DictionaryBatch,

    /// Dense or sparse tensor; not decoded by this crate.
    Tensor,

    /// Unrecognised or unsupported message type.
    Unknown,
}

impl From<arrow_ipc::MessageHeader> for MessageType {
    fn from(header: arrow_ipc::MessageHeader) -> Self {
        match header {
            arrow_ipc::MessageHeader::Schema => MessageType::Schema,
            arrow_ipc::MessageHeader::RecordBatch => MessageType::RecordBatch,
            arrow_ipc::MessageHeader::DictionaryBatch => MessageType::DictionaryBatch,
            arrow_ipc::MessageHeader::Tensor | arrow_ipc::MessageHeader::SparseTensor => {
                MessageType::Tensor
            }
            _ => MessageType::Unknown,
        }
    }
}

/// State machine for stream message batching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BatchState {
    /// Schema has not yet been received.
    NeedSchema,

    /// Schema read; the initial dictionaries are still outstanding.
    NeedDictionaries {
        /// Dictionary messages still expected before the first record.
        remaining: usize,
    },

    /// Ready to emit batches.
    Ready,

    /// End of stream reached.
    Done,

    /// A framing or byte-source error occurred; no further reads are attempted.
    Failed,
}

/// State machine for stream writers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriterState {
    /// Fresh writer, no schema written yet.
    Fresh,

    /// Schema has been written, can emit batches.
    SchemaDone,

    /// Writer closed, no further messages may be written.
    Closed,

    /// A write failed after start; closing will not emit a footer.
    Failed,
}

impl WriterState {
    /// Error to report when a write is attempted in this state.
    pub(crate) fn write_error(self) -> Option<IpcError> {
        match self {
            WriterState::Closed => Some(IpcError::Closed),
            WriterState::Failed => Some(IpcError::Poisoned),
            _ => None,
        }
    }
}

/// How a dictionary batch changed the memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryUpdate {
    /// First dictionary for the id.
    New,

    /// An existing dictionary was replaced (stream only).
    Replaced,

    /// Values were appended to the existing dictionary.
    Delta,
}
