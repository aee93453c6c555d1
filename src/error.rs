//! # IPC Errors
//!
//! Unified error type for every reader, writer and codec operation in the crate.
//!
//! Variants follow the failure kinds of the Arrow IPC format: envelope and framing
//! problems, schema mismatches, unsupported types and codecs, dictionary identity
//! violations and cancellation. Conversion impls are provided for common error
//! sources so that encoders/decoders can propagate errors directly with `?`.

use std::io;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, IpcError>;

/// Unified error type for all Arrow IPC operations.
#[derive(Debug, Error)]
pub enum IpcError {
    /// File magic missing or mismatched.
    #[error("not an Arrow file: {0}")]
    NotArrowFile(String),

    /// Footer length out of range or footer blocks unaligned.
    #[error("inconsistent file metadata: {0}")]
    InconsistentFileMetadata(String),

    /// End of the byte source before the expected bytes.
    #[error("truncated input: {0}")]
    Truncated(String),

    /// Continuation sentinel or length field invalid.
    #[error("bad message framing: {0}")]
    BadFraming(String),

    /// An offset or length that must be a multiple of 8 is not.
    #[error("{what} {value} is not 8-byte aligned")]
    BadAlignment { what: &'static str, value: i64 },

    /// Caller-supplied schema differs from the one found in the input.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Field nesting deeper than the supported limit.
    #[error("nesting depth exceeds the limit of {0}")]
    NestingDepthExceeded(usize),

    /// Flatbuffer type tag or parameterisation that is not handled.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// Compression codec id not recognised, or not compiled in.
    #[error("unknown compression codec: {0}")]
    UnknownCodec(String),

    /// A record references a dictionary id with no current array.
    #[error("dictionary {0} is not available")]
    MissingDictionary(i64),

    /// Dictionary replacement message encountered while reading a file.
    #[error("dictionary {0} is replaced, which the file format does not allow")]
    UnsupportedReplacementInFile(i64),

    /// Writer asked to replace a dictionary in a file.
    #[error("dictionary {0} changed in a way that is not a delta, which the file format does not allow")]
    UnsupportedDictionaryReplacement(i64),

    /// Cancellation observed at a byte-source boundary.
    #[error("operation cancelled")]
    Cancelled,

    /// Malformed metadata or inconsistent buffers.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Caller misuse (mismatched columns, bad option values, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Codec failure while compressing or decompressing a buffer.
    #[error("compression error: {0}")]
    Compression(String),

    /// Flatbuffer verification failure.
    #[error("invalid flatbuffer: {0}")]
    Flatbuffer(#[from] flatbuffers::InvalidFlatbuffer),

    /// Write attempted after the writer was closed.
    #[error("writer is closed")]
    Closed,

    /// Use after a framing or byte-source error.
    #[error("reader or writer is unusable after an earlier I/O or framing error")]
    Poisoned,

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl IpcError {
    /// True for failures that leave the byte position unknown.
    ///
    /// Readers and writers refuse further operations after one of these.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IpcError::Io(_)
                | IpcError::Truncated(_)
                | IpcError::BadFraming(_)
                | IpcError::Cancelled
                | IpcError::Poisoned
                | IpcError::NotArrowFile(_)
        )
    }
}

// Conversions for error handling

impl From<io::Error> for IpcError {
    fn from(e: io::Error) -> Self {
        // The frame layer tunnels typed errors through `io::Error`.
        if e.get_ref().is_some_and(|inner| inner.is::<IpcError>()) {
            if let Some(inner) = e.into_inner() {
                if let Ok(ipc) = inner.downcast::<IpcError>() {
                    return *ipc;
                }
            }
            return IpcError::InvalidData("unrecoverable wrapped error".into());
        }
        match e.kind() {
            io::ErrorKind::UnexpectedEof => IpcError::Truncated(e.to_string()),
            _ => IpcError::Io(e),
        }
    }
}

impl From<IpcError> for io::Error {
    fn from(e: IpcError) -> Self {
        match e {
            IpcError::Io(inner) => inner,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_eof_maps_to_truncated() {
        let e: IpcError = io::Error::new(io::ErrorKind::UnexpectedEof, "short").into();
        assert!(matches!(e, IpcError::Truncated(_)));
    }

    #[test]
    fn test_tunnelled_error_is_recovered() {
        let io_err: io::Error = IpcError::BadFraming("negative length".into()).into();
        let back: IpcError = io_err.into();
        assert!(matches!(back, IpcError::BadFraming(ref m) if m == "negative length"));
    }

    #[test]
    fn test_plain_io_error_is_kept() {
        let e: IpcError = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert!(matches!(e, IpcError::Io(ref inner) if inner.kind() == io::ErrorKind::PermissionDenied));
        let back: io::Error = e.into();
        assert_eq!(back.kind(), io::ErrorKind::PermissionDenied);
    }
}
