//! Reader and writer configuration.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::compression::CompressionCodec;
use crate::error::{IpcError, Result};
use crate::models::types::datatype::{Endianness, MetadataVersion};
use crate::models::types::schema::{Metadata, Schema};

/// Options shared by the file, stream and async readers.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Expected schema; readers fail with `SchemaMismatch` when the input differs.
    pub schema: Option<Arc<Schema>>,
    /// Byte-swap opposite-endian input to the host order.
    pub ensure_native_endian: bool,
    /// Checked before each read from the byte source.
    pub cancellation: Option<CancellationToken>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema: Arc<Schema>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_ensure_native_endian(mut self, ensure: bool) -> Self {
        self.ensure_native_endian = ensure;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        check_cancelled(self.cancellation.as_ref())
    }
}

/// Options for the file, stream and async writers.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub codec: CompressionCodec,
    /// Worker threads used to compress the buffers of one record. `0` and `1` compress inline.
    pub compress_concurrency: usize,
    /// Minimum fraction of bytes compression must save before a buffer is stored compressed.
    pub min_space_savings: Option<f64>,
    pub metadata_version: MetadataVersion,
    /// Byte order declared in the written schema; buffers are swapped when it is not native.
    pub endianness: Endianness,
    /// Written to the file footer, or to the schema message for streams.
    pub custom_metadata: Metadata,
    pub cancellation: Option<CancellationToken>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            codec: CompressionCodec::None,
            compress_concurrency: 0,
            min_space_savings: None,
            metadata_version: MetadataVersion::V5,
            endianness: Endianness::native(),
            custom_metadata: Metadata::new(),
            cancellation: None,
        }
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codec(mut self, codec: CompressionCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_compress_concurrency(mut self, threads: usize) -> Self {
        self.compress_concurrency = threads;
        self
    }

    /// Sets the minimum space saving; values outside `[0, 1]` are rejected.
    pub fn with_min_space_savings(mut self, fraction: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(IpcError::InvalidArgument(format!(
                "min_space_savings must be within [0, 1], got {fraction}"
            )));
        }
        self.min_space_savings = Some(fraction);
        Ok(self)
    }

    /// Metadata version written to every message; below V4 is not supported for writing.
    pub fn with_metadata_version(mut self, version: MetadataVersion) -> Result<Self> {
        if version < MetadataVersion::V4 {
            return Err(IpcError::InvalidArgument(format!(
                "cannot write metadata version {version:?}"
            )));
        }
        self.metadata_version = version;
        Ok(self)
    }

    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn with_custom_metadata(mut self, metadata: Metadata) -> Self {
        self.custom_metadata = metadata;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Rejects codecs this build cannot produce.
    pub(crate) fn validate(&self) -> Result<()> {
        if !self.codec.is_available() {
            return Err(IpcError::UnknownCodec(format!(
                "{} support is not compiled in",
                self.codec.name()
            )));
        }
        Ok(())
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        check_cancelled(self.cancellation.as_ref())
    }
}

#[inline]
pub(crate) fn check_cancelled(token: Option<&CancellationToken>) -> Result<()> {
    match token {
        Some(t) if t.is_cancelled() => Err(IpcError::Cancelled),
        _ => Ok(()),
    }
}
