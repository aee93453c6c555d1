//! Body buffer compression.
//!
//! - LZ4 frame via the `lz4_flex` crate when the `lz4` feature is enabled.
//! - Zstd via the `zstd` crate when the `zstd` feature is enabled.
//!
//! Each compressed buffer on the wire is `[i64 LE uncompressed length][codec payload]`.
//! A length of `-1` marks a buffer stored raw because compressing it did not pay off.

use std::io::Read;

use arrow_ipc as fb;
use minarrow::Vec64;
use tracing::{debug, trace};

use crate::constants::{COMPRESSION_PREFIX_LEN, READ_CHUNK_LEN, UNCOMPRESSED_SENTINEL};
use crate::error::{IpcError, Result};
use crate::models::types::array_data::Buffer;

/// Supported body compression codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionCodec {
    #[default]
    None,
    Lz4Frame,
    Zstd,
}

impl CompressionCodec {
    /// Maps the flatbuffer codec id. Ids outside the Arrow enum fail with `UnknownCodec`.
    pub fn from_fb(codec: fb::CompressionType) -> Result<Self> {
        match codec {
            fb::CompressionType::LZ4_FRAME => Ok(CompressionCodec::Lz4Frame),
            fb::CompressionType::ZSTD => Ok(CompressionCodec::Zstd),
            other => Err(IpcError::UnknownCodec(format!("{other:?}"))),
        }
    }

    /// The flatbuffer codec id, or `None` for uncompressed bodies.
    pub fn to_fb(self) -> Option<fb::CompressionType> {
        match self {
            CompressionCodec::None => None,
            CompressionCodec::Lz4Frame => Some(fb::CompressionType::LZ4_FRAME),
            CompressionCodec::Zstd => Some(fb::CompressionType::ZSTD),
        }
    }

    /// Whether this build can encode and decode the codec.
    pub fn is_available(self) -> bool {
        match self {
            CompressionCodec::None => true,
            CompressionCodec::Lz4Frame => cfg!(feature = "lz4"),
            CompressionCodec::Zstd => cfg!(feature = "zstd"),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionCodec::None => "none",
            CompressionCodec::Lz4Frame => "lz4_frame",
            CompressionCodec::Zstd => "zstd",
        }
    }
}

/// Streaming decoder for `codec` over `input`.
///
/// This is the decompressor registry: one fresh decoder per buffer, dropped after use.
pub fn decoder<'a>(codec: CompressionCodec, input: &'a [u8]) -> Result<Box<dyn Read + 'a>> {
    match codec {
        CompressionCodec::None => Ok(Box::new(input)),
        #[cfg(feature = "lz4")]
        CompressionCodec::Lz4Frame => Ok(Box::new(lz4_flex::frame::FrameDecoder::new(input))),
        #[cfg(feature = "zstd")]
        CompressionCodec::Zstd => Ok(Box::new(zstd::stream::read::Decoder::new(input)?)),
        #[allow(unreachable_patterns)]
        other => Err(IpcError::UnknownCodec(format!(
            "{} support is not compiled in",
            other.name()
        ))),
    }
}

/// Compress a buffer with the requested codec.
pub fn compress(input: &[u8], codec: CompressionCodec) -> Result<Vec<u8>> {
    match codec {
        CompressionCodec::None => Ok(input.to_vec()),
        #[cfg(feature = "lz4")]
        CompressionCodec::Lz4Frame => lz4_compress(input),
        #[cfg(feature = "zstd")]
        CompressionCodec::Zstd => zstd_compress(input),
        #[allow(unreachable_patterns)]
        other => Err(IpcError::UnknownCodec(format!(
            "{} support is not compiled in",
            other.name()
        ))),
    }
}

#[cfg(feature = "lz4")]
fn lz4_compress(input: &[u8]) -> Result<Vec<u8>> {
    use std::io::Write;
    let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::with_capacity(input.len() / 2 + 64));
    encoder
        .write_all(input)
        .map_err(|e| IpcError::Compression(format!("lz4 compression failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| IpcError::Compression(format!("lz4 compression failed: {e}")))
}

/// Zstd compression using the zstd crate.
#[cfg(feature = "zstd")]
fn zstd_compress(input: &[u8]) -> Result<Vec<u8>> {
    // Level 1 is fastest, with good compression.
    zstd::stream::encode_all(input, 1)
        .map_err(|e| IpcError::Compression(format!("zstd compression failed: {e}")))
}

/// Decompresses exactly `uncompressed_len` bytes into a 64-byte aligned buffer.
pub fn decompress(input: &[u8], codec: CompressionCodec, uncompressed_len: usize) -> Result<Vec64<u8>> {
    // The declared length is untrusted, so the buffer grows only as output arrives.
    let mut out = Vec64::with_capacity(uncompressed_len.min(READ_CHUNK_LEN));
    let mut reader = decoder(codec, input)?;
    while out.0.len() < uncompressed_len {
        let start = out.0.len();
        out.0.resize(start + (uncompressed_len - start).min(READ_CHUNK_LEN), 0);
        reader.read_exact(&mut out.0[start..]).map_err(|e| {
            IpcError::Compression(format!(
                "{} decompression failed before the declared {uncompressed_len} bytes: {e}",
                codec.name()
            ))
        })?;
    }
    Ok(out)
}

/// Frames one body buffer for a compressed record.
///
/// Empty buffers stay empty. When `min_space_savings` is set and compression saves less
/// than that fraction, the raw bytes are kept behind the `-1` sentinel.
pub fn encode_buffer(raw: &[u8], codec: CompressionCodec, min_space_savings: Option<f64>) -> Result<Vec<u8>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let compressed = compress(raw, codec)?;
    let keep_raw = match min_space_savings {
        Some(min) => 1.0 - (compressed.len() as f64 / raw.len() as f64) < min,
        None => false,
    };
    let mut out = Vec::with_capacity(COMPRESSION_PREFIX_LEN + compressed.len().min(raw.len()));
    if keep_raw {
        debug!(
            codec = codec.name(),
            raw = raw.len(),
            compressed = compressed.len(),
            "compression below minimum savings, storing raw"
        );
        out.extend_from_slice(&UNCOMPRESSED_SENTINEL.to_le_bytes());
        out.extend_from_slice(raw);
    } else {
        out.extend_from_slice(&(raw.len() as i64).to_le_bytes());
        out.extend_from_slice(&compressed);
    }
    Ok(out)
}

/// Inverse of [`encode_buffer`]. Raw payloads are returned as zero-copy slices.
pub fn decode_buffer(region: &Buffer, codec: CompressionCodec) -> Result<Buffer> {
    if region.is_empty() {
        return Ok(Buffer::empty());
    }
    if region.len() < COMPRESSION_PREFIX_LEN {
        return Err(IpcError::InvalidData(format!(
            "compressed buffer of {} bytes has no length prefix",
            region.len()
        )));
    }
    let declared = i64::from_le_bytes(region[..COMPRESSION_PREFIX_LEN].try_into().map_err(|_| {
        IpcError::InvalidData("compressed buffer length prefix".into())
    })?);
    let payload_len = region.len() - COMPRESSION_PREFIX_LEN;
    if declared == UNCOMPRESSED_SENTINEL {
        trace!(len = payload_len, "buffer stored uncompressed");
        return region
            .slice(COMPRESSION_PREFIX_LEN, payload_len)
            .ok_or_else(|| IpcError::Truncated("raw compressed payload".into()));
    }
    let len = usize::try_from(declared).map_err(|_| {
        IpcError::InvalidData(format!("negative uncompressed length {declared}"))
    })?;
    trace!(codec = codec.name(), compressed = payload_len, len, "decompressing buffer");
    let out = decompress(&region[COMPRESSION_PREFIX_LEN..], codec, len)?;
    Ok(Buffer::from_vec64(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_ids() {
        assert_eq!(CompressionCodec::from_fb(fb::CompressionType::ZSTD).unwrap(), CompressionCodec::Zstd);
        assert_eq!(CompressionCodec::Lz4Frame.to_fb(), Some(fb::CompressionType::LZ4_FRAME));
        assert_eq!(CompressionCodec::None.to_fb(), None);
        assert!(matches!(
            CompressionCodec::from_fb(fb::CompressionType(7)),
            Err(IpcError::UnknownCodec(_))
        ));
    }

    #[test]
    fn test_empty_buffer_stays_empty() {
        assert!(encode_buffer(&[], CompressionCodec::Zstd, None).unwrap().is_empty());
        assert!(decode_buffer(&Buffer::empty(), CompressionCodec::Zstd).unwrap().is_empty());
    }

    #[test]
    fn test_sentinel_path_is_zero_copy() {
        let raw = [1u8, 2, 3, 4, 5];
        let mut framed = UNCOMPRESSED_SENTINEL.to_le_bytes().to_vec();
        framed.extend_from_slice(&raw);
        let region = Buffer::from(framed);
        let decoded = decode_buffer(&region, CompressionCodec::Lz4Frame).unwrap();
        assert_eq!(decoded.as_slice(), &raw);
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn test_zstd_roundtrip() {
        let raw: Vec<u8> = (0..4096u32).map(|i| (i % 7) as u8).collect();
        let framed = encode_buffer(&raw, CompressionCodec::Zstd, None).unwrap();
        assert!(framed.len() < raw.len());
        let decoded = decode_buffer(&Buffer::from(framed), CompressionCodec::Zstd).unwrap();
        assert_eq!(decoded.as_slice(), raw.as_slice());
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn test_lz4_roundtrip_and_min_savings() {
        let raw: Vec<u8> = (0..4096u32).map(|i| (i % 3) as u8).collect();
        let framed = encode_buffer(&raw, CompressionCodec::Lz4Frame, Some(0.1)).unwrap();
        assert_ne!(&framed[..8], &UNCOMPRESSED_SENTINEL.to_le_bytes());
        let decoded = decode_buffer(&Buffer::from(framed), CompressionCodec::Lz4Frame).unwrap();
        assert_eq!(decoded.as_slice(), raw.as_slice());

        // Eight distinct bytes never compress by 100%.
        let framed = encode_buffer(&[9, 8, 7, 6, 5, 4, 3, 2], CompressionCodec::Lz4Frame, Some(1.0)).unwrap();
        assert_eq!(&framed[..8], &UNCOMPRESSED_SENTINEL.to_le_bytes());
        assert_eq!(&framed[8..], &[9, 8, 7, 6, 5, 4, 3, 2]);
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn test_overstated_length_is_rejected() {
        let raw: Vec<u8> = (0..256u32).map(|i| i as u8).collect();
        let mut framed = encode_buffer(&raw, CompressionCodec::Zstd, None).unwrap();
        framed[..8].copy_from_slice(&(1i64 << 40).to_le_bytes());
        let err = decode_buffer(&Buffer::from(framed), CompressionCodec::Zstd).unwrap_err();
        assert!(matches!(err, IpcError::Compression(_)), "{err:?}");
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn test_exact_length_decompresses() {
        let raw: Vec<u8> = (0..(READ_CHUNK_LEN as u32 + 100)).map(|i| (i % 5) as u8).collect();
        let compressed = compress(&raw, CompressionCodec::Lz4Frame).unwrap();
        let out = decompress(&compressed, CompressionCodec::Lz4Frame, raw.len()).unwrap();
        assert_eq!(out.0.as_slice(), raw.as_slice());
        assert!(decompress(&compressed, CompressionCodec::Lz4Frame, raw.len() + 1).is_err());
    }
}
