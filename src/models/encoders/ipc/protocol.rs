use crate::constants::{
    ARROW_MAGIC_NUMBER, ARROW_MAGIC_NUMBER_PADDED, CONTINUATION_MARKER_LEN, CONTINUATION_SENTINEL,
    DEFAULT_FRAME_ALLOCATION_SIZE, EOS_MARKER_LEN, FOOTER_SIZE_PREFIX, METADATA_SIZE_PREFIX,
};
use crate::enums::IPCMessageProtocol;
use crate::error::{IpcError, Result};
use crate::models::frames::ipc_message::IPCFrameMetadata;
use crate::traits::frame_encoder::FrameEncoder;
use crate::traits::stream_buffer::StreamBuffer;
use crate::utils::{align_8, align_to};

/// One message to frame, plus the file-level extras that surround it.
pub struct IPCFrame<'a> {
    pub meta: &'a [u8],
    pub body: &'a [u8],
    pub protocol: IPCMessageProtocol,
    pub is_first: bool,
    pub is_last: bool,
    pub footer_bytes: Option<&'a [u8]>,
}

/// Encodes a message+body as a valid Arrow IPC frame, for file or stream.
///
/// See the [Arrow Columnar IPC Specification](https://arrow.apache.org/docs/format/Columnar.html#serialization-and-interprocess-communication-ipc)
/// for further details.
pub struct IPCFrameEncoder;

impl FrameEncoder for IPCFrameEncoder {
    type Frame<'a> = IPCFrame<'a>;
    type Metadata = IPCFrameMetadata;

    /// Encode a single frame.
    ///
    /// Messages always carry the continuation marker. For File, the first frame is
    /// preceded by the padded magic, and the last frame is followed by the end-of-stream
    /// marker, footer, footer length and closing magic.
    ///
    /// ```text
    /// <continuation: 0xFFFFFFFF>
    /// <metadata_size: int32>
    /// <metadata_flatbuffer: bytes>
    /// <padding>
    /// <message body>
    /// ```
    fn encode<'a, B: StreamBuffer>(
        global_offset: &mut usize,
        frame: &Self::Frame<'a>,
    ) -> Result<(B, Self::Metadata)> {
        let mut out = B::with_capacity(DEFAULT_FRAME_ALLOCATION_SIZE);
        let mut ipc_frame_metadata = IPCFrameMetadata::default();

        if frame.protocol == IPCMessageProtocol::File && frame.is_first {
            out.extend_from_slice(ARROW_MAGIC_NUMBER_PADDED);
            ipc_frame_metadata.magic_len = ARROW_MAGIC_NUMBER_PADDED.len();
            *global_offset += ipc_frame_metadata.magic_len;
        }

        if !frame.meta.is_empty() || !frame.body.is_empty() {
            Self::append_message_frame(
                global_offset,
                &mut out,
                frame.meta,
                frame.body,
                &mut ipc_frame_metadata,
            )?;
        }

        if frame.is_last {
            // The end-of-stream marker also precedes the file footer
            Self::append_eos_marker(global_offset, &mut out, &mut ipc_frame_metadata);
            if frame.protocol == IPCMessageProtocol::File {
                let footer = frame.footer_bytes.ok_or_else(|| {
                    IpcError::InvalidArgument("the last file frame must carry footer bytes".into())
                })?;
                Self::append_file_footer(global_offset, &mut out, footer, &mut ipc_frame_metadata)?;
            }
        }
        Ok((out, ipc_frame_metadata))
    }
}

impl IPCFrameEncoder {
    /// Appends the footer, its little-endian length and the closing magic.
    pub fn append_file_footer<B: StreamBuffer>(
        global_offset: &mut usize,
        out: &mut B,
        footer_bytes: &[u8],
        ipc_frame_meta: &mut IPCFrameMetadata,
    ) -> Result<()> {
        let footer_len = u32::try_from(footer_bytes.len())
            .map_err(|_| IpcError::InvalidArgument("footer exceeds 4 GiB".into()))?;
        out.extend_from_slice(footer_bytes);
        out.extend_from_slice(&footer_len.to_le_bytes());
        ipc_frame_meta.footer_len = footer_bytes.len() + FOOTER_SIZE_PREFIX;
        *global_offset += ipc_frame_meta.footer_len;
        // The closing magic isn't padded
        out.extend_from_slice(ARROW_MAGIC_NUMBER);
        ipc_frame_meta.magic_len += ARROW_MAGIC_NUMBER.len();
        *global_offset += ARROW_MAGIC_NUMBER.len();
        Ok(())
    }

    /// Append the end-of-stream marker: 0xFFFFFFFF followed by 0x00000000
    fn append_eos_marker<B: StreamBuffer>(
        global_offset: &mut usize,
        out: &mut B,
        ipc_frame_meta: &mut IPCFrameMetadata,
    ) {
        out.extend_from_slice(&CONTINUATION_SENTINEL.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        ipc_frame_meta.eos_len = EOS_MARKER_LEN;
        *global_offset += EOS_MARKER_LEN;
    }

    /// Append a single Arrow IPC frame to `out`.
    fn append_message_frame<B: StreamBuffer>(
        global_offset: &mut usize,
        out: &mut B,
        meta: &[u8],
        body: &[u8],
        ipc_frame_meta: &mut IPCFrameMetadata,
    ) -> Result<()> {
        ipc_frame_meta.header_len = CONTINUATION_MARKER_LEN + METADATA_SIZE_PREFIX;
        ipc_frame_meta.meta_len = meta.len();
        ipc_frame_meta.body_len = body.len();

        out.extend_from_slice(&CONTINUATION_SENTINEL.to_le_bytes());
        *global_offset += CONTINUATION_MARKER_LEN;

        // Metadata is padded against the whole output to date so that the body
        // starts on the stream buffer's alignment boundary.
        ipc_frame_meta.meta_pad = align_to::<B>(*global_offset + METADATA_SIZE_PREFIX + meta.len());
        // Body buffers are padded individually by the record encoder; this only
        // guards the 8-byte rule for hand-built bodies.
        ipc_frame_meta.body_pad = align_8(body.len());
        out.reserve(ipc_frame_meta.frame_len());

        let metadata_size = i32::try_from(ipc_frame_meta.metadata_total_len())
            .map_err(|_| IpcError::InvalidArgument("message metadata exceeds 2 GiB".into()))?;
        out.extend_from_slice(&metadata_size.to_le_bytes());
        *global_offset += METADATA_SIZE_PREFIX;

        out.extend_from_slice(meta);
        *global_offset += meta.len();
        if ipc_frame_meta.meta_pad != 0 {
            out.extend_from_slice(&vec![0u8; ipc_frame_meta.meta_pad]);
            *global_offset += ipc_frame_meta.meta_pad;
        }

        out.extend_from_slice(body);
        *global_offset += body.len();
        if ipc_frame_meta.body_pad != 0 {
            out.extend_from_slice(&vec![0u8; ipc_frame_meta.body_pad]);
            *global_offset += ipc_frame_meta.body_pad;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use minarrow::Vec64;

    use super::*;

    fn frame<'a>(meta: &'a [u8], body: &'a [u8], protocol: IPCMessageProtocol) -> IPCFrame<'a> {
        IPCFrame {
            meta,
            body,
            protocol,
            is_first: false,
            is_last: false,
            footer_bytes: None,
        }
    }

    #[test]
    fn test_empty_stream_frame() {
        let (out, metadata) =
            IPCFrameEncoder::encode::<Vec64<u8>>(&mut 0, &frame(&[], &[], IPCMessageProtocol::Stream)).unwrap();
        assert_eq!(out.len(), 0);
        assert_eq!(metadata.frame_len(), 0);
    }

    #[test]
    fn test_stream_message_frame() {
        let meta_buf = vec![0u8; 120];
        let body_buf = vec![1u8; 64];
        let mut offset = 0;
        let (out, metadata) = IPCFrameEncoder::encode::<Vec64<u8>>(
            &mut offset,
            &frame(&meta_buf, &body_buf, IPCMessageProtocol::Stream),
        )
        .unwrap();
        assert_eq!(&out.0[0..4], &CONTINUATION_SENTINEL.to_le_bytes());
        let meta_size = i32::from_le_bytes([out.0[4], out.0[5], out.0[6], out.0[7]]);
        assert_eq!(meta_size as usize, metadata.metadata_total_len());
        // 8 + 120 lands on a 64-byte boundary already
        assert_eq!(metadata.meta_pad, 0);
        assert_eq!(metadata.body_pad, 0);
        assert_eq!(out.len(), 8 + 120 + 64);
        assert_eq!(out.len(), metadata.frame_len());
        assert_eq!(offset, out.len());
    }

    #[test]
    fn test_body_starts_aligned() {
        for meta_size in [1usize, 7, 9, 57, 121] {
            let meta = vec![3u8; meta_size];
            let body = vec![1u8; 64];
            let mut offset = 8;
            let (_, md) = IPCFrameEncoder::encode::<Vec64<u8>>(
                &mut offset,
                &frame(&meta, &body, IPCMessageProtocol::Stream),
            )
            .unwrap();
            assert_eq!((8 + md.header_len + md.metadata_total_len()) % 64, 0, "meta_size={meta_size}");

            let mut offset = 0;
            let (_, md) = IPCFrameEncoder::encode::<Vec<u8>>(
                &mut offset,
                &frame(&meta, &body, IPCMessageProtocol::Stream),
            )
            .unwrap();
            assert_eq!(md.metadata_total_len() % 8, 0);
        }
    }

    #[test]
    fn test_file_first_frame_with_magic() {
        let meta_buf = vec![0u8; 120];
        let mut f = frame(&meta_buf, &[], IPCMessageProtocol::File);
        f.is_first = true;
        let (out, metadata) = IPCFrameEncoder::encode::<Vec<u8>>(&mut 0, &f).unwrap();
        assert_eq!(&out[0..8], ARROW_MAGIC_NUMBER_PADDED);
        assert_eq!(metadata.magic_len, 8);
        assert_eq!(&out[8..12], &CONTINUATION_SENTINEL.to_le_bytes());
    }

    #[test]
    fn test_stream_eos_marker() {
        let mut f = frame(&[], &[], IPCMessageProtocol::Stream);
        f.is_last = true;
        let (out, metadata) = IPCFrameEncoder::encode::<Vec<u8>>(&mut 0, &f).unwrap();
        assert_eq!(out, [0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0]);
        assert_eq!(metadata.eos_len, 8);
    }

    #[test]
    fn test_file_footer() {
        let footer = vec![2u8; 100];
        let mut f = frame(&[], &[], IPCMessageProtocol::File);
        f.is_last = true;
        f.footer_bytes = Some(&footer);
        let mut offset = 0;
        let (out, md) = IPCFrameEncoder::encode::<Vec<u8>>(&mut offset, &f).unwrap();

        assert_eq!(out.len(), 8 + 100 + 4 + 6);
        assert_eq!(offset, out.len());
        assert_eq!(md.frame_len(), out.len());
        assert_eq!(&out[0..8], &[0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0]);
        assert_eq!(&out[8..108], &footer[..]);
        assert_eq!(u32::from_le_bytes([out[108], out[109], out[110], out[111]]), 100);
        assert_eq!(&out[112..118], ARROW_MAGIC_NUMBER);
    }

    #[test]
    fn test_file_last_without_footer_is_an_error() {
        let mut f = frame(&[], &[], IPCMessageProtocol::File);
        f.is_last = true;
        assert!(matches!(
            IPCFrameEncoder::encode::<Vec<u8>>(&mut 0, &f),
            Err(IpcError::InvalidArgument(_))
        ));
    }
}
