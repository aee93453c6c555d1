// --- Constants for IPC format ---

pub const DEFAULT_FRAME_ALLOCATION_SIZE: usize = 64 * 1024; // 64 KiB

/// Largest allocation made ahead of the bytes that fill it when a length comes from input.
pub const READ_CHUNK_LEN: usize = 1 << 20; // 1 MiB

pub const ARROW_MAGIC_NUMBER_PADDED: &[u8] = b"ARROW1\0\0"; // opening magic
pub const ARROW_MAGIC_NUMBER: &[u8] = b"ARROW1"; // closing magic
pub const FILE_OPENING_MAGIC_LEN: usize = 8;
pub const FILE_CLOSING_MAGIC_LEN: usize = 6;
pub const FOOTER_SIZE_PREFIX: usize = 4; // 4 bytes - <footer_size: int32>
pub const EOS_MARKER_LEN: usize = 8; // 8 bytes cont 0xFFFFFFFF + 0u32.
pub const CONTINUATION_MARKER_LEN: usize = 4; // 4 bytes - <continuation: 0xFFFFFFFF>
pub const CONTINUATION_SENTINEL: u32 = 0xFFFF_FFFF;
pub const METADATA_SIZE_PREFIX: usize = 4; // 4 bytes - <metadata_size: int32>

/// Smallest file that can hold both magics and a footer length.
pub const MIN_FILE_LEN: usize = FILE_OPENING_MAGIC_LEN + FOOTER_SIZE_PREFIX + FILE_CLOSING_MAGIC_LEN;

/// Alignment every buffer, block and message boundary must honour.
pub const IPC_ALIGNMENT: usize = 8;

/// Maximum nesting of child fields the loader and schema decoder accept.
pub const MAX_NESTING_DEPTH: usize = 64;

// --- Body compression ---

/// Length of the little-endian `i64` uncompressed-size prefix on compressed buffers.
pub const COMPRESSION_PREFIX_LEN: usize = 8;
/// Prefix value marking a buffer stored without compression.
pub const UNCOMPRESSED_SENTINEL: i64 = -1;

// --- Extension type metadata keys ---

pub const EXTENSION_NAME_KEY: &str = "ARROW:extension:name";
pub const EXTENSION_METADATA_KEY: &str = "ARROW:extension:metadata";
