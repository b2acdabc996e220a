//! Format constants and runtime configuration.
//!
//! Everything tunable lives here: the container wire layout widths, the
//! integrity chunking defaults, and the explicit [`TransferConfig`] that
//! replaces process-wide toggles so tests stay hermetic.

/// Magic bytes identifying a tidelock container.
pub const MAGIC: [u8; 3] = *b"TLK";

/// Current container format version.
pub const VERSION: u8 = 2;

/// Width of the chunk-size header field in bytes.
pub const CHUNK_SIZE_LENGTH: usize = 4;

/// Width of the per-file nonce in bytes.
///
/// The nonce fills the high half of the 128-bit CTR counter; the low half
/// counts cipher blocks, so one nonce covers the entire file.
pub const NONCE_LENGTH: usize = 8;

/// Total container header length: `[magic:3][version:1][chunkSize:4][nonce:8]`.
pub const HEADER_LENGTH: usize = MAGIC.len() + 1 + CHUNK_SIZE_LENGTH + NONCE_LENGTH;

/// AES block size. The minimum alignment unit when integrity is disabled.
pub const BLOCK_SIZE: usize = 16;

/// Drive and integrity keys are both 256 bits.
pub const KEY_LENGTH: usize = 32;

/// Width of one HMAC-SHA256 chunk tag.
pub const TAG_LENGTH: usize = 32;

/// Default ciphertext chunk covered by one integrity tag.
pub const DEFAULT_CHUNK_SIZE: u32 = 256 * 1024;

/// Upper bound on the chunk size a header may declare.
pub const MAX_CHUNK_SIZE: u32 = 8 * 1024 * 1024;

/// Width of a drive identifier.
pub const DRIVE_ID_LENGTH: usize = 16;

/// Width of a device authorization identifier.
pub const AUTH_ID_LENGTH: usize = 16;

/// Default per-worker I/O buffer for transfers.
pub const DEFAULT_BUFFER_SIZE: usize = 512 * 1024;

/// Default worker count for transfers.
pub const DEFAULT_THREADS: usize = 1;

/// Files at or below this size are always transferred in one synchronous
/// pass; splitting them buys nothing.
pub const SINGLE_PASS_THRESHOLD: u64 = 1024 * 1024;

/// Integrity policy fixed at container creation time.
///
/// The chosen chunk size is written into the header and can never change
/// afterwards without recreating the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegrityPolicy {
    /// No chunk tags; the container is ciphertext only.
    Disabled,

    /// HMAC tag per `chunk_size` bytes of ciphertext. Zero selects
    /// [`DEFAULT_CHUNK_SIZE`].
    Enabled { chunk_size: u32 },
}

impl IntegrityPolicy {
    /// The chunk size this policy puts in the header (0 = disabled).
    pub fn header_chunk_size(self) -> u32 {
        match self {
            Self::Disabled => 0,
            Self::Enabled { chunk_size: 0 } => DEFAULT_CHUNK_SIZE,
            Self::Enabled { chunk_size } => chunk_size,
        }
    }
}

impl Default for IntegrityPolicy {
    fn default() -> Self {
        Self::Enabled { chunk_size: 0 }
    }
}

/// Transfer engine settings, passed explicitly to constructors.
#[derive(Clone, Copy, Debug)]
pub struct TransferConfig {
    /// Per-worker read/write buffer size in bytes.
    pub buffer_size: usize,

    /// Maximum number of concurrent workers.
    pub threads: usize,

    /// Files at or below this size run as a single synchronous pass.
    pub single_pass_threshold: u64,
}

impl TransferConfig {
    pub fn new(buffer_size: usize, threads: usize) -> Self {
        Self {
            buffer_size: if buffer_size == 0 { DEFAULT_BUFFER_SIZE } else { buffer_size },
            threads: if threads == 0 { DEFAULT_THREADS } else { threads },
            single_pass_threshold: SINGLE_PASS_THRESHOLD,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, DEFAULT_THREADS)
    }
}
