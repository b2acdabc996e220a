//! Error taxonomy for the vault layer.
//!
//! Sequencer and codec failures are typed so callers can tell a policy
//! rejection (overwrite guard, exhausted nonce range) from corruption
//! (malformed header, failed chunk tag). None of these are retried
//! internally; they abort the operation in progress and propagate.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TidelockError>;

#[derive(Debug, Error)]
pub enum TidelockError {
    /// A `{New, Active}` sequence already exists for this drive.
    #[error("nonce sequence already exists for drive {0}")]
    SequenceExists(String),

    /// No sequence record is known for this drive.
    #[error("no nonce sequence for drive {0}")]
    SequenceMissing(String),

    /// The sequence has already been given its nonce bounds.
    #[error("nonce sequence for drive {0} is already initialized")]
    AlreadyInitialized(String),

    /// The device holds no usable authorization for this drive
    /// (uninitialized, wrong auth id, or revoked).
    #[error("device not authorized for drive {0}")]
    NotAuthorized(String),

    /// A nonce range can only shrink toward the cursor; growing it would
    /// let a device issue counters outside what it was granted.
    #[error("max nonce cannot be increased")]
    MaxNonceIncreaseRejected,

    /// The drive's assigned nonce range is exhausted. No further files can
    /// be created until a new range is authorized.
    #[error("nonce range exceeded for drive {0}")]
    RangeExceeded(String),

    /// The on-device sequence store violates its own invariants.
    #[error("sequence store corrupt: {0}")]
    CorruptSequenceStore(String),

    /// The container header could not be parsed.
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    /// A chunk's HMAC tag did not match its ciphertext. The chunk is in
    /// unknown state and none of its bytes were released.
    #[error("integrity check failed for chunk {chunk}")]
    IntegrityViolation { chunk: u64 },

    /// The container already holds ciphertext under this nonce and the
    /// caller did not opt into range rewriting.
    #[error("container already written; range rewrite not enabled")]
    OverwriteNotPermitted,

    /// The transfer engine instance is not re-entrant.
    #[error("a transfer is already running on this engine")]
    AlreadyRunning,

    /// A worker failed mid-transfer; siblings were stopped and partial
    /// output was discarded.
    #[error("transfer failed: {0}")]
    TransferFailed(#[source] Box<TidelockError>),

    /// The transfer was cancelled by a stop request.
    #[error("transfer stopped")]
    TransferStopped,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("sequence store error: {0}")]
    SequenceStore(#[from] serde_json::Error),
}

impl TidelockError {
    /// Wraps this error for transport through `std::io` stream traits.
    pub fn into_io(self) -> io::Error {
        match self {
            Self::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }

    /// Recovers a typed error smuggled through `std::io`.
    pub fn from_io(err: io::Error) -> Self {
        match err.downcast::<TidelockError>() {
            Ok(inner) => inner,
            Err(err) => Self::Io(err),
        }
    }
}
