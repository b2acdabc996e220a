//! Nonce sequencing.
//!
//! The sequencer is the single source of truth preventing CTR counter
//! reuse: every nonce a drive ever uses is handed out here, persisted
//! before it is returned, and never handed out twice. Ranges granted to
//! other devices are disjoint by construction, so the invariant holds
//! across devices sharing a drive.

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod file_sequencer;
pub mod serializer;

pub use file_sequencer::FileSequencer;
pub use serializer::{JsonSequenceSerializer, SequenceSerializer};

/// Lifecycle of a sequence record.
///
/// `New` holds the slot between registration and authorization; `Active`
/// issues nonces; `Revoked` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceStatus {
    New,
    Active,
    Revoked,
}

/// One persisted record per (drive, device-authorization) pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NonceSequence {
    /// Drive identifier, hex.
    pub drive_id: String,

    /// Device authorization identifier, hex.
    pub auth_id: String,

    /// Next nonce to hand out. `None` until the sequence is initialized
    /// with its bounds.
    pub next_nonce: Option<u64>,

    /// Exclusive upper bound of this device's range. Shrinks when a
    /// sub-range is granted away; never grows.
    pub max_nonce: Option<u64>,

    pub status: SequenceStatus,
}

impl NonceSequence {
    pub fn new(drive_id: &str, auth_id: &str) -> Self {
        Self {
            drive_id: drive_id.to_owned(),
            auth_id: auth_id.to_owned(),
            next_nonce: None,
            max_nonce: None,
            status: SequenceStatus::New,
        }
    }
}

/// Contract every sequencer backend must honor. The read-advance-persist
/// step of [`next_nonce`](Self::next_nonce) is atomic with respect to
/// concurrent callers, and the advanced value is durable before the
/// pre-advance value is returned.
pub trait NonceSequencer: Send + Sync {
    /// Registers a `New` record. Fails with `SequenceExists` if a live
    /// (`New` or `Active`) record for the drive is already present.
    fn create_sequence(&self, drive_id: &str, auth_id: &str) -> Result<()>;

    /// Sets the record's nonce bounds and activates it. Exactly once:
    /// re-initialization fails with `AlreadyInitialized`.
    fn initialize_sequence(&self, drive_id: &str, auth_id: &str, start_nonce: u64, max_nonce: u64) -> Result<()>;

    /// Shrinks the record's exclusive upper bound. Growing it is rejected.
    fn set_max_nonce(&self, drive_id: &str, auth_id: &str, max_nonce: u64) -> Result<()>;

    /// Atomically reads the cursor, advances it, persists the advanced
    /// value, and returns the pre-advance value.
    fn next_nonce(&self, drive_id: &str) -> Result<u64>;

    /// Irreversibly ends the sequence; all later `next_nonce` calls fail.
    fn revoke_sequence(&self, drive_id: &str) -> Result<()>;

    /// The live (`New` or `Active`) record for a drive, if any.
    fn get_sequence(&self, drive_id: &str) -> Result<Option<NonceSequence>>;
}
