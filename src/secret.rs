//! In-memory key material.
//!
//! Keys arrive from the authentication layer already derived; this crate
//! never sees a password. Both keys are wiped when the material is dropped.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::KEY_LENGTH;

/// The two 256-bit keys a drive operates with: one for the AES-CTR
/// transform, one for the HMAC chunk tags.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DriveKeyMaterial {
    drive_key: [u8; KEY_LENGTH],
    hmac_key: [u8; KEY_LENGTH],
}

impl DriveKeyMaterial {
    pub fn new(drive_key: [u8; KEY_LENGTH], hmac_key: [u8; KEY_LENGTH]) -> Self {
        Self { drive_key, hmac_key }
    }

    /// Splits a combined 64-byte blob into cipher and HMAC keys.
    pub fn from_combined(combined: &[u8; 2 * KEY_LENGTH]) -> Self {
        let mut drive_key = [0u8; KEY_LENGTH];
        let mut hmac_key = [0u8; KEY_LENGTH];
        drive_key.copy_from_slice(&combined[..KEY_LENGTH]);
        hmac_key.copy_from_slice(&combined[KEY_LENGTH..]);
        Self { drive_key, hmac_key }
    }

    pub fn drive_key(&self) -> &[u8; KEY_LENGTH] {
        &self.drive_key
    }

    pub fn hmac_key(&self) -> &[u8; KEY_LENGTH] {
        &self.hmac_key
    }
}

impl std::fmt::Debug for DriveKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DriveKeyMaterial([redacted])")
    }
}
