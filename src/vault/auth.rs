//! Device-authorization artifact.
//!
//! A 48-byte payload `[driveId:16][authId:16][startNonce:8][maxNonce:8]`
//! granting another device a disjoint nonce range, stored as ciphertext
//! inside an ordinary container so the handoff file protects itself.

use std::io::Read;
use std::sync::Arc;

use crate::config::{AUTH_ID_LENGTH, DRIVE_ID_LENGTH, IntegrityPolicy, NONCE_LENGTH};
use crate::error::{Result, TidelockError};
use crate::file::RealFile;
use crate::nonce;
use crate::secret::DriveKeyMaterial;
use crate::vault::VaultFile;

const PAYLOAD_LENGTH: usize = DRIVE_ID_LENGTH + AUTH_ID_LENGTH + 2 * NONCE_LENGTH;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthPackage {
    /// Drive identifier, hex.
    pub drive_id: String,

    /// Grantee's authorization identifier, hex.
    pub auth_id: String,

    /// First nonce of the granted range.
    pub start_nonce: u64,

    /// Exclusive upper bound of the granted range.
    pub max_nonce: u64,
}

impl AuthPackage {
    pub fn to_bytes(&self) -> Result<[u8; PAYLOAD_LENGTH]> {
        let mut payload = [0u8; PAYLOAD_LENGTH];
        decode_id(&self.drive_id, &mut payload[..DRIVE_ID_LENGTH])?;
        decode_id(&self.auth_id, &mut payload[DRIVE_ID_LENGTH..DRIVE_ID_LENGTH + AUTH_ID_LENGTH])?;
        payload[32..40].copy_from_slice(&nonce::to_bytes(self.start_nonce));
        payload[40..48].copy_from_slice(&nonce::to_bytes(self.max_nonce));
        Ok(payload)
    }

    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        if payload.len() != PAYLOAD_LENGTH {
            return Err(TidelockError::MalformedContainer(format!(
                "authorization payload must be {PAYLOAD_LENGTH} bytes, got {}",
                payload.len()
            )));
        }

        let mut start = [0u8; NONCE_LENGTH];
        let mut max = [0u8; NONCE_LENGTH];
        start.copy_from_slice(&payload[32..40]);
        max.copy_from_slice(&payload[40..48]);

        Ok(Self {
            drive_id: hex::encode(&payload[..DRIVE_ID_LENGTH]),
            auth_id: hex::encode(&payload[DRIVE_ID_LENGTH..DRIVE_ID_LENGTH + AUTH_ID_LENGTH]),
            start_nonce: nonce::from_bytes(start),
            max_nonce: nonce::from_bytes(max),
        })
    }

    /// Writes the package as an encrypted container under the grantor's
    /// keys, using a nonce the grantor issued for this artifact.
    pub fn write_to(
        &self,
        artifact: Box<dyn RealFile>,
        keys: Arc<DriveKeyMaterial>,
        artifact_nonce: u64,
    ) -> Result<()> {
        let payload = self.to_bytes()?;
        let file = VaultFile::new(artifact, keys);
        file.create_container(IntegrityPolicy::default(), artifact_nonce)?;

        let mut stream = file.encrypt_stream(false)?;
        stream.write_plain(&payload)?;
        stream.finish()
    }

    /// Reads a package back out of its container.
    pub fn read_from(artifact: Box<dyn RealFile>, keys: Arc<DriveKeyMaterial>) -> Result<Self> {
        let file = VaultFile::new(artifact, keys);
        let mut stream = file.decrypt_stream()?;

        let mut payload = [0u8; PAYLOAD_LENGTH];
        stream
            .read_exact(&mut payload)
            .map_err(TidelockError::from_io)?;

        Self::from_bytes(&payload)
    }
}

fn decode_id(id: &str, out: &mut [u8]) -> Result<()> {
    let bytes = hex::decode(id)
        .map_err(|_| TidelockError::MalformedContainer(format!("bad id encoding: {id}")))?;
    if bytes.len() != out.len() {
        return Err(TidelockError::MalformedContainer(format!(
            "id must be {} bytes, got {}",
            out.len(),
            bytes.len()
        )));
    }
    out.copy_from_slice(&bytes);
    Ok(())
}
