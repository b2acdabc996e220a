//! Chunk integrity: HMAC-SHA256 tags over ciphertext chunks, plus the size
//! and offset arithmetic that makes a tagged container seekable.
//!
//! Physical layout of the data region (after the container header), with
//! chunk size `C` and tag width `T` = 32:
//!
//! ```text
//! [tag:T][chunk:C][tag:T][chunk:C]...[tag:T][chunk:<=C]
//! ```
//!
//! Each tag is keyed over the chunk's index (8 bytes big-endian) followed by
//! the chunk's ciphertext, so a valid chunk transplanted to another position
//! fails verification.

use hmac::{Hmac, Mac as _};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::TAG_LENGTH;
use crate::error::{Result, TidelockError};

/// Computes and verifies per-chunk HMAC tags.
pub struct ChunkMac {
    key: Vec<u8>,
}

impl ChunkMac {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.is_empty() {
            return Err(TidelockError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty integrity key",
            )));
        }
        Ok(Self { key: key.to_vec() })
    }

    /// Tag for `chunk` at position `chunk_index`.
    pub fn compute(&self, chunk_index: u64, chunk: &[u8]) -> [u8; TAG_LENGTH] {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(&chunk_index.to_be_bytes());
        mac.update(chunk);
        mac.finalize().into_bytes().into()
    }

    /// Constant-time verification. A mismatch leaves the chunk in unknown
    /// state; callers must not release any of its bytes.
    pub fn verify(&self, chunk_index: u64, chunk: &[u8], expected: &[u8]) -> Result<()> {
        let computed = self.compute(chunk_index, chunk);

        if expected.len() != TAG_LENGTH || !bool::from(computed.ct_eq(expected)) {
            return Err(TidelockError::IntegrityViolation { chunk: chunk_index });
        }

        Ok(())
    }
}

/// Total tag bytes needed to cover `plain_len` bytes of plaintext
/// (ciphertext length equals plaintext length under CTR).
pub fn tag_overhead(plain_len: u64, chunk_size: u32) -> u64 {
    if chunk_size == 0 || plain_len == 0 {
        return 0;
    }
    plain_len.div_ceil(u64::from(chunk_size)) * TAG_LENGTH as u64
}

/// Plaintext-visible length of a data region of `data_len` physical bytes
/// (header excluded). Rejects regions that end inside a tag.
pub fn virtual_len(data_len: u64, chunk_size: u32) -> Result<u64> {
    if chunk_size == 0 {
        return Ok(data_len);
    }

    let group = TAG_LENGTH as u64 + u64::from(chunk_size);
    let full_chunks = data_len / group;
    let rem = data_len % group;

    if rem == 0 {
        return Ok(full_chunks * u64::from(chunk_size));
    }
    if rem <= TAG_LENGTH as u64 {
        return Err(TidelockError::MalformedContainer(
            "data region ends inside an integrity tag".into(),
        ));
    }

    Ok(full_chunks * u64::from(chunk_size) + rem - TAG_LENGTH as u64)
}

/// Translates a plaintext offset to its physical offset within the data
/// region (header excluded), landing past the owning chunk's tag.
pub fn physical_offset(virtual_offset: u64, chunk_size: u32) -> u64 {
    if chunk_size == 0 {
        return virtual_offset;
    }

    let chunk = virtual_offset / u64::from(chunk_size);
    let within = virtual_offset % u64::from(chunk_size);
    chunk * (TAG_LENGTH as u64 + u64::from(chunk_size)) + TAG_LENGTH as u64 + within
}

/// Index of the chunk covering a plaintext offset.
pub fn chunk_index(virtual_offset: u64, chunk_size: u32) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    virtual_offset / u64::from(chunk_size)
}
