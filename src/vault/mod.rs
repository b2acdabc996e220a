//! Virtual files: a real file bound to the container codec.

use std::sync::{Arc, OnceLock};

use crate::config::{HEADER_LENGTH, IntegrityPolicy};
use crate::container::{ContainerHeader, DecryptStream, EncryptStream};
use crate::error::{Result, TidelockError};
use crate::file::RealFile;
use crate::integrity;
use crate::secret::DriveKeyMaterial;

pub mod auth;
pub mod drive;

pub use auth::AuthPackage;
pub use drive::Drive;

/// A real file viewed through the container codec: sizes, offsets and
/// stream contents are all in the plaintext domain.
pub struct VaultFile {
    real: Box<dyn RealFile>,
    keys: Arc<DriveKeyMaterial>,
    header: OnceLock<ContainerHeader>,
}

impl VaultFile {
    pub fn new(real: Box<dyn RealFile>, keys: Arc<DriveKeyMaterial>) -> Self {
        Self { real, keys, header: OnceLock::new() }
    }

    pub fn real(&self) -> &dyn RealFile {
        self.real.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.real.exists()
    }

    pub fn name(&self) -> String {
        self.real.name()
    }

    pub fn display_path(&self) -> String {
        self.real.display_path()
    }

    pub fn delete(&self) -> Result<()> {
        self.real.delete()
    }

    /// Writes the container header. Once written it is immutable; a
    /// container that already holds data must be deleted and recreated to
    /// change its nonce or chunk size.
    pub fn create_container(&self, policy: IntegrityPolicy, nonce: u64) -> Result<ContainerHeader> {
        if self.real.exists() && self.real.len()? > 0 {
            return Err(TidelockError::OverwriteNotPermitted);
        }

        let header = ContainerHeader::new(policy.header_chunk_size(), nonce)?;
        let mut stream = self.real.output_stream()?;
        header.write_to(&mut stream)?;
        stream.flush()?;

        let _ = self.header.set(header);
        Ok(header)
    }

    /// The parsed (and cached) container header.
    pub fn header(&self) -> Result<ContainerHeader> {
        if let Some(header) = self.header.get() {
            return Ok(*header);
        }
        let header = ContainerHeader::read_from(self.real.input_stream()?)?;
        Ok(*self.header.get_or_init(|| header))
    }

    /// Plaintext-visible length: physical length minus header and tag
    /// overhead.
    pub fn virtual_len(&self) -> Result<u64> {
        let header = self.header()?;
        let physical = self.real.len()?;
        if physical < HEADER_LENGTH as u64 {
            return Err(TidelockError::MalformedContainer("shorter than header".into()));
        }
        integrity::virtual_len(physical - HEADER_LENGTH as u64, header.chunk_size())
    }

    /// Minimum unit callers must align to when splitting this file into
    /// independently processed ranges.
    pub fn alignment_unit(&self) -> Result<u64> {
        Ok(self.header()?.alignment_unit())
    }

    /// Seekable plaintext reader with chunk verification.
    pub fn decrypt_stream(&self) -> Result<DecryptStream> {
        DecryptStream::new(self.real.input_stream()?, &self.keys, true)
    }

    /// Seekable plaintext reader that skips tag verification. An explicit
    /// salvage mode for diagnostics; never used as a fallback.
    pub fn decrypt_stream_unverified(&self) -> Result<DecryptStream> {
        DecryptStream::new(self.real.input_stream()?, &self.keys, false)
    }

    /// Seekable plaintext writer. `allow_range_rewrite` opts into writing
    /// over ranges whose nonce already produced ciphertext.
    pub fn encrypt_stream(&self, allow_range_rewrite: bool) -> Result<EncryptStream> {
        EncryptStream::new(self.real.output_stream()?, &self.keys, allow_range_rewrite)
    }

    pub fn rename(&self, new_name: &str) -> Result<VaultFile> {
        let parent = self
            .real
            .parent()
            .ok_or_else(|| TidelockError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "file has no parent directory",
            )))?;
        let moved = self.real.move_to(parent.as_ref(), Some(new_name))?;
        Ok(VaultFile::new(moved, Arc::clone(&self.keys)))
    }

    pub fn move_to(&self, dir: &dyn RealFile) -> Result<VaultFile> {
        let moved = self.real.move_to(dir, None)?;
        Ok(VaultFile::new(moved, Arc::clone(&self.keys)))
    }

    /// Byte-for-byte copy; the copy carries the same nonce and ciphertext,
    /// which is safe because the plaintext is identical.
    pub fn copy_to(&self, dir: &dyn RealFile) -> Result<VaultFile> {
        let copied = self.real.copy_to(dir, None)?;
        Ok(VaultFile::new(copied, Arc::clone(&self.keys)))
    }
}
