//! Drive: the encrypted filesystem root.
//!
//! Binds the injected key material to a real directory and a nonce
//! sequencer. Every container nonce in the drive is issued here, so the
//! no-reuse invariant is enforced in exactly one place.

use std::sync::Arc;

use rand::RngCore;
use tracing::info;

use crate::config::{AUTH_ID_LENGTH, DRIVE_ID_LENGTH, IntegrityPolicy};
use crate::error::{Result, TidelockError};
use crate::file::RealFile;
use crate::nonce;
use crate::secret::DriveKeyMaterial;
use crate::sequence::NonceSequencer;
use crate::vault::{AuthPackage, VaultFile};

pub struct Drive {
    root: Box<dyn RealFile>,
    keys: Arc<DriveKeyMaterial>,
    sequencer: Arc<dyn NonceSequencer>,
    drive_id: String,
    auth_id: String,
}

impl Drive {
    /// Creates a brand-new drive on this device: fresh drive and auth ids,
    /// and a sequence owning the full nonce range.
    pub fn create(
        root: Box<dyn RealFile>,
        keys: DriveKeyMaterial,
        sequencer: Arc<dyn NonceSequencer>,
    ) -> Result<Self> {
        let drive_id = random_id(DRIVE_ID_LENGTH);
        let auth_id = random_id(AUTH_ID_LENGTH);

        sequencer.create_sequence(&drive_id, &auth_id)?;
        sequencer.initialize_sequence(&drive_id, &auth_id, 0, u64::MAX)?;

        info!(drive_id, "created drive");
        Ok(Self { root, keys: Arc::new(keys), sequencer, drive_id, auth_id })
    }

    /// Opens a drive this device is already authorized for.
    pub fn open(
        root: Box<dyn RealFile>,
        keys: DriveKeyMaterial,
        sequencer: Arc<dyn NonceSequencer>,
        drive_id: &str,
        auth_id: &str,
    ) -> Self {
        Self {
            root,
            keys: Arc::new(keys),
            sequencer,
            drive_id: drive_id.to_owned(),
            auth_id: auth_id.to_owned(),
        }
    }

    /// Self-registers this device for an existing drive it has no range
    /// for yet. The returned drive can read but cannot issue nonces until
    /// an authorization artifact is adopted; report [`Self::auth_id`] to
    /// the granting device out of band.
    pub fn link(
        root: Box<dyn RealFile>,
        keys: DriveKeyMaterial,
        sequencer: Arc<dyn NonceSequencer>,
        drive_id: &str,
    ) -> Result<Self> {
        let auth_id = random_id(AUTH_ID_LENGTH);
        sequencer.create_sequence(drive_id, &auth_id)?;

        info!(drive_id, auth_id, "linked drive, awaiting authorization");
        Ok(Self {
            root,
            keys: Arc::new(keys),
            sequencer,
            drive_id: drive_id.to_owned(),
            auth_id,
        })
    }

    pub fn drive_id(&self) -> &str {
        &self.drive_id
    }

    pub fn auth_id(&self) -> &str {
        &self.auth_id
    }

    pub fn root(&self) -> &dyn RealFile {
        self.root.as_ref()
    }

    pub fn keys(&self) -> Arc<DriveKeyMaterial> {
        Arc::clone(&self.keys)
    }

    /// Issues the next nonce from this device's assigned range.
    pub fn next_nonce(&self) -> Result<u64> {
        self.sequencer.next_nonce(&self.drive_id)
    }

    /// Creates an empty container in the drive root, consuming one nonce.
    pub fn create_file(&self, name: &str, policy: IntegrityPolicy) -> Result<VaultFile> {
        let real = self.root.create_file(name)?;
        let file = VaultFile::new(real, self.keys());
        file.create_container(policy, self.next_nonce()?)?;
        Ok(file)
    }

    /// Handle to an existing container in the drive root.
    pub fn file(&self, name: &str) -> VaultFile {
        VaultFile::new(self.root.child(name), self.keys())
    }

    /// All containers in the drive root.
    pub fn list_files(&self) -> Result<Vec<VaultFile>> {
        Ok(self
            .root
            .list_files()?
            .into_iter()
            .filter(|f| !f.is_dir())
            .map(|f| VaultFile::new(f, self.keys()))
            .collect())
    }

    /// Grants `target_auth_id` the upper half of this device's remaining
    /// nonce range and writes the self-protecting artifact. The local
    /// bound shrinks first, so the two ranges can never overlap even if
    /// writing the artifact fails afterwards.
    pub fn authorize(&self, target_auth_id: &str, artifact: Box<dyn RealFile>) -> Result<AuthPackage> {
        let sequence = self
            .sequencer
            .get_sequence(&self.drive_id)?
            .ok_or_else(|| TidelockError::NotAuthorized(self.drive_id.clone()))?;

        let (Some(next), Some(max)) = (sequence.next_nonce, sequence.max_nonce) else {
            return Err(TidelockError::NotAuthorized(self.drive_id.clone()));
        };

        let pivot = nonce::split_point(next, max);
        if pivot <= next {
            // Nothing left to split off.
            return Err(TidelockError::RangeExceeded(self.drive_id.clone()));
        }

        self.sequencer.set_max_nonce(&self.drive_id, &self.auth_id, pivot)?;

        let package = AuthPackage {
            drive_id: self.drive_id.clone(),
            auth_id: target_auth_id.to_owned(),
            start_nonce: pivot,
            max_nonce: max,
        };

        // The artifact itself consumes a nonce from the shrunken range.
        package.write_to(artifact, self.keys(), self.next_nonce()?)?;

        info!(
            drive_id = self.drive_id,
            target_auth_id,
            start = pivot,
            max,
            "authorized device"
        );
        Ok(package)
    }

    /// Imports an authorization artifact produced for this device,
    /// activating the granted range.
    pub fn adopt(&self, artifact: Box<dyn RealFile>) -> Result<()> {
        let package = AuthPackage::read_from(artifact, self.keys())?;

        if package.drive_id != self.drive_id || package.auth_id != self.auth_id {
            return Err(TidelockError::NotAuthorized(self.drive_id.clone()));
        }

        self.sequencer.initialize_sequence(
            &package.drive_id,
            &package.auth_id,
            package.start_nonce,
            package.max_nonce,
        )?;

        info!(
            drive_id = self.drive_id,
            start = package.start_nonce,
            max = package.max_nonce,
            "adopted authorization"
        );
        Ok(())
    }

    /// Permanently revokes this device's sequence for the drive.
    pub fn revoke(&self) -> Result<()> {
        self.sequencer.revoke_sequence(&self.drive_id)
    }
}

fn random_id(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Read;
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::*;
    use crate::file::LocalFile;
    use crate::sequence::FileSequencer;

    fn keys() -> DriveKeyMaterial {
        DriveKeyMaterial::new([1u8; 32], [2u8; 32])
    }

    fn sequencer(dir: &TempDir, name: &str) -> Arc<dyn NonceSequencer> {
        Arc::new(FileSequencer::new(dir.path().join(name)).unwrap())
    }

    fn drive_root(dir: &TempDir) -> PathBuf {
        let root = dir.path().join("drive");
        fs::create_dir_all(&root).unwrap();
        root
    }

    #[test]
    fn test_created_files_get_distinct_nonces() {
        let dir = TempDir::new().unwrap();
        let root = drive_root(&dir);
        let drive = Drive::create(Box::new(LocalFile::new(&root)), keys(), sequencer(&dir, "a.json")).unwrap();

        let one = drive.create_file("one", IntegrityPolicy::default()).unwrap();
        let two = drive.create_file("two", IntegrityPolicy::default()).unwrap();
        assert_ne!(one.header().unwrap().nonce(), two.header().unwrap().nonce());
    }

    #[test]
    fn test_write_and_read_through_drive() {
        let dir = TempDir::new().unwrap();
        let root = drive_root(&dir);
        let drive = Drive::create(Box::new(LocalFile::new(&root)), keys(), sequencer(&dir, "a.json")).unwrap();

        let data: Vec<u8> = (0..700u32).map(|i| (i % 253) as u8).collect();
        let file = drive.create_file("note", IntegrityPolicy::Enabled { chunk_size: 256 }).unwrap();
        let mut writer = file.encrypt_stream(false).unwrap();
        writer.write_plain(&data).unwrap();
        writer.finish().unwrap();

        let mut reader = drive.file("note").decrypt_stream().unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_range_rewrite_merges_with_existing_chunks() {
        let dir = TempDir::new().unwrap();
        let root = drive_root(&dir);
        let drive = Drive::create(Box::new(LocalFile::new(&root)), keys(), sequencer(&dir, "a.json")).unwrap();

        let data: Vec<u8> = (0..700u32).map(|i| (i % 253) as u8).collect();
        let file = drive.create_file("note", IntegrityPolicy::Enabled { chunk_size: 256 }).unwrap();
        let mut writer = file.encrypt_stream(false).unwrap();
        writer.write_plain(&data).unwrap();
        writer.finish().unwrap();

        // Without the flag, a second writer is refused outright.
        assert!(matches!(
            file.encrypt_stream(false),
            Err(TidelockError::OverwriteNotPermitted)
        ));

        // Chunk-aligned rewrite of the second chunk.
        let mut writer = file.encrypt_stream(true).unwrap();
        writer.seek_to(256).unwrap();
        writer.write_plain(&[0xAA; 256]).unwrap();
        // Mid-chunk rewrite lands inside the final partial chunk.
        writer.seek_to(600).unwrap();
        writer.write_plain(&[0xBB; 10]).unwrap();
        writer.finish().unwrap();

        let mut expected = data.clone();
        expected[256..512].fill(0xAA);
        expected[600..610].fill(0xBB);

        let mut reader = file.decrypt_stream().unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_fresh_full_chunk_write_below_flushed_higher_range() {
        let dir = TempDir::new().unwrap();
        let root = drive_root(&dir);
        let drive = Drive::create(Box::new(LocalFile::new(&root)), keys(), sequencer(&dir, "a.json")).unwrap();
        let file = drive.create_file("note", IntegrityPolicy::Enabled { chunk_size: 256 }).unwrap();

        // One writer flushes a high range first, leaving a sparse hole
        // below it, as a sibling import worker would.
        let mut high = file.encrypt_stream(true).unwrap();
        high.seek_to(1024).unwrap();
        high.write_plain(&[0x11; 256]).unwrap();
        high.finish().unwrap();

        // A second writer's fresh full-chunk write at the bottom must not
        // read the hole back and trip verification.
        let mut low = file.encrypt_stream(true).unwrap();
        low.write_plain(&[0x22; 256]).unwrap();
        low.finish().unwrap();

        let mut reader = file.decrypt_stream().unwrap();
        let mut buf = [0u8; 256];
        assert_eq!(reader.read_plain(&mut buf).unwrap(), 256);
        assert_eq!(buf, [0x22; 256]);

        reader.seek_to(1024);
        assert_eq!(reader.read_plain(&mut buf).unwrap(), 256);
        assert_eq!(buf, [0x11; 256]);
    }

    #[test]
    fn test_authorize_hands_off_disjoint_range() {
        let dir = TempDir::new().unwrap();
        let root = drive_root(&dir);
        let a = Drive::create(Box::new(LocalFile::new(&root)), keys(), sequencer(&dir, "a.json")).unwrap();
        let b = Drive::link(
            Box::new(LocalFile::new(&root)),
            keys(),
            sequencer(&dir, "b.json"),
            a.drive_id(),
        )
        .unwrap();

        // Unadopted devices cannot issue nonces.
        assert!(b.next_nonce().is_err());

        let artifact = dir.path().join("grant.tlk");
        let package = a.authorize(b.auth_id(), Box::new(LocalFile::new(&artifact))).unwrap();
        b.adopt(Box::new(LocalFile::new(&artifact))).unwrap();

        // Granter stays strictly below the pivot, grantee starts at it.
        for _ in 0..8 {
            assert!(a.next_nonce().unwrap() < package.start_nonce);
        }
        assert_eq!(b.next_nonce().unwrap(), package.start_nonce);
        assert!(b.next_nonce().unwrap() > package.start_nonce);
    }

    #[test]
    fn test_adopt_rejects_artifact_for_other_device() {
        let dir = TempDir::new().unwrap();
        let root = drive_root(&dir);
        let a = Drive::create(Box::new(LocalFile::new(&root)), keys(), sequencer(&dir, "a.json")).unwrap();
        let b = Drive::link(
            Box::new(LocalFile::new(&root)),
            keys(),
            sequencer(&dir, "b.json"),
            a.drive_id(),
        )
        .unwrap();
        let c = Drive::link(
            Box::new(LocalFile::new(&root)),
            keys(),
            sequencer(&dir, "c.json"),
            a.drive_id(),
        )
        .unwrap();

        let artifact = dir.path().join("grant.tlk");
        a.authorize(b.auth_id(), Box::new(LocalFile::new(&artifact))).unwrap();

        let err = c.adopt(Box::new(LocalFile::new(&artifact))).unwrap_err();
        assert!(matches!(err, TidelockError::NotAuthorized(_)));
        assert!(c.next_nonce().is_err());
    }

    #[test]
    fn test_revoked_drive_cannot_issue_nonces() {
        let dir = TempDir::new().unwrap();
        let root = drive_root(&dir);
        let drive = Drive::create(Box::new(LocalFile::new(&root)), keys(), sequencer(&dir, "a.json")).unwrap();

        drive.next_nonce().unwrap();
        drive.revoke().unwrap();

        let err = drive.next_nonce().unwrap_err();
        assert!(matches!(err, TidelockError::NotAuthorized(_)));
    }

    #[test]
    fn test_list_files_sees_created_containers() {
        let dir = TempDir::new().unwrap();
        let root = drive_root(&dir);
        let drive = Drive::create(Box::new(LocalFile::new(&root)), keys(), sequencer(&dir, "a.json")).unwrap();

        drive.create_file("one", IntegrityPolicy::default()).unwrap();
        drive.create_file("two", IntegrityPolicy::Disabled).unwrap();

        let mut names: Vec<String> = drive.list_files().unwrap().iter().map(|f| f.name()).collect();
        names.sort();
        assert_eq!(names, ["one", "two"]);
    }
}
