//! File-backed nonce sequencer.
//!
//! All mutation happens inside one mutex-guarded critical section: load the
//! whole record set, change one record, persist atomically (temp file +
//! rename), and only then return. A crash between persist and caller use
//! burns at most one nonce, which is harmless; returning before persisting
//! could hand the same nonce out twice, which is fatal to CTR mode.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Result, TidelockError};
use crate::nonce;
use crate::sequence::{JsonSequenceSerializer, NonceSequence, NonceSequencer, SequenceStatus};
use crate::sequence::serializer::SequenceSerializer;

pub struct FileSequencer<S: SequenceSerializer = JsonSequenceSerializer> {
    path: PathBuf,
    serializer: S,
    lock: Mutex<()>,
}

impl FileSequencer<JsonSequenceSerializer> {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_serializer(path, JsonSequenceSerializer)
    }
}

impl<S: SequenceSerializer> FileSequencer<S> {
    pub fn with_serializer(path: impl Into<PathBuf>, serializer: S) -> Result<Self> {
        let sequencer = Self { path: path.into(), serializer, lock: Mutex::new(()) };
        if !sequencer.path.exists() {
            if let Some(parent) = sequencer.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            sequencer.save(&HashMap::new())?;
        }
        Ok(sequencer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, NonceSequence>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        self.serializer.deserialize(&contents)
    }

    /// Whole-set rewrite through a temp file so a crash never leaves a
    /// half-written store behind.
    fn save(&self, sequences: &HashMap<String, NonceSequence>) -> Result<()> {
        let contents = self.serializer.serialize(sequences)?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// The single live (`New` or `Active`) record for a drive. Two live
    /// records for one drive means the store is corrupt.
    fn live<'a>(
        sequences: &'a mut HashMap<String, NonceSequence>,
        drive_id: &str,
    ) -> Result<Option<&'a mut NonceSequence>> {
        let mut live_keys: Vec<String> = sequences
            .iter()
            .filter(|(_, s)| s.drive_id == drive_id && s.status != SequenceStatus::Revoked)
            .map(|(k, _)| k.clone())
            .collect();

        match live_keys.len() {
            0 => Ok(None),
            1 => Ok(sequences.get_mut(&live_keys.remove(0))),
            n => Err(TidelockError::CorruptSequenceStore(format!(
                "{n} live sequences for drive {drive_id}"
            ))),
        }
    }
}

impl<S: SequenceSerializer> NonceSequencer for FileSequencer<S> {
    fn create_sequence(&self, drive_id: &str, auth_id: &str) -> Result<()> {
        let _guard = self.lock.lock().expect("sequencer lock poisoned");
        let mut sequences = self.load()?;

        if Self::live(&mut sequences, drive_id)?.is_some() {
            return Err(TidelockError::SequenceExists(drive_id.to_owned()));
        }

        let key = format!("{drive_id}:{auth_id}");
        sequences.insert(key, NonceSequence::new(drive_id, auth_id));
        self.save(&sequences)?;

        debug!(drive_id, auth_id, "registered nonce sequence");
        Ok(())
    }

    fn initialize_sequence(&self, drive_id: &str, auth_id: &str, start_nonce: u64, max_nonce: u64) -> Result<()> {
        if start_nonce > max_nonce {
            return Err(TidelockError::RangeExceeded(drive_id.to_owned()));
        }

        let _guard = self.lock.lock().expect("sequencer lock poisoned");
        let mut sequences = self.load()?;

        let Some(sequence) = Self::live(&mut sequences, drive_id)? else {
            return Err(TidelockError::SequenceMissing(drive_id.to_owned()));
        };
        if sequence.next_nonce.is_some() {
            return Err(TidelockError::AlreadyInitialized(drive_id.to_owned()));
        }
        if sequence.auth_id != auth_id {
            return Err(TidelockError::NotAuthorized(drive_id.to_owned()));
        }

        sequence.next_nonce = Some(start_nonce);
        sequence.max_nonce = Some(max_nonce);
        sequence.status = SequenceStatus::Active;
        self.save(&sequences)?;

        debug!(drive_id, start_nonce, max_nonce, "initialized nonce sequence");
        Ok(())
    }

    fn set_max_nonce(&self, drive_id: &str, auth_id: &str, max_nonce: u64) -> Result<()> {
        let _guard = self.lock.lock().expect("sequencer lock poisoned");
        let mut sequences = self.load()?;

        let record = sequences
            .values_mut()
            .find(|s| s.drive_id == drive_id && s.auth_id == auth_id);

        let Some(sequence) = record else {
            return Err(TidelockError::SequenceMissing(drive_id.to_owned()));
        };
        if sequence.status == SequenceStatus::Revoked {
            return Err(TidelockError::NotAuthorized(drive_id.to_owned()));
        }
        let Some(current_max) = sequence.max_nonce else {
            return Err(TidelockError::NotAuthorized(drive_id.to_owned()));
        };
        if max_nonce > current_max {
            return Err(TidelockError::MaxNonceIncreaseRejected);
        }

        sequence.max_nonce = Some(max_nonce);
        self.save(&sequences)?;

        debug!(drive_id, max_nonce, "shrank nonce range");
        Ok(())
    }

    fn next_nonce(&self, drive_id: &str) -> Result<u64> {
        let _guard = self.lock.lock().expect("sequencer lock poisoned");
        let mut sequences = self.load()?;

        let Some(sequence) = Self::live(&mut sequences, drive_id)? else {
            return Err(TidelockError::NotAuthorized(drive_id.to_owned()));
        };
        if sequence.status != SequenceStatus::Active {
            return Err(TidelockError::NotAuthorized(drive_id.to_owned()));
        }
        let (Some(current), Some(max)) = (sequence.next_nonce, sequence.max_nonce) else {
            return Err(TidelockError::NotAuthorized(drive_id.to_owned()));
        };

        sequence.next_nonce = Some(nonce::increased(current, max, drive_id)?);

        // Durability precedes use: the advanced cursor hits disk before the
        // caller ever sees the value.
        self.save(&sequences)?;

        debug!(drive_id, nonce = current, "issued nonce");
        Ok(current)
    }

    fn revoke_sequence(&self, drive_id: &str) -> Result<()> {
        let _guard = self.lock.lock().expect("sequencer lock poisoned");
        let mut sequences = self.load()?;

        let Some(sequence) = Self::live(&mut sequences, drive_id)? else {
            let revoked = sequences
                .values()
                .any(|s| s.drive_id == drive_id && s.status == SequenceStatus::Revoked);
            return Err(if revoked {
                TidelockError::NotAuthorized(drive_id.to_owned())
            } else {
                TidelockError::SequenceMissing(drive_id.to_owned())
            });
        };

        sequence.status = SequenceStatus::Revoked;
        self.save(&sequences)?;

        debug!(drive_id, "revoked nonce sequence");
        Ok(())
    }

    fn get_sequence(&self, drive_id: &str) -> Result<Option<NonceSequence>> {
        let _guard = self.lock.lock().expect("sequencer lock poisoned");
        let mut sequences = self.load()?;
        Ok(Self::live(&mut sequences, drive_id)?.map(|s| s.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    fn sequencer(dir: &tempfile::TempDir) -> FileSequencer {
        FileSequencer::new(dir.path().join("sequences.json")).unwrap()
    }

    #[test]
    fn test_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let seq = sequencer(&dir);

        seq.create_sequence("drive", "auth").unwrap();
        assert!(matches!(
            seq.create_sequence("drive", "other"),
            Err(TidelockError::SequenceExists(_))
        ));

        // Not initialized yet: no nonces.
        assert!(matches!(seq.next_nonce("drive"), Err(TidelockError::NotAuthorized(_))));

        seq.initialize_sequence("drive", "auth", 0, 100).unwrap();
        assert!(matches!(
            seq.initialize_sequence("drive", "auth", 0, 100),
            Err(TidelockError::AlreadyInitialized(_))
        ));

        assert_eq!(seq.next_nonce("drive").unwrap(), 0);
        assert_eq!(seq.next_nonce("drive").unwrap(), 1);

        seq.revoke_sequence("drive").unwrap();
        assert!(matches!(seq.next_nonce("drive"), Err(TidelockError::NotAuthorized(_))));
        assert!(matches!(
            seq.revoke_sequence("drive"),
            Err(TidelockError::NotAuthorized(_))
        ));
    }

    #[test]
    fn test_missing_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let seq = sequencer(&dir);

        assert!(matches!(
            seq.initialize_sequence("nope", "a", 0, 10),
            Err(TidelockError::SequenceMissing(_))
        ));
        assert!(matches!(
            seq.set_max_nonce("nope", "a", 5),
            Err(TidelockError::SequenceMissing(_))
        ));
        assert!(matches!(
            seq.revoke_sequence("nope"),
            Err(TidelockError::SequenceMissing(_))
        ));
        assert!(matches!(seq.next_nonce("nope"), Err(TidelockError::NotAuthorized(_))));
    }

    #[test]
    fn test_max_nonce_only_shrinks() {
        let dir = tempfile::tempdir().unwrap();
        let seq = sequencer(&dir);

        seq.create_sequence("drive", "auth").unwrap();
        seq.initialize_sequence("drive", "auth", 0, 100).unwrap();

        seq.set_max_nonce("drive", "auth", 50).unwrap();
        assert!(matches!(
            seq.set_max_nonce("drive", "auth", 51),
            Err(TidelockError::MaxNonceIncreaseRejected)
        ));
        assert_eq!(seq.get_sequence("drive").unwrap().unwrap().max_nonce, Some(50));
    }

    #[test]
    fn test_range_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let seq = sequencer(&dir);

        seq.create_sequence("drive", "auth").unwrap();
        seq.initialize_sequence("drive", "auth", 0, 2).unwrap();

        assert_eq!(seq.next_nonce("drive").unwrap(), 0);
        assert_eq!(seq.next_nonce("drive").unwrap(), 1);
        assert!(matches!(seq.next_nonce("drive"), Err(TidelockError::RangeExceeded(_))));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sequences.json");

        {
            let seq = FileSequencer::new(&path).unwrap();
            seq.create_sequence("drive", "auth").unwrap();
            seq.initialize_sequence("drive", "auth", 10, 20).unwrap();
            assert_eq!(seq.next_nonce("drive").unwrap(), 10);
        }

        let seq = FileSequencer::new(&path).unwrap();
        assert_eq!(seq.next_nonce("drive").unwrap(), 11);
    }

    #[test]
    fn test_concurrent_nonces_unique_and_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let seq = Arc::new(sequencer(&dir));

        seq.create_sequence("drive", "auth").unwrap();
        seq.initialize_sequence("drive", "auth", 0, 10_000).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let seq = Arc::clone(&seq);
            handles.push(std::thread::spawn(move || {
                (0..50).map(|_| seq.next_nonce("drive").unwrap()).collect::<Vec<u64>>()
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            let values = handle.join().unwrap();
            // Strictly increasing within each caller.
            assert!(values.windows(2).all(|w| w[0] < w[1]));
            all.extend(values);
        }

        let unique: HashSet<u64> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len(), "a nonce was issued twice");
    }
}
