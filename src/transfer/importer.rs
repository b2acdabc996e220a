//! Imports plaintext files into encrypted containers.

use std::io::{Read, Seek, SeekFrom};
use std::thread;

use tracing::{debug, warn};

use crate::config::TransferConfig;
use crate::error::{Result, TidelockError};
use crate::file::RealFile;
use crate::transfer::{ByteCounter, EngineState, FirstError, Part, ProgressFn, TransferState, plan_parts};
use crate::vault::VaultFile;

/// Encrypts a real file into an existing (empty) container, in parallel
/// for large files. Not re-entrant: a second call while one is running
/// fails with `AlreadyRunning`.
pub struct FileImporter {
    config: TransferConfig,
    engine: EngineState,
}

impl FileImporter {
    pub fn new(config: TransferConfig) -> Self {
        Self { config, engine: EngineState::new() }
    }

    /// Requests cooperative cancellation. Workers notice within one buffer
    /// cycle; the partially written container is deleted.
    pub fn stop(&self) {
        self.engine.request_stop();
    }

    pub fn state(&self) -> TransferState {
        self.engine.current()
    }

    /// Encrypts `source` into `dest`. The container's header and nonce are
    /// fixed before any worker starts; `delete_source` removes the
    /// original only after the container is fully finalized.
    pub fn import(
        &self,
        source: &dyn RealFile,
        dest: &VaultFile,
        delete_source: bool,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<()> {
        self.engine.begin()?;

        // Fresh containers only: the nonce in dest's header has produced no
        // ciphertext yet, so concurrent range writes below cannot collide
        // with prior data. Checked before the run so the failure path never
        // discards a container that already holds data.
        match dest.virtual_len() {
            Ok(0) => {}
            Ok(_) => {
                self.engine.finish(TransferState::Failed);
                return Err(TidelockError::OverwriteNotPermitted);
            }
            Err(error) => {
                self.engine.finish(TransferState::Failed);
                return Err(error);
            }
        }

        match self.run(source, dest, progress) {
            Ok(()) => {
                if delete_source {
                    // Never delete the only copy before the encrypted copy
                    // is confirmed complete.
                    source.delete()?;
                }
                self.engine.finish(TransferState::Completed);
                Ok(())
            }
            Err(TidelockError::TransferStopped) => {
                self.discard(dest);
                self.engine.finish(TransferState::Stopped);
                Err(TidelockError::TransferStopped)
            }
            Err(error) => {
                warn!(source = source.display_path(), %error, "import failed");
                self.discard(dest);
                self.engine.finish(TransferState::Failed);
                Err(TidelockError::TransferFailed(Box::new(error)))
            }
        }
    }

    fn run(&self, source: &dyn RealFile, dest: &VaultFile, progress: Option<ProgressFn<'_>>) -> Result<()> {
        let total = source.len()?;
        let align = dest.alignment_unit()?;
        let parts = plan_parts(total, align, &self.config);

        debug!(
            source = source.display_path(),
            total,
            align,
            workers = parts.len(),
            "importing"
        );

        if parts.is_empty() {
            return Ok(());
        }

        if parts.len() == 1 {
            return self.import_part(source, dest, parts[0], total, &ByteCounter::new(), progress);
        }

        let counter = ByteCounter::new();
        let first_error = FirstError::new();

        thread::scope(|scope| {
            for part in &parts {
                let counter = &counter;
                let first_error = &first_error;
                scope.spawn(move || {
                    if let Err(error) = self.import_part(source, dest, *part, total, counter, progress) {
                        first_error.record(error);
                        self.engine.request_stop();
                    }
                });
            }
        });

        match first_error.take() {
            Some(error) => Err(error),
            None if self.engine.stop_requested() => Err(TidelockError::TransferStopped),
            None => Ok(()),
        }
    }

    fn import_part(
        &self,
        source: &dyn RealFile,
        dest: &VaultFile,
        part: Part,
        total: u64,
        counter: &ByteCounter,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<()> {
        let mut input = source.input_stream()?;
        input.seek(SeekFrom::Start(part.start))?;

        // Each worker holds its own view positioned at its range; rewrite
        // is enabled because sibling workers interleave writes to the same
        // physical file, all of it fresh ciphertext.
        let mut output = dest.encrypt_stream(true)?;
        output.seek_to(part.start)?;

        // The buffer is rounded up to the alignment unit so every full
        // chunk this worker touches is covered by a single write call and
        // the stream never reads back a hole a sibling's flush left below
        // its own range.
        let align = dest.alignment_unit()? as usize;
        let buffer_size = self.config.buffer_size.div_ceil(align) * align;
        let mut buf = vec![0u8; buffer_size];
        let mut remaining = part.length;

        while remaining > 0 {
            if self.engine.stop_requested() {
                return Err(TidelockError::TransferStopped);
            }

            let want = buf.len().min(remaining as usize);
            input.read_exact(&mut buf[..want])?;
            output.write_plain(&buf[..want])?;
            remaining -= want as u64;

            let done = counter.add(want as u64);
            if let Some(report) = progress {
                report(done, total);
            }
        }

        output.finish()?;
        debug!(part = part.index, start = part.start, length = part.length, "part imported");
        Ok(())
    }

    fn discard(&self, dest: &VaultFile) {
        if let Err(error) = dest.delete() {
            warn!(dest = dest.display_path(), %error, "could not remove partial container");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::config::IntegrityPolicy;
    use crate::file::LocalFile;
    use crate::secret::DriveKeyMaterial;

    fn keys() -> Arc<DriveKeyMaterial> {
        Arc::new(DriveKeyMaterial::new([7u8; 32], [9u8; 32]))
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn source_file(dir: &TempDir, name: &str, data: &[u8]) -> LocalFile {
        let path = dir.path().join(name);
        fs::write(&path, data).unwrap();
        LocalFile::new(path)
    }

    fn container(dir: &TempDir, name: &str, policy: IntegrityPolicy, nonce: u64) -> VaultFile {
        let file = VaultFile::new(Box::new(LocalFile::new(dir.path().join(name))), keys());
        file.create_container(policy, nonce).unwrap();
        file
    }

    fn read_back(file: &VaultFile) -> Vec<u8> {
        let mut stream = file.decrypt_stream().unwrap();
        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut stream, &mut out).unwrap();
        out
    }

    #[test]
    fn test_round_trip_across_chunk_boundaries() {
        let dir = TempDir::new().unwrap();
        let chunk = 256u32;

        for (i, len) in [0usize, 1, 255, 256, 257, 2567].into_iter().enumerate() {
            let data = pattern(len);
            let source = source_file(&dir, &format!("plain-{i}"), &data);
            let dest = container(&dir, &format!("c-{i}.tlk"), IntegrityPolicy::Enabled { chunk_size: chunk }, i as u64);

            let importer = FileImporter::new(TransferConfig::new(64, 1));
            importer.import(&source, &dest, false, None).unwrap();
            assert_eq!(importer.state(), TransferState::Completed);

            assert_eq!(dest.virtual_len().unwrap(), len as u64);
            assert_eq!(read_back(&dest), data, "length {len}");
        }
    }

    #[test]
    fn test_round_trip_without_integrity() {
        let dir = TempDir::new().unwrap();
        let data = pattern(1234);
        let source = source_file(&dir, "plain", &data);
        let dest = container(&dir, "c.tlk", IntegrityPolicy::Disabled, 3);

        FileImporter::new(TransferConfig::default())
            .import(&source, &dest, false, None)
            .unwrap();

        assert_eq!(read_back(&dest), data);
    }

    #[test]
    fn test_parallel_import_matches_serial() {
        let dir = TempDir::new().unwrap();
        let data = pattern(4096 + 77);
        let source = source_file(&dir, "plain", &data);
        let policy = IntegrityPolicy::Enabled { chunk_size: 256 };

        let serial = container(&dir, "serial.tlk", policy, 42);
        FileImporter::new(TransferConfig::new(128, 1))
            .import(&source, &serial, false, None)
            .unwrap();

        let mut config = TransferConfig::new(128, 4);
        config.single_pass_threshold = 64;
        let parallel = container(&dir, "parallel.tlk", policy, 42);
        FileImporter::new(config).import(&source, &parallel, false, None).unwrap();

        // Same key, nonce and chunking: the physical containers must be
        // byte-identical regardless of worker count.
        assert_eq!(
            fs::read(dir.path().join("serial.tlk")).unwrap(),
            fs::read(dir.path().join("parallel.tlk")).unwrap(),
        );
    }

    #[test]
    fn test_parallel_import_without_integrity() {
        let dir = TempDir::new().unwrap();
        let data = pattern(4096 + 5);
        let source = source_file(&dir, "plain", &data);

        let serial = container(&dir, "serial.tlk", IntegrityPolicy::Disabled, 13);
        FileImporter::new(TransferConfig::new(128, 1))
            .import(&source, &serial, false, None)
            .unwrap();

        // Parts align to the AES block here, which never coincides with
        // the stream's buffering granularity.
        let mut config = TransferConfig::new(128, 2);
        config.single_pass_threshold = 64;
        let parallel = container(&dir, "parallel.tlk", IntegrityPolicy::Disabled, 13);
        FileImporter::new(config).import(&source, &parallel, false, None).unwrap();

        assert_eq!(read_back(&parallel), data);
        assert_eq!(
            fs::read(dir.path().join("serial.tlk")).unwrap(),
            fs::read(dir.path().join("parallel.tlk")).unwrap(),
        );
    }

    #[test]
    fn test_rejects_container_with_existing_data() {
        let dir = TempDir::new().unwrap();
        let data = pattern(500);
        let source = source_file(&dir, "plain", &data);
        let dest = container(&dir, "c.tlk", IntegrityPolicy::default(), 5);

        FileImporter::new(TransferConfig::default())
            .import(&source, &dest, false, None)
            .unwrap();

        let again = FileImporter::new(TransferConfig::default());
        let err = again.import(&source, &dest, false, None).unwrap_err();
        assert!(matches!(err, TidelockError::OverwriteNotPermitted));
        assert_eq!(again.state(), TransferState::Failed);

        // The refusal must leave the existing container untouched.
        assert_eq!(read_back(&dest), data);
    }

    #[test]
    fn test_delete_source_after_success() {
        let dir = TempDir::new().unwrap();
        let data = pattern(300);
        let source = source_file(&dir, "plain", &data);
        let dest = container(&dir, "c.tlk", IntegrityPolicy::default(), 8);

        FileImporter::new(TransferConfig::default())
            .import(&source, &dest, true, None)
            .unwrap();

        assert!(!source.exists());
        assert_eq!(read_back(&dest), data);
    }

    #[test]
    fn test_progress_reaches_total() {
        use std::sync::atomic::{AtomicU64, Ordering};

        let dir = TempDir::new().unwrap();
        let data = pattern(1000);
        let source = source_file(&dir, "plain", &data);
        let dest = container(&dir, "c.tlk", IntegrityPolicy::Enabled { chunk_size: 256 }, 9);

        let last = AtomicU64::new(0);
        let report = |done: u64, total: u64| {
            assert_eq!(total, 1000);
            last.fetch_max(done, Ordering::Relaxed);
        };
        FileImporter::new(TransferConfig::new(128, 1))
            .import(&source, &dest, false, Some(&report))
            .unwrap();

        assert_eq!(last.load(Ordering::Relaxed), 1000);
    }
}
