//! Exports encrypted containers back to plaintext files.

use std::io::{Seek, SeekFrom, Write};
use std::thread;

use tracing::{debug, warn};

use crate::config::TransferConfig;
use crate::error::{Result, TidelockError};
use crate::file::RealFile;
use crate::transfer::{ByteCounter, EngineState, FirstError, Part, ProgressFn, TransferState, plan_parts};
use crate::vault::VaultFile;

/// Decrypts a container into a real file, in parallel for large files.
/// Not re-entrant.
pub struct FileExporter {
    config: TransferConfig,
    engine: EngineState,
}

impl FileExporter {
    pub fn new(config: TransferConfig) -> Self {
        Self { config, engine: EngineState::new() }
    }

    /// Requests cooperative cancellation. The partially written plaintext
    /// target is left in place; it is simply never reported complete.
    pub fn stop(&self) {
        self.engine.request_stop();
    }

    pub fn state(&self) -> TransferState {
        self.engine.current()
    }

    /// Decrypts `source` into `dest`. With `verify` false, chunk tags are
    /// skipped — an explicit salvage mode, never a fallback after an
    /// integrity failure.
    pub fn export(
        &self,
        source: &VaultFile,
        dest: &dyn RealFile,
        delete_source: bool,
        verify: bool,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<()> {
        self.engine.begin()?;

        match self.run(source, dest, verify, progress) {
            Ok(()) => {
                if delete_source {
                    source.delete()?;
                }
                self.engine.finish(TransferState::Completed);
                Ok(())
            }
            Err(TidelockError::TransferStopped) => {
                // Unlike a failure, a cooperative stop keeps the partial
                // plaintext; only promotion to "complete" is withheld.
                self.engine.finish(TransferState::Stopped);
                Err(TidelockError::TransferStopped)
            }
            Err(error) => {
                warn!(source = source.display_path(), %error, "export failed");
                self.discard(dest);
                self.engine.finish(TransferState::Failed);
                Err(TidelockError::TransferFailed(Box::new(error)))
            }
        }
    }

    fn run(
        &self,
        source: &VaultFile,
        dest: &dyn RealFile,
        verify: bool,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<()> {
        let total = source.virtual_len()?;
        let align = source.alignment_unit()?;
        let parts = plan_parts(total, align, &self.config);

        // Fix the target's length up front: a pre-existing longer file
        // would otherwise keep its stale tail past the exported range.
        dest.resize(total)?;

        debug!(
            source = source.display_path(),
            total,
            align,
            workers = parts.len(),
            "exporting"
        );

        if parts.is_empty() {
            return Ok(());
        }

        if parts.len() == 1 {
            return self.export_part(source, dest, parts[0], total, verify, &ByteCounter::new(), progress);
        }

        let counter = ByteCounter::new();
        let first_error = FirstError::new();

        thread::scope(|scope| {
            for part in &parts {
                let counter = &counter;
                let first_error = &first_error;
                scope.spawn(move || {
                    if let Err(error) =
                        self.export_part(source, dest, *part, total, verify, counter, progress)
                    {
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

    fn export_part(
        &self,
        source: &VaultFile,
        dest: &dyn RealFile,
        part: Part,
        total: u64,
        verify: bool,
        counter: &ByteCounter,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<()> {
        let mut input = if verify {
            source.decrypt_stream()?
        } else {
            source.decrypt_stream_unverified()?
        };
        input.seek_to(part.start);

        let mut output = dest.output_stream()?;
        output.seek(SeekFrom::Start(part.start))?;

        let mut buf = vec![0u8; self.config.buffer_size];
        let mut remaining = part.length;

        while remaining > 0 {
            if self.engine.stop_requested() {
                return Err(TidelockError::TransferStopped);
            }

            let want = buf.len().min(remaining as usize);
            let n = input.read_plain(&mut buf[..want])?;
            if n == 0 {
                return Err(TidelockError::MalformedContainer(
                    "container ended before its virtual length".into(),
                ));
            }
            output.write_all(&buf[..n])?;
            remaining -= n as u64;

            let done = counter.add(n as u64);
            if let Some(report) = progress {
                report(done, total);
            }
        }

        output.flush()?;
        debug!(part = part.index, start = part.start, length = part.length, "part exported");
        Ok(())
    }

    fn discard(&self, dest: &dyn RealFile) {
        if !dest.exists() {
            return;
        }
        if let Err(error) = dest.delete() {
            warn!(dest = dest.display_path(), %error, "could not remove partial export");
        }
    }
}
