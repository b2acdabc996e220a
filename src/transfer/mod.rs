//! Parallel transfer engine.
//!
//! Large files are split into cipher/integrity-aligned byte ranges and
//! processed by one worker per range. Workers share nothing mutable except
//! a progress counter and a stop flag; every byte range is owned by exactly
//! one worker, and the destination header/nonce is fixed before any worker
//! starts.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use crate::config::TransferConfig;
use crate::error::TidelockError;

pub mod exporter;
pub mod importer;

pub use exporter::FileExporter;
pub use importer::FileImporter;

/// Advisory progress callback: `(bytes_done, total_bytes)`. Never an
/// indicator of correctness.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, u64) + Sync);

/// Engine lifecycle per invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferState {
    Idle = 0,
    Running = 1,
    Completed = 2,
    Stopped = 3,
    Failed = 4,
}

impl TransferState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Stopped,
            4 => Self::Failed,
            _ => Self::Idle,
        }
    }
}

/// Tracks engine state and enforces non-re-entrancy.
pub(crate) struct EngineState {
    state: AtomicU8,
    stop: AtomicBool,
}

impl EngineState {
    pub(crate) fn new() -> Self {
        Self { state: AtomicU8::new(TransferState::Idle as u8), stop: AtomicBool::new(false) }
    }

    /// Enters `Running`, failing if another invocation holds the engine.
    pub(crate) fn begin(&self) -> Result<(), TidelockError> {
        let previous = self.state.swap(TransferState::Running as u8, Ordering::SeqCst);
        if previous == TransferState::Running as u8 {
            return Err(TidelockError::AlreadyRunning);
        }
        self.stop.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn finish(&self, state: TransferState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn current(&self) -> TransferState {
        TransferState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

/// One worker's byte range. Never spans two workers, never overlaps
/// another part.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Part {
    pub index: usize,
    pub start: u64,
    pub length: u64,
}

/// Splits `total` bytes into per-worker parts whose boundaries fall on
/// multiples of `align`. The part size is rounded **up** to the alignment
/// unit; rounding down would shear chunk and tag boundaries.
pub(crate) fn plan_parts(total: u64, align: u64, config: &TransferConfig) -> Vec<Part> {
    if total == 0 {
        return Vec::new();
    }

    if config.threads <= 1 || total <= config.single_pass_threshold {
        return vec![Part { index: 0, start: 0, length: total }];
    }

    let raw = total.div_ceil(config.threads as u64);
    let part_size = raw.div_ceil(align) * align;
    let count = total.div_ceil(part_size);

    (0..count)
        .map(|i| {
            let start = i * part_size;
            Part { index: i as usize, start, length: (total - start).min(part_size) }
        })
        .collect()
}

/// First-error capture shared across workers. A real failure displaces a
/// bare stop so callers see the cause, not the cancellation it triggered.
pub(crate) struct FirstError {
    slot: Mutex<Option<TidelockError>>,
}

impl FirstError {
    pub(crate) fn new() -> Self {
        Self { slot: Mutex::new(None) }
    }

    pub(crate) fn record(&self, error: TidelockError) {
        let mut slot = self.slot.lock().expect("error slot poisoned");
        match slot.as_ref() {
            None => *slot = Some(error),
            Some(TidelockError::TransferStopped)
                if !matches!(error, TidelockError::TransferStopped) =>
            {
                *slot = Some(error);
            }
            Some(_) => {}
        }
    }

    pub(crate) fn take(&self) -> Option<TidelockError> {
        self.slot.lock().expect("error slot poisoned").take()
    }
}

/// Progress counter summed across parts.
pub(crate) struct ByteCounter {
    done: AtomicU64,
}

impl ByteCounter {
    pub(crate) fn new() -> Self {
        Self { done: AtomicU64::new(0) }
    }

    pub(crate) fn add(&self, delta: u64) -> u64 {
        self.done.fetch_add(delta, Ordering::SeqCst) + delta
    }
}
