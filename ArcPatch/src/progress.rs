//! Progress reporting and cancellation for long-running patch operations

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

/// Receives progress updates from packing, export and apply.
pub type ProgressCallback<'a> = &'a (dyn Fn(&PatchProgress) + Sync + Send);

/// Discards every update.
pub fn no_progress(_: &PatchProgress) {}

/// Where a running operation is
#[derive(Debug, Clone)]
pub struct PatchProgress {
    pub phase: PatchPhase,
    /// 1-based position of the current item
    pub current: usize,
    pub total: usize,
    /// Archive or file being worked on
    pub current_file: Option<String>,
}

impl PatchProgress {
    #[must_use]
    pub fn new(phase: PatchPhase, current: usize, total: usize) -> Self {
        Self {
            phase,
            current,
            total,
            current_file: None,
        }
    }

    #[must_use]
    pub fn with_file(
        phase: PatchPhase,
        current: usize,
        total: usize,
        file: impl Into<String>,
    ) -> Self {
        Self {
            phase,
            current,
            total,
            current_file: Some(file.into()),
        }
    }

    /// Fraction done, 1.0 when there is nothing to do
    #[must_use]
    pub fn percentage(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.current as f32 / self.total as f32
        }
    }
}

/// Stage of a patch operation, in the order they occur
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchPhase {
    /// Running modules over an authoring folder
    CollectingFiles,
    /// Writing resources into a patch package or container
    PackingResources,
    /// Reading an archive's file table
    ReadingArchive,
    /// Streaming file data into the rewritten archive
    WritingFiles,
    /// Writing the rebuilt file table
    WritingTable,
    /// Swapping staged files into place
    Committing,
    Complete,
}

impl PatchPhase {
    /// Label shown next to a progress bar
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CollectingFiles => "Collecting files",
            Self::PackingResources => "Packing resources",
            Self::ReadingArchive => "Reading archive",
            Self::WritingFiles => "Writing files",
            Self::WritingTable => "Writing file table",
            Self::Committing => "Committing",
            Self::Complete => "Complete",
        }
    }
}

/// Cooperative cancellation flag shared between a caller and a running operation.
///
/// The engine checks it between files; a cancelled operation never commits.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(Error::Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
