//! Sequential file packer and the archive rewrite engine

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{
    ArchiveDataManager, ArchiveFileItem, ArchiveFileSource, ArchiveHandle, FileEntry, ReadSeek,
    WriteSeek,
};
use crate::error::{Error, Result};
use crate::progress::{CancellationToken, PatchPhase, PatchProgress, ProgressCallback};

/// Streams file data into an archive being written, one file at a time.
///
/// Every file lands at the output's current position; the returned entry records the
/// new offset and sizes so the format writer can build its table afterwards.
pub struct FilePacker<'a> {
    source: Option<&'a mut dyn ReadSeek>,
    cancel: &'a CancellationToken,
    progress: ProgressCallback<'a>,
    total: usize,
    packed: usize,
}

impl<'a> FilePacker<'a> {
    /// `source` is the archive being replaced; it is required for `Unchanged` items.
    pub fn new(
        source: Option<&'a mut dyn ReadSeek>,
        cancel: &'a CancellationToken,
        progress: ProgressCallback<'a>,
        total: usize,
    ) -> Self {
        Self {
            source,
            cancel,
            progress,
            total,
            packed: 0,
        }
    }

    /// Number of files packed so far
    #[must_use]
    pub fn packed(&self) -> usize {
        self.packed
    }

    /// Write one item at the output's current position and return its final entry
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] if cancellation was requested, or any I/O or codec
    /// error from producing the bytes.
    pub fn pack(
        &mut self,
        manager: &dyn ArchiveDataManager,
        output: &mut dyn WriteSeek,
        item: ArchiveFileItem<'_>,
    ) -> Result<FileEntry> {
        self.cancel.check()?;

        self.packed += 1;
        (self.progress)(&PatchProgress::with_file(
            PatchPhase::WritingFiles,
            self.packed,
            self.total,
            &item.path,
        ));

        let start = output.stream_position()?;
        let ArchiveFileItem {
            path,
            source,
            entry,
        } = item;

        let mut output = output;
        let entry = match source {
            ArchiveFileSource::Unchanged => {
                let original = entry.ok_or_else(|| missing_entry(&path))?;
                let source = self
                    .source
                    .as_deref_mut()
                    .ok_or_else(|| Error::InvalidPath(format!("no source archive for {path}")))?;
                if manager.reencodes_on_move() && original.offset() != start {
                    let stored = super::read_stored(source, &original)?;
                    Self::move_stored(manager, &mut *output, original, &stored, start)?
                } else {
                    source.seek(io::SeekFrom::Start(original.offset()))?;
                    let copied = io::copy(&mut Read::take(&mut *source, original.stored_size()), &mut output)?;
                    if copied != original.stored_size() {
                        return Err(super::invalid(manager.id(), format!("{path} is truncated")));
                    }
                    let mut moved = original;
                    moved.set_offset(start);
                    moved
                }
            }
            ArchiveFileSource::Stored(generate) => {
                let original = entry.ok_or_else(|| missing_entry(&path))?;
                let stored = generate()?;
                if manager.reencodes_on_move() && original.offset() != start {
                    Self::move_stored(manager, &mut *output, original, &stored, start)?
                } else {
                    output.write_all(&stored)?;
                    let mut moved = original;
                    moved.set_offset(start);
                    moved
                }
            }
            ArchiveFileSource::Replaced(generate) | ArchiveFileSource::Added(generate) => {
                let mut new_entry = manager.new_entry(&path, entry.as_ref())?;
                new_entry.set_offset(start);
                let content = generate()?;
                manager.encode_file(&mut content.as_slice(), &mut output, &new_entry)?;
                let end = output.stream_position()?;
                new_entry.set_sizes(content.len() as u64, end - start);
                new_entry
            }
        };

        Ok(entry)
    }

    /// Decode bytes stored for `original` and re-encode them for `offset`
    fn move_stored(
        manager: &dyn ArchiveDataManager,
        output: &mut dyn WriteSeek,
        original: FileEntry,
        stored: &[u8],
        offset: u64,
    ) -> Result<FileEntry> {
        let mut content = Vec::with_capacity(stored.len());
        manager.decode_file(&mut &stored[..], &mut content, &original)?;

        let mut moved = original;
        moved.set_offset(offset);
        let mut output = output;
        manager.encode_file(&mut content.as_slice(), &mut output, &moved)?;
        let end = output.stream_position()?;
        moved.set_sizes(content.len() as u64, end - offset);
        Ok(moved)
    }
}

fn missing_entry(path: &str) -> Error {
    Error::InvalidPath(format!("{path} has no file entry to copy from"))
}

/// A rewritten archive waiting in a temporary file next to its target.
pub struct StagedArchive {
    target: PathBuf,
    temp: NamedTempFile,
    entries: Vec<FileEntry>,
}

impl std::fmt::Debug for StagedArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedArchive")
            .field("target", &self.target)
            .field("temp", &self.temp.path())
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl StagedArchive {
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Final table entries of the staged archive, in table order
    #[must_use]
    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    /// Atomically replace the target archive with the staged file
    ///
    /// # Errors
    /// Returns an error if the rename fails; the target is left as it was.
    pub fn commit(self) -> Result<()> {
        self.temp
            .persist(&self.target)
            .map_err(|err| Error::rewrite(&self.target, err.into()))?;
        tracing::debug!("Swapped in rewritten archive {}", self.target.display());
        Ok(())
    }
}

/// Drives an [`ArchiveDataManager`] to produce a complete replacement archive.
pub struct RewriteEngine<'a> {
    manager: &'a dyn ArchiveDataManager,
    cancel: &'a CancellationToken,
    progress: ProgressCallback<'a>,
}

impl<'a> RewriteEngine<'a> {
    pub fn new(
        manager: &'a dyn ArchiveDataManager,
        cancel: &'a CancellationToken,
        progress: ProgressCallback<'a>,
    ) -> Self {
        Self {
            manager,
            cancel,
            progress,
        }
    }

    /// Write a new archive for `target` into a sibling temporary file.
    ///
    /// Nothing at `target` changes until the returned [`StagedArchive`] is committed;
    /// dropping it deletes the temporary file.
    ///
    /// # Errors
    /// Any failure other than [`Error::Cancelled`] is reported as [`Error::RewriteFailure`].
    pub fn stage(
        &self,
        target: &Path,
        handle: &ArchiveHandle,
        files: Vec<ArchiveFileItem<'_>>,
    ) -> Result<StagedArchive> {
        self.stage_inner(target, handle, files)
            .map_err(|err| Error::rewrite(target, err))
    }

    fn stage_inner(
        &self,
        target: &Path,
        handle: &ArchiveHandle,
        files: Vec<ArchiveFileItem<'_>>,
    ) -> Result<StagedArchive> {
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let mut source = if target.exists() {
            Some(BufReader::new(File::open(target)?))
        } else {
            None
        };

        let temp = tempfile::Builder::new()
            .prefix(".arcpatch-rewrite-")
            .tempfile_in(&dir)?;

        let total = files.len();
        tracing::debug!(
            "Rewriting {} ({} files, format {})",
            target.display(),
            total,
            self.manager.id()
        );

        let mut output = BufWriter::new(temp);
        let entries = {
            let mut packer = FilePacker::new(
                source.as_mut().map(|s| s as &mut dyn ReadSeek),
                self.cancel,
                self.progress,
                total,
            );
            self.manager
                .write_archive(handle, &mut output, files, &mut packer)?
        };
        self.cancel.check()?;

        let temp = output.into_inner().map_err(io::IntoInnerError::into_error)?;
        temp.as_file().sync_all()?;

        (self.progress)(&PatchProgress::with_file(
            PatchPhase::WritingTable,
            total,
            total,
            target.display().to_string(),
        ));

        Ok(StagedArchive {
            target: target.to_path_buf(),
            temp,
            entries,
        })
    }
}
