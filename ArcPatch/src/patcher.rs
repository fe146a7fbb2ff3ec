//! Applying and restoring an installation's enabled patches
//!
//! Every apply rebuilds each touched archive from its *pristine* file list, which is
//! reconstructed from the current archive and the container's history: files the
//! history added are dropped, replaced and removed files come back from the
//! container's backups at their recorded positions. The composed overlay is then laid
//! over that pristine list. Because the result depends only on the pristine state and
//! the overlay, applying the same enabled set twice gives the same bytes, and an empty
//! overlay restores the pristine archive.
//!
//! Nothing is committed until every archive and loose file has been staged. The
//! container is committed first, then the archives, then loose files; if the process
//! dies in between, the next apply still rebuilds from the committed history.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::archive::{
    self, ArchiveDataManager, ArchiveFileItem, ArchiveFileSource, ArchiveRegistry,
    ByteGenerator, FileEntry, RewriteEngine, StagedArchive,
};
use crate::config::ApplySettings;
use crate::container::{Overlay, OverlayBase, OverlayEntry, PatchContainer};
use crate::error::{Error, Result};
use crate::installation::GameInstallation;
use crate::manifest::{ArchiveLocation, ModFilePath, PatchHistoryManifest, PatchManifest, PristineEntry};
use crate::modules::ModuleRegistry;
use crate::progress::{
    CancellationToken, PatchPhase, PatchProgress, ProgressCallback, no_progress,
};
use crate::store::StoreLock;
use crate::utils::Checksum;

/// Summary of a successful apply or restore
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Archives that were rewritten
    pub archives_rewritten: usize,
    /// Loose files written or deleted
    pub loose_files_changed: usize,
    /// Paths the installation now has on top of its pristine state
    pub added: usize,
    pub replaced: usize,
    pub removed: usize,
}

/// Applies the enabled patches of a [`PatchContainer`] to a [`GameInstallation`].
pub struct Patcher<'a> {
    archives: &'a ArchiveRegistry,
    modules: &'a ModuleRegistry,
    settings: ApplySettings,
    cancel: CancellationToken,
    progress: ProgressCallback<'a>,
}

impl<'a> Patcher<'a> {
    pub fn new(archives: &'a ArchiveRegistry, modules: &'a ModuleRegistry) -> Self {
        Self {
            archives,
            modules,
            settings: ApplySettings::default(),
            cancel: CancellationToken::new(),
            progress: &no_progress,
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ApplySettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressCallback<'a>) -> Self {
        self.progress = progress;
        self
    }

    /// Bring the installation to "pristine + enabled patches, in order".
    ///
    /// On failure the installation is untouched and the container is reloaded from
    /// its last committed state.
    ///
    /// # Errors
    /// Returns [`Error::ResourceLocked`] if an archive is in use by another apply,
    /// [`Error::RewriteFailure`] if an archive cannot be rebuilt, or
    /// [`Error::Cancelled`] if the cancellation token fires before the commit.
    pub fn apply(
        &self,
        installation: &GameInstallation,
        container: &mut PatchContainer,
    ) -> Result<ApplyReport> {
        let patches: Vec<PatchManifest> = container.enabled_patches().into_iter().cloned().collect();
        for patch in &patches {
            if !patch.targets_game(&installation.game_id) {
                tracing::warn!(
                    "Patch '{}' does not list game '{}'",
                    patch.name,
                    installation.game_id
                );
            }
        }

        let ordered: Vec<&PatchManifest> = patches.iter().collect();
        let overlay = Overlay::compose(&ordered);
        tracing::info!(
            "Applying {} patch(es) to {} ({} paths)",
            patches.len(),
            installation.root.display(),
            overlay.len()
        );
        self.run(installation, container, &overlay)
    }

    /// Return the installation to its pristine state. The enabled set is kept.
    ///
    /// # Errors
    /// Same as [`apply`](Self::apply).
    pub fn restore(
        &self,
        installation: &GameInstallation,
        container: &mut PatchContainer,
    ) -> Result<ApplyReport> {
        tracing::info!("Restoring {}", installation.root.display());
        self.run(installation, container, &Overlay::default())
    }

    fn run(
        &self,
        installation: &GameInstallation,
        container: &mut PatchContainer,
        overlay: &Overlay,
    ) -> Result<ApplyReport> {
        match self.run_inner(installation, container, overlay) {
            Ok(report) => Ok(report),
            Err(err) => {
                if let Err(reload) = container.reload() {
                    tracing::warn!(
                        "Could not reload container {}: {}",
                        container.path().display(),
                        reload
                    );
                }
                Err(err)
            }
        }
    }

    fn run_inner(
        &self,
        installation: &GameInstallation,
        container: &mut PatchContainer,
        overlay: &Overlay,
    ) -> Result<ApplyReport> {
        let history = container.history().clone();
        let archives = collect_archives(installation, overlay, &history);

        let run = ApplyRun {
            modules: self.modules,
            settings: self.settings,
            installation,
            history: &history,
            container: RefCell::new(container),
            produced: RefCell::new(HashMap::new()),
            unchanged: RefCell::new(HashSet::new()),
        };

        let mut delta = HistoryDelta::default();
        let mut locks = Vec::new();
        let mut staged = Vec::new();
        let total = archives.len();
        for (index, location) in archives.values().enumerate() {
            self.cancel.check()?;
            (self.progress)(&PatchProgress::with_file(
                PatchPhase::ReadingArchive,
                index + 1,
                total,
                &location.path,
            ));
            if let Some((lock, archive)) = self.stage_archive(&run, location, overlay, &mut delta)? {
                locks.push(lock);
                staged.push(archive);
            }
        }
        self.cancel.check()?;
        let loose = run.stage_loose_files(overlay, &mut delta)?;
        self.cancel.check()?;

        let ApplyRun {
            container,
            produced,
            unchanged,
            ..
        } = run;
        let container = container.into_inner();
        let unchanged = unchanged.into_inner();
        let mut produced = produced.into_inner();
        produced.retain(|key, _| !unchanged.contains(key));
        delta.forget(&unchanged);
        let next = delta.into_history(history.id, &produced);

        let keep: HashSet<String> = next
            .replaced_files
            .iter()
            .chain(&next.removed_files)
            .map(ModFilePath::key)
            .collect();
        container.prune_backups(&keep)?;

        let report = ApplyReport {
            archives_rewritten: staged.len(),
            loose_files_changed: loose.len(),
            added: next.added_files.len(),
            replaced: next.replaced_files.len(),
            removed: next.removed_files.len(),
        };
        container.set_history(next)?;

        (self.progress)(&PatchProgress::new(PatchPhase::Committing, 0, 1));
        let staged_container = container.stage()?;
        container.commit(staged_container)?;
        commit_archives(staged)?;
        for change in loose {
            change.commit()?;
        }
        drop(locks);

        (self.progress)(&PatchProgress::new(PatchPhase::Complete, 1, 1));
        tracing::info!(
            "Installation {} now has {} added, {} replaced, {} removed file(s)",
            installation.root.display(),
            report.added,
            report.replaced,
            report.removed
        );
        Ok(report)
    }

    /// Plan and stage one archive. `None` if the archive needs no rewrite.
    fn stage_archive<'s>(
        &'s self,
        run: &'s ApplyRun<'_>,
        location: &ArchiveLocation,
        overlay: &'s Overlay,
        delta: &mut HistoryDelta,
    ) -> Result<Option<(StoreLock, StagedArchive)>> {
        let archive_key = location.key();
        let ops = overlay.for_archive(Some(&archive_key));
        let touched = run
            .history
            .touched()
            .any(|p| p.archive_key().as_deref() == Some(archive_key.as_str()));
        if ops.is_empty() && !touched {
            tracing::debug!("Archive {} is not affected", location.path);
            return Ok(None);
        }

        let manager = self.archives.get(&location.manager_id)?;
        let target = run.installation.archive_path(location)?;
        let lock = StoreLock::acquire(&target)?;

        let (handle, current) = if target.exists() {
            let mut reader = BufReader::new(File::open(&target)?);
            let (handle, data) = archive::load(manager, &mut reader)?;
            (handle, data.files().cloned().collect::<Vec<_>>())
        } else {
            (manager.create_archive(), Vec::new())
        };
        let pristine = run.pristine_view(location, current)?;
        let pristine_keys: HashSet<String> = pristine.iter().map(|f| f.path.key()).collect();

        let mut items: Vec<ArchiveFileItem<'s>> = Vec::with_capacity(pristine.len() + ops.len());
        for (index, file) in pristine.into_iter().enumerate() {
            let Some(op) = ops.get(&file.path.key()).copied() else {
                items.push(run.keep_item(file));
                continue;
            };

            run.ensure_backup(&target, &file)?;
            delta.pristine.push(PristineEntry {
                path: file.path.clone(),
                index: Some(index as u64),
                entry: Some(file.entry.clone()),
            });

            if op.is_removal() {
                delta.removed.push(file.path);
                continue;
            }

            delta.replaced.push(file.path.clone());
            let source = match file.origin {
                Origin::Current => PristineSource::ArchiveCurrent {
                    manager,
                    target: target.clone(),
                    entry: file.entry.clone(),
                },
                Origin::Backup => PristineSource::ArchiveBackup {
                    manager,
                    path: file.path.clone(),
                    entry: file.entry.clone(),
                },
            };
            items.push(ArchiveFileItem {
                path: file.entry.path().to_string(),
                source: ArchiveFileSource::Replaced(run.generator(op, source)),
                entry: Some(file.entry),
            });
        }

        for (key, &op) in &ops {
            if pristine_keys.contains(key) {
                continue;
            }
            match op.base {
                OverlayBase::Added { .. } => {
                    delta.added.push(op.path.clone());
                    items.push(ArchiveFileItem {
                        path: op.path.file_path.clone(),
                        source: ArchiveFileSource::Added(run.generator(op, PristineSource::Absent)),
                        entry: None,
                    });
                }
                OverlayBase::Removed { .. } => {
                    tracing::warn!("{} is not in the archive, nothing to remove", op.path);
                }
                OverlayBase::Pristine => {
                    tracing::warn!("{} is not in the archive, edits skipped", op.path);
                }
            }
        }

        if items.is_empty() && !target.exists() {
            return Ok(None);
        }

        let engine = RewriteEngine::new(manager, &self.cancel, self.progress);
        let staged = engine.stage(&target, &handle, items)?;
        Ok(Some((lock, staged)))
    }
}

/// Swap in every staged archive. The history is already committed, so a failure
/// here leaves the installation half-applied until the next apply or restore.
fn commit_archives(staged: Vec<StagedArchive>) -> Result<()> {
    let mut committed: Vec<PathBuf> = Vec::with_capacity(staged.len());
    let mut pending = staged.into_iter();
    while let Some(archive) = pending.next() {
        let target = archive.target().to_path_buf();
        if let Err(err) = archive.commit() {
            tracing::error!(
                "Commit of {} failed after {} archive(s) were swapped in ({}); not committed: {}. \
                 Apply or restore again to repair the installation.",
                target.display(),
                committed.len(),
                display_paths(committed.iter()),
                display_paths(pending.as_slice().iter().map(StagedArchive::target)),
            );
            return Err(err);
        }
        committed.push(target);
    }
    Ok(())
}

fn display_paths<P: AsRef<Path>>(paths: impl Iterator<Item = P>) -> String {
    let names: Vec<String> = paths.map(|p| p.as_ref().display().to_string()).collect();
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

/// Every archive that needs a look: declared, patched or recorded in history
fn collect_archives(
    installation: &GameInstallation,
    overlay: &Overlay,
    history: &PatchHistoryManifest,
) -> BTreeMap<String, ArchiveLocation> {
    let mut archives = BTreeMap::new();
    let candidates = installation
        .archives
        .iter()
        .cloned()
        .chain(overlay.archives().into_values())
        .chain(history.touched().filter_map(|p| p.archive.clone()));
    for location in candidates {
        archives.entry(location.key()).or_insert(location);
    }
    archives
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// The pristine bytes are still in place
    Current,
    /// The pristine bytes are in the container's backups
    Backup,
}

struct PristineFile {
    path: ModFilePath,
    entry: FileEntry,
    origin: Origin,
}

enum PristineSource<'s> {
    Absent,
    ArchiveCurrent {
        manager: &'s dyn ArchiveDataManager,
        target: PathBuf,
        entry: FileEntry,
    },
    ArchiveBackup {
        manager: &'s dyn ArchiveDataManager,
        path: ModFilePath,
        entry: FileEntry,
    },
    LooseCurrent(PathBuf),
    LooseBackup(ModFilePath),
}

#[derive(Default)]
struct HistoryDelta {
    added: Vec<ModFilePath>,
    replaced: Vec<ModFilePath>,
    removed: Vec<ModFilePath>,
    pristine: Vec<PristineEntry>,
}

impl HistoryDelta {
    /// Drop replacements that left the content as it was
    fn forget(&mut self, unchanged: &HashSet<String>) {
        self.replaced.retain(|p| !unchanged.contains(&p.key()));
        self.pristine.retain(|p| !unchanged.contains(&p.path.key()));
    }

    fn into_history(self, id: Uuid, produced: &HashMap<String, (Checksum, u64)>) -> PatchHistoryManifest {
        let checksums = |paths: &[ModFilePath]| -> Option<Vec<Checksum>> {
            if paths.is_empty() {
                return None;
            }
            paths
                .iter()
                .map(|p| produced.get(&p.key()).map(|(checksum, _)| *checksum))
                .collect()
        };

        PatchHistoryManifest {
            id,
            total_size: produced.values().map(|(_, size)| size).sum(),
            modified_date: Utc::now(),
            added_file_checksums: checksums(&self.added),
            replaced_file_checksums: checksums(&self.replaced),
            added_files: self.added,
            replaced_files: self.replaced,
            removed_files: self.removed,
            pristine_entries: self.pristine,
        }
    }
}

/// State shared by the planning code and the lazy content generators of one apply
struct ApplyRun<'r> {
    modules: &'r ModuleRegistry,
    settings: ApplySettings,
    installation: &'r GameInstallation,
    history: &'r PatchHistoryManifest,
    container: RefCell<&'r mut PatchContainer>,
    /// Checksum and size of every file produced, by path key
    produced: RefCell<HashMap<String, (Checksum, u64)>>,
    /// Keys of produced files whose content equals the pristine content
    unchanged: RefCell<HashSet<String>>,
}

impl ApplyRun<'_> {
    /// The archive's pristine file list in pristine table order
    fn pristine_view(&self, location: &ArchiveLocation, current: Vec<FileEntry>) -> Result<Vec<PristineFile>> {
        let archive_key = location.key();
        let in_archive = |p: &ModFilePath| p.archive_key().as_deref() == Some(archive_key.as_str());
        let added: HashSet<String> = self
            .history
            .added_files
            .iter()
            .filter(|p| in_archive(p))
            .map(ModFilePath::key)
            .collect();
        let replaced: HashSet<String> = self
            .history
            .replaced_files
            .iter()
            .filter(|p| in_archive(p))
            .map(ModFilePath::key)
            .collect();

        let mut files = Vec::with_capacity(current.len());
        let mut present = HashSet::new();
        for entry in current {
            let path = ModFilePath::in_archive(entry.path(), location.clone());
            let key = path.key();
            if added.contains(&key) {
                continue;
            }
            present.insert(key.clone());
            if replaced.contains(&key) {
                let entry = self.pristine_entry(&path)?;
                files.push(PristineFile {
                    path,
                    entry,
                    origin: Origin::Backup,
                });
            } else {
                files.push(PristineFile {
                    path,
                    entry,
                    origin: Origin::Current,
                });
            }
        }

        // Put back what the history removed, in ascending pristine position
        let mut missing = Vec::new();
        for path in self
            .history
            .replaced_files
            .iter()
            .chain(&self.history.removed_files)
            .filter(|p| in_archive(p))
        {
            if present.contains(&path.key()) {
                continue;
            }
            let index = self
                .history
                .pristine(path)
                .and_then(|p| p.index)
                .unwrap_or(u64::MAX);
            missing.push((index, path.clone(), self.pristine_entry(path)?));
        }
        missing.sort_by_key(|(index, _, _)| *index);
        for (index, path, entry) in missing {
            let position = usize::try_from(index).map_or(files.len(), |i| i.min(files.len()));
            files.insert(
                position,
                PristineFile {
                    path,
                    entry,
                    origin: Origin::Backup,
                },
            );
        }
        Ok(files)
    }

    fn pristine_entry(&self, path: &ModFilePath) -> Result<FileEntry> {
        self.history
            .pristine(path)
            .and_then(|p| p.entry.clone())
            .ok_or_else(|| Error::InvalidManifest(format!("history has no pristine entry for {path}")))
    }

    /// Item for a pristine file no patch touches
    fn keep_item(&self, file: PristineFile) -> ArchiveFileItem<'_> {
        let source = match file.origin {
            Origin::Current => ArchiveFileSource::Unchanged,
            Origin::Backup => {
                let path = file.path;
                ArchiveFileSource::Stored(Box::new(move || self.read_backup(&path)))
            }
        };
        ArchiveFileItem {
            path: file.entry.path().to_string(),
            source,
            entry: Some(file.entry),
        }
    }

    /// Save the stored bytes of a pristine archive file that is about to change
    fn ensure_backup(&self, target: &Path, file: &PristineFile) -> Result<()> {
        if file.origin == Origin::Backup {
            return Ok(());
        }
        let mut reader = BufReader::new(File::open(target)?);
        let stored = archive::read_stored(&mut reader, &file.entry)?;
        self.container.borrow_mut().write_backup(&file.path, &stored)
    }

    fn read_backup(&self, path: &ModFilePath) -> Result<Vec<u8>> {
        self.container.borrow_mut().read_backup(path)
    }

    fn generator<'s>(&'s self, op: &'s OverlayEntry, pristine: PristineSource<'s>) -> ByteGenerator<'s> {
        Box::new(move || self.produce(op, pristine))
    }

    /// Final content of a path: its base bytes with every edit applied in order
    ///
    /// A result equal to the pristine bytes is noted in `unchanged`.
    fn produce(&self, op: &OverlayEntry, pristine: PristineSource<'_>) -> Result<Vec<u8>> {
        let (mut content, original) = match &op.base {
            OverlayBase::Added {
                patch,
                resource,
                checksum,
            } => {
                let data = self.container.borrow_mut().read_patch_resource(*patch, resource)?;
                if self.settings.verify_checksums
                    && let Some(expected) = checksum
                {
                    let actual = Checksum::of_bytes(&data);
                    if actual != *expected {
                        tracing::warn!(
                            "Checksum mismatch for {} in patch {}: expected {}, found {}",
                            op.path,
                            patch,
                            expected,
                            actual
                        );
                    }
                }
                let original = match pristine {
                    PristineSource::Absent => None,
                    source => Some(Checksum::of_bytes(&self.load_pristine(source)?)),
                };
                (data, original)
            }
            OverlayBase::Pristine => {
                let data = self.load_pristine(pristine)?;
                let original = Checksum::of_bytes(&data);
                (data, Some(original))
            }
            OverlayBase::Removed { .. } => {
                return Err(Error::InvalidManifest(format!("{} is removed", op.path)));
            }
        };

        for step in &op.edits {
            let module = self.modules.get(&step.module)?;
            let payload = self
                .container
                .borrow_mut()
                .read_patch_resource(step.patch, &step.resource)?;
            let mut edited = Vec::with_capacity(content.len());
            module.apply_patch(&payload, &mut content.as_slice(), &mut edited)?;
            content = edited;
        }

        let key = op.path.key();
        let checksum = Checksum::of_bytes(&content);
        if original == Some(checksum) {
            tracing::debug!("{} matches its original content", op.path);
            self.unchanged.borrow_mut().insert(key.clone());
        }
        self.produced
            .borrow_mut()
            .insert(key, (checksum, content.len() as u64));
        Ok(content)
    }

    fn load_pristine(&self, source: PristineSource<'_>) -> Result<Vec<u8>> {
        match source {
            PristineSource::Absent => Err(Error::InvalidPath(
                "edited file does not exist in the pristine installation".to_string(),
            )),
            PristineSource::ArchiveCurrent {
                manager,
                target,
                entry,
            } => {
                let mut reader = BufReader::new(File::open(target)?);
                manager.read_file(&mut reader, &entry)
            }
            PristineSource::ArchiveBackup {
                manager,
                path,
                entry,
            } => {
                let stored = self.read_backup(&path)?;
                let mut content = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
                manager.decode_file(&mut stored.as_slice(), &mut content, &entry)?;
                Ok(content)
            }
            PristineSource::LooseCurrent(target) => Ok(fs::read(target)?),
            PristineSource::LooseBackup(path) => self.read_backup(&path),
        }
    }

    /// Plan loose files and write their new content to temporary files
    fn stage_loose_files(&self, overlay: &Overlay, delta: &mut HistoryDelta) -> Result<Vec<LooseChange>> {
        let ops = overlay.for_archive(None);

        let mut paths: BTreeMap<String, ModFilePath> = ops
            .values()
            .map(|op| (op.path.key(), op.path.clone()))
            .collect();
        for path in self.history.touched().filter(|p| p.archive.is_none()) {
            paths.entry(path.key()).or_insert_with(|| path.clone());
        }

        let added: HashSet<String> = self.history.added_files.iter().map(ModFilePath::key).collect();
        let backed_up: HashSet<String> = self
            .history
            .replaced_files
            .iter()
            .chain(&self.history.removed_files)
            .map(ModFilePath::key)
            .collect();

        let mut changes = Vec::new();
        for (key, path) in &paths {
            let target = self.installation.loose_path(path)?;
            let origin = if added.contains(key) {
                None
            } else if backed_up.contains(key) {
                Some(Origin::Backup)
            } else if target.is_file() {
                Some(Origin::Current)
            } else {
                None
            };

            let op = match ops.get(key).copied() {
                Some(op) if origin.is_none() && op.is_removal() => {
                    tracing::warn!("{} does not exist, nothing to remove", op.path);
                    None
                }
                Some(op) if origin.is_none() && op.base == OverlayBase::Pristine => {
                    tracing::warn!("{} does not exist, edits skipped", op.path);
                    None
                }
                other => other,
            };

            match (op, origin) {
                (None, None) => {
                    if target.exists() {
                        changes.push(LooseChange::Delete(target));
                    }
                }
                (None, Some(Origin::Current)) => {}
                (None, Some(Origin::Backup)) => {
                    let data = self.read_backup(path)?;
                    changes.push(LooseChange::write(&target, &data)?);
                }
                (Some(op), origin) => {
                    if origin == Some(Origin::Current) {
                        let data = fs::read(&target)?;
                        self.container.borrow_mut().write_backup(path, &data)?;
                    }

                    if op.is_removal() {
                        delta.removed.push(path.clone());
                        if target.exists() {
                            changes.push(LooseChange::Delete(target));
                        }
                        continue;
                    }

                    let source = match origin {
                        None => PristineSource::Absent,
                        Some(Origin::Current) => PristineSource::LooseCurrent(target.clone()),
                        Some(Origin::Backup) => PristineSource::LooseBackup(path.clone()),
                    };
                    let content = self.produce(op, source)?;
                    if origin.is_some() {
                        delta.replaced.push(path.clone());
                    } else {
                        delta.added.push(op.path.clone());
                    }
                    changes.push(LooseChange::write(&target, &content)?);
                }
            }
        }
        Ok(changes)
    }
}

/// A staged change to a loose file
enum LooseChange {
    Write { target: PathBuf, temp: NamedTempFile },
    Delete(PathBuf),
}

impl LooseChange {
    fn write(target: &Path, data: &[u8]) -> Result<Self> {
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        fs::create_dir_all(&dir)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".arcpatch-file-")
            .tempfile_in(&dir)?;
        temp.write_all(data)?;
        temp.as_file().sync_all()?;
        Ok(Self::Write {
            target: target.to_path_buf(),
            temp,
        })
    }

    fn commit(self) -> Result<()> {
        match self {
            Self::Write { target, temp } => {
                temp.persist(&target)?;
                tracing::debug!("Wrote {}", target.display());
            }
            Self::Delete(target) => match fs::remove_file(&target) {
                Ok(()) => tracing::debug!("Deleted {}", target.display()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            },
        }
        Ok(())
    }
}
