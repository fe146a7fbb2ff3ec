//! Zip-backed resource store with staged, atomic commits

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::{NamedTempFile, SpooledTempFile};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::lock::StoreLock;
use crate::config::StoreSettings;
use crate::error::{Error, Result};

/// Access mode of a [`ResourceStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Reads only; every write fails with [`Error::ReadOnlyViolation`]
    ReadOnly,
    /// Reads and queued writes; holds the store's exclusive lock
    ReadWrite,
}

enum PendingEntry {
    Write(SpooledTempFile),
    Delete,
}

/// A fully written replacement for a store, not yet swapped in.
pub struct StagedStore {
    temp: NamedTempFile,
}

impl StagedStore {
    /// Location of the staged file
    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp.path()
    }
}

/// Maps string paths to byte streams inside one zip file.
pub struct ResourceStore {
    path: PathBuf,
    mode: StoreMode,
    settings: StoreSettings,
    archive: Option<ZipArchive<BufReader<File>>>,
    pending: BTreeMap<String, PendingEntry>,
    _lock: Option<StoreLock>,
}

impl std::fmt::Debug for ResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStore")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl ResourceStore {
    /// Open a store with default settings
    ///
    /// # Errors
    /// Read-only opens of a missing file fail with [`Error::ResourceNotFound`];
    /// read-write opens fail with [`Error::ResourceLocked`] if the store is in use.
    pub fn open<P: AsRef<Path>>(path: P, mode: StoreMode) -> Result<Self> {
        Self::open_with_settings(path, mode, StoreSettings::default())
    }

    /// Open a store.
    ///
    /// A missing file opened read-write is an empty store that is created on the
    /// first [`apply`](Self::apply).
    ///
    /// # Errors
    /// See [`open`](Self::open).
    pub fn open_with_settings<P: AsRef<Path>>(
        path: P,
        mode: StoreMode,
        settings: StoreSettings,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let lock = match mode {
            StoreMode::ReadWrite => Some(StoreLock::acquire(&path)?),
            StoreMode::ReadOnly => None,
        };

        let archive = if path.exists() {
            Some(Self::open_archive(&path)?)
        } else if mode == StoreMode::ReadOnly {
            return Err(Error::ResourceNotFound {
                name: path.display().to_string(),
            });
        } else {
            None
        };

        tracing::debug!(
            "Opened store {} ({:?}, {} entries)",
            path.display(),
            mode,
            archive.as_ref().map_or(0, ZipArchive::len)
        );

        Ok(Self {
            path,
            mode,
            settings,
            archive,
            pending: BTreeMap::new(),
            _lock: lock,
        })
    }

    fn open_archive(path: &Path) -> Result<ZipArchive<BufReader<File>>> {
        let file = File::open(path)?;
        Ok(ZipArchive::new(BufReader::new(file))?)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    /// Whether the backing file exists on disk yet
    #[must_use]
    pub fn exists_on_disk(&self) -> bool {
        self.archive.is_some()
    }

    fn ensure_writable(&self, name: &str) -> Result<()> {
        match self.mode {
            StoreMode::ReadWrite => Ok(()),
            StoreMode::ReadOnly => Err(Error::ReadOnlyViolation {
                name: name.to_string(),
            }),
        }
    }

    fn archive_contains(&self, name: &str) -> bool {
        self.archive
            .as_ref()
            .is_some_and(|archive| archive.index_for_name(name).is_some())
    }

    /// Whether `name` exists, taking pending writes and deletes into account
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        match self.pending.get(name) {
            Some(PendingEntry::Write(_)) => true,
            Some(PendingEntry::Delete) => false,
            None => self.archive_contains(name),
        }
    }

    /// Open an entry for reading. Returns `Ok(None)` when it does not exist.
    ///
    /// # Errors
    /// Returns an error only if the entry exists but cannot be read.
    pub fn open_stream(&mut self, name: &str) -> Result<Option<Box<dyn Read + '_>>> {
        if let Some(entry) = self.pending.get_mut(name) {
            return match entry {
                PendingEntry::Write(spool) => {
                    spool.seek(SeekFrom::Start(0))?;
                    Ok(Some(Box::new(spool)))
                }
                PendingEntry::Delete => Ok(None),
            };
        }

        let Some(archive) = self.archive.as_mut() else {
            return Ok(None);
        };

        match archive.by_name(name) {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(ZipError::FileNotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Read a whole entry into memory
    ///
    /// # Errors
    /// Returns an error if the entry exists but cannot be read.
    pub fn read(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        let Some(mut stream) = self.open_stream(name)? else {
            return Ok(None);
        };
        let mut data = Vec::new();
        stream.read_to_end(&mut data)?;
        Ok(Some(data))
    }

    /// Read and deserialize a JSON entry
    ///
    /// # Errors
    /// Returns an error if the entry exists but is not valid JSON for `T`.
    pub fn read_json<T: DeserializeOwned>(&mut self, name: &str) -> Result<Option<T>> {
        match self.read(name)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Queue a write of `reader`'s bytes to `name`, returning the number of bytes
    ///
    /// # Errors
    /// Returns [`Error::ReadOnlyViolation`] on read-only stores.
    pub fn write_stream(&mut self, name: &str, reader: &mut dyn Read) -> Result<u64> {
        self.ensure_writable(name)?;

        let mut spool = SpooledTempFile::new(self.settings.spool_threshold);
        let written = io::copy(reader, &mut spool)?;
        self.pending
            .insert(name.to_string(), PendingEntry::Write(spool));
        Ok(written)
    }

    /// Queue a write of an in-memory buffer
    ///
    /// # Errors
    /// Returns [`Error::ReadOnlyViolation`] on read-only stores.
    pub fn write_bytes(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let mut reader = data;
        self.write_stream(name, &mut reader)?;
        Ok(())
    }

    /// Queue a pretty-printed JSON entry
    ///
    /// # Errors
    /// Returns an error on read-only stores or if serialization fails.
    pub fn write_json<T: Serialize>(&mut self, name: &str, value: &T) -> Result<()> {
        self.ensure_writable(name)?;
        let data = serde_json::to_vec_pretty(value)?;
        self.write_bytes(name, &data)
    }

    /// Queue removal of one entry
    ///
    /// # Errors
    /// Returns [`Error::ReadOnlyViolation`] on read-only stores.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        self.ensure_writable(name)?;
        if self.archive_contains(name) {
            self.pending.insert(name.to_string(), PendingEntry::Delete);
        } else {
            self.pending.remove(name);
        }
        Ok(())
    }

    /// Queue removal of every entry under `prefix` (an empty prefix clears the store).
    /// Returns the number of entries removed.
    ///
    /// # Errors
    /// Returns [`Error::ReadOnlyViolation`] on read-only stores.
    pub fn delete_directory(&mut self, prefix: &str) -> Result<usize> {
        self.ensure_writable(prefix)?;

        let prefix = if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        };

        let doomed: Vec<String> = self
            .entry_names()
            .into_iter()
            .filter(|name| name.starts_with(&prefix))
            .collect();

        for name in &doomed {
            self.delete(name)?;
        }
        Ok(doomed.len())
    }

    /// All live entry names, sorted
    #[must_use]
    pub fn entry_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .archive
            .as_ref()
            .map(|archive| {
                archive
                    .file_names()
                    .filter(|name| !self.pending.contains_key(*name))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        names.extend(self.pending.iter().filter_map(|(name, entry)| match entry {
            PendingEntry::Write(_) => Some(name.clone()),
            PendingEntry::Delete => None,
        }));
        names.sort();
        names
    }

    /// Live entry names below `prefix`, with the prefix stripped
    #[must_use]
    pub fn entries_under(&self, prefix: &str) -> Vec<String> {
        self.entry_names()
            .into_iter()
            .filter_map(|name| name.strip_prefix(prefix).map(str::to_string))
            .filter(|rest| !rest.is_empty())
            .collect()
    }

    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drop every queued write and delete
    pub fn discard_pending(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(
                "Discarding {} pending change(s) to {}",
                self.pending.len(),
                self.path.display()
            );
        }
        self.pending.clear();
    }

    /// Write the complete new store next to the current one without replacing it.
    ///
    /// # Errors
    /// Returns an error if any entry cannot be copied or written. The current store
    /// is untouched either way.
    pub fn stage(&mut self) -> Result<StagedStore> {
        self.ensure_writable("<stage>")?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        std::fs::create_dir_all(&dir)?;

        let temp = tempfile::Builder::new()
            .prefix(".arcpatch-store-")
            .tempfile_in(&dir)?;
        let mut writer = ZipWriter::new(temp);

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(self.settings.compression_level))
            .large_file(true);

        if let Some(archive) = self.archive.as_mut() {
            for index in 0..archive.len() {
                let file = archive.by_index_raw(index)?;
                if self.pending.contains_key(file.name()) {
                    continue;
                }
                writer.raw_copy_file(file)?;
            }
        }

        for (name, entry) in &mut self.pending {
            if let PendingEntry::Write(spool) = entry {
                spool.seek(SeekFrom::Start(0))?;
                writer.start_file(name.as_str(), options)?;
                io::copy(spool, &mut writer)?;
            }
        }

        let mut temp = writer.finish()?;
        temp.flush()?;
        temp.as_file().sync_all()?;

        Ok(StagedStore { temp })
    }

    /// Swap a staged store into place and reopen it.
    ///
    /// # Errors
    /// Returns an error if the rename fails; the old store stays in place.
    pub fn commit(&mut self, staged: StagedStore) -> Result<()> {
        // Release our read handle before the rename replaces the file
        self.archive = None;

        if let Err(err) = staged.temp.persist(&self.path) {
            if self.path.exists() {
                self.archive = Some(Self::open_archive(&self.path)?);
            }
            return Err(err.into());
        }

        self.archive = Some(Self::open_archive(&self.path)?);
        self.pending.clear();
        tracing::debug!("Committed store {}", self.path.display());
        Ok(())
    }

    /// Commit every pending change atomically (write to temp, then rename).
    ///
    /// Does nothing if there are no pending changes and the store already exists.
    ///
    /// # Errors
    /// Returns an error if staging or the rename fails. The on-disk store is left
    /// unmodified and the pending changes are kept.
    pub fn apply(&mut self) -> Result<()> {
        if !self.has_pending_changes() && self.archive.is_some() {
            return Ok(());
        }
        let staged = self.stage()?;
        self.commit(staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_string(store: &mut ResourceStore, name: &str) -> Option<String> {
        store
            .read(name)
            .unwrap()
            .map(|data| String::from_utf8(data).unwrap())
    }

    #[test]
    fn test_missing_store() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.ap");

        assert!(matches!(
            ResourceStore::open(&path, StoreMode::ReadOnly),
            Err(Error::ResourceNotFound { .. })
        ));

        let mut store = ResourceStore::open(&path, StoreMode::ReadWrite).unwrap();
        assert!(store.entry_names().is_empty());
        assert!(store.open_stream("manifest.json").unwrap().is_none());
    }

    #[test]
    fn test_pending_writes_visible_before_apply() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.ap");

        let mut store = ResourceStore::open(&path, StoreMode::ReadWrite).unwrap();
        store.write_bytes("resources/a.txt", b"alpha").unwrap();
        assert_eq!(read_string(&mut store, "resources/a.txt").as_deref(), Some("alpha"));
        assert!(!path.exists());

        store.apply().unwrap();
        assert!(path.exists());
        assert!(!store.has_pending_changes());
        drop(store);

        let mut reopened = ResourceStore::open(&path, StoreMode::ReadOnly).unwrap();
        assert_eq!(read_string(&mut reopened, "resources/a.txt").as_deref(), Some("alpha"));
    }

    #[test]
    fn test_drop_discards_pending() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.ap");

        let mut store = ResourceStore::open(&path, StoreMode::ReadWrite).unwrap();
        store.write_bytes("keep.txt", b"1").unwrap();
        store.apply().unwrap();
        store.write_bytes("lost.txt", b"2").unwrap();
        drop(store);

        let store = ResourceStore::open(&path, StoreMode::ReadOnly).unwrap();
        assert_eq!(store.entry_names(), vec!["keep.txt".to_string()]);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.ap");
        let mut store = ResourceStore::open(&path, StoreMode::ReadWrite).unwrap();
        store.write_bytes("a", b"a").unwrap();
        store.apply().unwrap();
        drop(store);

        let mut store = ResourceStore::open(&path, StoreMode::ReadOnly).unwrap();
        assert!(matches!(
            store.write_bytes("b", b"b"),
            Err(Error::ReadOnlyViolation { .. })
        ));
        assert!(matches!(
            store.delete_directory(""),
            Err(Error::ReadOnlyViolation { .. })
        ));
    }

    #[test]
    fn test_delete_directory() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.apc");
        let mut store = ResourceStore::open(&path, StoreMode::ReadWrite).unwrap();
        store.write_bytes("p1/resources/a", b"a").unwrap();
        store.write_bytes("p1/assets/thumbnail.png", b"png").unwrap();
        store.write_bytes("p10/resources/a", b"other").unwrap();
        store.apply().unwrap();

        assert_eq!(store.delete_directory("p1").unwrap(), 2);
        assert_eq!(store.entry_names(), vec!["p10/resources/a".to_string()]);
        store.apply().unwrap();
        assert_eq!(store.entry_names(), vec!["p10/resources/a".to_string()]);
    }

    #[test]
    fn test_overwrite_and_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.ap");
        let mut store = ResourceStore::open(&path, StoreMode::ReadWrite).unwrap();
        store.write_json("manifest.json", &vec![1, 2, 3]).unwrap();
        store.apply().unwrap();
        store.write_json("manifest.json", &vec![4]).unwrap();
        store.apply().unwrap();

        let value: Vec<i32> = store.read_json("manifest.json").unwrap().unwrap();
        assert_eq!(value, vec![4]);
        assert_eq!(store.entry_names().len(), 1);
    }

    #[test]
    fn test_concurrent_writer_is_locked_out() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.gpc");
        let _store = ResourceStore::open(&path, StoreMode::ReadWrite).unwrap();
        assert!(matches!(
            ResourceStore::open(&path, StoreMode::ReadWrite),
            Err(Error::ResourceLocked { .. })
        ));
    }
}
