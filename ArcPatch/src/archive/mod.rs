//! Game archive formats and the archive rewrite engine
//!
//! Each supported binary format implements [`ArchiveDataManager`]. The manager exposes
//! the format's directory tree plus per-file encode/decode primitives, and rebuilds the
//! whole archive from a final file list. [`RewriteEngine`] drives a manager to produce a
//! replacement archive in a temporary file that is swapped in on commit.

pub mod big;
pub mod cnt;
pub mod ipk;
mod rewrite;

use std::io::{Read, Seek, SeekFrom, Write};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::normalize_resource_name;

pub use big::{BigEntry, BigHeader, BigManager};
pub use cnt::{CntEntry, CntHeader, CntManager};
pub use ipk::{IpkEntry, IpkHeader, IpkManager};
pub use rewrite::{FilePacker, RewriteEngine, StagedArchive};

/// Trait for types that can Read and Seek
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// Trait for types that can Write and Seek
pub trait WriteSeek: Write + Seek {}
impl<T: Write + Seek> WriteSeek for T {}

/// One file's table entry, in the shape of its archive format.
///
/// `offset` is always absolute within the archive file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum FileEntry {
    Cnt(CntEntry),
    Big(BigEntry),
    Ipk(IpkEntry),
}

impl FileEntry {
    /// Full path inside the archive, forward slashes, original case
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Cnt(e) => &e.path,
            Self::Big(e) => &e.path,
            Self::Ipk(e) => &e.path,
        }
    }

    /// Lower-cased path used to match overlay operations
    #[must_use]
    pub fn key(&self) -> String {
        normalize_resource_name(self.path())
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        match self {
            Self::Cnt(e) => e.offset,
            Self::Big(e) => e.offset,
            Self::Ipk(e) => e.offset,
        }
    }

    /// Size of the bytes as stored in the archive
    #[must_use]
    pub fn stored_size(&self) -> u64 {
        match self {
            Self::Cnt(e) => e.size,
            Self::Big(e) => e.size,
            Self::Ipk(e) => e.stored_size(),
        }
    }

    /// Size of the decoded file
    #[must_use]
    pub fn size(&self) -> u64 {
        match self {
            Self::Cnt(e) => e.size,
            Self::Big(e) => e.size,
            Self::Ipk(e) => e.size,
        }
    }

    /// Move the entry to `offset` (before its bytes are encoded there)
    pub fn set_offset(&mut self, offset: u64) {
        match self {
            Self::Cnt(e) => e.move_to(offset),
            Self::Big(e) => e.offset = offset,
            Self::Ipk(e) => e.offset = offset,
        }
    }

    /// Record the decoded and stored sizes after the bytes were written
    pub fn set_sizes(&mut self, size: u64, stored_size: u64) {
        match self {
            Self::Cnt(e) => e.size = stored_size,
            Self::Big(e) => e.size = stored_size,
            Self::Ipk(e) => {
                e.size = size;
                e.compressed_size = if e.compressed { stored_size } else { 0 };
            }
        }
    }
}

/// Format-specific archive header, carried through a rewrite unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveHandle {
    Cnt(CntHeader),
    Big(BigHeader),
    Ipk(IpkHeader),
}

/// A directory of an archive and the files listed under it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveDirectory {
    /// Directory path (empty for the root)
    pub path: String,
    pub files: Vec<FileEntry>,
}

/// An archive's directory tree in table order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveData {
    pub directories: Vec<ArchiveDirectory>,
}

impl ArchiveData {
    /// Group entries into directories, preserving table order. A directory path
    /// appears more than once if its files are not contiguous in the table.
    #[must_use]
    pub fn from_entries(entries: Vec<FileEntry>) -> Self {
        let mut directories: Vec<ArchiveDirectory> = Vec::new();
        for entry in entries {
            let dir = parent_of(entry.path()).to_string();
            match directories.last_mut() {
                Some(last) if last.path == dir => last.files.push(entry),
                _ => directories.push(ArchiveDirectory {
                    path: dir,
                    files: vec![entry],
                }),
            }
        }
        Self { directories }
    }

    /// All file entries in table order
    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.directories.iter().flat_map(|dir| dir.files.iter())
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.directories.iter().map(|dir| dir.files.len()).sum()
    }
}

/// Directory part of an archive path
#[must_use]
pub fn parent_of(path: &str) -> &str {
    path.rfind('/').map_or("", |idx| &path[..idx])
}

/// Lazily produces one file's bytes while the archive is being written.
pub type ByteGenerator<'a> = Box<dyn FnOnce() -> Result<Vec<u8>> + 'a>;

/// Where a file's final bytes come from during a rewrite
pub enum ArchiveFileSource<'a> {
    /// Copy the stored bytes from the archive being rewritten
    Unchanged,
    /// Stored (still encoded) bytes kept elsewhere, valid for the item's entry
    Stored(ByteGenerator<'a>),
    /// New decoded content replacing an existing file
    Replaced(ByteGenerator<'a>),
    /// New decoded content for a file the archive did not have
    Added(ByteGenerator<'a>),
}

impl ArchiveFileSource<'_> {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Stored(_) => "stored",
            Self::Replaced(_) => "replaced",
            Self::Added(_) => "added",
        }
    }
}

/// One file of the archive being written
pub struct ArchiveFileItem<'a> {
    pub path: String,
    pub source: ArchiveFileSource<'a>,
    /// Existing entry (required for `Unchanged`/`Stored`, a template for `Replaced`)
    pub entry: Option<FileEntry>,
}

impl std::fmt::Debug for ArchiveFileItem<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveFileItem")
            .field("path", &self.path)
            .field("source", &self.source.kind())
            .field("entry", &self.entry)
            .finish()
    }
}

/// Format-specific primitives for one archive binary format
pub trait ArchiveDataManager: Send + Sync {
    /// Registry id of this format
    fn id(&self) -> &'static str;

    /// Read and validate the archive header
    fn load_archive(&self, input: &mut dyn ReadSeek) -> Result<ArchiveHandle>;

    /// Read the directory/file table
    fn load_archive_data(
        &self,
        handle: &ArchiveHandle,
        input: &mut dyn ReadSeek,
    ) -> Result<ArchiveData>;

    /// Turn stored bytes into file content
    fn decode_file(&self, input: &mut dyn Read, output: &mut dyn Write, entry: &FileEntry)
    -> Result<()>;

    /// Turn file content into stored bytes for `entry` at its current offset
    fn encode_file(&self, input: &mut dyn Read, output: &mut dyn Write, entry: &FileEntry)
    -> Result<()>;

    /// Stored (`encoded`) or decoded size of an entry
    fn get_file_size(&self, entry: &FileEntry, encoded: bool) -> u64 {
        if encoded {
            entry.stored_size()
        } else {
            entry.size()
        }
    }

    /// Header for a brand-new, empty archive
    fn create_archive(&self) -> ArchiveHandle;

    /// Entry for a file being added or replaced, optionally shaped like `template`
    fn new_entry(&self, path: &str, template: Option<&FileEntry>) -> Result<FileEntry>;

    /// Whether stored bytes depend on the entry's offset, so moved files are re-encoded
    fn reencodes_on_move(&self) -> bool {
        false
    }

    /// Write a complete archive holding `files` in order, returning the final entries
    fn write_archive(
        &self,
        handle: &ArchiveHandle,
        output: &mut dyn WriteSeek,
        files: Vec<ArchiveFileItem<'_>>,
        packer: &mut FilePacker<'_>,
    ) -> Result<Vec<FileEntry>>;

    /// Read and decode one file
    fn read_file(&self, input: &mut dyn ReadSeek, entry: &FileEntry) -> Result<Vec<u8>> {
        let mut stored = read_stored(input, entry)?;
        let mut output = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        self.decode_file(&mut stored.as_slice(), &mut output, entry)?;
        Ok(output)
    }
}

/// Read an entry's stored bytes
pub fn read_stored(input: &mut dyn ReadSeek, entry: &FileEntry) -> Result<Vec<u8>> {
    input.seek(SeekFrom::Start(entry.offset()))?;
    let mut stored = Vec::new();
    Read::take(&mut *input, entry.stored_size()).read_to_end(&mut stored)?;
    if (stored.len() as u64) < entry.stored_size() {
        return Err(Error::InvalidArchive {
            format: "archive",
            message: format!("{} is truncated", entry.path()),
        });
    }
    Ok(stored)
}

/// Load an archive's header and file table in one go
pub fn load(
    manager: &dyn ArchiveDataManager,
    input: &mut dyn ReadSeek,
) -> Result<(ArchiveHandle, ArchiveData)> {
    input.seek(SeekFrom::Start(0))?;
    let handle = manager.load_archive(input)?;
    let data = manager.load_archive_data(&handle, input)?;
    Ok((handle, data))
}

/// Archive data managers keyed by format id
pub struct ArchiveRegistry {
    managers: IndexMap<String, Box<dyn ArchiveDataManager>>,
}

impl Default for ArchiveRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ArchiveRegistry {
    /// An empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            managers: IndexMap::new(),
        }
    }

    /// Registry with the CNT, BIG and IPK managers
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(CntManager));
        registry.register(Box::new(BigManager));
        registry.register(Box::new(IpkManager));
        registry
    }

    /// Add or replace a manager under its id
    pub fn register(&mut self, manager: Box<dyn ArchiveDataManager>) {
        self.managers.insert(manager.id().to_string(), manager);
    }

    /// Look up a manager by id
    ///
    /// # Errors
    /// Returns [`Error::UnknownArchiveFormat`] for unknown ids.
    pub fn get(&self, id: &str) -> Result<&dyn ArchiveDataManager> {
        self.managers
            .get(id)
            .map(|manager| &**manager)
            .ok_or_else(|| Error::UnknownArchiveFormat(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.managers.keys().map(String::as_str)
    }
}

/// Fail with a format-tagged [`Error::InvalidArchive`]
pub(crate) fn invalid(format: &'static str, message: impl Into<String>) -> Error {
    Error::InvalidArchive {
        format,
        message: message.into(),
    }
}

/// Check that `size` bytes at `offset` lie inside an archive of `archive_len` bytes
pub(crate) fn ensure_within(
    format: &'static str,
    path: &str,
    offset: u64,
    size: u64,
    archive_len: u64,
) -> Result<()> {
    match offset.checked_add(size) {
        Some(end) if end <= archive_len => Ok(()),
        _ => Err(invalid(format, format!("{path} extends past end of archive"))),
    }
}

/// Convert an absolute offset or size to a 32-bit table field
pub(crate) fn to_u32(format: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| invalid(format, format!("{value} exceeds the 4 GiB limit")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(path: &str) -> FileEntry {
        FileEntry::Big(BigEntry {
            path: path.to_string(),
            offset: 0,
            size: 0,
        })
    }

    #[test]
    fn test_from_entries_keeps_table_order() {
        let data = ArchiveData::from_entries(vec![
            big("data/a.bin"),
            big("data/b.bin"),
            big("root.txt"),
            big("data/c.bin"),
        ]);
        let dirs: Vec<&str> = data.directories.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(dirs, vec!["data", "", "data"]);
        let files: Vec<&str> = data.files().map(FileEntry::path).collect();
        assert_eq!(files, vec!["data/a.bin", "data/b.bin", "root.txt", "data/c.bin"]);
    }

    #[test]
    fn test_registry() {
        let registry = ArchiveRegistry::with_defaults();
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["cnt", "big", "ipk"]);
        assert_eq!(registry.get("big").unwrap().id(), "big");
        assert!(matches!(registry.get("pak"), Err(Error::UnknownArchiveFormat(_))));
    }

    #[test]
    fn test_entry_serde_is_tagged() {
        let json = serde_json::to_value(big("a/b")).unwrap();
        assert_eq!(json["format"], "big");
        let back: FileEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, big("a/b"));
    }
}
