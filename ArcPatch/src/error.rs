//! Error types for `ArcPatch`

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// The error type for `ArcPatch` operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// IO error from file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A manifest, resource or asset does not exist in the store.
    #[error("resource not found: {name}")]
    ResourceNotFound {
        /// Internal path of the missing resource.
        name: String,
    },

    /// A resource owned by a specific patch does not exist in the container.
    #[error("resource {name} not found for patch {patch}")]
    PatchResourceNotFound {
        /// The patch that should own the resource.
        patch: Uuid,
        /// Internal path of the missing resource.
        name: String,
    },

    /// A write was attempted on a store opened read-only.
    #[error("store is read-only, cannot write {name}")]
    ReadOnlyViolation {
        /// Internal path that was being written.
        name: String,
    },

    /// Another handle holds the exclusive lock on a store.
    #[error("resource is locked by another operation: {path}")]
    ResourceLocked {
        /// The locked store or archive.
        path: PathBuf,
    },

    /// Zip container error.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A manifest was written by a newer version than this library supports.
    #[error("unsupported {kind} version {found} (latest supported: {supported})")]
    UnsupportedFormatVersion {
        /// Which document carried the version (patch, container).
        kind: &'static str,
        /// Version found in the document.
        found: u64,
        /// Newest version this library reads.
        supported: u64,
    },

    /// A manifest is structurally invalid.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// A checksum string could not be parsed.
    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Two modules or patches claim the same output path in one pass.
    #[error("path {path} is claimed by both {first} and {second}")]
    PathCollision {
        /// The contested path.
        path: String,
        /// First claimant.
        first: String,
        /// Second claimant.
        second: String,
    },

    /// The patch id is not known to the container or library.
    #[error("patch not found: {0}")]
    PatchNotFound(Uuid),

    /// No module is registered under this id.
    #[error("unknown mod module: {0}")]
    UnknownModule(String),

    /// A module could not interpret its authoring folder or patch payload.
    #[error("invalid data for module {module}: {message}")]
    InvalidModuleData {
        /// Module id.
        module: String,
        /// What was wrong.
        message: String,
    },

    /// The string table is truncated or malformed.
    #[error("invalid string table: {0}")]
    InvalidStringTable(String),

    /// No archive data manager is registered under this id.
    #[error("unknown archive format: {0}")]
    UnknownArchiveFormat(String),

    /// The archive does not match its format's layout.
    #[error("invalid {format} archive: {message}")]
    InvalidArchive {
        /// Format id.
        format: &'static str,
        /// Description of what is invalid.
        message: String,
    },

    /// Rewriting an archive failed. Nothing was committed.
    #[error("rewrite of {archive} failed: {source}")]
    RewriteFailure {
        /// The archive being rewritten.
        archive: PathBuf,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid file path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Directory traversal error.
    #[error("directory walk error: {0}")]
    WalkDirError(String),
}

impl Error {
    /// Wraps an error as a rewrite failure of `archive`. Cancellation and errors that
    /// already are rewrite failures pass through as they are.
    pub(crate) fn rewrite(archive: impl Into<PathBuf>, err: Error) -> Self {
        match err {
            err @ (Error::RewriteFailure { .. } | Error::Cancelled) => err,
            other => Error::RewriteFailure {
                archive: archive.into(),
                source: Box::new(other),
            },
        }
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Error::WalkDirError(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io(err.error)
    }
}

/// A specialized Result type for `ArcPatch` operations.
pub type Result<T> = std::result::Result<T, Error>;
