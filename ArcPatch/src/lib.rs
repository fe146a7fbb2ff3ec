//! # ArcPatch
//!
//! A pure-Rust engine for reversible patching of game archives.
//!
//! ## Overview
//!
//! - **Patch packages** (`.ap`) - portable bundles of added files, removed-file lists and
//!   structured edits, authored from a folder of loose content by [`modules`]
//! - **Patch containers** (`.gpc`/`.apc`) - per-installation record of known and enabled
//!   patches plus the history needed to restore the pristine game
//! - **Archive formats** - CNT, BIG and IPK readers/writers behind one
//!   [`ArchiveDataManager`](archive::ArchiveDataManager) abstraction
//! - **Patcher** - composes the enabled patches in order and rewrites every affected
//!   archive atomically
//!
//! ## Quick Start
//!
//! ```no_run
//! use arcpatch::prelude::*;
//!
//! let archives = ArchiveRegistry::with_defaults();
//! let modules = ModuleRegistry::with_defaults();
//!
//! let install = GameInstallation::new("rayman2", "/games/Rayman2")
//!     .with_archive(ArchiveLocation::new("Data/Fix.cnt", "cnt"));
//!
//! let mut container = PatchContainer::open(install.container_path())?;
//! let mut package = PatchPackage::open("my-patch.ap")?;
//! container.add_patch(&mut package, true)?;
//!
//! let report = Patcher::new(&archives, &modules).apply(&install, &mut container)?;
//! println!("{} file(s) added", report.added);
//! # Ok::<(), arcpatch::Error>(())
//! ```

pub mod archive;
pub mod config;
pub mod container;
pub mod error;
pub mod formats;
pub mod installation;
pub mod manifest;
pub mod modules;
pub mod package;
pub mod patcher;
pub mod progress;
pub mod store;
pub mod utils;

// Re-exports for convenience
pub use error::{Error, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::error::{Error, Result};

    // Archives
    pub use crate::archive::{
        ArchiveDataManager, ArchiveRegistry, BigManager, CntManager, FileEntry, IpkManager,
        RewriteEngine,
    };

    // Patches and containers
    pub use crate::container::{Overlay, PatchContainer};
    pub use crate::manifest::{
        ArchiveLocation, ModFilePath, PatchContainerManifest, PatchHistoryManifest,
        PatchManifest,
    };
    pub use crate::package::{PatchLibrary, PatchPackage, export_patch, setup_patch_folder};

    // Modules
    pub use crate::modules::{ModModule, ModuleRegistry};

    // Applying
    pub use crate::config::EngineConfig;
    pub use crate::installation::GameInstallation;
    pub use crate::patcher::{ApplyReport, Patcher};
    pub use crate::progress::{CancellationToken, PatchPhase, PatchProgress};
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
