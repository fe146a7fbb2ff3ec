//! Mod modules: strategies that turn a patch's authoring folder into file operations
//!
//! Every module owns one subfolder of the authoring folder (named after its id). A
//! module can add or replace files, remove files, and record structured edits that
//! are applied to an existing game file at apply time. Outputs of all modules of one
//! patch are unioned; two modules claiming the same path is an export error.

mod files;
mod localization;

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::manifest::{ArchiveLocation, ModFilePath, PatchManifest};
use crate::utils::normalize_resource_name;

pub use files::FilesModule;
pub use localization::{LocalizationConfig, LocalizationModule, LocalizationPayload};

/// Where an added file's bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ByteSource {
    File(PathBuf),
    Memory(Vec<u8>),
}

impl ByteSource {
    /// Open the bytes for streaming
    pub fn open(&self) -> Result<Box<dyn Read + '_>> {
        match self {
            Self::File(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
            Self::Memory(data) => Ok(Box::new(data.as_slice())),
        }
    }
}

/// A file a module adds or replaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModFile {
    pub path: ModFilePath,
    pub source: ByteSource,
}

/// A structured edit of an existing file, interpreted by `module` at apply time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    pub target: ModFilePath,
    pub module: String,
    pub payload: Vec<u8>,
}

/// What modules know about the patch being built
#[derive(Debug, Clone, Copy)]
pub struct ModuleContext<'a> {
    pub patch: &'a PatchManifest,
    /// Archives of the target game, used to route relative paths into them
    pub archives: &'a [ArchiveLocation],
}

impl<'a> ModuleContext<'a> {
    pub fn new(patch: &'a PatchManifest, archives: &'a [ArchiveLocation]) -> Self {
        Self { patch, archives }
    }

    /// Map a path relative to the game root to a [`ModFilePath`].
    ///
    /// A leading segment naming a known archive (longest match, case-insensitive)
    /// routes the remainder into that archive.
    #[must_use]
    pub fn resolve(&self, relative: &str) -> ModFilePath {
        let relative = relative.replace('\\', "/");
        let relative = relative.trim_start_matches('/');
        let segments: Vec<&str> = relative.split('/').collect();

        // Compared segment by segment: lowercasing may change a name's byte length
        let best = self
            .archives
            .iter()
            .filter_map(|archive| {
                let key = archive.key();
                let depth = key.split('/').count();
                (segments.len() > depth && normalize_resource_name(&segments[..depth].join("/")) == key)
                    .then(|| (archive, segments[depth..].join("/")))
            })
            .max_by_key(|(archive, _)| archive.path.len());

        match best {
            Some((archive, rest)) => ModFilePath::in_archive(rest, archive.clone()),
            None => ModFilePath::loose(relative),
        }
    }
}

/// A pluggable strategy over a patch authoring folder.
///
/// Capabilities a module does not have keep their empty default.
pub trait ModModule: Send + Sync {
    /// Registry id, also the name of the module's folder inside a patch folder
    fn id(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Scaffold the expected layout in `path`
    fn setup_module_folder(&self, path: &Path) -> Result<()>;

    /// Files to add or replace
    fn added_files(&self, _ctx: &ModuleContext<'_>, _path: &Path) -> Result<Vec<ModFile>> {
        Ok(Vec::new())
    }

    /// Files to remove
    fn removed_files(&self, _ctx: &ModuleContext<'_>, _path: &Path) -> Result<Vec<ModFilePath>> {
        Ok(Vec::new())
    }

    /// Structured edits of existing files
    fn patched_files(&self, _ctx: &ModuleContext<'_>, _path: &Path) -> Result<Vec<FilePatch>> {
        Ok(Vec::new())
    }

    /// Apply one of this module's edits: read the current file from `input`, write
    /// the edited file to `output`
    fn apply_patch(&self, _payload: &[u8], _input: &mut dyn Read, _output: &mut dyn Write) -> Result<()> {
        Err(Error::InvalidModuleData {
            module: self.id().to_string(),
            message: "module does not patch files".to_string(),
        })
    }
}

/// Modules keyed by id, in registration order
pub struct ModuleRegistry {
    modules: IndexMap<String, Box<dyn ModModule>>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            modules: IndexMap::new(),
        }
    }

    /// Registry with the files and localization modules
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(FilesModule));
        registry.register(Box::new(LocalizationModule));
        registry
    }

    pub fn register(&mut self, module: Box<dyn ModModule>) {
        self.modules.insert(module.id().to_string(), module);
    }

    /// Look up a module by id
    ///
    /// # Errors
    /// Returns [`Error::UnknownModule`] for unknown ids.
    pub fn get(&self, id: &str) -> Result<&dyn ModModule> {
        self.modules
            .get(id)
            .map(|module| &**module)
            .ok_or_else(|| Error::UnknownModule(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ModModule> {
        self.modules.values().map(|module| &**module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_routes_into_longest_archive() {
        let archives = vec![
            ArchiveLocation::new("Data", "big"),
            ArchiveLocation::new("data/Levels.cnt", "cnt"),
        ];
        let manifest = PatchManifest::new("p");
        let ctx = ModuleContext::new(&manifest, &archives);

        let nested = ctx.resolve("DATA/levels.CNT/World/Level1.bin");
        assert_eq!(nested.archive.as_ref().unwrap().manager_id, "cnt");
        assert_eq!(nested.file_path, "World/Level1.bin");

        let loose = ctx.resolve("bin\\game.ini");
        assert!(loose.archive.is_none());
        assert_eq!(loose.file_path, "bin/game.ini");

        // A name that only shares a prefix with an archive is not inside it
        assert!(ctx.resolve("database.txt").archive.is_none());
    }

    #[test]
    fn test_resolve_non_ascii_archive_names() {
        // U+0130 grows and the Kelvin sign U+212A shrinks when lowercased
        let archives = vec![
            ArchiveLocation::new("\u{130}ndex.cnt", "cnt"),
            ArchiveLocation::new("Kits/Sounds.big", "big"),
        ];
        let manifest = PatchManifest::new("p");
        let ctx = ModuleContext::new(&manifest, &archives);

        let grown = ctx.resolve("\u{130}NDEX.CNT/World/Level1.bin");
        assert_eq!(grown.archive.as_ref().unwrap().manager_id, "cnt");
        assert_eq!(grown.file_path, "World/Level1.bin");

        let shrunk = ctx.resolve("\u{212A}its/sounds.BIG/Music/Theme.wav");
        assert_eq!(shrunk.archive.as_ref().unwrap().manager_id, "big");
        assert_eq!(shrunk.file_path, "Music/Theme.wav");
    }

    #[test]
    fn test_registry_defaults() {
        let registry = ModuleRegistry::with_defaults();
        let ids: Vec<&str> = registry.iter().map(ModModule::id).collect();
        assert_eq!(ids, vec!["files", "localization"]);
        assert!(matches!(registry.get("textures"), Err(Error::UnknownModule(_))));
    }
}
