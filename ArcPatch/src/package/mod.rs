//! Patch packages (`.ap`), the patch library and patch export
//!
//! A package is a resource store holding:
//!
//! - `manifest.json`: the [`PatchManifest`]
//! - `resources/<name>`: bytes of added files and structured-edit payloads
//! - `assets/<name>`: optional extras such as `thumbnail.png`

mod builder;
mod library;

use std::io::Read;
use std::path::Path;

use uuid::Uuid;

use crate::config::StoreSettings;
use crate::error::{Error, Result};
use crate::manifest::PatchManifest;
use crate::store::{ResourceStore, StoreMode};
use crate::utils::Checksum;

pub use crate::utils::normalize_resource_name;
pub use builder::{export_patch, setup_patch_folder};
pub use library::PatchLibrary;

/// File extension of patch packages
pub const PATCH_EXTENSION: &str = "ap";
/// Manifest entry name
pub const MANIFEST_NAME: &str = "manifest.json";
/// Prefix of resource entries
pub const RESOURCES_DIR: &str = "resources/";
/// Prefix of asset entries
pub const ASSETS_DIR: &str = "assets/";
/// Asset name of a patch's preview image
pub const THUMBNAIL_ASSET: &str = "thumbnail.png";

/// Generate a patch id that collides with none of `existing`
#[must_use]
pub fn generate_id(existing: &[Uuid]) -> Uuid {
    loop {
        let id = Uuid::new_v4();
        if !existing.contains(&id) {
            return id;
        }
    }
}

/// SHA-256 over a whole stream
///
/// # Errors
/// Returns an error if reading fails.
pub fn calculate_checksum(reader: &mut dyn Read) -> Result<Checksum> {
    Checksum::of_reader(reader)
}

/// One distributable patch
#[derive(Debug)]
pub struct PatchPackage {
    store: ResourceStore,
}

impl PatchPackage {
    /// Open an existing package read-only
    ///
    /// # Errors
    /// Returns [`Error::ResourceNotFound`] if the file does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            store: ResourceStore::open(path, StoreMode::ReadOnly)?,
        })
    }

    /// Open or create a package for writing
    ///
    /// # Errors
    /// Returns [`Error::ResourceLocked`] if another writer holds it.
    pub fn open_for_writing<P: AsRef<Path>>(path: P, settings: StoreSettings) -> Result<Self> {
        Ok(Self {
            store: ResourceStore::open_with_settings(path, StoreMode::ReadWrite, settings)?,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Read and validate the manifest
    ///
    /// # Errors
    /// Returns [`Error::ResourceNotFound`] if the package has no manifest.
    pub fn read_manifest(&mut self) -> Result<PatchManifest> {
        let data = self
            .store
            .read(MANIFEST_NAME)?
            .ok_or_else(|| Error::ResourceNotFound {
                name: format!("{}:{MANIFEST_NAME}", self.store.path().display()),
            })?;
        PatchManifest::from_json(&data)
    }

    pub fn write_manifest(&mut self, manifest: &PatchManifest) -> Result<()> {
        manifest.validate()?;
        self.store.write_json(MANIFEST_NAME, manifest)
    }

    fn resource_entry(name: &str) -> String {
        format!("{RESOURCES_DIR}{}", normalize_resource_name(name))
    }

    fn asset_entry(name: &str) -> String {
        format!("{ASSETS_DIR}{}", normalize_resource_name(name))
    }

    #[must_use]
    pub fn has_resource(&self, name: &str) -> bool {
        self.store.contains(&Self::resource_entry(name))
    }

    /// Stream a resource
    ///
    /// # Errors
    /// Returns [`Error::ResourceNotFound`] if it does not exist.
    pub fn get_resource(&mut self, name: &str) -> Result<Box<dyn Read + '_>> {
        let entry = Self::resource_entry(name);
        self.store
            .open_stream(&entry)?
            .ok_or(Error::ResourceNotFound { name: entry })
    }

    /// Read a whole resource
    ///
    /// # Errors
    /// Returns [`Error::ResourceNotFound`] if it does not exist.
    pub fn read_resource(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.get_resource(name)?.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Queue a resource, returning its size
    pub fn add_resource(&mut self, name: &str, reader: &mut dyn Read) -> Result<u64> {
        self.store.write_stream(&Self::resource_entry(name), reader)
    }

    /// Read an optional asset; a missing asset is `Ok(None)`
    pub fn get_asset(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        self.store.read(&Self::asset_entry(name))
    }

    pub fn add_asset(&mut self, name: &str, reader: &mut dyn Read) -> Result<u64> {
        self.store.write_stream(&Self::asset_entry(name), reader)
    }

    /// Names of all resources (normalized, without the `resources/` prefix)
    #[must_use]
    pub fn resource_names(&self) -> Vec<String> {
        self.store.entries_under(RESOURCES_DIR)
    }

    /// Names of all assets
    #[must_use]
    pub fn asset_names(&self) -> Vec<String> {
        self.store.entries_under(ASSETS_DIR)
    }

    /// Queue removal of everything in the package
    pub fn clear(&mut self) -> Result<()> {
        self.store.delete_directory("")?;
        Ok(())
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.store.has_pending_changes()
    }

    /// Commit all queued changes atomically
    pub fn apply(&mut self) -> Result<()> {
        self.store.apply()
    }

    pub(crate) fn store_mut(&mut self) -> &mut ResourceStore {
        &mut self.store
    }
}
