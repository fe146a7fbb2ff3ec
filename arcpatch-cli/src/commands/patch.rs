//! CLI commands for authoring patches and managing the library

use std::path::Path;

use anyhow::Context;
use arcpatch::config::EngineConfig;
use arcpatch::manifest::{ArchiveLocation, PatchManifest};
use arcpatch::modules::ModuleRegistry;
use arcpatch::package::{PatchLibrary, PatchPackage, export_patch, setup_patch_folder};
use uuid::Uuid;

use super::ArchiveArg;
use crate::progress;

pub struct CreateOptions<'a> {
    pub source: &'a Path,
    pub destination: &'a Path,
    pub name: Option<&'a str>,
    pub description: &'a str,
    pub author: Option<&'a str>,
    pub games: &'a [String],
    pub archives: &'a [ArchiveArg],
}

/// Scaffold an authoring folder for every module
pub fn setup(dir: &Path) -> anyhow::Result<()> {
    let modules = ModuleRegistry::with_defaults();
    setup_patch_folder(dir, &modules)?;
    println!("Created patch folder {}", dir.display());
    for module in modules.iter() {
        println!("  {:14} {}", format!("{}/", module.id()), module.description());
    }
    Ok(())
}

/// Export an authoring folder, keeping the id of an existing package at the destination
pub fn create(config: &EngineConfig, options: &CreateOptions<'_>) -> anyhow::Result<()> {
    let name = match options.name {
        Some(name) => name.to_string(),
        None => options
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("Patch name is required for this source folder")?,
    };

    let mut manifest = PatchManifest::new(name);
    if options.destination.exists() {
        let existing = PatchPackage::open(options.destination)
            .and_then(|mut package| package.read_manifest())
            .with_context(|| format!("{} is not a patch package", options.destination.display()))?;
        manifest.id = existing.id;
    }
    manifest.description = options.description.to_string();
    manifest.author = options.author.map(str::to_string);
    manifest.game_ids = options.games.to_vec();

    let archives: Vec<ArchiveLocation> = options.archives.iter().map(|a| a.0.clone()).collect();
    let pb = progress::patch_bar()?;
    let manifest = export_patch(
        options.source,
        &manifest,
        &ModuleRegistry::with_defaults(),
        &archives,
        options.destination,
        config.store,
        &|p| progress::update(&pb, p),
    )?;
    pb.finish_and_clear();

    println!(
        "Exported '{}' ({}) revision {} to {}",
        manifest.name,
        manifest.id,
        manifest.revision,
        options.destination.display()
    );
    println!(
        "  {} added, {} removed, {} patched, {} bytes",
        manifest.added_files.len(),
        manifest.removed_files.len(),
        manifest.patched_files.len(),
        manifest.total_size
    );
    Ok(())
}

fn open_library(config: &EngineConfig) -> anyhow::Result<PatchLibrary> {
    let dir = config.library.resolved_directory();
    PatchLibrary::open_with_settings(&dir, config.store)
        .with_context(|| format!("Failed to open patch library {}", dir.display()))
}

/// Import a package into the library
pub fn import(config: &EngineConfig, package: &Path, copy: bool) -> anyhow::Result<()> {
    let library = open_library(config)?;
    let manifest = if copy {
        library.import_as_copy(package)?
    } else {
        library.import(package)?
    };
    println!("Imported '{}' as {}", manifest.name, manifest.id);
    Ok(())
}

/// List the library, optionally removing one patch first
pub fn library(config: &EngineConfig, remove: Option<Uuid>) -> anyhow::Result<()> {
    let library = open_library(config)?;
    if let Some(id) = remove {
        library.remove(id)?;
        println!("Removed {id}");
    }

    let patches = library.list()?;
    println!("Library: {}", library.root().display());
    if patches.is_empty() {
        println!("  (empty)");
    }
    for patch in patches {
        println!(
            "  {}  {} (rev {}){}",
            patch.id,
            patch.name,
            patch.revision,
            patch
                .author
                .as_deref()
                .map_or_else(String::new, |a| format!(" by {a}"))
        );
    }
    Ok(())
}
