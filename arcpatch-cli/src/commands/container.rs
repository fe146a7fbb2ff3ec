//! CLI commands for an installation's patch container

use std::path::Path;

use anyhow::Context;
use arcpatch::config::EngineConfig;
use arcpatch::container::PatchContainer;
use arcpatch::installation::GameInstallation;
use arcpatch::package::{PatchLibrary, PatchPackage};
use uuid::Uuid;

fn open_container(install: &GameInstallation) -> anyhow::Result<PatchContainer> {
    let path = install.container_path();
    PatchContainer::open(&path).with_context(|| format!("Failed to open container {}", path.display()))
}

/// Add a library patch (by id) or a package file to the container
pub fn add(config: &EngineConfig, install: &GameInstallation, patch: &str, enable: bool) -> anyhow::Result<()> {
    let mut package = match patch.parse::<Uuid>() {
        Ok(id) => PatchLibrary::open(config.library.resolved_directory())?.open_patch(id)?,
        Err(_) => PatchPackage::open(Path::new(patch))?,
    };

    let mut container = open_container(install)?;
    let manifest = container.add_patch(&mut package, enable)?;
    container.apply()?;

    println!(
        "Added '{}' ({}){}; run `arcpatch apply` to update the game",
        manifest.name,
        manifest.id,
        if enable { "" } else { " disabled" }
    );
    Ok(())
}

pub fn remove(install: &GameInstallation, id: Uuid) -> anyhow::Result<()> {
    let mut container = open_container(install)?;
    let manifest = container.remove_patch(id)?;
    container.apply()?;
    println!("Removed '{}'; run `arcpatch apply` to update the game", manifest.name);
    Ok(())
}

/// Show known patches in apply order, then disabled ones, then the applied state
pub fn list(install: &GameInstallation) -> anyhow::Result<()> {
    let path = install.container_path();
    if !path.exists() {
        println!("No patches for {}", install.root.display());
        return Ok(());
    }
    let container = PatchContainer::open_read_only(&path)?;

    println!("Container: {}", path.display());
    let enabled = container.enabled_patches();
    for (i, patch) in enabled.iter().enumerate() {
        println!("  [{}] {}  {} (rev {})", i + 1, patch.id, patch.name, patch.revision);
    }
    for patch in container.patches().iter().filter(|p| !container.is_enabled(p.id)) {
        println!("  [ ] {}  {} (rev {})", patch.id, patch.name, patch.revision);
    }

    let history = container.history();
    println!();
    if history.is_empty() {
        println!("Installation is unmodified");
    } else {
        println!(
            "Applied {}: {} added, {} replaced, {} removed",
            history.modified_date.format("%Y-%m-%d %H:%M"),
            history.added_files.len(),
            history.replaced_files.len(),
            history.removed_files.len()
        );
    }
    Ok(())
}

pub fn enable(install: &GameInstallation, id: Uuid, position: Option<usize>) -> anyhow::Result<()> {
    let mut container = open_container(install)?;
    container.set_enabled(id, true)?;
    if let Some(position) = position {
        container.move_patch(id, position)?;
    }
    container.apply()?;
    println!("Enabled {id}; run `arcpatch apply` to update the game");
    Ok(())
}

pub fn disable(install: &GameInstallation, id: Uuid) -> anyhow::Result<()> {
    let mut container = open_container(install)?;
    container.set_enabled(id, false)?;
    container.apply()?;
    println!("Disabled {id}; run `arcpatch apply` to update the game");
    Ok(())
}
