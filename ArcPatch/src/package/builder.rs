//! Patch export: run modules over an authoring folder and pack the result

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::Utc;

use super::{PatchPackage, THUMBNAIL_ASSET};
use crate::config::StoreSettings;
use crate::error::{Error, Result};
use crate::manifest::{ArchiveLocation, FilePatchRecord, ModFilePath, PatchManifest};
use crate::modules::{FilePatch, ModFile, ModuleContext, ModuleRegistry};
use crate::progress::{PatchPhase, PatchProgress, ProgressCallback};
use crate::utils::HashingReader;

/// Scaffold every registered module's folder under `dir`
///
/// # Errors
/// Returns an error if a folder cannot be created.
pub fn setup_patch_folder(dir: &Path, modules: &ModuleRegistry) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    for module in modules.iter() {
        module.setup_module_folder(&dir.join(module.id()))?;
    }
    tracing::info!("Set up patch folder {}", dir.display());
    Ok(())
}

/// Outputs of every module, with the claimant of each path
#[derive(Default)]
struct CollectedFiles {
    added: Vec<ModFile>,
    removed: Vec<ModFilePath>,
    patched: Vec<FilePatch>,
    claims: HashMap<String, String>,
}

impl CollectedFiles {
    fn claim(&mut self, path: &ModFilePath, claimant: String) -> Result<()> {
        if let Some(first) = self.claims.get(&path.key()) {
            return Err(Error::PathCollision {
                path: path.to_string(),
                first: first.clone(),
                second: claimant,
            });
        }
        self.claims.insert(path.key(), claimant);
        Ok(())
    }
}

fn collect(
    source_dir: &Path,
    ctx: &ModuleContext<'_>,
    modules: &ModuleRegistry,
) -> Result<CollectedFiles> {
    let mut collected = CollectedFiles::default();

    for module in modules.iter() {
        let folder = source_dir.join(module.id());
        if !folder.is_dir() {
            continue;
        }

        for file in module.added_files(ctx, &folder)? {
            collected.claim(&file.path, format!("{} (add)", module.id()))?;
            collected.added.push(file);
        }
        for path in module.removed_files(ctx, &folder)? {
            collected.claim(&path, format!("{} (remove)", module.id()))?;
            collected.removed.push(path);
        }
        for patch in module.patched_files(ctx, &folder)? {
            collected.claim(&patch.target, format!("{} (patch)", module.id()))?;
            collected.patched.push(patch);
        }
    }

    Ok(collected)
}

/// Build a patch package at `output` from the authoring folder `source_dir`.
///
/// Every registered module whose folder exists contributes; paths claimed by two
/// modules fail with [`Error::PathCollision`] before anything is written. Exporting
/// over a package with the same id bumps its revision. Returns the final manifest.
///
/// # Errors
/// Returns an error if a module fails, paths collide, or the package cannot be written.
pub fn export_patch(
    source_dir: &Path,
    manifest: &PatchManifest,
    modules: &ModuleRegistry,
    archives: &[ArchiveLocation],
    output: &Path,
    settings: StoreSettings,
    progress: ProgressCallback<'_>,
) -> Result<PatchManifest> {
    progress(&PatchProgress::new(PatchPhase::CollectingFiles, 0, 1));
    let ctx = ModuleContext::new(manifest, archives);
    let collected = collect(source_dir, &ctx, modules)?;

    let mut package = PatchPackage::open_for_writing(output, settings)?;

    let mut manifest = manifest.clone();
    let previous_revision = match package.read_manifest() {
        Ok(existing) if existing.id == manifest.id => existing.revision,
        _ => 0,
    };
    manifest.revision = manifest.revision.max(previous_revision) + 1;
    manifest.modified_date = Utc::now();

    package.clear()?;

    let total = collected.added.len() + collected.patched.len();
    let mut total_size = 0u64;
    let mut checksums = Vec::with_capacity(collected.added.len());
    manifest.added_files = Vec::with_capacity(collected.added.len());

    for (i, file) in collected.added.iter().enumerate() {
        progress(&PatchProgress::with_file(
            PatchPhase::PackingResources,
            i + 1,
            total,
            file.path.to_string(),
        ));

        let mut reader = HashingReader::new(file.source.open()?);
        package.add_resource(&file.path.resource_name(), &mut reader)?;
        let (checksum, size) = reader.finish();

        total_size += size;
        checksums.push(checksum);
        manifest.added_files.push(file.path.clone());
    }
    manifest.added_file_checksums = Some(checksums);
    manifest.removed_files = collected.removed;

    manifest.patched_files = Vec::with_capacity(collected.patched.len());
    for (i, patch) in collected.patched.iter().enumerate() {
        progress(&PatchProgress::with_file(
            PatchPhase::PackingResources,
            collected.added.len() + i + 1,
            total,
            patch.target.to_string(),
        ));

        let resource = format!("patches/{}/{}", patch.module, patch.target.resource_name());
        total_size += package.add_resource(&resource, &mut patch.payload.as_slice())?;
        manifest.patched_files.push(FilePatchRecord {
            target: patch.target.clone(),
            module: patch.module.clone(),
            resource,
        });
    }

    manifest.assets.clear();
    let thumbnail = source_dir.join(THUMBNAIL_ASSET);
    if thumbnail.is_file() {
        package.add_asset(THUMBNAIL_ASSET, &mut BufReader::new(File::open(&thumbnail)?))?;
        manifest.assets.push(THUMBNAIL_ASSET.to_string());
    }

    manifest.total_size = total_size;
    package.write_manifest(&manifest)?;

    progress(&PatchProgress::new(PatchPhase::Committing, total, total));
    package.apply()?;

    tracing::info!(
        "Exported patch '{}' revision {} ({} added, {} removed, {} patched) to {}",
        manifest.name,
        manifest.revision,
        manifest.added_files.len(),
        manifest.removed_files.len(),
        manifest.patched_files.len(),
        output.display()
    );
    progress(&PatchProgress::new(PatchPhase::Complete, total, total));

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::no_progress;
    use crate::utils::Checksum;
    use tempfile::TempDir;

    fn authoring_folder(temp: &TempDir) -> std::path::PathBuf {
        let dir = temp.path().join("my-patch");
        setup_patch_folder(&dir, &ModuleRegistry::with_defaults()).unwrap();
        std::fs::create_dir_all(dir.join("files/added/data")).unwrap();
        std::fs::write(dir.join("files/added/data/level1.bin"), b"0123456789").unwrap();
        std::fs::write(dir.join("files/removed.txt"), "data/level9.bin\n").unwrap();
        dir
    }

    #[test]
    fn test_export_and_reexport() {
        let temp = TempDir::new().unwrap();
        let dir = authoring_folder(&temp);
        std::fs::write(dir.join(THUMBNAIL_ASSET), b"png").unwrap();
        let output = temp.path().join("patch.ap");
        let modules = ModuleRegistry::with_defaults();
        let draft = PatchManifest::new("Levels");

        let first = export_patch(&dir, &draft, &modules, &[], &output, StoreSettings::default(), &no_progress)
            .unwrap();
        assert_eq!(first.revision, 1);
        assert_eq!(first.total_size, 10);
        assert_eq!(first.added_files, vec![ModFilePath::loose("data/level1.bin")]);
        assert_eq!(first.added_file_checksums, Some(vec![Checksum::of_bytes(b"0123456789")]));
        assert_eq!(first.removed_files, vec![ModFilePath::loose("data/level9.bin")]);
        assert_eq!(first.assets, vec![THUMBNAIL_ASSET.to_string()]);

        let second = export_patch(&dir, &draft, &modules, &[], &output, StoreSettings::default(), &no_progress)
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.revision, 2);

        let mut package = PatchPackage::open(&output).unwrap();
        assert_eq!(package.read_manifest().unwrap(), second);
        assert_eq!(package.read_resource("files/data/level1.bin").unwrap(), b"0123456789");
        assert_eq!(package.get_asset(THUMBNAIL_ASSET).unwrap().as_deref(), Some(&b"png"[..]));
    }

    #[test]
    fn test_collision_between_modules() {
        let temp = TempDir::new().unwrap();
        let dir = authoring_folder(&temp);
        std::fs::write(dir.join("files/added/data/strings.tbl"), b"table").unwrap();
        std::fs::write(
            dir.join("localization/localization.json"),
            r#"{"target": "data/strings.tbl", "locales": {"english": 1}}"#,
        )
        .unwrap();
        std::fs::write(dir.join("localization/english.txt"), "k=v\n").unwrap();

        let output = temp.path().join("patch.ap");
        let result = export_patch(
            &dir,
            &PatchManifest::new("clash"),
            &ModuleRegistry::with_defaults(),
            &[],
            &output,
            StoreSettings::default(),
            &no_progress,
        );
        assert!(matches!(result, Err(Error::PathCollision { .. })));
        assert!(!output.exists());
    }
}
