//! Composing enabled patches into one effective overlay

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use crate::manifest::{ArchiveLocation, ModFilePath, PatchManifest};
use crate::utils::Checksum;

/// A structured edit contributed by one patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchStep {
    pub patch: Uuid,
    pub module: String,
    pub resource: String,
}

/// What a path starts from before edits are applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayBase {
    /// The file as it is in the unpatched game
    Pristine,
    /// Bytes supplied by a patch
    Added {
        patch: Uuid,
        resource: String,
        checksum: Option<Checksum>,
    },
    /// The file is removed
    Removed { patch: Uuid },
}

/// Final operation on one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayEntry {
    pub path: ModFilePath,
    pub base: OverlayBase,
    /// Structured edits applied in order on top of `base`
    pub edits: Vec<PatchStep>,
}

impl OverlayEntry {
    #[must_use]
    pub fn is_removal(&self) -> bool {
        matches!(self.base, OverlayBase::Removed { .. })
    }
}

/// The merged, order-resolved set of operations of the enabled patches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overlay {
    entries: BTreeMap<String, OverlayEntry>,
}

impl Overlay {
    /// Compose patches in application order.
    ///
    /// Later patches override earlier ones on the same path: an add or remove
    /// replaces whatever came before, and structured edits stack on top of the
    /// current state of the path. Within one patch, removals are recorded before
    /// additions.
    #[must_use]
    pub fn compose(patches: &[&PatchManifest]) -> Self {
        let mut entries: BTreeMap<String, OverlayEntry> = BTreeMap::new();

        for patch in patches {
            for path in &patch.removed_files {
                entries.insert(
                    path.key(),
                    OverlayEntry {
                        path: path.clone(),
                        base: OverlayBase::Removed { patch: patch.id },
                        edits: Vec::new(),
                    },
                );
            }

            for path in &patch.added_files {
                entries.insert(
                    path.key(),
                    OverlayEntry {
                        path: path.clone(),
                        base: OverlayBase::Added {
                            patch: patch.id,
                            resource: path.resource_name(),
                            checksum: patch.checksum_for(path),
                        },
                        edits: Vec::new(),
                    },
                );
            }

            for record in &patch.patched_files {
                let step = PatchStep {
                    patch: patch.id,
                    module: record.module.clone(),
                    resource: record.resource.clone(),
                };
                let entry = entries
                    .entry(record.target.key())
                    .or_insert_with(|| OverlayEntry {
                        path: record.target.clone(),
                        base: OverlayBase::Pristine,
                        edits: Vec::new(),
                    });
                if entry.is_removal() {
                    tracing::warn!(
                        "Patch '{}' edits {} which an earlier patch removes; edit ignored",
                        patch.name,
                        record.target
                    );
                } else {
                    entry.edits.push(step);
                }
            }
        }

        Self { entries }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&OverlayEntry> {
        self.entries.get(key)
    }

    /// All entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &OverlayEntry)> {
        self.entries.iter()
    }

    /// Entries for one archive (`Some(archive key)`) or for loose files (`None`)
    #[must_use]
    pub fn for_archive(&self, archive_key: Option<&str>) -> BTreeMap<String, &OverlayEntry> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.path.archive_key().as_deref() == archive_key)
            .map(|(key, entry)| (key.clone(), entry))
            .collect()
    }

    /// Archives the overlay touches, keyed by archive key
    #[must_use]
    pub fn archives(&self) -> BTreeMap<String, ArchiveLocation> {
        self.entries
            .values()
            .filter_map(|entry| entry.path.archive.clone())
            .map(|archive| (archive.key(), archive))
            .collect()
    }

    /// Patches that contribute at least one entry
    #[must_use]
    pub fn contributors(&self) -> BTreeSet<Uuid> {
        let mut ids = BTreeSet::new();
        for entry in self.entries.values() {
            match &entry.base {
                OverlayBase::Added { patch, .. } | OverlayBase::Removed { patch } => {
                    ids.insert(*patch);
                }
                OverlayBase::Pristine => {}
            }
            ids.extend(entry.edits.iter().map(|step| step.patch));
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FilePatchRecord;

    fn adds(name: &str, path: &str) -> PatchManifest {
        let mut patch = PatchManifest::new(name);
        patch.added_files.push(ModFilePath::loose(path));
        patch
    }

    #[test]
    fn test_last_writer_wins() {
        let a = adds("a", "foo.txt");
        let b = adds("b", "foo.txt");

        let ab = Overlay::compose(&[&a, &b]);
        assert!(matches!(ab.get("files/foo.txt").unwrap().base, OverlayBase::Added { patch, .. } if patch == b.id));

        let ba = Overlay::compose(&[&b, &a]);
        assert!(matches!(ba.get("files/foo.txt").unwrap().base, OverlayBase::Added { patch, .. } if patch == a.id));
    }

    #[test]
    fn test_later_remove_overrides_add() {
        let a = adds("a", "foo.txt");
        let mut b = PatchManifest::new("b");
        b.removed_files.push(ModFilePath::loose("FOO.txt"));

        let overlay = Overlay::compose(&[&a, &b]);
        assert_eq!(overlay.len(), 1);
        assert!(overlay.get("files/foo.txt").unwrap().is_removal());
    }

    #[test]
    fn test_edits_stack_and_removed_paths_stay_removed() {
        let target = ModFilePath::loose("data/strings.tbl");
        let record = FilePatchRecord {
            target: target.clone(),
            module: "localization".to_string(),
            resource: "patches/localization/files/data/strings.tbl".to_string(),
        };
        let mut fr = PatchManifest::new("fr");
        fr.patched_files.push(record.clone());
        let mut de = PatchManifest::new("de");
        de.patched_files.push(record);

        let overlay = Overlay::compose(&[&fr, &de]);
        let entry = overlay.get(&target.key()).unwrap();
        assert_eq!(entry.base, OverlayBase::Pristine);
        assert_eq!(entry.edits.len(), 2);
        assert_eq!(entry.edits[1].patch, de.id);

        let mut wipe = PatchManifest::new("wipe");
        wipe.removed_files.push(target.clone());
        let overlay = Overlay::compose(&[&wipe, &fr]);
        assert!(overlay.get(&target.key()).unwrap().edits.is_empty());
    }

    #[test]
    fn test_for_archive_splits_loose_and_archived() {
        let archive = ArchiveLocation::new("data.big", "big");
        let mut patch = adds("a", "readme.txt");
        patch
            .added_files
            .push(ModFilePath::in_archive("data/level1.bin", archive.clone()));

        let overlay = Overlay::compose(&[&patch]);
        assert_eq!(overlay.for_archive(None).len(), 1);
        assert_eq!(overlay.for_archive(Some(&archive.key())).len(), 1);
        assert_eq!(overlay.archives().len(), 1);
        assert_eq!(overlay.contributors().len(), 1);
    }
}
