//! End-to-end tests: export patches, add them to a container and apply them to
//! installations holding real CNT/BIG/IPK archives.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arcpatch::archive::{
    self, ArchiveData, ArchiveDataManager, ArchiveFileItem, ArchiveFileSource, ArchiveHandle,
    ArchiveRegistry, BigManager, FileEntry, FilePacker, ReadSeek, RewriteEngine, WriteSeek,
};
use arcpatch::config::StoreSettings;
use arcpatch::container::PatchContainer;
use arcpatch::formats::string_table::{StringTable, parse_string_table, write_string_table};
use arcpatch::installation::GameInstallation;
use arcpatch::manifest::{ArchiveLocation, ModFilePath, PatchContainerManifest, PatchManifest};
use arcpatch::modules::ModuleRegistry;
use arcpatch::package::{MANIFEST_NAME, PatchPackage, export_patch};
use arcpatch::patcher::Patcher;
use arcpatch::progress::{CancellationToken, PatchPhase, PatchProgress, no_progress};
use arcpatch::store::{ResourceStore, StoreLock, StoreMode};
use arcpatch::utils::Checksum;
use arcpatch::{Error, Result};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use uuid::Uuid;

// ==================== Helpers ====================

fn build_archive(manager: &dyn ArchiveDataManager, path: &Path, files: &[(&str, &[u8])]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let cancel = CancellationToken::new();
    let items = files
        .iter()
        .map(|(name, data)| {
            let data = data.to_vec();
            ArchiveFileItem {
                path: (*name).to_string(),
                source: ArchiveFileSource::Added(Box::new(move || Ok::<_, Error>(data))),
                entry: None,
            }
        })
        .collect();
    RewriteEngine::new(manager, &cancel, &no_progress)
        .stage(path, &manager.create_archive(), items)
        .unwrap()
        .commit()
        .unwrap();
}

fn archive_files(manager: &dyn ArchiveDataManager, path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut reader = BufReader::new(File::open(path).unwrap());
    let (_, data) = archive::load(manager, &mut reader).unwrap();
    data.files()
        .map(|entry| (entry.path().to_string(), manager.read_file(&mut reader, entry).unwrap()))
        .collect()
}

fn file_names(files: &[(String, Vec<u8>)]) -> Vec<&str> {
    files.iter().map(|(name, _)| name.as_str()).collect()
}

fn content<'a>(files: &'a [(String, Vec<u8>)], name: &str) -> Option<&'a [u8]> {
    files
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, data)| data.as_slice())
}

/// Author a patch folder for the Files module and export it.
/// Paths start with the archive path, e.g. `game.big/data/level1.bin`.
fn export_files_patch(
    dir: &Path,
    name: &str,
    archives: &[ArchiveLocation],
    added: &[(&str, &[u8])],
    removed: &[&str],
) -> PathBuf {
    let source = dir.join(format!("{name}-src"));
    let files = source.join("files");
    fs::create_dir_all(files.join("added")).unwrap();
    for (path, data) in added {
        let target = files.join("added").join(path);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(target, data).unwrap();
    }
    let removed: String = removed.iter().map(|path| format!("{path}\n")).collect();
    fs::write(files.join("removed.txt"), removed).unwrap();

    let output = dir.join(format!("{name}.ap"));
    export_patch(
        &source,
        &PatchManifest::new(name),
        &ModuleRegistry::with_defaults(),
        archives,
        &output,
        StoreSettings::default(),
        &no_progress,
    )
    .unwrap();
    output
}

struct Fixture {
    temp: TempDir,
    install: GameInstallation,
    location: ArchiveLocation,
    archives: ArchiveRegistry,
    modules: ModuleRegistry,
}

impl Fixture {
    fn new(manager_id: &str, archive_name: &str, files: &[(&str, &[u8])]) -> Self {
        let temp = TempDir::new().unwrap();
        let location = ArchiveLocation::new(archive_name, manager_id);
        let install = GameInstallation::new("testgame", temp.path().join("game"))
            .with_archive(location.clone());
        let archives = ArchiveRegistry::with_defaults();
        build_archive(
            archives.get(manager_id).unwrap(),
            &install.archive_path(&location).unwrap(),
            files,
        );
        Self {
            temp,
            install,
            location,
            archives,
            modules: ModuleRegistry::with_defaults(),
        }
    }

    fn archive_path(&self) -> PathBuf {
        self.install.archive_path(&self.location).unwrap()
    }

    fn archive_bytes(&self) -> Vec<u8> {
        fs::read(self.archive_path()).unwrap()
    }

    fn files(&self) -> Vec<(String, Vec<u8>)> {
        archive_files(
            self.archives.get(&self.location.manager_id).unwrap(),
            &self.archive_path(),
        )
    }

    fn patch(&self, name: &str, added: &[(&str, &[u8])], removed: &[&str]) -> PathBuf {
        let prefix = |path: &str| format!("{}/{path}", self.location.path);
        let added: Vec<(String, &[u8])> = added.iter().map(|(p, d)| (prefix(*p), *d)).collect();
        let added: Vec<(&str, &[u8])> = added.iter().map(|(p, d)| (p.as_str(), *d)).collect();
        let removed: Vec<String> = removed.iter().map(|p| prefix(*p)).collect();
        let removed: Vec<&str> = removed.iter().map(String::as_str).collect();
        export_files_patch(
            self.temp.path(),
            name,
            std::slice::from_ref(&self.location),
            &added,
            &removed,
        )
    }

    fn container(&self) -> PatchContainer {
        PatchContainer::open(self.install.container_path()).unwrap()
    }

    fn add(&self, container: &mut PatchContainer, package: &Path) -> Uuid {
        let mut package = PatchPackage::open(package).unwrap();
        container.add_patch(&mut package, true).unwrap().id
    }

    fn patcher(&self) -> Patcher<'_> {
        Patcher::new(&self.archives, &self.modules)
    }
}

// ==================== Manifests ====================

#[test]
fn test_manifest_round_trip() {
    let archive = ArchiveLocation::new("Data/Fix.cnt", "cnt");
    let mut manifest = PatchManifest::new("Widescreen fix");
    manifest.author = Some("someone".to_string());
    manifest.game_ids = vec!["rayman2".to_string()];
    manifest
        .added_files
        .push(ModFilePath::in_archive("World/Levels/Fix.sna", archive.clone()));
    manifest.added_file_checksums = Some(vec![Checksum::of_bytes(b"level")]);
    manifest.removed_files.push(ModFilePath::loose("Data/intro.avi"));

    let json = serde_json::to_vec(&manifest).unwrap();
    assert_eq!(PatchManifest::from_json(&json).unwrap(), manifest);

    let mut container = PatchContainerManifest {
        patches: vec![manifest],
        enabled_patches: None,
        ..PatchContainerManifest::default()
    };
    let json = serde_json::to_string(&container).unwrap();
    assert!(!json.contains("enabledPatches"));
    assert_eq!(PatchContainerManifest::from_json(json.as_bytes()).unwrap(), container);

    container.enabled_patches = Some(Vec::new());
    let json = serde_json::to_string(&container).unwrap();
    assert!(json.contains("\"enabledPatches\":[]"));
    let parsed = PatchContainerManifest::from_json(json.as_bytes()).unwrap();
    assert_eq!(parsed.enabled_patches, Some(Vec::new()));
    assert!(parsed.enabled_ids().is_empty());
}

// ==================== Apply / restore ====================

#[test]
fn test_level_scenario() {
    let fx = Fixture::new(
        "big",
        "game.big",
        &[("data/level5.bin", b"abc"), ("data/level9.bin", b"nine9")],
    );
    let original = fx.archive_bytes();
    let package = fx.patch("a", &[("data/level1.bin", b"0123456789")], &["data/level9.bin"]);

    let mut container = fx.container();
    let id = fx.add(&mut container, &package);
    let report = fx.patcher().apply(&fx.install, &mut container).unwrap();
    assert_eq!((report.added, report.replaced, report.removed), (1, 0, 1));

    let files = fx.files();
    assert_eq!(file_names(&files), vec!["data/level5.bin", "data/level1.bin"]);
    assert_eq!(content(&files, "data/level1.bin"), Some(&b"0123456789"[..]));

    let history = container.history();
    let added: Vec<&str> = history.added_files.iter().map(|p| p.file_path.as_str()).collect();
    let removed: Vec<&str> = history.removed_files.iter().map(|p| p.file_path.as_str()).collect();
    assert_eq!(added, vec!["data/level1.bin"]);
    assert_eq!(removed, vec!["data/level9.bin"]);

    container.set_enabled(id, false).unwrap();
    fx.patcher().apply(&fx.install, &mut container).unwrap();

    assert_eq!(fx.archive_bytes(), original);
    assert!(container.history().added_files.is_empty());
    assert!(container.history().removed_files.is_empty());
    assert_eq!(
        content(&fx.files(), "data/level9.bin"),
        Some(&b"nine9"[..])
    );
}

#[test]
fn test_apply_is_idempotent() {
    let fx = Fixture::new(
        "cnt",
        "Data/Fix.cnt",
        &[
            ("world/a.sna", b"first level data"),
            ("world/b.sna", b"second"),
            ("sound/c.wav", b"RIFF....WAVE"),
        ],
    );
    let package = fx.patch(
        "bigger-b",
        &[("world/b.sna", b"a much longer second level"), ("world/new.sna", b"new")],
        &[],
    );

    let mut container = fx.container();
    fx.add(&mut container, &package);
    fx.patcher().apply(&fx.install, &mut container).unwrap();
    let first = fx.archive_bytes();

    fx.patcher().apply(&fx.install, &mut container).unwrap();
    assert_eq!(fx.archive_bytes(), first);

    let files = fx.files();
    assert_eq!(
        content(&files, "world/b.sna"),
        Some(&b"a much longer second level"[..])
    );
    // Moved past the longer file, so re-keyed; must still decode
    assert_eq!(content(&files, "sound/c.wav"), Some(&b"RIFF....WAVE"[..]));
}

#[test]
fn test_order_determinism() {
    let fx = Fixture::new("ipk", "bundle.ipk", &[("data/base.txt", b"base")]);
    let a = fx.patch("a", &[("data/foo.txt", b"from patch A")], &[]);
    let b = fx.patch("b", &[("data/foo.txt", b"from patch B, longer")], &[]);

    let mut container = fx.container();
    let a = fx.add(&mut container, &a);
    let b = fx.add(&mut container, &b);

    container.set_enabled_order(&[a, b]).unwrap();
    fx.patcher().apply(&fx.install, &mut container).unwrap();
    let ab = fx.archive_bytes();
    assert_eq!(content(&fx.files(), "data/foo.txt"), Some(&b"from patch B, longer"[..]));

    for _ in 0..3 {
        container.set_enabled_order(&[b, a]).unwrap();
        fx.patcher().apply(&fx.install, &mut container).unwrap();
        assert_eq!(content(&fx.files(), "data/foo.txt"), Some(&b"from patch A"[..]));

        container.set_enabled_order(&[a, b]).unwrap();
        fx.patcher().apply(&fx.install, &mut container).unwrap();
        assert_eq!(fx.archive_bytes(), ab);
    }
}

#[test]
fn test_restore_is_byte_identical() {
    for (manager, name) in [("cnt", "data.cnt"), ("big", "data.big"), ("ipk", "data.ipk")] {
        let fx = Fixture::new(
            manager,
            name,
            &[
                ("a/one.bin", b"1111111111"),
                ("a/two.bin", b"2222"),
                ("b/three.bin", b"333333"),
                ("b/four.bin", b"4"),
            ],
        );
        let pristine = Checksum::of_bytes(&fx.archive_bytes());

        let package = fx.patch(
            "mixed",
            &[("a/two.bin", b"two, replaced"), ("c/five.bin", b"55555")],
            &["a/one.bin", "b/four.bin"],
        );
        let mut container = fx.container();
        fx.add(&mut container, &package);

        fx.patcher().apply(&fx.install, &mut container).unwrap();
        assert_eq!(
            file_names(&fx.files()),
            vec!["a/two.bin", "b/three.bin", "c/five.bin"],
            "{manager}"
        );
        assert_ne!(Checksum::of_bytes(&fx.archive_bytes()), pristine);

        fx.patcher().restore(&fx.install, &mut container).unwrap();
        assert_eq!(Checksum::of_bytes(&fx.archive_bytes()), pristine, "{manager}");
        assert!(container.history().is_empty());
    }
}

#[test]
fn test_later_patch_overrides_removal() {
    let fx = Fixture::new("big", "game.big", &[("data/x.bin", b"x")]);
    let remove = fx.patch("remove", &[], &["data/x.bin"]);
    let add = fx.patch("add", &[("data/x.bin", b"x again")], &[]);

    let mut container = fx.container();
    let remove = fx.add(&mut container, &remove);
    let add = fx.add(&mut container, &add);

    container.set_enabled_order(&[remove, add]).unwrap();
    fx.patcher().apply(&fx.install, &mut container).unwrap();
    assert_eq!(content(&fx.files(), "data/x.bin"), Some(&b"x again"[..]));

    container.set_enabled_order(&[add, remove]).unwrap();
    fx.patcher().apply(&fx.install, &mut container).unwrap();
    assert_eq!(content(&fx.files(), "data/x.bin"), None);
}

#[test]
fn test_identical_replacement_is_not_recorded() {
    let fx = Fixture::new(
        "big",
        "game.big",
        &[("data/a.bin", b"same bytes"), ("data/b.bin", b"b")],
    );
    let original = fx.archive_bytes();
    let package = fx.patch(
        "noop",
        &[("data/a.bin", b"same bytes"), ("data/c.bin", b"c")],
        &[],
    );

    let mut container = fx.container();
    fx.add(&mut container, &package);
    let report = fx.patcher().apply(&fx.install, &mut container).unwrap();
    assert_eq!((report.added, report.replaced, report.removed), (1, 0, 0));

    let history = container.history();
    assert!(history.replaced_files.is_empty());
    assert!(history.replaced_file_checksums.is_none());
    assert!(history.pristine_entries.is_empty());

    fx.patcher().restore(&fx.install, &mut container).unwrap();
    assert_eq!(fx.archive_bytes(), original);
}

#[test]
fn test_localization_edit_inside_archive() {
    let mut table = StringTable::new();
    table.merge(1, [("greeting", "Hello"), ("farewell", "Bye")]);
    table.merge(2, [("greeting", "Bonjour")]);
    let table_bytes = write_string_table(&table).unwrap();

    let fx = Fixture::new("big", "game.big", &[("text/strings.ltbl", table_bytes.as_slice())]);
    let original = fx.archive_bytes();

    let source = fx.temp.path().join("loc-src");
    let folder = source.join("localization");
    fs::create_dir_all(&folder).unwrap();
    fs::write(
        folder.join("localization.json"),
        r#"{ "target": "game.big/text/strings.ltbl", "locales": { "english": 1 } }"#,
    )
    .unwrap();
    fs::write(folder.join("english.txt"), "greeting=Howdy\n").unwrap();
    let package = fx.temp.path().join("loc.ap");
    export_patch(
        &source,
        &PatchManifest::new("loc"),
        &fx.modules,
        std::slice::from_ref(&fx.location),
        &package,
        StoreSettings::default(),
        &no_progress,
    )
    .unwrap();

    let mut container = fx.container();
    fx.add(&mut container, &package);
    let report = fx.patcher().apply(&fx.install, &mut container).unwrap();
    assert_eq!(report.replaced, 1);

    let files = fx.files();
    let patched = parse_string_table(content(&files, "text/strings.ltbl").unwrap()).unwrap();
    let english = patched.section(1).unwrap();
    assert_eq!(english.get("greeting").unwrap().text, "Howdy");
    assert_eq!(english.get("greeting").unwrap().version, 2);
    assert_eq!(english.get("farewell").unwrap().text, "Bye");
    assert_eq!(patched.section(2).unwrap().get("greeting").unwrap().text, "Bonjour");

    fx.patcher().restore(&fx.install, &mut container).unwrap();
    assert_eq!(fx.archive_bytes(), original);
}

// ==================== Failure handling ====================

/// BIG manager whose new file contents fail to generate while `fail` is set
struct FailingManager {
    fail: Arc<AtomicBool>,
}

impl ArchiveDataManager for FailingManager {
    fn id(&self) -> &'static str {
        "failing"
    }

    fn load_archive(&self, input: &mut dyn ReadSeek) -> Result<ArchiveHandle> {
        BigManager.load_archive(input)
    }

    fn load_archive_data(&self, handle: &ArchiveHandle, input: &mut dyn ReadSeek) -> Result<ArchiveData> {
        BigManager.load_archive_data(handle, input)
    }

    fn decode_file(&self, input: &mut dyn Read, output: &mut dyn Write, entry: &FileEntry) -> Result<()> {
        BigManager.decode_file(input, output, entry)
    }

    fn encode_file(&self, input: &mut dyn Read, output: &mut dyn Write, entry: &FileEntry) -> Result<()> {
        BigManager.encode_file(input, output, entry)
    }

    fn create_archive(&self) -> ArchiveHandle {
        BigManager.create_archive()
    }

    fn new_entry(&self, path: &str, template: Option<&FileEntry>) -> Result<FileEntry> {
        BigManager.new_entry(path, template)
    }

    fn write_archive(
        &self,
        handle: &ArchiveHandle,
        output: &mut dyn WriteSeek,
        files: Vec<ArchiveFileItem<'_>>,
        packer: &mut FilePacker<'_>,
    ) -> Result<Vec<FileEntry>> {
        let fail = self.fail.load(Ordering::SeqCst);
        let files = files
            .into_iter()
            .map(|mut item| {
                if fail {
                    item.source = match item.source {
                        ArchiveFileSource::Added(_) => ArchiveFileSource::Added(Box::new(|| {
                            Err::<Vec<u8>, _>(Error::Io(io::Error::other("disk full")))
                        })),
                        other => other,
                    };
                }
                item
            })
            .collect();
        BigManager.write_archive(handle, output, files, packer)
    }
}

#[test]
fn test_failed_apply_changes_nothing() {
    let temp = TempDir::new().unwrap();
    let fail = Arc::new(AtomicBool::new(true));
    let mut archives = ArchiveRegistry::with_defaults();
    archives.register(Box::new(FailingManager { fail: Arc::clone(&fail) }));
    let modules = ModuleRegistry::with_defaults();

    let good = ArchiveLocation::new("good.big", "big");
    let bad = ArchiveLocation::new("zz.fail", "failing");
    let install = GameInstallation::new("testgame", temp.path().join("game"))
        .with_archive(good.clone())
        .with_archive(bad.clone());
    build_archive(&BigManager, &install.archive_path(&good).unwrap(), &[("a.bin", b"good")]);
    build_archive(&BigManager, &install.archive_path(&bad).unwrap(), &[("b.bin", b"bad")]);
    let good_before = fs::read(install.archive_path(&good).unwrap()).unwrap();
    let bad_before = fs::read(install.archive_path(&bad).unwrap()).unwrap();

    let package = export_files_patch(
        temp.path(),
        "both",
        &[good.clone(), bad.clone()],
        &[("good.big/new.bin", b"new good"), ("zz.fail/new.bin", b"new bad")],
        &["good.big/a.bin"],
    );

    let mut container = PatchContainer::open(install.container_path()).unwrap();
    let mut package = PatchPackage::open(&package).unwrap();
    container.add_patch(&mut package, true).unwrap();
    container.apply().unwrap();

    let result = Patcher::new(&archives, &modules).apply(&install, &mut container);
    assert!(matches!(result, Err(Error::RewriteFailure { .. })), "{result:?}");

    assert_eq!(fs::read(install.archive_path(&good).unwrap()).unwrap(), good_before);
    assert_eq!(fs::read(install.archive_path(&bad).unwrap()).unwrap(), bad_before);
    assert!(container.history().is_empty());
    assert_eq!(container.enabled_patches().len(), 1);
    let leftovers: Vec<_> = fs::read_dir(&install.root)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".arcpatch-"))
        .collect();
    assert!(leftovers.is_empty());

    drop(container);
    let mut container = PatchContainer::open(install.container_path()).unwrap();
    assert!(container.history().is_empty());

    fail.store(false, Ordering::SeqCst);
    let report = Patcher::new(&archives, &modules)
        .apply(&install, &mut container)
        .unwrap();
    assert_eq!(report.archives_rewritten, 2);
    assert_eq!(
        content(&archive_files(&BigManager, &install.archive_path(&bad).unwrap()), "new.bin"),
        Some(&b"new bad"[..])
    );
}

#[test]
fn test_restore_after_partial_commit() {
    let temp = TempDir::new().unwrap();
    let archives = ArchiveRegistry::with_defaults();
    let modules = ModuleRegistry::with_defaults();
    let first = ArchiveLocation::new("first.big", "big");
    let second = ArchiveLocation::new("second.cnt", "cnt");
    let install = GameInstallation::new("testgame", temp.path().join("game"))
        .with_archive(first.clone())
        .with_archive(second.clone());
    let first_path = install.archive_path(&first).unwrap();
    let second_path = install.archive_path(&second).unwrap();
    build_archive(&BigManager, &first_path, &[("a.bin", b"aaaa"), ("b.bin", b"bb")]);
    build_archive(
        archives.get("cnt").unwrap(),
        &second_path,
        &[("c.bin", b"cccccc"), ("d.bin", b"d")],
    );
    let first_before = fs::read(&first_path).unwrap();
    let second_before = fs::read(&second_path).unwrap();

    let package = export_files_patch(
        temp.path(),
        "both",
        &[first.clone(), second.clone()],
        &[("first.big/a.bin", b"patched a"), ("second.cnt/new.bin", b"new")],
        &["first.big/b.bin", "second.cnt/c.bin"],
    );
    let mut container = PatchContainer::open(install.container_path()).unwrap();
    container
        .add_patch(&mut PatchPackage::open(&package).unwrap(), true)
        .unwrap();
    Patcher::new(&archives, &modules)
        .apply(&install, &mut container)
        .unwrap();
    assert_eq!(container.history().removed_files.len(), 2);

    // The history was committed but the second archive never got swapped in
    fs::write(&second_path, &second_before).unwrap();

    Patcher::new(&archives, &modules)
        .restore(&install, &mut container)
        .unwrap();
    assert_eq!(fs::read(&first_path).unwrap(), first_before);
    assert_eq!(fs::read(&second_path).unwrap(), second_before);
    assert!(container.history().is_empty());
}

#[test]
fn test_patch_cannot_escape_installation() {
    let temp = TempDir::new().unwrap();
    let location = ArchiveLocation::new("game.big", "big");
    let install = GameInstallation::new("testgame", temp.path().join("game"))
        .with_archive(location.clone());
    build_archive(&BigManager, &install.archive_path(&location).unwrap(), &[("a.bin", b"a")]);

    let cases = [
        ("archive", "game.big/a.bin", "\"game.big\"", "\"../outside.big\""),
        ("loose", "readme.txt", "\"readme.txt\"", "\"../../outside.txt\""),
    ];
    for (name, added, field, escape) in cases {
        let package = export_files_patch(
            temp.path(),
            name,
            std::slice::from_ref(&location),
            &[(added, b"evil")],
            &[],
        );
        {
            let mut store = ResourceStore::open(&package, StoreMode::ReadWrite).unwrap();
            let manifest = String::from_utf8(store.read(MANIFEST_NAME).unwrap().unwrap()).unwrap();
            let tampered = manifest.replace(field, escape);
            assert_ne!(tampered, manifest);
            store.write_bytes(MANIFEST_NAME, tampered.as_bytes()).unwrap();
            store.apply().unwrap();
        }

        let mut container = PatchContainer::open(install.container_path()).unwrap();
        let mut package = PatchPackage::open(&package).unwrap();
        assert!(container.add_patch(&mut package, true).is_err(), "{name}");
        assert!(container.patches().is_empty());
    }

    assert!(!temp.path().join("outside.big").exists());
    assert!(!temp.path().join("outside.txt").exists());
    assert_eq!(
        content(&archive_files(&BigManager, &install.archive_path(&location).unwrap()), "a.bin"),
        Some(&b"a"[..])
    );
}

#[test]
fn test_cancel_during_rewrite() {
    let fx = Fixture::new("big", "game.big", &[("data/a.bin", b"a"), ("data/b.bin", b"b")]);
    let package = fx.patch("p", &[("data/c.bin", b"c")], &["data/a.bin"]);
    let mut container = fx.container();
    fx.add(&mut container, &package);
    container.apply().unwrap();
    let before = fx.archive_bytes();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let progress = move |update: &PatchProgress| {
        if update.phase == PatchPhase::WritingFiles {
            trigger.cancel();
        }
    };
    let result = fx
        .patcher()
        .with_cancellation(cancel)
        .with_progress(&progress)
        .apply(&fx.install, &mut container);

    assert!(matches!(result, Err(Error::Cancelled)), "{result:?}");
    assert_eq!(fx.archive_bytes(), before);
    assert!(container.history().is_empty());
    assert_eq!(container.patches().len(), 1);
}

#[test]
fn test_locked_resources_fail_fast() {
    let fx = Fixture::new("big", "game.big", &[("data/a.bin", b"a")]);
    let package = fx.patch("p", &[("data/b.bin", b"b")], &[]);

    let mut container = fx.container();
    assert!(matches!(
        PatchContainer::open(fx.install.container_path()),
        Err(Error::ResourceLocked { .. })
    ));

    fx.add(&mut container, &package);
    let before = fx.archive_bytes();
    let lock = StoreLock::acquire(&fx.archive_path()).unwrap();
    let result = fx.patcher().apply(&fx.install, &mut container);
    assert!(matches!(result, Err(Error::ResourceLocked { .. })), "{result:?}");
    assert_eq!(fx.archive_bytes(), before);

    drop(lock);
    // The failed apply reloaded the container, dropping the uncommitted add
    assert!(container.patches().is_empty());
    fx.add(&mut container, &package);
    fx.patcher().apply(&fx.install, &mut container).unwrap();
    assert_eq!(content(&fx.files(), "data/b.bin"), Some(&b"b"[..]));
}
