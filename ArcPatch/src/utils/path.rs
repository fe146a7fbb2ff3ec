//! Path utilities

use std::path::{Component, Path};

/// Normalize path separators to forward slashes (for archive and store entries)
pub fn normalize_path<P: AsRef<Path>>(path: P) -> String {
    path.as_ref().to_string_lossy().replace('\\', "/")
}

/// Get relative path and normalize separators
pub fn relative_path<P: AsRef<Path>>(path: P, base: P) -> Option<String> {
    path.as_ref()
        .strip_prefix(base.as_ref())
        .ok()
        .map(normalize_path)
}

/// Canonical form of a resource name: forward slashes, no leading slash, lower case.
///
/// Resource lookups go through this so they behave the same on every platform and
/// regardless of how the author cased the file.
pub fn normalize_resource_name(name: &str) -> String {
    name.replace('\\', "/")
        .trim_start_matches('/')
        .to_lowercase()
}

/// Whether a relative path, joined to a directory, stays inside that directory.
///
/// Empty paths, absolute paths, drive prefixes and `..` segments are rejected.
pub fn is_contained(path: &str) -> bool {
    let path = path.replace('\\', "/");
    !path.is_empty()
        && Path::new(&path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_resource_name() {
        assert_eq!(normalize_resource_name("Data\\Level1.BIN"), "data/level1.bin");
        assert_eq!(normalize_resource_name("/ui/Logo.png"), "ui/logo.png");
    }

    #[test]
    fn test_is_contained() {
        assert!(is_contained("Data/Fix.cnt"));
        assert!(is_contained("./cfg/game.ini"));
        assert!(!is_contained(""));
        assert!(!is_contained("../outside.big"));
        assert!(!is_contained("data\\..\\..\\outside.big"));
        assert!(!is_contained("/etc/passwd"));
    }

    #[test]
    fn test_relative_path() {
        let rel = relative_path(Path::new("/mods/a/added/x/y.bin"), Path::new("/mods/a/added"));
        assert_eq!(rel.as_deref(), Some("x/y.bin"));
        assert_eq!(relative_path(Path::new("/other"), Path::new("/mods")), None);
    }
}
