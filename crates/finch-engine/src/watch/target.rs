//! Watch targets: literal paths and glob patterns, and filesystem snapshots.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use globset::{GlobBuilder, GlobMatcher};
use ignore::WalkBuilder;

use super::WatchError;

/// Directory and file names never reported by the watcher.
const IGNORED_NAMES: &[&str] = &[
    "node_modules",
    "target",
    "package.json",
    "package-lock.json",
    "Cargo.lock",
];

const GLOB_CHARS: &[char] = &['*', '?', '[', '{'];

/// What the watcher remembers about a file between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

pub(crate) type Snapshot = BTreeMap<PathBuf, FileStamp>;

#[derive(Debug, Clone)]
pub(crate) enum WatchTarget {
    /// A file, or a directory whose contents are watched recursively.
    Literal(PathBuf),
    Pattern { base: PathBuf, matcher: GlobMatcher },
}

impl WatchTarget {
    pub(crate) fn parse(pathname: &Path) -> Result<Self, WatchError> {
        if !pathname.is_absolute() {
            return Err(WatchError::NotAbsolute(pathname.to_path_buf()));
        }

        let text = pathname.to_string_lossy();
        if !is_glob(&text) {
            if !pathname.exists() {
                return Err(WatchError::MissingPath(pathname.to_path_buf()));
            }
            return Ok(Self::Literal(pathname.to_path_buf()));
        }

        let base = glob_base(pathname);
        if !base.is_dir() {
            return Err(WatchError::MissingPath(base));
        }
        let matcher = GlobBuilder::new(&text)
            .literal_separator(true)
            .build()
            .map_err(|source| WatchError::Pattern {
                pattern: text.clone().into_owned(),
                source,
            })?
            .compile_matcher();
        Ok(Self::Pattern { base, matcher })
    }

    /// Add every current, non-ignored match of this target to `snapshot`.
    pub(crate) fn scan_into(&self, snapshot: &mut Snapshot) {
        match self {
            Self::Literal(path) if path.is_dir() => walk(path, snapshot, |_| true),
            Self::Literal(path) => {
                if !is_ignored_name(path.file_name()) {
                    if let Some(stamp) = stamp(path) {
                        snapshot.insert(path.clone(), stamp);
                    }
                }
            }
            Self::Pattern { base, matcher } => walk(base, snapshot, |p| matcher.is_match(p)),
        }
    }
}

pub(crate) fn is_glob(pathname: &str) -> bool {
    pathname.contains(GLOB_CHARS)
}

/// Longest leading run of components that contain no glob syntax.
fn glob_base(pattern: &Path) -> PathBuf {
    let mut base = PathBuf::new();
    for component in pattern.components() {
        if let Component::Normal(part) = component {
            if part.to_string_lossy().contains(GLOB_CHARS) {
                break;
            }
        }
        base.push(component.as_os_str());
    }
    base
}

fn is_ignored_name(name: Option<&OsStr>) -> bool {
    let Some(name) = name.and_then(OsStr::to_str) else {
        return false;
    };
    name.starts_with('.') || IGNORED_NAMES.contains(&name)
}

fn walk(root: &Path, snapshot: &mut Snapshot, accept: impl Fn(&Path) -> bool) {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(true)
        .filter_entry(|entry| entry.depth() == 0 || !is_ignored_name(Some(entry.file_name())))
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(error = %err, "Skipping unreadable path while scanning");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) || !accept(entry.path()) {
            continue;
        }
        if let Some(stamp) = stamp(entry.path()) {
            snapshot.insert(entry.into_path(), stamp);
        }
    }
}

fn stamp(path: &Path) -> Option<FileStamp> {
    let metadata = std::fs::metadata(path).ok()?;
    metadata.is_file().then(|| FileStamp {
        len: metadata.len(),
        modified: metadata.modified().ok(),
    })
}

/// Take a snapshot of all targets.
pub(crate) fn scan(targets: &[WatchTarget]) -> Snapshot {
    let mut snapshot = Snapshot::new();
    for target in targets {
        target.scan_into(&mut snapshot);
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_detection_and_base() {
        assert!(is_glob("/a/*.json"));
        assert!(is_glob("/a/{b,c}.yml"));
        assert!(!is_glob("/a/b.json"));
        assert_eq!(glob_base(Path::new("/a/b/*.json")), PathBuf::from("/a/b"));
        assert_eq!(glob_base(Path::new("/a/**/c/*.json")), PathBuf::from("/a"));
    }

    #[test]
    fn ignored_names() {
        assert!(is_ignored_name(Some(OsStr::new(".git"))));
        assert!(is_ignored_name(Some(OsStr::new("node_modules"))));
        assert!(is_ignored_name(Some(OsStr::new("package-lock.json"))));
        assert!(!is_ignored_name(Some(OsStr::new("pipeline.json"))));
    }

    #[test]
    fn pattern_scan_matches_and_skips_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), "[]").unwrap();
        std::fs::write(dir.path().join("b.yaml"), "").unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        std::fs::write(dir.path().join(".hidden.json"), "{}").unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules").join("x.json"), "{}").unwrap();

        let target = WatchTarget::parse(&dir.path().join("**/*.json")).unwrap();
        let snapshot = scan(&[target]);
        let names: Vec<_> = snapshot.keys().map(|p| p.file_name().unwrap().to_owned()).collect();
        assert_eq!(names, vec![OsStr::new("a.json").to_owned()]);
    }

    #[test]
    fn single_star_does_not_cross_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("top.json"), "[]").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("deep.json"), "[]").unwrap();

        let target = WatchTarget::parse(&dir.path().join("*.json")).unwrap();
        let snapshot = scan(&[target]);
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec![&dir.path().join("top.json")]);
    }

    #[test]
    fn literal_file_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.json");
        std::fs::write(&file, "[]").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("b.json"), "[]").unwrap();

        let file_target = WatchTarget::parse(&file).unwrap();
        assert_eq!(scan(&[file_target]).len(), 1);
        let dir_target = WatchTarget::parse(dir.path()).unwrap();
        assert_eq!(scan(&[dir_target]).len(), 2);
    }

    #[test]
    fn missing_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            WatchTarget::parse(&dir.path().join("gone.json")),
            Err(WatchError::MissingPath(_))
        ));
        assert!(matches!(
            WatchTarget::parse(&dir.path().join("gone").join("*.json")),
            Err(WatchError::MissingPath(_))
        ));
        assert!(matches!(
            WatchTarget::parse(Path::new("rel.json")),
            Err(WatchError::NotAbsolute(_))
        ));
    }
}
