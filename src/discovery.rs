//! One-shot directory discovery: builds the file set and routes each file
//! to a language context.
//!
//! Built on `ignore::WalkBuilder`, with a `filter_entry` predicate that
//! prunes whole directories the ignore resolver rejects -- the walk never
//! descends into them, rather than visiting and rejecting every file
//! underneath one at a time. Discovery never follows symlinked
//! directories. Symlinked files are accepted only if their canonical
//! target resolves inside the repository root; everything else is
//! reported as an excluded path rather than silently dropped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use parking_lot::Mutex;

use crate::ignore_resolver::IgnoreResolver;
use crate::types::{ExcludedPath, Language};

/// A manifest file recognized as the root of a language context.
struct ManifestProbe {
    file_name: &'static str,
    language: Language,
}

const MANIFEST_PROBES: &[ManifestProbe] = &[
    ManifestProbe { file_name: "pyproject.toml", language: Language::Python },
    ManifestProbe { file_name: "setup.py", language: Language::Python },
    ManifestProbe { file_name: "Cargo.toml", language: Language::Rust },
    ManifestProbe { file_name: "package.json", language: Language::TypeScript },
    ManifestProbe { file_name: "tsconfig.json", language: Language::TypeScript },
    ManifestProbe { file_name: "go.mod", language: Language::Go },
];

/// One discovered, indexable file.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Repo-relative, forward-slash normalized path.
    pub path: String,
    /// Absolute filesystem path.
    pub abs_path: PathBuf,
    /// Language family by extension.
    pub language: Language,
    /// Repo-relative root path of the context this file was routed to.
    pub context_root: String,
}

/// A language context discovered by a manifest probe.
#[derive(Debug, Clone)]
pub struct DiscoveredContext {
    /// Repo-relative root path, forward-slash normalized.
    pub root_path: String,
    /// Manifest file that defined this context, repo-relative.
    pub manifest_path: String,
    /// Language family.
    pub language: Language,
}

/// Result of a full discovery pass.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub files: Vec<DiscoveredFile>,
    pub contexts: Vec<DiscoveredContext>,
    pub excluded: Vec<ExcludedPath>,
}

/// Walk `root` once, probing for manifests and routing every indexable file
/// to the deepest-rooted context that contains it. Ties between
/// equal-depth contexts are broken lexicographically by root path.
pub fn discover(root: &Path, ignore: &IgnoreResolver) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();
    let mut manifest_roots: BTreeMap<String, (Language, String)> = BTreeMap::new();

    let root_buf = root.to_path_buf();
    let ignore_for_filter = Arc::new(ignore.clone());
    let pruned_dirs: Arc<Mutex<Vec<ExcludedPath>>> = Arc::new(Mutex::new(Vec::new()));
    let pruned_for_filter = Arc::clone(&pruned_dirs);

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            if entry.path() == root_buf {
                return true;
            }
            let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            if !is_dir {
                // Individual files are filtered post-hoc below, where the
                // symlink-target check and per-file excluded-path
                // bookkeeping already live.
                return true;
            }
            if entry.path_is_symlink() {
                return false;
            }
            let (indexable, reason) = ignore_for_filter.is_indexable(entry.path(), true);
            if !indexable {
                pruned_for_filter.lock().push(ExcludedPath {
                    path: entry.path().to_path_buf(),
                    reason: format!("{reason:?}"),
                });
            }
            indexable
        })
        .build();

    let mut raw_files = Vec::new();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };

        let path = entry.path();
        if path == root {
            continue;
        }

        let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
        let is_symlink = entry.path_is_symlink();

        if is_symlink && is_dir {
            // Never follow symlinked directories.
            continue;
        }

        if is_symlink {
            match std::fs::canonicalize(path) {
                Ok(target) if target.starts_with(root) => {}
                _ => {
                    report.excluded.push(ExcludedPath {
                        path: path.to_path_buf(),
                        reason: "symlink target outside repository root".into(),
                    });
                    continue;
                }
            }
        }

        let (indexable, reason) = ignore.is_indexable(path, is_dir);
        if !indexable {
            if !is_dir {
                report.excluded.push(ExcludedPath {
                    path: path.to_path_buf(),
                    reason: format!("{reason:?}"),
                });
            }
            continue;
        }

        if is_dir {
            continue;
        }

        if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
            if let Some(probe) = MANIFEST_PROBES.iter().find(|p| p.file_name == file_name) {
                let context_root = relative_dir(root, path);
                manifest_roots
                    .entry(context_root.clone())
                    .or_insert((probe.language, relative_path(root, path)));
            }
        }

        raw_files.push(path.to_path_buf());
    }

    let mut contexts: Vec<DiscoveredContext> = manifest_roots
        .into_iter()
        .map(|(root_path, (language, manifest_path))| DiscoveredContext {
            root_path,
            manifest_path,
            language,
        })
        .collect();

    // Deepest path first, ties broken lexicographically, so the first
    // match in `route_to_context` is always the correct winner.
    contexts.sort_by(|a, b| {
        b.root_path
            .matches('/')
            .count()
            .cmp(&a.root_path.matches('/').count())
            .then_with(|| a.root_path.cmp(&b.root_path))
    });

    for abs_path in raw_files {
        let rel = relative_path(root, &abs_path);
        let ext = abs_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        let language = Language::from_extension(ext);
        let context_root = route_to_context(&rel, &contexts);

        report.files.push(DiscoveredFile {
            path: rel,
            abs_path,
            language,
            context_root,
        });
    }

    report.contexts = contexts;
    report.excluded.extend(pruned_dirs.lock().drain(..));
    report
}

/// Find the deepest context root that is a prefix of `rel_path`. Falls
/// back to the repository root (`""`) if no manifest matched.
fn route_to_context(rel_path: &str, contexts: &[DiscoveredContext]) -> String {
    for ctx in contexts {
        if ctx.root_path.is_empty() {
            return ctx.root_path.clone();
        }
        if rel_path == ctx.root_path || rel_path.starts_with(&format!("{}/", ctx.root_path)) {
            return ctx.root_path.clone();
        }
    }
    String::new()
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn relative_dir(root: &Path, file_path: &Path) -> String {
    match file_path.parent() {
        Some(parent) if parent != root => relative_path(root, parent),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexingConfig;
    use std::fs;

    fn setup() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("backend")).unwrap();
        fs::write(dir.path().join("backend/Cargo.toml"), "[package]\nname=\"x\"\n").unwrap();
        fs::write(dir.path().join("backend/main.rs"), "fn main() {}").unwrap();
        fs::create_dir_all(dir.path().join("frontend")).unwrap();
        fs::write(dir.path().join("frontend/package.json"), "{}").unwrap();
        fs::write(dir.path().join("frontend/index.ts"), "export const x = 1;").unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        dir
    }

    #[test]
    fn test_discovers_contexts_and_routes_files() {
        let dir = setup();
        let ignore = IgnoreResolver::load(dir.path(), &IndexingConfig::default());
        let report = discover(dir.path(), &ignore);

        assert_eq!(report.contexts.len(), 2);
        let backend_file = report.files.iter().find(|f| f.path == "backend/main.rs").unwrap();
        assert_eq!(backend_file.context_root, "backend");
        assert_eq!(backend_file.language, Language::Rust);

        let frontend_file = report.files.iter().find(|f| f.path == "frontend/index.ts").unwrap();
        assert_eq!(frontend_file.context_root, "frontend");
        assert_eq!(frontend_file.language, Language::TypeScript);
    }

    #[test]
    fn test_git_directory_excluded() {
        let dir = setup();
        let ignore = IgnoreResolver::load(dir.path(), &IndexingConfig::default());
        let report = discover(dir.path(), &ignore);
        assert!(!report.files.iter().any(|f| f.path.starts_with(".git")));
    }

    #[test]
    fn test_deepest_context_wins_over_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("go.mod"), "module example.com/root\n").unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/go.mod"), "module example.com/sub\n").unwrap();
        fs::write(dir.path().join("sub/main.go"), "package main").unwrap();

        let ignore = IgnoreResolver::load(dir.path(), &IndexingConfig::default());
        let report = discover(dir.path(), &ignore);
        let file = report.files.iter().find(|f| f.path == "sub/main.go").unwrap();
        assert_eq!(file.context_root, "sub");
    }
}
