//! Ignore resolver: decides which paths are indexable.
//!
//! Combines a gitignore-compatible pattern file at the repository root
//! with a built-in list of always-pruned directories that no pattern can
//! override. Built on `ignore::gitignore::Gitignore`, which already
//! implements gitignore glob semantics including negated re-includes.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::config::IndexingConfig;

/// Name of the ignore file at the repository root.
pub const IGNORE_FILE_NAME: &str = ".cplignore";

/// Why a path was included or excluded, so the resolver's cache can be
/// invalidated surgically when the ignore file changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDecisionReason {
    /// No pattern or built-in rule rejected the path.
    Included,
    /// Re-included by a negated pattern that postdates the excluding one.
    IncludedByNegation,
    /// Rejected by a user-supplied ignore pattern.
    ExcludedByPattern,
    /// Rejected by a built-in always-pruned directory name.
    ExcludedBuiltin,
}

/// A diagnostic for a malformed ignore-file line. Non-fatal.
#[derive(Debug, Clone)]
pub struct IgnoreDiagnostic {
    pub line_number: usize,
    pub line: String,
    pub message: String,
}

/// Compiled ignore decisions for one repository root.
#[derive(Clone)]
pub struct IgnoreResolver {
    root: PathBuf,
    gitignore: Gitignore,
    builtin_dirs: Vec<String>,
    diagnostics: Vec<IgnoreDiagnostic>,
}

impl IgnoreResolver {
    /// Build a resolver from `<root>/.cplignore` (if present) plus the
    /// configured always-pruned directory names.
    pub fn load(root: &Path, indexing: &IndexingConfig) -> Self {
        let mut builder = GitignoreBuilder::new(root);
        let mut diagnostics = Vec::new();

        for dir in &indexing.always_excludes {
            // Built-ins are compiled into the same matcher so a later
            // negated user pattern still cannot resurrect them; the
            // built-in set is re-checked explicitly in `is_indexable`
            // rather than relying on pattern precedence.
            let _ = builder.add_line(None, dir);
        }

        let ignore_path = root.join(IGNORE_FILE_NAME);
        if ignore_path.exists() {
            if let Some(err) = builder.add(&ignore_path) {
                diagnostics.push(IgnoreDiagnostic {
                    line_number: 0,
                    line: String::new(),
                    message: err.to_string(),
                });
            }
        }

        let gitignore = builder.build().unwrap_or_else(|_| Gitignore::empty());

        Self {
            root: root.to_path_buf(),
            gitignore,
            builtin_dirs: indexing.always_excludes.clone(),
            diagnostics,
        }
    }

    /// Decide whether `path` (absolute or repo-relative) is indexable.
    pub fn is_indexable(&self, path: &Path, is_dir: bool) -> (bool, IndexDecisionReason) {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);

        if relative
            .components()
            .any(|c| self.builtin_dirs.iter().any(|b| c.as_os_str() == b.as_str()))
        {
            return (false, IndexDecisionReason::ExcludedBuiltin);
        }

        let matched = self.gitignore.matched(relative, is_dir);
        match matched {
            ignore::Match::None => (true, IndexDecisionReason::Included),
            ignore::Match::Ignore(_) => (false, IndexDecisionReason::ExcludedByPattern),
            ignore::Match::Whitelist(_) => (true, IndexDecisionReason::IncludedByNegation),
        }
    }

    /// Malformed-line diagnostics collected while loading the ignore file.
    /// Indexing proceeds regardless; these are surfaced for visibility.
    pub fn diagnostics(&self) -> &[IgnoreDiagnostic] {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn resolver_with_ignore(contents: &str) -> (tempfile::TempDir, IgnoreResolver) {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(IGNORE_FILE_NAME), contents).expect("write ignore file");
        let resolver = IgnoreResolver::load(dir.path(), &IndexingConfig::default());
        (dir, resolver)
    }

    #[test]
    fn test_builtin_dirs_always_pruned() {
        let (dir, resolver) = resolver_with_ignore("");
        let (ok, reason) = resolver.is_indexable(&dir.path().join(".git/HEAD"), false);
        assert!(!ok);
        assert_eq!(reason, IndexDecisionReason::ExcludedBuiltin);
    }

    #[test]
    fn test_negated_pattern_re_includes() {
        let (dir, resolver) = resolver_with_ignore("build/\n!build/keep.py\n");
        let (ok, _) = resolver.is_indexable(&dir.path().join("build/a.py"), false);
        assert!(!ok);
        let (ok, reason) = resolver.is_indexable(&dir.path().join("build/keep.py"), false);
        assert!(ok);
        assert_eq!(reason, IndexDecisionReason::IncludedByNegation);
    }

    #[test]
    fn test_unmatched_path_is_indexable() {
        let (dir, resolver) = resolver_with_ignore("build/\n");
        let (ok, reason) = resolver.is_indexable(&dir.path().join("src/c.py"), false);
        assert!(ok);
        assert_eq!(reason, IndexDecisionReason::Included);
    }
}
