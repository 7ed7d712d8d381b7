//! The coordinator: single owner of both stores, serializer of all
//! writes, and the crate's public entry point.
//!
//! Mirrors the shape of a teacher-style top-level `Engine` (config plus
//! every subsystem owned as a field, one `new`/`initialize` that wires
//! them together) but replaces the async channel-driven pipeline with
//! the two explicit locks the epoch model requires: `reconcile_lock`
//! (one reindex at a time) and `writer_lock` (one lexical write batch at
//! a time), held in that order. There is no ambient singleton; a
//! `Coordinator` is a value callers own and pass around.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::discovery::{self, DiscoveredContext, DiscoveredFile};
use crate::error::CodePlaneResult;
use crate::ignore_resolver::IgnoreResolver;
use crate::lexical_store::{extract_identifiers, LexicalHit, LexicalStore, StagedDocument};
use crate::parser::{self, ParseOutcome};
use crate::structural_store::{
    ContextUpsert, EpochWriteBatch, FileStats, FileUpsert, FileWrite, RecoveryAction, StructuralStore,
};
use crate::types::{Context, DefFact, ExcludedPath, FileState, IndexStats, Language, RefFact};

/// Result of `initialize`.
#[derive(Debug, Clone)]
pub struct InitializeReport {
    pub contexts: Vec<Context>,
    pub epoch: i64,
    pub errors: Vec<String>,
}

/// A file entry in `map_repo`'s structure listing.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FileSummary {
    pub path: String,
    pub line_count: u32,
}

/// Result of `map_repo`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RepoMap {
    pub structure: Vec<FileSummary>,
    pub entry_points: Vec<String>,
    pub public_symbols: Vec<String>,
}

const ENTRY_POINT_NAMES: &[&str] = &[
    "main.py", "__main__.py", "main.rs", "main.go", "index.ts", "index.js", "main.ts", "main.js",
];

/// Single owner of the lexical store, the structural store, and the
/// locks that serialize every write against them.
pub struct Coordinator {
    root: PathBuf,
    config: Config,
    ignore: Mutex<IgnoreResolver>,
    structural: StructuralStore,
    lexical: LexicalStore,
    reconcile_lock: Mutex<()>,
    writer_lock: Mutex<()>,
    epoch_cv: Condvar,
    epoch_cv_lock: Mutex<()>,
    published_epoch: AtomicI64,
}

impl Coordinator {
    /// Open (or create) the index for `root`, run crash recovery, and
    /// return the coordinator ready to serve reads and accept reindexes.
    pub fn initialize(root: &Path, config: Config) -> CodePlaneResult<(Self, InitializeReport)> {
        let index_dir = config.index_dir();
        std::fs::create_dir_all(&index_dir)?;

        let structural = StructuralStore::open(&index_dir.join("structural.db"), &config.structural_store)?;
        let lexical = LexicalStore::open(&index_dir.join("lexical"))?;
        let ignore = IgnoreResolver::load(root, &config.indexing);

        let mut errors = Vec::new();
        match structural.recover()? {
            RecoveryAction::Clean => {
                tracing::debug!("recovery: journal clean, nothing to reconcile");
            }
            RecoveryAction::LexicalPendingDiscarded { epoch_id } => {
                tracing::warn!(epoch = epoch_id, "recovery: discarding uncommitted lexical segment from abandoned epoch");
                errors.push(format!("discarded uncommitted lexical segment from abandoned epoch {epoch_id}"));
            }
            RecoveryAction::LexicalRolledBack { epoch_id, present_paths } => {
                tracing::warn!(epoch = epoch_id, present = present_paths.len(), "recovery: rolling lexical store back to structural truth");
                lexical.reconcile_to(&present_paths)?;
                errors.push(format!(
                    "rolled lexical store back to structural truth after abandoned epoch {epoch_id}"
                ));
            }
        }

        let epoch = structural.current_epoch()?;
        let contexts = structural.list_contexts()?;

        let coordinator = Self {
            root: root.to_path_buf(),
            config,
            ignore: Mutex::new(ignore),
            structural,
            lexical,
            reconcile_lock: Mutex::new(()),
            writer_lock: Mutex::new(()),
            epoch_cv: Condvar::new(),
            epoch_cv_lock: Mutex::new(()),
            published_epoch: AtomicI64::new(epoch),
        };

        let report = InitializeReport { contexts, epoch, errors };
        Ok((coordinator, report))
    }

    /// Discover the whole repository and republish every file as a new
    /// epoch.
    pub fn reindex_full(&self) -> CodePlaneResult<IndexStats> {
        let _reconcile = self.reconcile_lock.lock();

        let report = {
            let ignore = self.ignore.lock();
            discovery::discover(&self.root, &ignore)
        };
        let context_map = index_contexts(&report.contexts);

        self.run_batch(&report.files, &[], &context_map, &report.excluded)
    }

    /// Re-derive facts for a caller-supplied set of paths only. Files not
    /// in `paths` retain their prior facts unchanged.
    ///
    /// `paths` is first filtered through the ignore resolver: a path under
    /// a pruned subtree was never indexed, so its absence from a fresh
    /// discovery pass is not a removal, and an event about it must not
    /// publish a new epoch at all.
    pub fn reindex_incremental(&self, paths: &[PathBuf]) -> CodePlaneResult<IndexStats> {
        let _reconcile = self.reconcile_lock.lock();

        let filtered: Vec<PathBuf> = {
            let ignore = self.ignore.lock();
            paths
                .iter()
                .filter(|p| ignore.is_indexable(p, p.is_dir()).0)
                .cloned()
                .collect()
        };
        if filtered.is_empty() {
            tracing::debug!("incremental batch dropped: every path was outside the indexable set");
            return Ok(IndexStats::default());
        }

        let report = {
            let ignore = self.ignore.lock();
            discovery::discover(&self.root, &ignore)
        };
        let context_map = index_contexts(&report.contexts);

        let wanted: std::collections::HashSet<&Path> = filtered.iter().map(PathBuf::as_path).collect();
        let touched: Vec<DiscoveredFile> = report
            .files
            .iter()
            .filter(|f| wanted.contains(f.abs_path.as_path()))
            .cloned()
            .collect();

        // A path is a genuine removal only if the structural store has a
        // live row for it; a path that is absent from the fresh discovery
        // pass but was never indexed in the first place (e.g. it always
        // lived under a pruned subtree) is simply not our concern.
        let present: std::collections::HashSet<&str> = report.files.iter().map(|f| f.path.as_str()).collect();
        let mut removed = Vec::new();
        for p in &filtered {
            let Some(rel) = p.strip_prefix(&self.root).ok().map(|r| r.to_string_lossy().replace('\\', "/")) else {
                continue;
            };
            if present.contains(rel.as_str()) {
                continue;
            }
            if self.structural.get_file_state(&rel)?.is_some() {
                removed.push(rel);
            }
        }

        if touched.is_empty() && removed.is_empty() {
            tracing::debug!("incremental batch dropped: nothing touched or removed after reconciling");
            return Ok(IndexStats::default());
        }

        self.run_batch(&touched, &removed, &context_map, &report.excluded)
    }

    /// Whether `path` would currently be indexed under the loaded ignore
    /// rules. Lets the watcher skip waking a reindex for events inside a
    /// pruned subtree instead of discovering that only once the batch is
    /// already being assembled.
    pub fn is_indexable(&self, path: &Path) -> bool {
        self.ignore.lock().is_indexable(path, path.is_dir()).0
    }

    /// Parse, stage, and publish one batch as a new epoch. Shared by
    /// both full and incremental reindexing.
    fn run_batch(
        &self,
        files: &[DiscoveredFile],
        removed_paths: &[String],
        context_map: &HashMap<String, DiscoveredContext>,
        excluded: &[crate::types::ExcludedPath],
    ) -> CodePlaneResult<IndexStats> {
        let next_epoch = self.structural.current_epoch()? + 1;
        tracing::info!(
            epoch = next_epoch,
            touched = files.len(),
            removed = removed_paths.len(),
            "batch start"
        );

        let mut sorted = files.to_vec();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));

        let prepared: Vec<CodePlaneResult<(PreparedWrite, bool)>> = sorted
            .par_iter()
            .map(|file| self.prepare_file(file, context_map, next_epoch))
            .collect();

        let mut stats = IndexStats::default();
        let mut writes = Vec::with_capacity(prepared.len());
        for (file, result) in sorted.iter().zip(prepared) {
            match result {
                Ok((write, is_new)) => {
                    if is_new {
                        stats.files_added += 1;
                    } else {
                        stats.files_updated += 1;
                    }
                    stats.defs_extracted += write.facts.defs.len();
                    stats.touched_paths.push(file.path.clone());
                    if let Some(diagnostic) = &write.diagnostic {
                        stats.errors.push(format!("{}: {diagnostic}", file.path));
                    }
                    writes.push(write);
                }
                Err(e) => stats.errors.push(format!("{}: {e}", file.path)),
            }
        }
        stats.files_removed = removed_paths.len();
        stats.touched_paths.extend(removed_paths.iter().cloned());

        let _writer = self.writer_lock.lock();

        for write in &writes {
            self.lexical.stage_upsert(&StagedDocument {
                path: write.file.path.clone(),
                identifiers: extract_identifiers(&write.facts_body),
                body: write.facts_body.clone(),
            })?;
        }
        for path in removed_paths {
            self.lexical.stage_delete(path)?;
        }

        let started_at = now_epoch_seconds();
        self.structural.begin_epoch_journal(next_epoch, started_at)?;
        tracing::debug!(epoch = next_epoch, "epoch journal opened");

        match self.lexical.commit() {
            Ok(_) => {
                tracing::debug!(epoch = next_epoch, "lexical commit done");
            }
            Err(e) => {
                tracing::warn!(epoch = next_epoch, error = %e, "lexical commit failed, aborting batch");
                let _ = self.lexical.rollback();
                self.structural.clear_epoch_journal(next_epoch)?;
                return Err(e);
            }
        }

        self.structural.mark_lexical_committed(next_epoch)?;

        let batch = EpochWriteBatch {
            epoch_id: next_epoch,
            created_at: started_at,
            committed_at: now_epoch_seconds(),
            files: writes.into_iter().map(|w| w.into_file_write()).collect(),
            removed_paths: removed_paths.to_vec(),
            excluded: excluded.to_vec(),
        };
        self.structural.commit_epoch(&batch)?;
        tracing::debug!(epoch = next_epoch, "structural commit done");
        self.structural.clear_epoch_journal(next_epoch)?;

        self.publish_epoch(next_epoch);
        tracing::info!(epoch = next_epoch, added = stats.files_added, updated = stats.files_updated, removed = stats.files_removed, "batch committed");
        Ok(stats)
    }

    /// Read file content, ensure stable context/file ids exist (so the
    /// parser can embed them in fact ids before the real transaction
    /// runs), then parse. Mirrors upserting a file first to learn its id
    /// before building records that reference it.
    fn prepare_file(
        &self,
        file: &DiscoveredFile,
        context_map: &HashMap<String, DiscoveredContext>,
        epoch: i64,
    ) -> CodePlaneResult<(PreparedWrite, bool)> {
        let content = std::fs::read(&file.abs_path)?;
        let content_hash = hex::encode(Sha256::digest(&content));

        let prior = self.structural.get_file_state(&file.path)?;
        let is_new = prior.is_none();

        let context = resolve_context(&file.context_root, context_map);
        let line_count = content.iter().filter(|b| **b == b'\n').count() as u32 + 1;
        let oversized = content.len() as u64 > self.config.indexing.max_parse_bytes;

        let mut file_upsert = FileUpsert {
            path: file.path.clone(),
            language: file.language,
            content_hash,
            line_count,
            parse_failed: oversized,
        };

        let (context_id, file_id) = self.structural.ensure_ids(&context, &file_upsert, epoch)?;

        let mut diagnostic = None;
        let facts = if oversized || !file.language.has_grammar() {
            crate::types::FileFacts::default()
        } else {
            match parser::parse_file(Path::new(&file.path), &content, file.language, file_id, context_id) {
                ParseOutcome::Parsed { facts, diagnostics } => {
                    if let Some(first) = diagnostics.into_iter().next() {
                        diagnostic = Some(first);
                    }
                    facts
                }
                ParseOutcome::Failed { reason } => {
                    diagnostic = Some(reason);
                    crate::types::FileFacts::default()
                }
            }
        };
        if diagnostic.is_some() {
            file_upsert.parse_failed = true;
        }

        let body = String::from_utf8_lossy(&content).into_owned();
        Ok((
            PreparedWrite { context, file: file_upsert, facts, facts_body: body, diagnostic },
            is_new,
        ))
    }

    fn publish_epoch(&self, epoch: i64) {
        let _guard = self.epoch_cv_lock.lock();
        self.published_epoch.store(epoch, Ordering::SeqCst);
        self.epoch_cv.notify_all();
    }

    /// The most recently published epoch.
    pub fn current_epoch(&self) -> i64 {
        self.published_epoch.load(Ordering::SeqCst)
    }

    /// Block until `current_epoch() >= epoch` or `timeout` elapses.
    pub fn await_epoch(&self, epoch: i64, timeout: Duration) -> bool {
        if self.current_epoch() >= epoch {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.epoch_cv_lock.lock();
        while self.current_epoch() < epoch {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let result = self.epoch_cv.wait_for(&mut guard, remaining);
            if result.timed_out() && self.current_epoch() < epoch {
                return false;
            }
        }
        true
    }

    /// Lexical search over the current index.
    pub fn search(&self, query: &str, limit: usize) -> CodePlaneResult<Vec<LexicalHit>> {
        self.lexical.search(query, limit)
    }

    pub fn get_def(&self, name: &str, path: Option<&str>) -> CodePlaneResult<Option<DefFact>> {
        self.structural.get_def(name, path)
    }

    pub fn get_all_defs(&self, file_id: i64) -> CodePlaneResult<Vec<DefFact>> {
        self.structural.get_all_defs(file_id)
    }

    pub fn get_references(&self, def_id: Option<u64>, name: Option<&str>, limit: u32) -> CodePlaneResult<Vec<RefFact>> {
        self.structural.get_references(def_id, name, limit)
    }

    pub fn get_file_state(&self, path: &str) -> CodePlaneResult<Option<FileState>> {
        self.structural.get_file_state(path)
    }

    pub fn get_file_stats(&self) -> CodePlaneResult<FileStats> {
        self.structural.get_file_stats()
    }

    pub fn list_excluded_paths(&self) -> CodePlaneResult<Vec<ExcludedPath>> {
        self.structural.list_excluded_paths()
    }

    /// Reload ignore decisions from disk. Cheap enough to call from a
    /// watcher tripwire whenever the set of indexable files might have
    /// changed underneath it (a moved HEAD, an edited `.gitignore`).
    pub fn refresh_ignore(&self) {
        *self.ignore.lock() = IgnoreResolver::load(&self.root, &self.config.indexing);
    }

    /// Directory structure with per-file line counts, language-convention
    /// entry points, and publicly exported symbol names.
    pub fn map_repo(&self) -> CodePlaneResult<RepoMap> {
        let mut map = RepoMap::default();
        for (path, line_count) in self.structural.file_summaries()? {
            if let Some(name) = Path::new(&path).file_name().and_then(|n| n.to_str()) {
                if ENTRY_POINT_NAMES.contains(&name) {
                    map.entry_points.push(path.clone());
                }
            }
            map.structure.push(FileSummary { path, line_count });
        }
        map.public_symbols = self.structural.public_symbol_names()?;
        Ok(map)
    }
}

/// Structural facts plus the computed lexical document body for one file,
/// before real database ids are baked into the final write.
struct PreparedWrite {
    context: ContextUpsert,
    file: FileUpsert,
    facts: crate::types::FileFacts,
    facts_body: String,
    /// Set when parsing hit a syntax error or failed outright; surfaced
    /// through `IndexStats::errors` without blocking the rest of the
    /// batch or the file's lexical indexing.
    diagnostic: Option<String>,
}

impl PreparedWrite {
    fn into_file_write(self) -> FileWrite {
        FileWrite { context: self.context, file: self.file, facts: self.facts }
    }
}

fn index_contexts(contexts: &[DiscoveredContext]) -> HashMap<String, DiscoveredContext> {
    contexts.iter().map(|c| (c.root_path.clone(), c.clone())).collect()
}

fn resolve_context(context_root: &str, contexts: &HashMap<String, DiscoveredContext>) -> ContextUpsert {
    if let Some(ctx) = contexts.get(context_root) {
        return ContextUpsert {
            name: if ctx.root_path.is_empty() { "root".to_string() } else { ctx.root_path.clone() },
            language: ctx.language,
            root_path: ctx.root_path.clone(),
            manifest_path: ctx.manifest_path.clone(),
            config_hash: hex::encode(Sha256::digest(ctx.manifest_path.as_bytes())),
        };
    }
    ContextUpsert {
        name: if context_root.is_empty() { "root".to_string() } else { context_root.to_string() },
        language: Language::Unknown,
        root_path: context_root.to_string(),
        manifest_path: String::new(),
        config_hash: String::new(),
    }
}

fn now_epoch_seconds() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("Cargo.toml"), "[package]\nname=\"x\"\n").expect("write manifest");
        fs::write(dir.path().join("main.rs"), "fn foo() -> i32 { 1 }\n").expect("write file");
        dir
    }

    #[test]
    fn test_initialize_and_reindex_full_publishes_epoch() {
        let dir = setup_repo();
        let config = Config::defaults(dir.path());
        let (coordinator, report) = Coordinator::initialize(dir.path(), config).expect("initialize");
        assert_eq!(report.epoch, 0);

        let stats = coordinator.reindex_full().expect("reindex_full");
        assert!(stats.files_added >= 1);
        assert_eq!(coordinator.current_epoch(), 1);

        let def = coordinator.get_def("foo", None).expect("get_def").expect("found");
        assert_eq!(def.name, "foo");
    }

    #[test]
    fn test_await_epoch_returns_immediately_when_already_published() {
        let dir = setup_repo();
        let config = Config::defaults(dir.path());
        let (coordinator, _report) = Coordinator::initialize(dir.path(), config).expect("initialize");
        coordinator.reindex_full().expect("reindex_full");
        assert!(coordinator.await_epoch(1, Duration::from_millis(10)));
    }

    #[test]
    fn test_await_epoch_times_out_when_never_published() {
        let dir = setup_repo();
        let config = Config::defaults(dir.path());
        let (coordinator, _report) = Coordinator::initialize(dir.path(), config).expect("initialize");
        assert!(!coordinator.await_epoch(5, Duration::from_millis(50)));
    }

    #[test]
    fn test_search_finds_indexed_body_text() {
        let dir = setup_repo();
        let config = Config::defaults(dir.path());
        let (coordinator, _report) = Coordinator::initialize(dir.path(), config).expect("initialize");
        coordinator.reindex_full().expect("reindex_full");

        let hits = coordinator.search("foo", 10).expect("search");
        assert!(hits.iter().any(|h| h.path == "main.rs"));
    }
}
