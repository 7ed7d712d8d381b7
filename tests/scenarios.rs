//! End-to-end scenarios against the real coordinator: real SQLite, real
//! tantivy segments, tempdir-backed repositories. No mocking of either
//! store.

use std::fs;
use std::path::Path;
use std::time::Duration;

use codeplane_index::config::Config;
use codeplane_index::structural_store::RecoveryAction;
use codeplane_index::Coordinator;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, content).expect("write file");
}

/// Scenario A -- basic indexing and query.
#[test]
fn scenario_a_basic_indexing_and_query() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "src/a.py", "def foo(x): return x\n");

    let config = Config::defaults(dir.path());
    let (coordinator, report) = Coordinator::initialize(dir.path(), config).expect("initialize");
    assert_eq!(report.epoch, 0);

    coordinator.reindex_full().expect("reindex_full");
    assert!(coordinator.current_epoch() >= 1);

    let def = coordinator.get_def("foo", None).expect("get_def").expect("foo found");
    assert_eq!(def.name, "foo");
    assert_eq!(def.start.line, 1);
    assert_eq!(def.end.line, 1);

    let hits = coordinator.search("foo", 10).expect("search");
    assert!(hits.iter().any(|h| h.path == "src/a.py"));
}

/// Scenario B -- an incremental update touches only the changed file.
#[test]
fn scenario_b_incremental_update_touches_one_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "src/a.py", "def foo(x): return x\n");
    write(dir.path(), "src/b.py", "def baz(): pass\n");

    let config = Config::defaults(dir.path());
    let (coordinator, _report) = Coordinator::initialize(dir.path(), config).expect("initialize");
    coordinator.reindex_full().expect("reindex_full");
    let e0 = coordinator.current_epoch();

    let foo_before = coordinator.get_def("foo", None).expect("get_def").expect("foo found");
    let b_state_before = coordinator
        .get_file_state("src/b.py")
        .expect("get_file_state")
        .expect("src/b.py present");

    write(dir.path(), "src/a.py", "def foo(x): return x\n\ndef bar(): pass\n");
    let stats = coordinator
        .reindex_incremental(&[dir.path().join("src/a.py")])
        .expect("reindex_incremental");

    assert_eq!(stats.touched_paths, vec!["src/a.py".to_string()]);
    assert!(coordinator.current_epoch() >= e0 + 1);

    coordinator.get_def("bar", None).expect("get_def").expect("bar found");
    let foo_after = coordinator.get_def("foo", None).expect("get_def").expect("foo still found");
    assert_eq!(foo_after.id, foo_before.id);

    let b_state_after = coordinator
        .get_file_state("src/b.py")
        .expect("get_file_state")
        .expect("src/b.py still present");
    assert_eq!(b_state_after.indexed_epoch, b_state_before.indexed_epoch);
}

/// Scenario C -- crash recovery after the lexical commit but before the
/// structural commit. Modeled directly against the structural store
/// rather than actually killing a process: `begin_epoch_journal` +
/// `mark_lexical_committed` with no matching `commit_epoch` is exactly
/// the on-disk state a crash in that window leaves behind.
#[test]
fn scenario_c_crash_recovery_after_lexical_commit() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "src/a.py", "def foo(): pass\n");

    let config = Config::defaults(dir.path());
    let (coordinator, _report) = Coordinator::initialize(dir.path(), config.clone()).expect("initialize");
    coordinator.reindex_full().expect("reindex_full");
    let e0 = coordinator.current_epoch();
    drop(coordinator);

    // Reopen and simulate an abandoned publication of epoch e0 + 1: the
    // lexical side committed, the structural side never did.
    {
        let structural = codeplane_index::structural_store::StructuralStore::open(
            &config.index_dir().join("structural.db"),
            &config.structural_store,
        )
        .expect("reopen structural store");
        structural.begin_epoch_journal(e0 + 1, 0).expect("begin journal");
        structural.mark_lexical_committed(e0 + 1).expect("mark lexical committed");
    }

    let (recovered, report) = Coordinator::initialize(dir.path(), config).expect("reinitialize");
    assert_eq!(report.epoch, e0);
    assert_eq!(recovered.current_epoch(), e0);
    assert!(!report.errors.is_empty());

    let stats = recovered.reindex_full().expect("reindex after recovery");
    assert!(stats.errors.is_empty());
    assert_eq!(recovered.current_epoch(), e0 + 1);
    recovered.get_def("foo", None).expect("get_def").expect("foo still resolvable after recovery");
}

/// Scenario D -- ignore file respect, including a negated sub-pattern.
#[test]
fn scenario_d_ignore_file_respect() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), ".cplignore", "build/\n!build/keep.py\n");
    write(dir.path(), "build/a.py", "def unwanted(): pass\n");
    write(dir.path(), "build/keep.py", "def kept(): pass\n");
    write(dir.path(), "src/c.py", "def wanted(): pass\n");

    let config = Config::defaults(dir.path());
    let (coordinator, _report) = Coordinator::initialize(dir.path(), config).expect("initialize");
    coordinator.reindex_full().expect("reindex_full");

    assert!(coordinator.get_file_state("build/a.py").expect("get_file_state").is_none());
    assert!(coordinator.get_file_state("build/keep.py").expect("get_file_state").is_some());
    assert!(coordinator.get_file_state("src/c.py").expect("get_file_state").is_some());
}

/// Scenario E -- a syntactically invalid file is isolated: it is
/// flagged and lexically searchable but does not block facts from its
/// well-formed sibling.
#[test]
fn scenario_e_parse_failure_isolation() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "src/bad.py", "def bad(:\n    this is not python\n");
    write(dir.path(), "src/good.py", "def good(): return 1\n");

    let config = Config::defaults(dir.path());
    let (coordinator, _report) = Coordinator::initialize(dir.path(), config).expect("initialize");
    let stats = coordinator.reindex_full().expect("reindex_full");

    assert!(stats.errors.iter().any(|e| e.contains("src/bad.py")));

    let bad_state = coordinator
        .get_file_state("src/bad.py")
        .expect("get_file_state")
        .expect("src/bad.py still present");
    assert!(bad_state.parse_failed);

    let hits = coordinator.search("bad", 10).expect("search");
    assert!(hits.iter().any(|h| h.path == "src/bad.py"));

    coordinator.get_def("good", None).expect("get_def").expect("good still resolvable");
}

/// Scenario F -- atomic visibility under a larger batch: every path a
/// search returns back has a committed structural row, never a
/// half-published view. Scaled down from the ten-thousand-file figure
/// to keep the test fast; the property being checked does not depend
/// on batch size.
#[test]
fn scenario_f_atomic_visibility_under_a_larger_batch() {
    let dir = tempfile::tempdir().expect("tempdir");
    for i in 0..200 {
        write(dir.path(), &format!("src/m{i}.py"), &format!("def fn{i}(): return {i}\n"));
    }

    let config = Config::defaults(dir.path());
    let (coordinator, _report) = Coordinator::initialize(dir.path(), config).expect("initialize");
    coordinator.reindex_full().expect("reindex_full");

    let hits = coordinator.search("fn", 500).expect("search");
    assert!(!hits.is_empty());
    for hit in hits {
        let state = coordinator
            .get_file_state(&hit.path)
            .expect("get_file_state")
            .expect("every lexical hit has a structural row");
        assert!(state.indexed_epoch >= 1);
    }
}

/// A file above the parse-size threshold is still lexically indexed
/// but produces no structural facts.
#[test]
fn oversized_file_is_lexical_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let huge_body = "x = 1\n".repeat(10_000);
    write(dir.path(), "src/huge.py", &huge_body);

    let mut config = Config::defaults(dir.path());
    config.indexing.max_parse_bytes = 16;
    let (coordinator, _report) = Coordinator::initialize(dir.path(), config).expect("initialize");
    coordinator.reindex_full().expect("reindex_full");

    let state = coordinator
        .get_file_state("src/huge.py")
        .expect("get_file_state")
        .expect("still present");
    assert!(state.parse_failed);

    let hits = coordinator.search("x", 10).expect("search");
    assert!(hits.iter().any(|h| h.path == "src/huge.py"));
}

/// Re-running `reindex_full` over an unchanged tree only advances the
/// epoch counter; fact counts are unaffected.
#[test]
fn reindex_full_is_idempotent_on_unchanged_tree() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "src/a.py", "def foo(): pass\n");

    let config = Config::defaults(dir.path());
    let (coordinator, _report) = Coordinator::initialize(dir.path(), config).expect("initialize");
    let first = coordinator.reindex_full().expect("first reindex_full");
    let second = coordinator.reindex_full().expect("second reindex_full");

    assert_eq!(first.defs_extracted, second.defs_extracted);
    assert_eq!(coordinator.current_epoch(), 2);
}

/// `await_epoch` unblocks as soon as the epoch it names is published,
/// observed from a second thread so it genuinely exercises the condvar
/// rather than the fast-path check.
#[test]
fn await_epoch_unblocks_on_publication_from_another_thread() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "src/a.py", "def foo(): pass\n");

    let config = Config::defaults(dir.path());
    let (coordinator, _report) = Coordinator::initialize(dir.path(), config).expect("initialize");
    let coordinator = std::sync::Arc::new(coordinator);

    let waiter = {
        let coordinator = std::sync::Arc::clone(&coordinator);
        std::thread::spawn(move || coordinator.await_epoch(1, Duration::from_secs(5)))
    };

    coordinator.reindex_full().expect("reindex_full");
    assert!(waiter.join().expect("waiter thread"));
}

/// `recover` reports `Clean` for a freshly created, never-touched store.
#[test]
fn recover_reports_clean_on_fresh_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "src/a.py", "def foo(): pass\n");

    let config = Config::defaults(dir.path());
    let structural = codeplane_index::structural_store::StructuralStore::open(
        &config.index_dir().join("structural.db"),
        &config.structural_store,
    )
    .expect("open structural store");
    assert_eq!(structural.recover().expect("recover"), RecoveryAction::Clean);
}

/// An edit inside a directory pruned by `.cplignore` never reaches
/// `reindex_incremental`'s write path: no epoch is published, and the
/// file never appears as indexed.
#[test]
fn incremental_update_inside_pruned_subtree_is_a_no_op() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), ".cplignore", "build/\n");
    write(dir.path(), "build/a.py", "def unwanted(): pass\n");
    write(dir.path(), "src/a.py", "def wanted(): pass\n");

    let config = Config::defaults(dir.path());
    let (coordinator, _report) = Coordinator::initialize(dir.path(), config).expect("initialize");
    coordinator.reindex_full().expect("reindex_full");
    let e0 = coordinator.current_epoch();

    assert!(!coordinator.is_indexable(&dir.path().join("build/a.py")));

    write(dir.path(), "build/a.py", "def unwanted(): pass\n\ndef more(): pass\n");
    let stats = coordinator
        .reindex_incremental(&[dir.path().join("build/a.py")])
        .expect("reindex_incremental");

    assert_eq!(stats, codeplane_index::types::IndexStats::default());
    assert_eq!(coordinator.current_epoch(), e0);
    assert!(coordinator.get_file_state("build/a.py").expect("get_file_state").is_none());
}

/// A path that was never indexed (because it lives under a pruned
/// subtree) must not be misclassified as a removal when it is handed to
/// `reindex_incremental` directly -- it was never present, so there is
/// nothing to remove and no epoch should publish.
#[test]
fn incremental_update_does_not_treat_never_indexed_path_as_removed() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), ".cplignore", "build/\n");
    write(dir.path(), "src/a.py", "def wanted(): pass\n");

    let config = Config::defaults(dir.path());
    let (coordinator, _report) = Coordinator::initialize(dir.path(), config).expect("initialize");
    coordinator.reindex_full().expect("reindex_full");
    let e0 = coordinator.current_epoch();

    // build/ghost.py never existed on disk and was never indexed, but a
    // stale watcher event could still name it.
    let stats = coordinator
        .reindex_incremental(&[dir.path().join("build/ghost.py")])
        .expect("reindex_incremental");

    assert_eq!(stats, codeplane_index::types::IndexStats::default());
    assert_eq!(coordinator.current_epoch(), e0);
}

/// Deleting a previously-indexed file and reindexing it is recorded as a
/// real removal, distinguishing it from the never-indexed case above.
#[test]
fn incremental_update_removes_a_deleted_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "src/a.py", "def foo(): pass\n");
    write(dir.path(), "src/b.py", "def bar(): pass\n");

    let config = Config::defaults(dir.path());
    let (coordinator, _report) = Coordinator::initialize(dir.path(), config).expect("initialize");
    coordinator.reindex_full().expect("reindex_full");
    let e0 = coordinator.current_epoch();
    assert!(coordinator.get_file_state("src/b.py").expect("get_file_state").is_some());

    fs::remove_file(dir.path().join("src/b.py")).expect("remove file");
    let stats = coordinator
        .reindex_incremental(&[dir.path().join("src/b.py")])
        .expect("reindex_incremental");

    assert_eq!(stats.files_removed, 1);
    assert!(coordinator.current_epoch() > e0);
    assert!(coordinator.get_file_state("src/b.py").expect("get_file_state").is_none());
}

/// Reparsing a file after removing one of its definitions keeps the
/// removed definition's row (closed at the reparse epoch) rather than
/// deleting it, while a definition that survives unchanged keeps its
/// original id and `epoch_added`.
#[test]
fn reparse_closes_removed_definitions_instead_of_deleting_them() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "src/a.py", "def foo(): pass\n\ndef bar(): pass\n");

    let config = Config::defaults(dir.path());
    let (coordinator, _report) = Coordinator::initialize(dir.path(), config).expect("initialize");
    coordinator.reindex_full().expect("reindex_full");

    let foo_before = coordinator.get_def("foo", None).expect("get_def").expect("foo found");

    write(dir.path(), "src/a.py", "def foo(): pass\n");
    coordinator
        .reindex_incremental(&[dir.path().join("src/a.py")])
        .expect("reindex_incremental");

    let foo_after = coordinator.get_def("foo", None).expect("get_def").expect("foo still found");
    assert_eq!(foo_after.id, foo_before.id);

    assert!(coordinator.get_def("bar", None).expect("get_def").is_none());
}

/// A directory pruned by `.cplignore` is recorded once in `excluded_paths`
/// as the directory itself, not once per file underneath it -- the walk
/// never descends into it to find those files in the first place.
#[test]
fn excluded_paths_records_pruned_directory_not_its_contents() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), ".cplignore", "build/\n");
    write(dir.path(), "build/a.py", "def one(): pass\n");
    write(dir.path(), "build/nested/b.py", "def two(): pass\n");
    write(dir.path(), "src/c.py", "def kept(): pass\n");

    let config = Config::defaults(dir.path());
    let (coordinator, _report) = Coordinator::initialize(dir.path(), config).expect("initialize");
    coordinator.reindex_full().expect("reindex_full");

    let excluded = coordinator.list_excluded_paths().expect("list_excluded_paths");
    assert_eq!(excluded.len(), 1);
    assert!(excluded[0].path.ends_with("build"));
}

/// Re-running a full reindex after an ignore pattern is removed clears
/// the stale `excluded_paths` row for the path that is newly indexable.
#[test]
fn excluded_paths_is_reconciled_when_ignore_pattern_is_removed() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), ".cplignore", "build/\n");
    write(dir.path(), "build/a.py", "def one(): pass\n");

    let config = Config::defaults(dir.path());
    let (coordinator, _report) = Coordinator::initialize(dir.path(), config).expect("initialize");
    coordinator.reindex_full().expect("reindex_full");
    assert_eq!(coordinator.list_excluded_paths().expect("list_excluded_paths").len(), 1);

    fs::remove_file(dir.path().join(".cplignore")).expect("remove ignore file");
    coordinator.refresh_ignore();
    coordinator.reindex_full().expect("reindex_full");

    assert!(coordinator.list_excluded_paths().expect("list_excluded_paths").is_empty());
    assert!(coordinator.get_file_state("build/a.py").expect("get_file_state").is_some());
}
