//! Batched fact writes and epoch publication.
//!
//! A file's facts are never patched in place, but they are not hard
//! deleted either: each touched file has its prior facts closed
//! (`epoch_removed` set to the epoch of the reparse that superseded them)
//! and the freshly parsed ones inserted at `epoch_added`, inside the same
//! transaction that records the epoch. A fact therefore always carries
//! the epoch it became visible in and, once superseded, the epoch it
//! stopped being visible in -- history stays queryable, current state is
//! just the `epoch_removed IS NULL` slice of it.
//!
//! Definitions keep a stable, content-derived id (`def_fact_id`), so an
//! unchanged definition across a reparse is recognized as the same fact
//! and left untouched rather than closed and reopened. References,
//! imports, and calls have no such identity -- a reparse closes every
//! live fact of that kind for the file and inserts the new set fresh.

use rusqlite::{params, Connection};

use super::StructuralStore;
use crate::error::CodePlaneResult;
use crate::types::{CallFact, DefFact, ExcludedPath, FileFacts, ImportFact, Language, RefFact};

/// A context row to upsert, keyed on `(root_path, language)`.
pub struct ContextUpsert {
    pub name: String,
    pub language: Language,
    pub root_path: String,
    pub manifest_path: String,
    pub config_hash: String,
}

/// A file row to upsert, keyed on `path`.
pub struct FileUpsert {
    pub path: String,
    pub language: Language,
    pub content_hash: String,
    pub line_count: u32,
    pub parse_failed: bool,
}

/// One file's worth of work inside an epoch: the context and file rows
/// it belongs to, plus the facts extracted from its current content.
pub struct FileWrite {
    pub context: ContextUpsert,
    pub file: FileUpsert,
    pub facts: FileFacts,
}

/// Everything to publish as one epoch.
pub struct EpochWriteBatch {
    pub epoch_id: i64,
    pub created_at: i64,
    pub committed_at: i64,
    pub files: Vec<FileWrite>,
    /// Paths that no longer exist or are no longer indexable; marked
    /// `present = 0` rather than deleted, so fact history up to
    /// `epoch_removed` stays queryable.
    pub removed_paths: Vec<String>,
    /// Paths the ignore resolver currently rejects, from the same
    /// discovery pass that produced `files`. Reconciled wholesale: this
    /// is always the complete excluded set, not a delta.
    pub excluded: Vec<ExcludedPath>,
}

impl StructuralStore {
    /// Ensure a context and file row exist for `file`, returning their
    /// ids. Called before parsing so fact ids (which embed `file_id`)
    /// can be computed; the same upsert runs again inside `commit_epoch`
    /// with the final content hash and line count, which is idempotent.
    pub fn ensure_ids(&self, context: &ContextUpsert, file: &FileUpsert, epoch: i64) -> CodePlaneResult<(i64, i64)> {
        let conn = self.conn.lock();
        let context_id = upsert_context(&conn, context)?;
        let file_id = upsert_file(&conn, file, context_id, epoch)?;
        Ok((context_id, file_id))
    }

    /// Steps 5-6 of publication: within one transaction, upsert every
    /// touched context/file row, replace their facts, mark removed paths
    /// absent, and record the epoch. Call `mark_lexical_committed` first.
    pub fn commit_epoch(&self, batch: &EpochWriteBatch) -> CodePlaneResult<()> {
        self.with_retry(|| {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;

            for write in &batch.files {
                let context_id = upsert_context(&tx, &write.context)?;
                let file_id = upsert_file(&tx, &write.file, context_id, batch.epoch_id)?;
                replace_file_facts(&tx, file_id, context_id, &write.facts, batch.epoch_id)?;
            }

            for path in &batch.removed_paths {
                tx.execute(
                    "UPDATE files SET present = 0, indexed_epoch = ?2 WHERE path = ?1",
                    params![path, batch.epoch_id],
                )?;
            }

            replace_excluded_paths(&tx, &batch.excluded, batch.epoch_id)?;

            tx.execute(
                "INSERT INTO epochs (epoch_id, created_at, committed_at) VALUES (?1, ?2, ?3)",
                params![batch.epoch_id, batch.created_at, batch.committed_at],
            )?;

            tx.commit()?;
            Ok(())
        })
    }
}

/// Reconcile `excluded_paths` against the complete excluded set from the
/// discovery pass that produced this epoch: drop rows for paths no
/// longer excluded, upsert the rest with the current epoch.
fn replace_excluded_paths(conn: &Connection, excluded: &[ExcludedPath], epoch: i64) -> CodePlaneResult<()> {
    if excluded.is_empty() {
        conn.execute("DELETE FROM excluded_paths", [])?;
        return Ok(());
    }

    let placeholders = excluded.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let delete_sql = format!("DELETE FROM excluded_paths WHERE path NOT IN ({placeholders})");
    let paths: Vec<String> = excluded.iter().map(|e| e.path.to_string_lossy().into_owned()).collect();
    conn.execute(&delete_sql, rusqlite::params_from_iter(paths.iter()))?;

    for entry in excluded {
        conn.execute(
            "INSERT INTO excluded_paths (path, reason, observed_epoch)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (path) DO UPDATE SET reason = excluded.reason, observed_epoch = excluded.observed_epoch",
            params![entry.path.to_string_lossy(), entry.reason, epoch],
        )?;
    }
    Ok(())
}

fn upsert_context(conn: &Connection, context: &ContextUpsert) -> CodePlaneResult<i64> {
    conn.execute(
        "INSERT INTO contexts (name, language, root_path, manifest_path, config_hash)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (root_path, language) DO UPDATE SET
            name = excluded.name,
            manifest_path = excluded.manifest_path,
            config_hash = excluded.config_hash",
        params![
            context.name,
            context.language.as_str(),
            context.root_path,
            context.manifest_path,
            context.config_hash,
        ],
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM contexts WHERE root_path = ?1 AND language = ?2",
        params![context.root_path, context.language.as_str()],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn upsert_file(conn: &Connection, file: &FileUpsert, context_id: i64, epoch: i64) -> CodePlaneResult<i64> {
    conn.execute(
        "INSERT INTO files (path, context_id, language, content_hash, line_count, indexed_epoch, parse_failed, present)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
         ON CONFLICT (path) DO UPDATE SET
            context_id = excluded.context_id,
            language = excluded.language,
            content_hash = excluded.content_hash,
            line_count = excluded.line_count,
            indexed_epoch = excluded.indexed_epoch,
            parse_failed = excluded.parse_failed,
            present = 1",
        params![
            file.path,
            context_id,
            file.language.as_str(),
            file.content_hash,
            file.line_count,
            epoch,
            i64::from(file.parse_failed),
        ],
    )?;
    let id: i64 = conn.query_row("SELECT id FROM files WHERE path = ?1", params![file.path], |row| row.get(0))?;
    Ok(id)
}

fn replace_file_facts(
    conn: &Connection,
    file_id: i64,
    context_id: i64,
    facts: &FileFacts,
    epoch: i64,
) -> CodePlaneResult<()> {
    // Definitions carry a stable, content-derived id: close whichever
    // live ones are absent from this parse, then insert only the ids
    // that are actually new. An unchanged definition keeps its original
    // `epoch_added` untouched.
    let live_def_ids: std::collections::HashSet<i64> = {
        let mut stmt = conn.prepare("SELECT id FROM def_facts WHERE file_id = ?1 AND epoch_removed IS NULL")?;
        let rows = stmt.query_map(params![file_id], |row| row.get::<_, i64>(0))?;
        rows.collect::<Result<_, _>>()?
    };
    let new_def_ids: std::collections::HashSet<i64> = facts.defs.iter().map(|d| d.id as i64).collect();

    for closed_id in live_def_ids.difference(&new_def_ids) {
        conn.execute(
            "UPDATE def_facts SET epoch_removed = ?2 WHERE id = ?1 AND epoch_removed IS NULL",
            params![closed_id, epoch],
        )?;
    }
    for def in &facts.defs {
        if !live_def_ids.contains(&(def.id as i64)) {
            insert_def(conn, def, file_id, context_id, epoch)?;
        }
    }

    // References, imports, and calls have no stable identity across a
    // reparse: close every fact of that kind still live for this file,
    // then insert the freshly parsed set.
    conn.execute(
        "UPDATE ref_facts SET epoch_removed = ?2 WHERE file_id = ?1 AND epoch_removed IS NULL",
        params![file_id, epoch],
    )?;
    conn.execute(
        "UPDATE import_facts SET epoch_removed = ?2 WHERE file_id = ?1 AND epoch_removed IS NULL",
        params![file_id, epoch],
    )?;
    conn.execute(
        "UPDATE call_facts SET epoch_removed = ?2 WHERE file_id = ?1 AND epoch_removed IS NULL",
        params![file_id, epoch],
    )?;

    for r#ref in &facts.refs {
        insert_ref(conn, r#ref, file_id, context_id, epoch)?;
    }
    for import in &facts.imports {
        insert_import(conn, import, file_id, context_id, epoch)?;
    }
    for call in &facts.calls {
        insert_call(conn, call, file_id, context_id, epoch)?;
    }

    // Docstrings aren't independently versioned -- they're attached 1:1
    // to a def row, new or unchanged. Clear whatever was attached to
    // this parse's def ids before inserting the current set, otherwise
    // an unchanged def (kept rather than closed-and-reinserted above)
    // would accumulate a duplicate docstring row on every reparse.
    if !new_def_ids.is_empty() {
        let placeholders = new_def_ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let delete_sql = format!("DELETE FROM docstrings WHERE def_id IN ({placeholders})");
        conn.execute(&delete_sql, rusqlite::params_from_iter(new_def_ids.iter()))?;
    }
    for doc in &facts.docstrings {
        conn.execute(
            "INSERT INTO docstrings (def_id, content, start_line, start_column, end_line, end_column)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                doc.def_id as i64,
                doc.content,
                doc.start.line,
                doc.start.column,
                doc.end.line,
                doc.end.column,
            ],
        )?;
    }

    Ok(())
}

fn insert_def(conn: &Connection, def: &DefFact, file_id: i64, context_id: i64, epoch: i64) -> CodePlaneResult<()> {
    conn.execute(
        "INSERT INTO def_facts
            (id, file_id, context_id, kind, name, qualified_name, lexical_path, signature_hash,
             disambiguator, start_line, start_column, end_line, end_column, is_public, epoch_added, epoch_removed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, NULL)",
        params![
            def.id as i64,
            file_id,
            context_id,
            def.kind.as_str(),
            def.name,
            def.qualified_name,
            def.lexical_path,
            def.signature_hash,
            def.disambiguator,
            def.start.line,
            def.start.column,
            def.end.line,
            def.end.column,
            i64::from(def.is_public),
            epoch,
        ],
    )?;
    Ok(())
}

fn insert_ref(conn: &Connection, r#ref: &RefFact, file_id: i64, context_id: i64, epoch: i64) -> CodePlaneResult<()> {
    conn.execute(
        "INSERT INTO ref_facts (file_id, context_id, name, start_line, start_column, end_line, end_column, role, enclosing_def_id, epoch_added)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            file_id,
            context_id,
            r#ref.name,
            r#ref.start.line,
            r#ref.start.column,
            r#ref.end.line,
            r#ref.end.column,
            r#ref.role.as_str(),
            r#ref.enclosing_def_id.map(|id| id as i64),
            epoch,
        ],
    )?;
    Ok(())
}

fn insert_import(conn: &Connection, import: &ImportFact, file_id: i64, context_id: i64, epoch: i64) -> CodePlaneResult<()> {
    let symbols = serde_json::to_string(&import.imported_symbols)
        .map_err(|e| crate::error::CodePlaneError::Internal(format!("serialize imported_symbols: {e}")))?;
    conn.execute(
        "INSERT INTO import_facts (file_id, context_id, module_path, alias, imported_symbols, start_line, start_column, end_line, end_column, epoch_added)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            file_id,
            context_id,
            import.module_path,
            import.alias,
            symbols,
            import.start.line,
            import.start.column,
            import.end.line,
            import.end.column,
            epoch,
        ],
    )?;
    Ok(())
}

fn insert_call(conn: &Connection, call: &CallFact, file_id: i64, context_id: i64, epoch: i64) -> CodePlaneResult<()> {
    conn.execute(
        "INSERT INTO call_facts (file_id, context_id, callee_name, start_line, start_column, end_line, end_column, enclosing_def_id, epoch_added)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            file_id,
            context_id,
            call.callee_name,
            call.start.line,
            call.start.column,
            call.end.line,
            call.end.column,
            call.enclosing_def_id.map(|id| id as i64),
            epoch,
        ],
    )?;
    Ok(())
}
