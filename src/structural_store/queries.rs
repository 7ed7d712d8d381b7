//! Read-side queries backing the coordinator's public API.

use rusqlite::{params, OptionalExtension};

use super::StructuralStore;
use crate::error::CodePlaneResult;
use crate::types::{Context, DefFact, DefKind, ExcludedPath, FileState, Language, Position, RefFact, RefRole};

/// Counts backing `get_file_stats`.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct FileStats {
    pub total: u64,
    pub indexed: u64,
    pub parse_failed: u64,
}

impl StructuralStore {
    /// The highest epoch recorded, or 0 if none has been published yet.
    pub fn current_epoch(&self) -> CodePlaneResult<i64> {
        let conn = self.conn.lock();
        let epoch: i64 = conn.query_row("SELECT COALESCE(MAX(epoch_id), 0) FROM epochs", [], |row| row.get(0))?;
        Ok(epoch)
    }

    /// Every path currently marked present, used by lexical reconciliation
    /// and by `map_repo`.
    pub fn present_paths(&self) -> CodePlaneResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path FROM files WHERE present = 1")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Content hash, last indexed epoch, and parse status for one path.
    pub fn get_file_state(&self, path: &str) -> CodePlaneResult<Option<FileState>> {
        let conn = self.conn.lock();
        let state = conn
            .query_row(
                "SELECT content_hash, indexed_epoch, parse_failed FROM files WHERE path = ?1 AND present = 1",
                params![path],
                |row| {
                    let parse_failed: i64 = row.get(2)?;
                    Ok(FileState {
                        content_hash: row.get(0)?,
                        indexed_epoch: row.get(1)?,
                        parse_failed: parse_failed != 0,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    /// Look up a definition by name, optionally narrowed to one file path.
    /// When several defs share a name (overloads, re-declarations across
    /// files), the most recently added one wins.
    pub fn get_def(&self, name: &str, path: Option<&str>) -> CodePlaneResult<Option<DefFact>> {
        let conn = self.conn.lock();
        let sql = if path.is_some() {
            "SELECT d.id, d.file_id, d.context_id, d.kind, d.name, d.qualified_name, d.lexical_path,
                    d.signature_hash, d.disambiguator, d.start_line, d.start_column, d.end_line, d.end_column, d.is_public
             FROM def_facts d
             JOIN files f ON f.id = d.file_id
             WHERE d.name = ?1 AND f.path = ?2 AND d.epoch_removed IS NULL
             ORDER BY d.epoch_added DESC
             LIMIT 1"
        } else {
            "SELECT d.id, d.file_id, d.context_id, d.kind, d.name, d.qualified_name, d.lexical_path,
                    d.signature_hash, d.disambiguator, d.start_line, d.start_column, d.end_line, d.end_column, d.is_public
             FROM def_facts d
             WHERE d.name = ?1 AND d.epoch_removed IS NULL
             ORDER BY d.epoch_added DESC
             LIMIT 1"
        };

        let def = if let Some(path) = path {
            conn.query_row(sql, params![name, path], row_to_def_fact).optional()?
        } else {
            conn.query_row(sql, params![name], row_to_def_fact).optional()?
        };
        Ok(def)
    }

    /// Every definition currently live in one file.
    pub fn get_all_defs(&self, file_id: i64) -> CodePlaneResult<Vec<DefFact>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, file_id, context_id, kind, name, qualified_name, lexical_path,
                    signature_hash, disambiguator, start_line, start_column, end_line, end_column, is_public
             FROM def_facts
             WHERE file_id = ?1 AND epoch_removed IS NULL
             ORDER BY start_line, start_column",
        )?;
        let rows = stmt.query_map(params![file_id], row_to_def_fact)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// References targeting either a def id or a bare name, most recent
    /// `limit` by source position.
    pub fn get_references(&self, def_id: Option<u64>, name: Option<&str>, limit: u32) -> CodePlaneResult<Vec<RefFact>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT file_id, context_id, name, start_line, start_column, end_line, end_column, role, enclosing_def_id
             FROM ref_facts
             WHERE (?1 IS NULL OR enclosing_def_id = ?1) AND (?2 IS NULL OR name = ?2) AND epoch_removed IS NULL
             ORDER BY file_id, start_line, start_column
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![def_id.map(|id| id as i64), name, limit],
            |row| {
                let role: String = row.get(7)?;
                let enclosing: Option<i64> = row.get(8)?;
                Ok(RefFact {
                    file_id: row.get(0)?,
                    context_id: row.get(1)?,
                    name: row.get(2)?,
                    start: Position { line: row.get(3)?, column: row.get(4)? },
                    end: Position { line: row.get(5)?, column: row.get(6)? },
                    role: RefRole::from_str_lossy(&role),
                    enclosing_def_id: enclosing.map(|id| id as u64),
                })
            },
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Path and line count for every present file, used by `map_repo`.
    pub fn file_summaries(&self) -> CodePlaneResult<Vec<(String, u32)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path, line_count FROM files WHERE present = 1 ORDER BY path")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Qualified names of every definition the parser judged public,
    /// used by `map_repo`.
    pub fn public_symbol_names(&self) -> CodePlaneResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT qualified_name FROM def_facts WHERE is_public = 1 AND epoch_removed IS NULL ORDER BY qualified_name",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Every context row currently recorded, used to report back what's
    /// already known about a repo on `initialize`.
    pub fn list_contexts(&self) -> CodePlaneResult<Vec<Context>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, language, root_path, manifest_path, config_hash FROM contexts ORDER BY root_path",
        )?;
        let rows = stmt.query_map([], |row| {
            let language: String = row.get(2)?;
            Ok(Context {
                id: row.get(0)?,
                name: row.get(1)?,
                language: Language::from_str_lossy(&language),
                root_path: row.get(3)?,
                manifest_path: row.get(4)?,
                config_hash: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Every path the ignore resolver currently rejects, as of the most
    /// recent batch's discovery pass.
    pub fn list_excluded_paths(&self) -> CodePlaneResult<Vec<ExcludedPath>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path, reason FROM excluded_paths ORDER BY path")?;
        let rows = stmt.query_map([], |row| {
            let path: String = row.get(0)?;
            Ok(ExcludedPath { path: path.into(), reason: row.get(1)? })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Aggregate counts for `get_file_stats`.
    pub fn get_file_stats(&self) -> CodePlaneResult<FileStats> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*),
                    SUM(CASE WHEN indexed_epoch > 0 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN parse_failed != 0 THEN 1 ELSE 0 END)
             FROM files WHERE present = 1",
            [],
            |row| {
                Ok(FileStats {
                    total: row.get::<_, i64>(0)? as u64,
                    indexed: row.get::<_, Option<i64>>(1)?.unwrap_or(0) as u64,
                    parse_failed: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u64,
                })
            },
        )
        .map_err(Into::into)
    }
}

fn row_to_def_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<DefFact> {
    let id: i64 = row.get(0)?;
    let kind: String = row.get(3)?;
    let disambiguator: u32 = row.get(8)?;
    let is_public: i64 = row.get(13)?;
    Ok(DefFact {
        id: id as u64,
        file_id: row.get(1)?,
        context_id: row.get(2)?,
        kind: DefKind::from_str_lossy(&kind),
        name: row.get(4)?,
        qualified_name: row.get(5)?,
        lexical_path: row.get(6)?,
        signature_hash: row.get(7)?,
        disambiguator,
        start: Position { line: row.get(9)?, column: row.get(10)? },
        end: Position { line: row.get(11)?, column: row.get(12)? },
        is_public: is_public != 0,
    })
}
