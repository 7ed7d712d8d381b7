//! Lexical store: a segment-based full-text index over file contents.
//!
//! Built on `tantivy`. Each document is one file with three fields:
//! `path` (stored, exact-match), `identifiers` (whitespace-tokenized,
//! biased toward symbol-shaped tokens), and `body` (full text, BM25
//! scored). Writes are staged against a single `IndexWriter` and only
//! become visible to readers at `commit`, mirroring tantivy's own
//! immutable-segment model and the stage/commit/rollback wrapper
//! `socket23_sidecar::indexes::indexer::IndexWriteHandle` puts around it.

use std::path::Path;

use parking_lot::{Mutex, RwLock};
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::QueryParser;
use tantivy::schema::{Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, Term};

use crate::error::{CodePlaneError, CodePlaneResult};

const WRITER_BUFFER_BYTES: usize = 64 * 1024 * 1024;

/// One lexical search hit.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub path: String,
    pub score: f32,
}

/// A pending add staged against the writer but not yet committed.
pub struct StagedDocument {
    pub path: String,
    pub identifiers: String,
    pub body: String,
}

struct LexicalSchema {
    schema: Schema,
    path: tantivy::schema::Field,
    identifiers: tantivy::schema::Field,
    body: tantivy::schema::Field,
}

fn build_schema() -> LexicalSchema {
    let mut builder = Schema::builder();
    let path = builder.add_text_field("path", STRING | STORED);
    let identifiers = builder.add_text_field("identifiers", TEXT);
    let body = builder.add_text_field("body", TEXT);
    LexicalSchema {
        schema: builder.build(),
        path,
        identifiers,
        body,
    }
}

/// Segment-based full-text index over a repository's indexable files.
pub struct LexicalStore {
    index: Index,
    fields: LexicalSchema,
    writer: Mutex<IndexWriter>,
    reader: RwLock<IndexReader>,
    /// Opstamp of the most recent commit; the lexical "head".
    head: Mutex<u64>,
}

impl LexicalStore {
    /// Open or create a lexical store at `dir`.
    pub fn open(dir: &Path) -> CodePlaneResult<Self> {
        std::fs::create_dir_all(dir)?;
        let fields = build_schema();
        let directory = MmapDirectory::open(dir).map_err(tantivy::TantivyError::from)?;
        let index = Index::open_or_create(directory, fields.schema.clone())?;
        let writer: IndexWriter = index.writer(WRITER_BUFFER_BYTES)?;
        let reader = index.reader()?;

        Ok(Self {
            index,
            fields,
            writer: Mutex::new(writer),
            reader: RwLock::new(reader),
            head: Mutex::new(0),
        })
    }

    /// Stage a document add. The document is not visible to readers until
    /// `commit`. Any prior document with the same path is deleted first,
    /// implementing the store's "delete by key, then add" update model.
    pub fn stage_upsert(&self, doc: &StagedDocument) -> CodePlaneResult<()> {
        let writer = self.writer.lock();
        let term = Term::from_field_text(self.fields.path, &doc.path);
        writer.delete_term(term);
        writer.add_document(doc!(
            self.fields.path => doc.path.clone(),
            self.fields.identifiers => doc.identifiers.clone(),
            self.fields.body => doc.body.clone(),
        ))?;
        Ok(())
    }

    /// Stage a document delete by path.
    pub fn stage_delete(&self, path: &str) -> CodePlaneResult<()> {
        let writer = self.writer.lock();
        let term = Term::from_field_text(self.fields.path, path);
        writer.delete_term(term);
        Ok(())
    }

    /// Flush staged writes to a new segment, advance the lexical head, and
    /// refresh the reader. Returns the new head id (tantivy's opstamp).
    pub fn commit(&self) -> CodePlaneResult<u64> {
        let mut writer = self.writer.lock();
        let opstamp = writer.commit()?;
        *self.reader.write() = self.index.reader()?;
        *self.head.lock() = opstamp;
        Ok(opstamp)
    }

    /// Discard all staged work since the last commit.
    pub fn rollback(&self) -> CodePlaneResult<()> {
        let mut writer = self.writer.lock();
        writer.rollback()?;
        Ok(())
    }

    /// The opstamp of the most recent commit.
    pub fn head(&self) -> u64 {
        *self.head.lock()
    }

    /// Roll the lexical store back to reflect only a known-good path set,
    /// used by crash recovery when the structural store never observed a
    /// lexically-committed epoch. Deletes every document not in `paths`
    /// and commits, which only ever narrows what readers can see.
    pub fn reconcile_to(&self, paths: &[String]) -> CodePlaneResult<()> {
        let keep: std::collections::HashSet<&str> = paths.iter().map(String::as_str).collect();
        let reader = self.reader.read();
        let searcher = reader.searcher();
        let mut to_delete = Vec::new();
        for segment_reader in searcher.segment_readers() {
            let store = segment_reader
                .get_store_reader(32)
                .map_err(tantivy::TantivyError::from)?;
            for doc_id in segment_reader.doc_ids_alive() {
                let retrieved = store.get(doc_id).map_err(tantivy::TantivyError::from)?;
                if let Some(value) = retrieved.get_first(self.fields.path) {
                    if let Some(path) = value.as_str() {
                        if !keep.contains(path) {
                            to_delete.push(path.to_string());
                        }
                    }
                }
            }
        }
        drop(searcher);
        drop(reader);

        for path in to_delete {
            self.stage_delete(&path)?;
        }
        self.commit()?;
        Ok(())
    }

    /// Search the body and identifiers fields, BM25-ranked.
    pub fn search(&self, query: &str, limit: usize) -> CodePlaneResult<Vec<LexicalHit>> {
        let reader = self.reader.read();
        let searcher = reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.fields.body, self.fields.identifiers]);
        let parsed = parser
            .parse_query(query)
            .map_err(|e| CodePlaneError::InvalidInput { details: format!("bad query: {e}") })?;

        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(limit))?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let retrieved = searcher.doc::<tantivy::TantivyDocument>(address)?;
            if let Some(path) = retrieved
                .get_first(self.fields.path)
                .and_then(|v| v.as_str())
            {
                hits.push(LexicalHit { path: path.to_string(), score });
            }
        }
        Ok(hits)
    }

    /// Whether `path` currently has a document in the committed index.
    pub fn contains(&self, path: &str) -> CodePlaneResult<bool> {
        let reader = self.reader.read();
        let searcher = reader.searcher();
        let term = Term::from_field_text(self.fields.path, path);
        let term_query = tantivy::query::TermQuery::new(term, tantivy::schema::IndexRecordOption::Basic);
        let top_docs = searcher.search(&term_query, &TopDocs::with_limit(1))?;
        Ok(!top_docs.is_empty())
    }

    /// All paths currently visible to readers, used by the lexical/structural
    /// agreement invariant check.
    pub fn all_paths(&self) -> CodePlaneResult<Vec<String>> {
        let reader = self.reader.read();
        let searcher = reader.searcher();
        let mut paths = Vec::new();
        for segment_reader in searcher.segment_readers() {
            let store = segment_reader
                .get_store_reader(32)
                .map_err(tantivy::TantivyError::from)?;
            for doc_id in segment_reader.doc_ids_alive() {
                let retrieved = store.get(doc_id).map_err(tantivy::TantivyError::from)?;
                if let Some(path) = retrieved
                    .get_first(self.fields.path)
                    .and_then(|v| v.as_str())
                {
                    paths.push(path.to_string());
                }
            }
        }
        Ok(paths)
    }
}

/// Derive the `identifiers` field from source bytes: whitespace-split
/// tokens, which is enough to bias ranking toward symbol-shaped terms
/// without a second structural pass.
pub fn extract_identifiers(source: &str) -> String {
    source
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|tok| !tok.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_commit_then_search() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LexicalStore::open(dir.path()).expect("open");
        store
            .stage_upsert(&StagedDocument {
                path: "src/a.py".to_string(),
                identifiers: extract_identifiers("def foo(x): return x"),
                body: "def foo(x): return x".to_string(),
            })
            .expect("stage");
        store.commit().expect("commit");

        let hits = store.search("foo", 10).expect("search");
        assert!(hits.iter().any(|h| h.path == "src/a.py"));
    }

    #[test]
    fn test_rollback_discards_staged_work() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LexicalStore::open(dir.path()).expect("open");
        store
            .stage_upsert(&StagedDocument {
                path: "src/a.py".to_string(),
                identifiers: "foo".to_string(),
                body: "foo".to_string(),
            })
            .expect("stage");
        store.rollback().expect("rollback");

        assert!(!store.contains("src/a.py").expect("contains"));
    }

    #[test]
    fn test_upsert_replaces_prior_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LexicalStore::open(dir.path()).expect("open");
        store
            .stage_upsert(&StagedDocument {
                path: "src/a.py".to_string(),
                identifiers: "foo".to_string(),
                body: "foo".to_string(),
            })
            .expect("stage v1");
        store.commit().expect("commit v1");

        store
            .stage_upsert(&StagedDocument {
                path: "src/a.py".to_string(),
                identifiers: "bar".to_string(),
                body: "bar".to_string(),
            })
            .expect("stage v2");
        store.commit().expect("commit v2");

        let hits = store.search("foo", 10).expect("search");
        assert!(!hits.iter().any(|h| h.path == "src/a.py"));
        let hits = store.search("bar", 10).expect("search");
        assert!(hits.iter().any(|h| h.path == "src/a.py"));
    }

    #[test]
    fn test_identifiers_split_on_punctuation() {
        let ids = extract_identifiers("fn do_work(a: i32) -> i32 { a }");
        assert!(ids.split(' ').any(|t| t == "do_work"));
    }
}
