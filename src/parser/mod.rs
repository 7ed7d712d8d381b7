//! AST parsing subsystem using tree-sitter.
//!
//! Each supported language registers an analyzer that walks a tree-sitter
//! CST and emits structural facts directly, rather than an intermediate
//! generic element type. The parser is stateless: a fresh `tree_sitter::Parser`
//! is created per call so it can be invoked from multiple threads via
//! `spawn_blocking` or a rayon pool without shared mutable state.

pub mod languages;
pub mod registry;

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::types::{DefKind, FileFacts, ParseOutcome, Position};

/// Trait every language analyzer must implement.
pub trait LanguageAnalyzer: Send + Sync {
    /// Language identifier, matching `Language::as_str`.
    fn language_id(&self) -> &str;

    /// The tree-sitter grammar for this language.
    fn tree_sitter_language(&self) -> tree_sitter::Language;

    /// Walk a parsed tree and emit facts for one file.
    fn extract_facts(
        &self,
        tree: &tree_sitter::Tree,
        source: &[u8],
        file_path: &Path,
        file_id: i64,
        context_id: i64,
    ) -> FileFacts;
}

/// Parse a source file and extract its structural facts.
///
/// Never returns `Err`: a grammar failure is reported as
/// `ParseOutcome::Failed` so the caller can still index the file
/// lexically and flag it `parse_failed` in the structural store.
pub fn parse_file(
    file_path: &Path,
    source: &[u8],
    language: crate::types::Language,
    file_id: i64,
    context_id: i64,
) -> ParseOutcome {
    let Some(analyzer) = registry::global_registry().get(language) else {
        return ParseOutcome::Failed {
            reason: format!("no analyzer registered for language: {language}"),
        };
    };

    let mut parser = tree_sitter::Parser::new();
    if let Err(e) = parser.set_language(&analyzer.tree_sitter_language()) {
        return ParseOutcome::Failed {
            reason: format!("failed to load grammar: {e}"),
        };
    }

    let Some(tree) = parser.parse(source, None) else {
        return ParseOutcome::Failed {
            reason: "tree-sitter returned no tree (parse timeout or cancellation)".into(),
        };
    };

    let mut diagnostics = Vec::new();
    if tree.root_node().has_error() {
        diagnostics.push("source contains one or more syntax errors; partial facts only".into());
    }

    let facts = analyzer.extract_facts(&tree, source, file_path, file_id, context_id);
    ParseOutcome::Parsed { facts, diagnostics }
}

/// Canonical signature text hashed to a short hex digest. Each analyzer
/// is responsible for producing a signature string that ignores
/// formatting but preserves the tokens that change the def's identity
/// (its parameter list shape, for a function; its variant list, for an
/// enum) — whitespace differences must not change the hash.
pub fn signature_hash(canonical: &str) -> String {
    let normalized: String = canonical.split_whitespace().collect::<Vec<_>>().join(" ");
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(&digest[..8])
}

/// Compute the 64-bit def-fact identity from its defining tuple.
/// Identical tuples always produce identical ids; this is what makes
/// def facts stable across re-parses of unchanged source.
pub fn def_fact_id(
    file_path: &str,
    kind: DefKind,
    lexical_path: &str,
    signature_hash: &str,
    disambiguator: u32,
) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(lexical_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(signature_hash.as_bytes());
    hasher.update(b"\0");
    hasher.update(disambiguator.to_le_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().unwrap_or([0; 8]))
}

/// Convert a tree-sitter byte-offset node position into a 1-indexed
/// `Position`.
pub fn node_position(point: tree_sitter::Point) -> Position {
    Position {
        line: point.row as u32 + 1,
        column: point.column as u32 + 1,
    }
}

/// Raw text of a tree-sitter node.
pub fn node_text<'a>(node: tree_sitter::Node<'_>, source: &'a [u8]) -> &'a str {
    std::str::from_utf8(&source[node.start_byte()..node.end_byte()]).unwrap_or("")
}

/// Join enclosing scopes and a name into a dotted lexical path, the way
/// every analyzer in this module builds `DefFact::lexical_path`.
pub fn build_lexical_path(separator: &str, scope_path: &[String], name: &str) -> String {
    let mut parts = scope_path.to_vec();
    parts.push(name.to_string());
    parts.join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_def_fact_id_stable_across_identical_input() {
        let a = def_fact_id("src/a.py", DefKind::Function, "a.foo", "sig1", 0);
        let b = def_fact_id("src/a.py", DefKind::Function, "a.foo", "sig1", 0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_def_fact_id_changes_with_disambiguator() {
        let a = def_fact_id("src/a.py", DefKind::Function, "a.foo", "sig1", 0);
        let b = def_fact_id("src/a.py", DefKind::Function, "a.foo", "sig1", 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_signature_hash_ignores_whitespace_differences() {
        assert_eq!(signature_hash("fn foo(x: i32)"), signature_hash("fn  foo( x: i32 )"));
    }

    #[test]
    fn test_parse_file_unknown_language_reports_failure() {
        let outcome = parse_file(
            Path::new("test.xyz"),
            b"hello world",
            crate::types::Language::Unknown,
            1,
            1,
        );
        assert!(matches!(outcome, ParseOutcome::Failed { .. }));
    }
}
