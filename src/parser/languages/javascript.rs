//! JavaScript structural extractor.
//!
//! Shares its walk with the TypeScript analyzer — JavaScript's grammar is
//! a syntactic subset of the node kinds `walk_ts_node` handles (no type
//! annotations, no interfaces or type aliases).

use std::collections::HashMap;
use std::path::Path;

use crate::parser::LanguageAnalyzer;
use crate::types::FileFacts;

use super::typescript::{collect_ts_imports, walk_ts_node, WalkCtx};

/// Analyzer for JavaScript source files.
pub struct JavaScriptAnalyzer;

impl LanguageAnalyzer for JavaScriptAnalyzer {
    fn language_id(&self) -> &str {
        "javascript"
    }

    fn tree_sitter_language(&self) -> tree_sitter::Language {
        tree_sitter_javascript::LANGUAGE.into()
    }

    fn extract_facts(
        &self,
        tree: &tree_sitter::Tree,
        source: &[u8],
        file_path: &Path,
        file_id: i64,
        context_id: i64,
    ) -> FileFacts {
        let mut ctx = WalkCtx {
            source,
            file_path: file_path.to_string_lossy().replace('\\', "/"),
            file_id,
            context_id,
            facts: FileFacts::default(),
            disambiguators: HashMap::new(),
        };
        walk_ts_node(tree.root_node(), &[], None, false, &mut ctx);
        collect_ts_imports(tree.root_node(), &mut ctx);
        ctx.facts
    }
}
