//! Rust structural extractor.
//!
//! Extracts functions, methods, structs, enums, traits, consts/statics,
//! type aliases, modules, `use` imports, and call sites from Rust source
//! using tree-sitter.
//!
//! ## Rust AST node mapping (tree-sitter-rust)
//!
//! - `function_item` -> Function (Method, if nested inside an `impl`)
//! - `struct_item` / `enum_item` / `trait_item` -> Class
//! - `const_item` / `static_item` -> Constant
//! - `type_item` -> Type
//! - `mod_item` -> Module
//! - `use_declaration` -> ImportFact
//! - `call_expression` -> CallFact + RefFact(Call)

use std::collections::HashMap;
use std::path::Path;

use crate::parser::{self, LanguageAnalyzer};
use crate::types::{CallFact, DefFact, DefKind, Docstring, FileFacts, ImportFact, RefFact, RefRole};

/// Analyzer for Rust source files.
pub struct RustAnalyzer;

impl LanguageAnalyzer for RustAnalyzer {
    fn language_id(&self) -> &str {
        "rust"
    }

    fn tree_sitter_language(&self) -> tree_sitter::Language {
        tree_sitter_rust::LANGUAGE.into()
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
        walk_node(tree.root_node(), &[], None, &mut ctx);
        ctx.facts
    }
}

struct WalkCtx<'a> {
    source: &'a [u8],
    file_path: String,
    file_id: i64,
    context_id: i64,
    facts: FileFacts,
    disambiguators: HashMap<(DefKind, String, String), u32>,
}

impl WalkCtx<'_> {
    fn next_disambiguator(&mut self, kind: DefKind, lexical_path: &str, sig: &str) -> u32 {
        let key = (kind, lexical_path.to_string(), sig.to_string());
        let counter = self.disambiguators.entry(key).or_insert(0);
        let value = *counter;
        *counter += 1;
        value
    }
}

fn walk_node(
    node: tree_sitter::Node<'_>,
    scope: &[String],
    enclosing_def_id: Option<u64>,
    ctx: &mut WalkCtx<'_>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "function_item" => {
                if let Some(id) = extract_function(child, scope, ctx) {
                    walk_node(child, scope, Some(id), ctx);
                }
            }
            "struct_item" | "enum_item" => {
                extract_simple_def(child, scope, DefKind::Class, ctx);
            }
            "trait_item" => {
                if let Some(name) = field_name_text(child, "name", ctx.source) {
                    extract_simple_def(child, scope, DefKind::Class, ctx);
                    let mut inner = scope.to_vec();
                    inner.push(name);
                    if let Some(body) = child.child_by_field_name("body") {
                        walk_node(body, &inner, enclosing_def_id, ctx);
                    }
                }
            }
            "impl_item" => {
                let type_name = child
                    .child_by_field_name("type")
                    .map(|n| parser::node_text(n, ctx.source).to_string())
                    .unwrap_or_default();
                let mut inner = scope.to_vec();
                inner.push(type_name);
                if let Some(body) = child.child_by_field_name("body") {
                    walk_node(body, &inner, enclosing_def_id, ctx);
                }
            }
            "const_item" | "static_item" => {
                extract_simple_def(child, scope, DefKind::Constant, ctx);
            }
            "type_item" => {
                extract_simple_def(child, scope, DefKind::Type, ctx);
            }
            "mod_item" => {
                handle_mod(child, scope, enclosing_def_id, ctx);
            }
            "use_declaration" => {
                extract_use(child, ctx);
            }
            "call_expression" => {
                extract_call(child, enclosing_def_id, ctx);
                walk_node(child, scope, enclosing_def_id, ctx);
            }
            _ => {
                if child.child_count() > 0 {
                    walk_node(child, scope, enclosing_def_id, ctx);
                }
            }
        }
    }
}

fn field_name_text(node: tree_sitter::Node<'_>, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| parser::node_text(n, source).to_string())
}

/// A function that isn't nested in an `impl` block is `Function`; one
/// that is, is `Method`. `scope` already carries the enclosing type name
/// when we're inside an `impl`, so we detect method-ness from depth.
fn extract_function(
    node: tree_sitter::Node<'_>,
    scope: &[String],
    ctx: &mut WalkCtx<'_>,
) -> Option<u64> {
    let name = field_name_text(node, "name", ctx.source)?;
    let is_method = scope
        .last()
        .map(|s| s.chars().next().map(|c| c.is_uppercase()).unwrap_or(false))
        .unwrap_or(false);
    let kind = if is_method { DefKind::Method } else { DefKind::Function };

    let signature = node
        .child_by_field_name("parameters")
        .map(|n| parser::node_text(n, ctx.source))
        .unwrap_or("()");
    let sig_hash = parser::signature_hash(signature);
    let lexical_path = parser::build_lexical_path("::", scope, &name);
    let disambiguator = ctx.next_disambiguator(kind, &lexical_path, &sig_hash);
    let id = parser::def_fact_id(&ctx.file_path, kind, &lexical_path, &sig_hash, disambiguator);

    let is_public = has_visibility_modifier(node, ctx.source);
    push_doc(node, id, ctx);

    ctx.facts.defs.push(DefFact {
        id,
        file_id: ctx.file_id,
        context_id: ctx.context_id,
        kind,
        name: name.clone(),
        qualified_name: lexical_path.clone(),
        lexical_path,
        signature_hash: sig_hash,
        disambiguator,
        start: parser::node_position(node.start_position()),
        end: parser::node_position(node.end_position()),
        is_public,
    });

    Some(id)
}

fn extract_simple_def(node: tree_sitter::Node<'_>, scope: &[String], kind: DefKind, ctx: &mut WalkCtx<'_>) {
    let Some(name) = field_name_text(node, "name", ctx.source) else { return };
    let lexical_path = parser::build_lexical_path("::", scope, &name);
    let sig_hash = parser::signature_hash(&lexical_path);
    let disambiguator = ctx.next_disambiguator(kind, &lexical_path, &sig_hash);
    let id = parser::def_fact_id(&ctx.file_path, kind, &lexical_path, &sig_hash, disambiguator);
    let is_public = has_visibility_modifier(node, ctx.source);
    push_doc(node, id, ctx);

    ctx.facts.defs.push(DefFact {
        id,
        file_id: ctx.file_id,
        context_id: ctx.context_id,
        kind,
        name,
        qualified_name: lexical_path.clone(),
        lexical_path,
        signature_hash: sig_hash,
        disambiguator,
        start: parser::node_position(node.start_position()),
        end: parser::node_position(node.end_position()),
        is_public,
    });
}

fn handle_mod(
    node: tree_sitter::Node<'_>,
    scope: &[String],
    enclosing_def_id: Option<u64>,
    ctx: &mut WalkCtx<'_>,
) {
    let Some(name) = field_name_text(node, "name", ctx.source) else { return };
    extract_simple_def(node, scope, DefKind::Module, ctx);
    if let Some(body) = node.child_by_field_name("body") {
        let mut inner = scope.to_vec();
        inner.push(name);
        walk_node(body, &inner, enclosing_def_id, ctx);
    }
}

fn extract_use(node: tree_sitter::Node<'_>, ctx: &mut WalkCtx<'_>) {
    let text = parser::node_text(node, ctx.source);
    let module_path = text
        .trim_start_matches("use")
        .trim_end_matches(';')
        .trim()
        .to_string();

    ctx.facts.imports.push(ImportFact {
        file_id: ctx.file_id,
        context_id: ctx.context_id,
        module_path,
        alias: None,
        imported_symbols: Vec::new(),
        start: parser::node_position(node.start_position()),
        end: parser::node_position(node.end_position()),
    });
}

fn extract_call(node: tree_sitter::Node<'_>, enclosing_def_id: Option<u64>, ctx: &mut WalkCtx<'_>) {
    let Some(func) = node.child_by_field_name("function") else { return };
    let callee_name = parser::node_text(func, ctx.source).to_string();
    let start = parser::node_position(node.start_position());
    let end = parser::node_position(node.end_position());

    ctx.facts.calls.push(CallFact {
        file_id: ctx.file_id,
        context_id: ctx.context_id,
        callee_name: callee_name.clone(),
        start,
        end,
        enclosing_def_id,
    });
    ctx.facts.refs.push(RefFact {
        file_id: ctx.file_id,
        context_id: ctx.context_id,
        name: callee_name,
        start,
        end,
        role: RefRole::Call,
        enclosing_def_id,
    });
}

fn has_visibility_modifier(node: tree_sitter::Node<'_>, _source: &[u8]) -> bool {
    let mut cursor = node.walk();
    node.children(&mut cursor).any(|c| c.kind() == "visibility_modifier")
}

fn push_doc(node: tree_sitter::Node<'_>, def_id: u64, ctx: &mut WalkCtx<'_>) {
    let mut doc_lines = Vec::new();
    let mut current = node.prev_sibling();
    let mut first = None;
    let mut last = None;

    while let Some(sibling) = current {
        let text = parser::node_text(sibling, ctx.source).trim();
        if let Some(line) = text.strip_prefix("///").or_else(|| text.strip_prefix("//!")) {
            doc_lines.push(line.trim().to_string());
            if last.is_none() {
                last = Some(sibling.end_position());
            }
            first = Some(sibling.start_position());
            current = sibling.prev_sibling();
        } else if sibling.kind() == "attribute_item" {
            current = sibling.prev_sibling();
        } else {
            break;
        }
    }

    if doc_lines.is_empty() {
        return;
    }
    doc_lines.reverse();

    ctx.facts.docstrings.push(Docstring {
        def_id,
        content: doc_lines.join("\n"),
        start: first.map(parser::node_position).unwrap_or(parser::node_position(node.start_position())),
        end: last.map(parser::node_position).unwrap_or(parser::node_position(node.start_position())),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Language, ParseOutcome};

    fn parse_rust(source: &str) -> FileFacts {
        match crate::parser::parse_file(Path::new("test.rs"), source.as_bytes(), Language::Rust, 1, 1) {
            ParseOutcome::Parsed { facts, .. } => facts,
            ParseOutcome::Failed { reason } => panic!("parse failed: {reason}"),
        }
    }

    #[test]
    fn test_simple_function() {
        let facts = parse_rust("fn hello(name: &str) -> String { name.to_string() }");
        let def = facts.defs.iter().find(|d| d.name == "hello").expect("hello");
        assert_eq!(def.kind, DefKind::Function);
        assert!(!def.is_public);
    }

    #[test]
    fn test_pub_struct_with_doc() {
        let facts = parse_rust("/// A config.\npub struct Config { pub name: String }");
        let def = facts.defs.iter().find(|d| d.name == "Config").expect("Config");
        assert_eq!(def.kind, DefKind::Class);
        assert!(def.is_public);
        let doc = facts.docstrings.iter().find(|d| d.def_id == def.id).expect("doc");
        assert_eq!(doc.content, "A config.");
    }

    #[test]
    fn test_impl_methods_are_method_kind() {
        let facts = parse_rust("impl Config { pub fn new() -> Self { Config {} } }");
        let def = facts.defs.iter().find(|d| d.name == "new").expect("new");
        assert_eq!(def.kind, DefKind::Method);
        assert!(def.lexical_path.contains("Config"));
    }

    #[test]
    fn test_call_and_ref_fact_emitted() {
        let facts = parse_rust("fn main() { do_work(); }");
        assert!(facts.calls.iter().any(|c| c.callee_name == "do_work"));
        assert!(facts.refs.iter().any(|r| r.name == "do_work" && r.role == RefRole::Call));
    }

    #[test]
    fn test_use_declaration_emits_import() {
        let facts = parse_rust("use std::collections::HashMap;");
        assert_eq!(facts.imports.len(), 1);
        assert_eq!(facts.imports[0].module_path, "std::collections::HashMap");
    }

    #[test]
    fn test_same_name_in_different_scopes_gets_distinct_ids() {
        let facts = parse_rust("mod a { fn f() {} } mod b { fn f() {} }");
        let fs: Vec<_> = facts.defs.iter().filter(|d| d.name == "f").collect();
        assert_eq!(fs.len(), 2);
        assert_ne!(fs[0].id, fs[1].id);
    }

    #[test]
    fn test_overload_like_duplicate_signature_gets_unique_disambiguator() {
        let facts = parse_rust("mod a { fn f() {} fn f() {} }");
        let fs: Vec<_> = facts.defs.iter().filter(|d| d.name == "f").collect();
        assert_eq!(fs.len(), 2);
        assert_ne!(fs[0].disambiguator, fs[1].disambiguator);
        assert_ne!(fs[0].id, fs[1].id);
    }
}
