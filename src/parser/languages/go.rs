//! Go structural extractor.
//!
//! Extracts functions, methods, structs, interfaces, consts/vars, and
//! imports from Go source using tree-sitter.
//!
//! Go uses capitalization for visibility: capitalized identifiers are
//! exported, lowercase ones are package-private.
//!
//! ## Go AST node mapping (tree-sitter-go)
//!
//! - `function_declaration` -> Function
//! - `method_declaration` -> Method (scoped under the receiver type)
//! - `type_spec` with `struct_type` -> Class, `interface_type` -> Class,
//!   else -> Type
//! - `const_spec` / `var_spec` -> Constant / Variable
//! - `import_declaration` -> ImportFact
//! - `call_expression` -> CallFact + RefFact(Call)

use std::collections::HashMap;
use std::path::Path;

use crate::parser::{self, LanguageAnalyzer};
use crate::types::{CallFact, DefFact, DefKind, Docstring, FileFacts, ImportFact, RefFact, RefRole};

/// Analyzer for Go source files.
pub struct GoAnalyzer;

impl LanguageAnalyzer for GoAnalyzer {
    fn language_id(&self) -> &str {
        "go"
    }

    fn tree_sitter_language(&self) -> tree_sitter::Language {
        tree_sitter_go::LANGUAGE.into()
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

fn walk_node(node: tree_sitter::Node<'_>, scope: &[String], enclosing_def_id: Option<u64>, ctx: &mut WalkCtx<'_>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "function_declaration" => {
                if let Some(id) = extract_function(child, scope, ctx) {
                    if let Some(body) = child.child_by_field_name("body") {
                        walk_node(body, scope, Some(id), ctx);
                    }
                }
            }
            "method_declaration" => {
                if let Some(id) = extract_method(child, scope, ctx) {
                    if let Some(body) = child.child_by_field_name("body") {
                        walk_node(body, scope, Some(id), ctx);
                    }
                }
            }
            "type_declaration" => extract_type_declarations(child, scope, ctx),
            "const_declaration" => extract_value_declarations(child, scope, DefKind::Constant, ctx),
            "var_declaration" => extract_value_declarations(child, scope, DefKind::Variable, ctx),
            "import_declaration" => collect_import_specs(child, ctx),
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

fn extract_function(node: tree_sitter::Node<'_>, scope: &[String], ctx: &mut WalkCtx<'_>) -> Option<u64> {
    let name_node = node.child_by_field_name("name")?;
    let name = parser::node_text(name_node, ctx.source).to_string();
    let kind = DefKind::Function;

    let signature = node
        .child_by_field_name("parameters")
        .map(|n| parser::node_text(n, ctx.source))
        .unwrap_or("()");
    let sig_hash = parser::signature_hash(signature);
    let lexical_path = parser::build_lexical_path(".", scope, &name);
    let disambiguator = ctx.next_disambiguator(kind, &lexical_path, &sig_hash);
    let id = parser::def_fact_id(&ctx.file_path, kind, &lexical_path, &sig_hash, disambiguator);
    let is_public = go_is_exported(&name);

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
    Some(id)
}

fn extract_method(node: tree_sitter::Node<'_>, scope: &[String], ctx: &mut WalkCtx<'_>) -> Option<u64> {
    let name_node = node.child_by_field_name("name")?;
    let name = parser::node_text(name_node, ctx.source).to_string();

    let receiver_type = node
        .child_by_field_name("receiver")
        .map(|r| {
            parser::node_text(r, ctx.source)
                .trim_matches(|c: char| c == '(' || c == ')' || c.is_whitespace())
                .split_whitespace()
                .last()
                .unwrap_or("")
                .trim_start_matches('*')
                .to_string()
        })
        .unwrap_or_default();

    let mut full_scope = scope.to_vec();
    if !receiver_type.is_empty() {
        full_scope.push(receiver_type);
    }

    let signature = node
        .child_by_field_name("parameters")
        .map(|n| parser::node_text(n, ctx.source))
        .unwrap_or("()");
    let sig_hash = parser::signature_hash(signature);
    let lexical_path = parser::build_lexical_path(".", &full_scope, &name);
    let disambiguator = ctx.next_disambiguator(DefKind::Method, &lexical_path, &sig_hash);
    let id = parser::def_fact_id(&ctx.file_path, DefKind::Method, &lexical_path, &sig_hash, disambiguator);
    let is_public = go_is_exported(&name);

    push_doc(node, id, ctx);
    ctx.facts.defs.push(DefFact {
        id,
        file_id: ctx.file_id,
        context_id: ctx.context_id,
        kind: DefKind::Method,
        name,
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

fn extract_type_declarations(node: tree_sitter::Node<'_>, scope: &[String], ctx: &mut WalkCtx<'_>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "type_spec" {
            continue;
        }
        let Some(name_node) = child.child_by_field_name("name") else { continue };
        let name = parser::node_text(name_node, ctx.source).to_string();
        let kind = match child.child_by_field_name("type").map(|t| t.kind()) {
            Some("struct_type") | Some("interface_type") => DefKind::Class,
            _ => DefKind::Type,
        };

        let lexical_path = parser::build_lexical_path(".", scope, &name);
        let sig_hash = parser::signature_hash(&lexical_path);
        let disambiguator = ctx.next_disambiguator(kind, &lexical_path, &sig_hash);
        let id = parser::def_fact_id(&ctx.file_path, kind, &lexical_path, &sig_hash, disambiguator);
        let is_public = go_is_exported(&name);
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
}

fn extract_value_declarations(node: tree_sitter::Node<'_>, scope: &[String], kind: DefKind, ctx: &mut WalkCtx<'_>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if !matches!(child.kind(), "const_spec" | "var_spec") {
            continue;
        }
        let Some(name_node) = child.child_by_field_name("name") else { continue };
        let name = parser::node_text(name_node, ctx.source).to_string();
        let lexical_path = parser::build_lexical_path(".", scope, &name);
        let sig_hash = parser::signature_hash(&lexical_path);
        let disambiguator = ctx.next_disambiguator(kind, &lexical_path, &sig_hash);
        let id = parser::def_fact_id(&ctx.file_path, kind, &lexical_path, &sig_hash, disambiguator);
        let is_public = go_is_exported(&name);

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
            start: parser::node_position(child.start_position()),
            end: parser::node_position(child.end_position()),
            is_public,
        });
    }
}

fn collect_import_specs(node: tree_sitter::Node<'_>, ctx: &mut WalkCtx<'_>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "import_spec" => {
                let Some(path_node) = child.child_by_field_name("path") else { continue };
                let path = parser::node_text(path_node, ctx.source).trim_matches('"').to_string();
                if path.is_empty() {
                    continue;
                }
                let alias = child.child_by_field_name("name").map(|n| parser::node_text(n, ctx.source).to_string());
                ctx.facts.imports.push(ImportFact {
                    file_id: ctx.file_id,
                    context_id: ctx.context_id,
                    module_path: path,
                    alias,
                    imported_symbols: Vec::new(),
                    start: parser::node_position(child.start_position()),
                    end: parser::node_position(child.end_position()),
                });
            }
            "interpreted_string_literal" => {
                let path = parser::node_text(child, ctx.source).trim_matches('"').to_string();
                if path.is_empty() {
                    continue;
                }
                ctx.facts.imports.push(ImportFact {
                    file_id: ctx.file_id,
                    context_id: ctx.context_id,
                    module_path: path,
                    alias: None,
                    imported_symbols: Vec::new(),
                    start: parser::node_position(child.start_position()),
                    end: parser::node_position(child.end_position()),
                });
            }
            _ if child.child_count() > 0 => collect_import_specs(child, ctx),
            _ => {}
        }
    }
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

fn go_is_exported(name: &str) -> bool {
    name.starts_with(|c: char| c.is_uppercase())
}

fn push_doc(node: tree_sitter::Node<'_>, def_id: u64, ctx: &mut WalkCtx<'_>) {
    let mut doc_lines = Vec::new();
    let mut current = node.prev_sibling();
    let mut first = None;

    while let Some(sibling) = current {
        if sibling.kind() != "comment" {
            break;
        }
        let text = parser::node_text(sibling, ctx.source).trim();
        let Some(line) = text.strip_prefix("//") else { break };
        doc_lines.push(line.trim().to_string());
        first = Some(sibling.start_position());
        current = sibling.prev_sibling();
    }

    if doc_lines.is_empty() {
        return;
    }
    doc_lines.reverse();

    ctx.facts.docstrings.push(Docstring {
        def_id,
        content: doc_lines.join("\n"),
        start: first.map(parser::node_position).unwrap_or(parser::node_position(node.start_position())),
        end: parser::node_position(node.start_position()),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Language, ParseOutcome};

    fn parse_go(source: &str) -> FileFacts {
        match crate::parser::parse_file(Path::new("main.go"), source.as_bytes(), Language::Go, 1, 1) {
            ParseOutcome::Parsed { facts, .. } => facts,
            ParseOutcome::Failed { reason } => panic!("parse failed: {reason}"),
        }
    }

    #[test]
    fn test_exported_and_unexported_functions() {
        let facts = parse_go("package main\n\nfunc Hello() {}\nfunc hidden() {}\n");
        let hello = facts.defs.iter().find(|d| d.name == "Hello").unwrap();
        let hidden = facts.defs.iter().find(|d| d.name == "hidden").unwrap();
        assert!(hello.is_public);
        assert!(!hidden.is_public);
    }

    #[test]
    fn test_struct_and_interface_map_to_class() {
        let facts = parse_go(
            "package main\n\ntype Config struct {\n\tName string\n}\n\ntype Reader interface {\n\tRead() error\n}\n",
        );
        let config = facts.defs.iter().find(|d| d.name == "Config").unwrap();
        let reader = facts.defs.iter().find(|d| d.name == "Reader").unwrap();
        assert_eq!(config.kind, DefKind::Class);
        assert_eq!(reader.kind, DefKind::Class);
    }

    #[test]
    fn test_method_scoped_under_receiver() {
        let facts = parse_go("package main\n\nfunc (c *Config) Validate() bool {\n\treturn true\n}\n");
        let m = facts.defs.iter().find(|d| d.name == "Validate").unwrap();
        assert_eq!(m.kind, DefKind::Method);
        assert!(m.lexical_path.contains("Config"));
    }

    #[test]
    fn test_import_declaration() {
        let facts = parse_go("package main\n\nimport \"fmt\"\n");
        assert!(facts.imports.iter().any(|i| i.module_path == "fmt"));
    }

    #[test]
    fn test_const_declaration() {
        let facts = parse_go("package main\n\nconst MaxRetries = 3\n");
        let c = facts.defs.iter().find(|d| d.name == "MaxRetries").unwrap();
        assert_eq!(c.kind, DefKind::Constant);
    }
}
