//! Python structural extractor.
//!
//! Extracts functions, methods, classes, imports, docstrings, and call
//! sites from Python source using tree-sitter.
//!
//! ## Python AST node mapping (tree-sitter-python)
//!
//! - `function_definition` -> Function (Method, if nested in a class)
//! - `class_definition` -> Class
//! - `decorated_definition` -> wraps a function/class; span widened to
//!   include the decorators
//! - `import_statement` / `import_from_statement` -> ImportFact
//! - `call` -> CallFact + RefFact(Call)

use std::collections::HashMap;
use std::path::Path;

use crate::parser::{self, LanguageAnalyzer};
use crate::types::{CallFact, DefFact, DefKind, Docstring, FileFacts, ImportFact, RefFact, RefRole};

/// Analyzer for Python source files.
pub struct PythonAnalyzer;

impl LanguageAnalyzer for PythonAnalyzer {
    fn language_id(&self) -> &str {
        "python"
    }

    fn tree_sitter_language(&self) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
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
        walk_node(tree.root_node(), &[], None, false, &mut ctx);
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
    in_class: bool,
    ctx: &mut WalkCtx<'_>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "function_definition" => {
                if let Some((name, id)) = extract_function(child, scope, in_class, ctx) {
                    let mut inner = scope.to_vec();
                    inner.push(name);
                    if let Some(body) = child.child_by_field_name("body") {
                        walk_node(body, &inner, Some(id), false, ctx);
                    }
                }
            }
            "class_definition" => {
                if let Some(name) = extract_class(child, scope, ctx) {
                    let mut inner = scope.to_vec();
                    inner.push(name);
                    if let Some(body) = child.child_by_field_name("body") {
                        walk_node(body, &inner, enclosing_def_id, true, ctx);
                    }
                }
            }
            "decorated_definition" => {
                let mut inner_cursor = child.walk();
                for inner_child in child.children(&mut inner_cursor) {
                    match inner_child.kind() {
                        "function_definition" => {
                            if let Some((name, id)) = extract_function(inner_child, scope, in_class, ctx) {
                                let mut inner = scope.to_vec();
                                inner.push(name);
                                if let Some(body) = inner_child.child_by_field_name("body") {
                                    walk_node(body, &inner, Some(id), false, ctx);
                                }
                            }
                        }
                        "class_definition" => {
                            if let Some(name) = extract_class(inner_child, scope, ctx) {
                                let mut inner = scope.to_vec();
                                inner.push(name);
                                if let Some(body) = inner_child.child_by_field_name("body") {
                                    walk_node(body, &inner, enclosing_def_id, true, ctx);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            "import_statement" => extract_import_statement(child, ctx),
            "import_from_statement" => extract_import_from(child, ctx),
            "call" => {
                extract_call(child, enclosing_def_id, ctx);
                walk_node(child, scope, enclosing_def_id, in_class, ctx);
            }
            _ => {
                if child.child_count() > 0 {
                    walk_node(child, scope, enclosing_def_id, in_class, ctx);
                }
            }
        }
    }
}

fn extract_function(
    node: tree_sitter::Node<'_>,
    scope: &[String],
    in_class: bool,
    ctx: &mut WalkCtx<'_>,
) -> Option<(String, u64)> {
    let name_node = node.child_by_field_name("name")?;
    let name = parser::node_text(name_node, ctx.source).to_string();
    let kind = if in_class { DefKind::Method } else { DefKind::Function };

    let signature = node
        .child_by_field_name("parameters")
        .map(|n| parser::node_text(n, ctx.source))
        .unwrap_or("()");
    let sig_hash = parser::signature_hash(signature);
    let lexical_path = parser::build_lexical_path(".", scope, &name);
    let disambiguator = ctx.next_disambiguator(kind, &lexical_path, &sig_hash);
    let id = parser::def_fact_id(&ctx.file_path, kind, &lexical_path, &sig_hash, disambiguator);
    let is_public = python_is_public(&name);

    if let Some(doc) = extract_docstring(node, ctx.source) {
        ctx.facts.docstrings.push(Docstring {
            def_id: id,
            content: doc,
            start: parser::node_position(node.start_position()),
            end: parser::node_position(node.start_position()),
        });
    }

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

    Some((name, id))
}

fn extract_class(node: tree_sitter::Node<'_>, scope: &[String], ctx: &mut WalkCtx<'_>) -> Option<String> {
    let name_node = node.child_by_field_name("name")?;
    let name = parser::node_text(name_node, ctx.source).to_string();
    let lexical_path = parser::build_lexical_path(".", scope, &name);
    let sig_hash = parser::signature_hash(&lexical_path);
    let disambiguator = ctx.next_disambiguator(DefKind::Class, &lexical_path, &sig_hash);
    let id = parser::def_fact_id(&ctx.file_path, DefKind::Class, &lexical_path, &sig_hash, disambiguator);
    let is_public = python_is_public(&name);

    if let Some(doc) = extract_docstring(node, ctx.source) {
        ctx.facts.docstrings.push(Docstring {
            def_id: id,
            content: doc,
            start: parser::node_position(node.start_position()),
            end: parser::node_position(node.start_position()),
        });
    }

    if let Some(bases) = node.child_by_field_name("superclasses") {
        let mut cursor = bases.walk();
        for child in bases.children(&mut cursor) {
            if matches!(child.kind(), "identifier" | "attribute") {
                ctx.facts.refs.push(RefFact {
                    file_id: ctx.file_id,
                    context_id: ctx.context_id,
                    name: parser::node_text(child, ctx.source).to_string(),
                    start: parser::node_position(child.start_position()),
                    end: parser::node_position(child.end_position()),
                    role: RefRole::TypeReference,
                    enclosing_def_id: Some(id),
                });
            }
        }
    }

    ctx.facts.defs.push(DefFact {
        id,
        file_id: ctx.file_id,
        context_id: ctx.context_id,
        kind: DefKind::Class,
        name: name.clone(),
        qualified_name: lexical_path.clone(),
        lexical_path,
        signature_hash: sig_hash,
        disambiguator,
        start: parser::node_position(node.start_position()),
        end: parser::node_position(node.end_position()),
        is_public,
    });

    Some(name)
}

fn extract_docstring(node: tree_sitter::Node<'_>, source: &[u8]) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first_stmt = body.child(0)?;
    if first_stmt.kind() != "expression_statement" {
        return None;
    }
    let expr = first_stmt.child(0)?;
    if !matches!(expr.kind(), "string" | "concatenated_string") {
        return None;
    }
    Some(clean_docstring(parser::node_text(expr, source)))
}

fn clean_docstring(raw: &str) -> String {
    let stripped = raw
        .trim()
        .strip_prefix("\"\"\"")
        .or_else(|| raw.trim().strip_prefix("'''"))
        .unwrap_or(raw);
    let stripped = stripped
        .strip_suffix("\"\"\"")
        .or_else(|| stripped.strip_suffix("'''"))
        .unwrap_or(stripped);
    stripped.trim().to_string()
}

fn extract_import_statement(node: tree_sitter::Node<'_>, ctx: &mut WalkCtx<'_>) {
    let mut cursor = node.walk();
    for name_node in node.children(&mut cursor) {
        match name_node.kind() {
            "dotted_name" => push_import(name_node, ctx, parser::node_text(name_node, ctx.source).to_string(), None),
            "aliased_import" => {
                let module = name_node
                    .child_by_field_name("name")
                    .map(|n| parser::node_text(n, ctx.source).to_string())
                    .unwrap_or_default();
                let alias = name_node
                    .child_by_field_name("alias")
                    .map(|n| parser::node_text(n, ctx.source).to_string());
                push_import(name_node, ctx, module, alias);
            }
            _ => {}
        }
    }
}

fn extract_import_from(node: tree_sitter::Node<'_>, ctx: &mut WalkCtx<'_>) {
    let Some(module_node) = node.child_by_field_name("module_name") else { return };
    let module_path = parser::node_text(module_node, ctx.source).to_string();
    let mut names = Vec::new();

    let mut cursor = node.walk();
    for name_node in node.children(&mut cursor) {
        match name_node.kind() {
            "dotted_name" if name_node != module_node => {
                names.push(parser::node_text(name_node, ctx.source).to_string());
            }
            "aliased_import" => {
                if let Some(n) = name_node.child_by_field_name("name") {
                    names.push(parser::node_text(n, ctx.source).to_string());
                }
            }
            "wildcard_import" => names.push("*".to_string()),
            _ => {}
        }
    }

    ctx.facts.imports.push(ImportFact {
        file_id: ctx.file_id,
        context_id: ctx.context_id,
        module_path,
        alias: None,
        imported_symbols: names,
        start: parser::node_position(node.start_position()),
        end: parser::node_position(node.end_position()),
    });
}

fn push_import(node: tree_sitter::Node<'_>, ctx: &mut WalkCtx<'_>, module_path: String, alias: Option<String>) {
    ctx.facts.imports.push(ImportFact {
        file_id: ctx.file_id,
        context_id: ctx.context_id,
        module_path,
        alias,
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

/// `__dunder__` methods are public; `__mangled` is private; `_protected`
/// is treated as not publicly visible; everything else is public.
fn python_is_public(name: &str) -> bool {
    if name.starts_with("__") && name.ends_with("__") {
        true
    } else {
        !name.starts_with('_')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Language, ParseOutcome};

    fn parse_python(source: &str) -> FileFacts {
        match crate::parser::parse_file(Path::new("test.py"), source.as_bytes(), Language::Python, 1, 1) {
            ParseOutcome::Parsed { facts, .. } => facts,
            ParseOutcome::Failed { reason } => panic!("parse failed: {reason}"),
        }
    }

    #[test]
    fn test_simple_function_with_docstring() {
        let facts = parse_python("def hello(name):\n    \"\"\"Greet someone.\"\"\"\n    print(name)\n");
        let def = facts.defs.iter().find(|d| d.name == "hello").expect("hello");
        assert_eq!(def.kind, DefKind::Function);
        assert!(def.is_public);
        let doc = facts.docstrings.iter().find(|d| d.def_id == def.id).expect("doc");
        assert_eq!(doc.content, "Greet someone.");
    }

    #[test]
    fn test_private_and_mangled_visibility() {
        let facts = parse_python("def _helper():\n    pass\ndef __mangled():\n    pass\n");
        let helper = facts.defs.iter().find(|d| d.name == "_helper").unwrap();
        let mangled = facts.defs.iter().find(|d| d.name == "__mangled").unwrap();
        assert!(!helper.is_public);
        assert!(!mangled.is_public);
    }

    #[test]
    fn test_class_methods_are_method_kind() {
        let facts = parse_python("class Svc:\n    def get(self):\n        pass\n");
        let method = facts.defs.iter().find(|d| d.name == "get").expect("get");
        assert_eq!(method.kind, DefKind::Method);
        assert!(method.lexical_path.contains("Svc"));
    }

    #[test]
    fn test_class_inheritance_emits_type_reference() {
        let facts = parse_python("class Dog(Animal):\n    pass\n");
        assert!(facts.refs.iter().any(|r| r.name == "Animal" && r.role == RefRole::TypeReference));
    }

    #[test]
    fn test_import_from_with_names() {
        let facts = parse_python("from foo.bar import baz, qux\n");
        assert_eq!(facts.imports.len(), 1);
        assert_eq!(facts.imports[0].module_path, "foo.bar");
        assert_eq!(facts.imports[0].imported_symbols, vec!["baz", "qux"]);
    }

    #[test]
    fn test_call_inside_function_emits_call_and_ref() {
        let facts = parse_python("def run():\n    do_work()\n");
        assert!(facts.calls.iter().any(|c| c.callee_name == "do_work"));
        assert!(facts.refs.iter().any(|r| r.name == "do_work" && r.role == RefRole::Call));
    }
}
