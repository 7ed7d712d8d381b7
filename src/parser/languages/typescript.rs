//! TypeScript structural extractor.
//!
//! Extracts functions, arrow functions assigned to const/let, classes,
//! interfaces, type aliases, methods, imports and call sites.
//! `javascript.rs` reuses `walk_ts_node`/`collect_ts_imports` against the
//! JavaScript grammar, since JS is a syntactic subset of the node kinds
//! handled here.
//!
//! ## Node mapping (tree-sitter-typescript)
//!
//! - `function_declaration` -> Function
//! - `class_declaration` -> Class
//! - `interface_declaration` -> Class (no separate interface kind)
//! - `type_alias_declaration` -> Type
//! - `method_definition` -> Method
//! - arrow/function expression bound by `const`/`let` -> Function, else Constant
//! - `call_expression` -> CallFact + RefFact(Call)

use std::collections::HashMap;
use std::path::Path;

use tree_sitter::Node;

use crate::parser::{self, LanguageAnalyzer};
use crate::types::{CallFact, DefFact, DefKind, Docstring, FileFacts, ImportFact, RefFact, RefRole};

/// Analyzer for TypeScript source files.
pub struct TypeScriptAnalyzer;

impl LanguageAnalyzer for TypeScriptAnalyzer {
    fn language_id(&self) -> &str {
        "typescript"
    }

    fn tree_sitter_language(&self) -> tree_sitter::Language {
        tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
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

pub(crate) struct WalkCtx<'a> {
    pub(crate) source: &'a [u8],
    pub(crate) file_path: String,
    pub(crate) file_id: i64,
    pub(crate) context_id: i64,
    pub(crate) facts: FileFacts,
    pub(crate) disambiguators: HashMap<(DefKind, String, String), u32>,
}

impl WalkCtx<'_> {
    pub(crate) fn next_disambiguator(&mut self, kind: DefKind, lexical_path: &str, sig: &str) -> u32 {
        let key = (kind, lexical_path.to_string(), sig.to_string());
        let counter = self.disambiguators.entry(key).or_insert(0);
        let value = *counter;
        *counter += 1;
        value
    }
}

/// Walk a TypeScript/JavaScript AST node, shared by both grammars.
/// `exported` marks that the current declaration sits directly under an
/// `export_statement` and should be recorded public.
pub(crate) fn walk_ts_node(
    node: Node<'_>,
    scope: &[String],
    enclosing_def_id: Option<u64>,
    exported: bool,
    ctx: &mut WalkCtx<'_>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "function_declaration" => {
                if let Some(id) = extract_function(child, scope, exported, ctx) {
                    if let Some(body) = child.child_by_field_name("body") {
                        walk_ts_node(body, scope, Some(id), false, ctx);
                    }
                }
            }
            "class_declaration" => {
                if let (Some(id), Some(name_node)) =
                    (extract_class(child, scope, exported, ctx), child.child_by_field_name("name"))
                {
                    let name = node_text(name_node, ctx.source).to_string();
                    let mut inner_scope = scope.to_vec();
                    inner_scope.push(name);
                    if let Some(body) = child.child_by_field_name("body") {
                        walk_ts_node(body, &inner_scope, Some(id), false, ctx);
                    }
                }
            }
            "interface_declaration" => {
                extract_interface(child, scope, exported, ctx);
            }
            "type_alias_declaration" => {
                extract_type_alias(child, scope, exported, ctx);
            }
            "export_statement" => {
                walk_ts_node(child, scope, enclosing_def_id, true, ctx);
            }
            "lexical_declaration" | "variable_declaration" => {
                extract_variable_declarations(child, scope, exported, ctx);
            }
            "method_definition" => {
                if let Some(id) = extract_method(child, scope, ctx) {
                    if let Some(body) = child.child_by_field_name("body") {
                        walk_ts_node(body, scope, Some(id), false, ctx);
                    }
                }
            }
            "call_expression" => {
                extract_call(child, enclosing_def_id, ctx);
                walk_ts_node(child, scope, enclosing_def_id, false, ctx);
            }
            _ => {
                if child.kind() != "string" && child.kind() != "template_string" && child.child_count() > 0 {
                    walk_ts_node(child, scope, enclosing_def_id, exported, ctx);
                }
            }
        }
    }
}

fn extract_function(node: Node, scope: &[String], exported: bool, ctx: &mut WalkCtx) -> Option<u64> {
    let name_node = node.child_by_field_name("name")?;
    let name = node_text(name_node, ctx.source).to_string();
    let params = node
        .child_by_field_name("parameters")
        .map(|n| node_text(n, ctx.source))
        .unwrap_or("()");
    let sig_hash = parser::signature_hash(params);
    let lexical_path = parser::build_lexical_path(".", scope, &name);
    let disambiguator = ctx.next_disambiguator(DefKind::Function, &lexical_path, &sig_hash);
    let id = parser::def_fact_id(&ctx.file_path, DefKind::Function, &lexical_path, &sig_hash, disambiguator);

    push_doc(node, id, ctx);

    ctx.facts.defs.push(DefFact {
        id,
        file_id: ctx.file_id,
        context_id: ctx.context_id,
        kind: DefKind::Function,
        name,
        qualified_name: lexical_path.clone(),
        lexical_path,
        signature_hash: sig_hash,
        disambiguator,
        start: parser::node_position(node.start_position()),
        end: parser::node_position(node.end_position()),
        is_public: exported,
    });
    Some(id)
}

fn extract_class(node: Node, scope: &[String], exported: bool, ctx: &mut WalkCtx) -> Option<u64> {
    let name_node = node.child_by_field_name("name")?;
    let name = node_text(name_node, ctx.source).to_string();
    let lexical_path = parser::build_lexical_path(".", scope, &name);
    let sig_hash = parser::signature_hash(&lexical_path);
    let disambiguator = ctx.next_disambiguator(DefKind::Class, &lexical_path, &sig_hash);
    let id = parser::def_fact_id(&ctx.file_path, DefKind::Class, &lexical_path, &sig_hash, disambiguator);

    push_doc(node, id, ctx);

    if let Some(heritage) = find_child(node, "class_heritage") {
        for part in node_text(heritage, ctx.source).split_whitespace() {
            if part == "extends" || part == "implements" {
                continue;
            }
            let clean = part.trim_end_matches(',');
            if clean.is_empty() {
                continue;
            }
            ctx.facts.refs.push(RefFact {
                file_id: ctx.file_id,
                context_id: ctx.context_id,
                name: clean.to_string(),
                start: parser::node_position(heritage.start_position()),
                end: parser::node_position(heritage.end_position()),
                role: RefRole::TypeReference,
                enclosing_def_id: Some(id),
            });
        }
    }

    ctx.facts.defs.push(DefFact {
        id,
        file_id: ctx.file_id,
        context_id: ctx.context_id,
        kind: DefKind::Class,
        name,
        qualified_name: lexical_path.clone(),
        lexical_path,
        signature_hash: sig_hash,
        disambiguator,
        start: parser::node_position(node.start_position()),
        end: parser::node_position(node.end_position()),
        is_public: exported,
    });
    Some(id)
}

fn extract_interface(node: Node, scope: &[String], exported: bool, ctx: &mut WalkCtx) -> Option<u64> {
    let name_node = node.child_by_field_name("name")?;
    let name = node_text(name_node, ctx.source).to_string();
    let lexical_path = parser::build_lexical_path(".", scope, &name);
    let sig_hash = parser::signature_hash(&lexical_path);
    let disambiguator = ctx.next_disambiguator(DefKind::Class, &lexical_path, &sig_hash);
    let id = parser::def_fact_id(&ctx.file_path, DefKind::Class, &lexical_path, &sig_hash, disambiguator);

    push_doc(node, id, ctx);

    ctx.facts.defs.push(DefFact {
        id,
        file_id: ctx.file_id,
        context_id: ctx.context_id,
        kind: DefKind::Class,
        name,
        qualified_name: lexical_path.clone(),
        lexical_path,
        signature_hash: sig_hash,
        disambiguator,
        start: parser::node_position(node.start_position()),
        end: parser::node_position(node.end_position()),
        is_public: exported,
    });
    Some(id)
}

fn extract_type_alias(node: Node, scope: &[String], exported: bool, ctx: &mut WalkCtx) -> Option<u64> {
    let name_node = node.child_by_field_name("name")?;
    let name = node_text(name_node, ctx.source).to_string();
    let lexical_path = parser::build_lexical_path(".", scope, &name);
    let sig_hash = parser::signature_hash(&lexical_path);
    let disambiguator = ctx.next_disambiguator(DefKind::Type, &lexical_path, &sig_hash);
    let id = parser::def_fact_id(&ctx.file_path, DefKind::Type, &lexical_path, &sig_hash, disambiguator);

    ctx.facts.defs.push(DefFact {
        id,
        file_id: ctx.file_id,
        context_id: ctx.context_id,
        kind: DefKind::Type,
        name,
        qualified_name: lexical_path.clone(),
        lexical_path,
        signature_hash: sig_hash,
        disambiguator,
        start: parser::node_position(node.start_position()),
        end: parser::node_position(node.end_position()),
        is_public: exported,
    });
    Some(id)
}

fn extract_method(node: Node, scope: &[String], ctx: &mut WalkCtx) -> Option<u64> {
    let name_node = node.child_by_field_name("name")?;
    let name = node_text(name_node, ctx.source).to_string();
    let params = node
        .child_by_field_name("parameters")
        .map(|n| node_text(n, ctx.source))
        .unwrap_or("()");
    let sig_hash = parser::signature_hash(params);
    let lexical_path = parser::build_lexical_path(".", scope, &name);
    let disambiguator = ctx.next_disambiguator(DefKind::Method, &lexical_path, &sig_hash);
    let id = parser::def_fact_id(&ctx.file_path, DefKind::Method, &lexical_path, &sig_hash, disambiguator);
    let is_public = !name.starts_with('#') && !name.starts_with('_');

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

fn extract_variable_declarations(node: Node, scope: &[String], exported: bool, ctx: &mut WalkCtx) {
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    for child in children {
        if child.kind() != "variable_declarator" {
            continue;
        }
        let Some(name_node) = child.child_by_field_name("name") else {
            continue;
        };
        let name = node_text(name_node, ctx.source).to_string();
        let value = child.child_by_field_name("value");
        let kind = match value.map(|v| v.kind()) {
            Some("arrow_function") | Some("function") => DefKind::Function,
            _ => DefKind::Constant,
        };

        let lexical_path = parser::build_lexical_path(".", scope, &name);
        let sig_hash = parser::signature_hash(&lexical_path);
        let disambiguator = ctx.next_disambiguator(kind, &lexical_path, &sig_hash);
        let id = parser::def_fact_id(&ctx.file_path, kind, &lexical_path, &sig_hash, disambiguator);

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
            is_public: exported,
        });

        if let Some(value) = value {
            if value.kind() == "arrow_function" || value.kind() == "function" {
                if let Some(body) = value.child_by_field_name("body") {
                    walk_ts_node(body, scope, Some(id), false, ctx);
                }
            }
        }
    }
}

pub(crate) fn extract_call(node: Node, enclosing_def_id: Option<u64>, ctx: &mut WalkCtx) {
    let Some(function_node) = node.child_by_field_name("function") else {
        return;
    };
    let callee_name = node_text(function_node, ctx.source).to_string();
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

/// Collect ES6 `import`/re-export `export ... from` statements.
pub(crate) fn collect_ts_imports(node: Node, ctx: &mut WalkCtx) {
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    for child in children {
        match child.kind() {
            "import_statement" => {
                let start = parser::node_position(child.start_position());
                let end = parser::node_position(child.end_position());
                let module_path = child
                    .child_by_field_name("source")
                    .map(|n| strip_quotes(node_text(n, ctx.source)))
                    .unwrap_or_default();
                if module_path.is_empty() {
                    continue;
                }
                let mut names = Vec::new();
                let mut inner = child.walk();
                for import_child in child.children(&mut inner) {
                    match import_child.kind() {
                        "import_clause" => collect_import_names(import_child, ctx.source, &mut names),
                        "identifier" => {
                            let name = node_text(import_child, ctx.source).to_string();
                            if name != "import" && name != "from" {
                                names.push(name);
                            }
                        }
                        _ => {}
                    }
                }
                ctx.facts.imports.push(ImportFact {
                    file_id: ctx.file_id,
                    context_id: ctx.context_id,
                    module_path,
                    alias: None,
                    imported_symbols: names,
                    start,
                    end,
                });
            }
            "export_statement" => {
                if let Some(source_node) = child.child_by_field_name("source") {
                    let module_path = strip_quotes(node_text(source_node, ctx.source));
                    if !module_path.is_empty() {
                        ctx.facts.imports.push(ImportFact {
                            file_id: ctx.file_id,
                            context_id: ctx.context_id,
                            module_path,
                            alias: None,
                            imported_symbols: Vec::new(),
                            start: parser::node_position(child.start_position()),
                            end: parser::node_position(child.end_position()),
                        });
                    }
                } else {
                    collect_ts_imports(child, ctx);
                }
            }
            _ => {
                if child.child_count() > 0 {
                    collect_ts_imports(child, ctx);
                }
            }
        }
    }
}

fn collect_import_names(node: Node, source: &[u8], names: &mut Vec<String>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "identifier" => names.push(node_text(child, source).to_string()),
            "named_imports" => {
                let mut inner = child.walk();
                for spec in child.children(&mut inner) {
                    if spec.kind() == "import_specifier" {
                        if let Some(name_node) = spec.child_by_field_name("name") {
                            names.push(node_text(name_node, source).to_string());
                        }
                    }
                }
            }
            "namespace_import" => names.push("*".to_string()),
            _ => {
                if child.child_count() > 0 {
                    collect_import_names(child, source, names);
                }
            }
        }
    }
}

fn strip_quotes(text: &str) -> String {
    text.trim_matches(|c: char| c == '\'' || c == '"').to_string()
}

fn find_child<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).find(|c| c.kind() == kind)
}

fn node_text<'a>(node: Node<'_>, source: &'a [u8]) -> &'a str {
    std::str::from_utf8(&source[node.start_byte()..node.end_byte()]).unwrap_or("")
}

/// Extract a preceding `/** ... */` JSDoc comment and push a `Docstring`.
fn push_doc(node: Node, def_id: u64, ctx: &mut WalkCtx) {
    let Some(prev) = node.prev_sibling() else {
        return;
    };
    if prev.kind() != "comment" {
        return;
    }
    let text = node_text(prev, ctx.source).trim();
    if !text.starts_with("/**") {
        return;
    }
    let stripped = text.strip_prefix("/**").unwrap_or(text).strip_suffix("*/").unwrap_or(text).trim();
    let cleaned: Vec<&str> = stripped
        .lines()
        .map(|line| {
            let trimmed = line.trim();
            trimmed.strip_prefix("* ").or_else(|| trimmed.strip_prefix('*')).unwrap_or(trimmed)
        })
        .collect();
    let result = cleaned.join("\n").trim().to_string();
    if result.is_empty() {
        return;
    }
    ctx.facts.docstrings.push(Docstring {
        def_id,
        content: result,
        start: parser::node_position(prev.start_position()),
        end: parser::node_position(prev.end_position()),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Language, ParseOutcome};

    fn parse_ts(source: &str) -> FileFacts {
        match crate::parser::parse_file(Path::new("test.ts"), source.as_bytes(), Language::TypeScript, 1, 1) {
            ParseOutcome::Parsed { facts, .. } => facts,
            ParseOutcome::Failed { reason } => panic!("parse failed: {reason}"),
        }
    }

    #[test]
    fn test_function_declaration() {
        let facts = parse_ts("function greet(name: string): string {\n  return name;\n}\n");
        let def = facts.defs.iter().find(|d| d.name == "greet").expect("greet");
        assert_eq!(def.kind, DefKind::Function);
        assert!(!def.is_public);
    }

    #[test]
    fn test_exported_function_is_public() {
        let facts = parse_ts("export function api(): void {}\n");
        let def = facts.defs.iter().find(|d| d.name == "api").expect("api");
        assert!(def.is_public);
    }

    #[test]
    fn test_class_with_methods_and_heritage() {
        let src = r#"
class UserService extends BaseService {
    getUser(id: string): User {
        return this.db.find(id);
    }
}
"#;
        let facts = parse_ts(src);
        let class = facts.defs.iter().find(|d| d.name == "UserService").expect("class");
        assert_eq!(class.kind, DefKind::Class);
        let method = facts.defs.iter().find(|d| d.name == "getUser").expect("method");
        assert_eq!(method.kind, DefKind::Method);
        assert!(facts.refs.iter().any(|r| r.name == "BaseService" && r.role == RefRole::TypeReference));
    }

    #[test]
    fn test_interface_maps_to_class_kind() {
        let facts = parse_ts("interface User {\n  id: string;\n}\n");
        let def = facts.defs.iter().find(|d| d.name == "User").expect("User");
        assert_eq!(def.kind, DefKind::Class);
    }

    #[test]
    fn test_type_alias_maps_to_type_kind() {
        let facts = parse_ts("type Result<T> = Success<T> | Failure;\n");
        let def = facts.defs.iter().find(|d| d.name == "Result").expect("Result");
        assert_eq!(def.kind, DefKind::Type);
    }

    #[test]
    fn test_arrow_const_is_function_kind() {
        let facts = parse_ts("const add = (a: number, b: number): number => a + b;\n");
        let def = facts.defs.iter().find(|d| d.name == "add").expect("add");
        assert_eq!(def.kind, DefKind::Function);
    }

    #[test]
    fn test_exported_const_is_constant_and_public() {
        let facts = parse_ts("export const MAX_RETRIES = 3;\n");
        let def = facts.defs.iter().find(|d| d.name == "MAX_RETRIES").expect("const");
        assert_eq!(def.kind, DefKind::Constant);
        assert!(def.is_public);
    }

    #[test]
    fn test_call_emits_call_and_ref() {
        let facts = parse_ts("function run() {\n  doWork();\n}\n");
        assert!(facts.calls.iter().any(|c| c.callee_name == "doWork"));
        assert!(facts.refs.iter().any(|r| r.name == "doWork" && r.role == RefRole::Call));
    }

    #[test]
    fn test_import_statement() {
        let mut ctx = WalkCtx {
            source: b"import { Foo, Bar } from './module';\n",
            file_path: "test.ts".to_string(),
            file_id: 1,
            context_id: 1,
            facts: FileFacts::default(),
            disambiguators: HashMap::new(),
        };
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
            .expect("load grammar");
        let tree = parser.parse(ctx.source, None).expect("parse");
        collect_ts_imports(tree.root_node(), &mut ctx);
        let import = ctx.facts.imports.first().expect("import");
        assert_eq!(import.module_path, "./module");
        assert!(import.imported_symbols.contains(&"Foo".to_string()));
        assert!(import.imported_symbols.contains(&"Bar".to_string()));
    }
}
