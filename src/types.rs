//! Core domain types shared across all index-engine subsystems.
//!
//! These form the contract between the parser, the two stores, and the
//! coordinator. `FactKind` is a tagged sum rather than a dynamically
//! dispatched trait object: every place that matches on fact kind is
//! exhaustive, and storage serializes the discriminant directly.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// A language family recognized by discovery and the parser registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python (.py)
    Python,
    /// Rust (.rs)
    Rust,
    /// TypeScript (.ts, .tsx)
    TypeScript,
    /// JavaScript (.js, .jsx, .mjs, .cjs)
    JavaScript,
    /// Go (.go)
    Go,
    /// Recognized extension with no registered grammar; lexical-only.
    Unknown,
}

impl Language {
    /// Detect a language family from a file extension (no leading dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "py" => Self::Python,
            "rs" => Self::Rust,
            "ts" | "tsx" => Self::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "go" => Self::Go,
            _ => Self::Unknown,
        }
    }

    /// Stable string identifier, used as the storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Rust => "rust",
            Self::TypeScript => "typescript",
            Self::JavaScript => "javascript",
            Self::Go => "go",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the grammar registry carries an analyzer for this language.
    pub fn has_grammar(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Inverse of `as_str`, for reading rows back out of storage.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "python" => Self::Python,
            "rust" => Self::Rust,
            "typescript" => Self::TypeScript,
            "javascript" => Self::JavaScript,
            "go" => Self::Go,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Repository / Context / File
// ---------------------------------------------------------------------------

/// A language-family workspace rooted inside the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    /// Stable id (row id in the structural store).
    pub id: i64,
    /// Display name, usually derived from the manifest.
    pub name: String,
    /// Language family this context routes files for.
    pub language: Language,
    /// Root path, repo-relative, forward-slash normalized.
    pub root_path: String,
    /// The manifest file that defined this context (e.g. `pyproject.toml`).
    pub manifest_path: String,
    /// Hash of the manifest's contents, used to decide whether the context
    /// can be reused across a discovery re-run.
    pub config_hash: String,
}

/// Metadata about an indexed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    /// Stable id (row id in the structural store).
    pub id: i64,
    /// Repo-relative path, forward-slash normalized.
    pub path: String,
    /// Detected language family.
    pub language: Language,
    /// Cryptographic hash (SHA-256, hex) over the raw file bytes.
    pub content_hash: String,
    /// Line count at last index.
    pub line_count: u32,
    /// Epoch this file's row was last updated at.
    pub indexed_epoch: i64,
    /// Whether the parser failed on this file's current content.
    pub parse_failed: bool,
}

// ---------------------------------------------------------------------------
// Facts
// ---------------------------------------------------------------------------

/// What kind of named entity a `DefFact` defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefKind {
    /// A free function.
    Function,
    /// A method on a type.
    Method,
    /// A class, struct, or interface/trait definition.
    Class,
    /// A variable or field binding.
    Variable,
    /// A type alias or type definition.
    Type,
    /// A constant or static binding.
    Constant,
    /// A module or package declaration.
    Module,
    /// Anything not covered above.
    Other,
}

impl DefKind {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Variable => "variable",
            Self::Type => "type",
            Self::Constant => "constant",
            Self::Module => "module",
            Self::Other => "other",
        }
    }

    /// Parse from the storage representation, defaulting to `Other`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "function" => Self::Function,
            "method" => Self::Method,
            "class" => Self::Class,
            "variable" => Self::Variable,
            "type" => Self::Type,
            "constant" => Self::Constant,
            "module" => Self::Module,
            _ => Self::Other,
        }
    }
}

/// A one-based line/column source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// 1-indexed line number.
    pub line: u32,
    /// 1-indexed column number.
    pub column: u32,
}

/// A definition of a named entity, extracted by the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefFact {
    /// 64-bit prefix of a cryptographic hash over the defining tuple.
    /// Identical tuples always produce identical ids (see `def_fact_id`).
    pub id: u64,
    /// File this def was extracted from.
    pub file_id: i64,
    /// Context the file was routed to.
    pub context_id: i64,
    /// What kind of entity this defines.
    pub kind: DefKind,
    /// Short name.
    pub name: String,
    /// Language-appropriate dotted path of enclosing scopes plus name.
    pub qualified_name: String,
    /// Dotted chain of enclosing named scopes (without `name` itself).
    pub lexical_path: String,
    /// Canonical signature form (see `signature_hash` in the parser module).
    pub signature_hash: String,
    /// Disambiguator breaking ties between same-tuple overloads, counted
    /// in file order.
    pub disambiguator: u32,
    pub start: Position,
    pub end: Position,
    /// Whether the parser judged this definition externally visible.
    pub is_public: bool,
}

/// The syntactic role a `RefFact` plays at its site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefRole {
    /// A call expression.
    Call,
    /// An import reference.
    Import,
    /// A plain name usage (read or write).
    Usage,
    /// A reference occurring in type position.
    TypeReference,
}

impl RefRole {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Import => "import",
            Self::Usage => "usage",
            Self::TypeReference => "type-reference",
        }
    }

    /// Parse from the storage representation, defaulting to `Usage`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "call" => Self::Call,
            "import" => Self::Import,
            "type-reference" => Self::TypeReference,
            _ => Self::Usage,
        }
    }
}

/// A lexical reference to a name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefFact {
    pub file_id: i64,
    pub context_id: i64,
    pub name: String,
    pub start: Position,
    pub end: Position,
    pub role: RefRole,
    /// The nearest syntactic ancestor definition, if any.
    pub enclosing_def_id: Option<u64>,
}

/// An `import`-like statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportFact {
    pub file_id: i64,
    pub context_id: i64,
    /// Module path exactly as written in source.
    pub module_path: String,
    /// Bound alias, if any (`import foo as f` -> `Some("f")`).
    pub alias: Option<String>,
    /// Imported symbol names; empty for a bare `import module`.
    pub imported_symbols: Vec<String>,
    pub start: Position,
    pub end: Position,
}

/// An invocation site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallFact {
    pub file_id: i64,
    pub context_id: i64,
    /// Callee name exactly as written.
    pub callee_name: String,
    pub start: Position,
    pub end: Position,
    pub enclosing_def_id: Option<u64>,
}

/// A documentation string attached to a definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Docstring {
    pub def_id: u64,
    pub content: String,
    pub start: Position,
    pub end: Position,
}

/// The five kinds of structural fact the parser emits, as a tagged sum.
/// Every consumer matches on this exhaustively rather than downcasting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Fact {
    /// A `DefFact`.
    Def(DefFact),
    /// A `RefFact`.
    Ref(RefFact),
    /// An `ImportFact`.
    Import(ImportFact),
    /// A `CallFact`.
    Call(CallFact),
    /// A `Docstring`.
    Doc(Docstring),
}

/// All facts extracted from one file, grouped by kind for bulk storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileFacts {
    pub defs: Vec<DefFact>,
    pub refs: Vec<RefFact>,
    pub imports: Vec<ImportFact>,
    pub calls: Vec<CallFact>,
    pub docstrings: Vec<Docstring>,
}

impl FileFacts {
    /// Total fact count across all kinds, used for batch reporting.
    pub fn len(&self) -> usize {
        self.defs.len() + self.refs.len() + self.imports.len() + self.calls.len() + self.docstrings.len()
    }

    /// Whether no facts were extracted at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse result for one file: either facts, or a recorded failure.
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    /// Parsing succeeded; facts and any non-fatal diagnostics.
    Parsed {
        facts: FileFacts,
        diagnostics: Vec<String>,
    },
    /// The grammar failed on this file's bytes. The file is still indexed
    /// lexically and flagged `parse_failed` in the structural store.
    Failed {
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Epoch / batch reporting
// ---------------------------------------------------------------------------

/// Commit state of an epoch as recorded in the recovery journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochJournalState {
    /// No journal row: healthy, nothing to recover.
    Clean,
    /// Journal row present, lexical commit not yet performed.
    LexicalPending,
    /// Journal row present, lexical committed but structural commit unknown.
    LexicalCommitted,
}

/// Statistics returned from a reindex operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub files_added: usize,
    pub files_updated: usize,
    pub files_removed: usize,
    pub defs_extracted: usize,
    pub touched_paths: Vec<String>,
    pub errors: Vec<String>,
}

/// Result of a `get_file_state` query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileState {
    pub content_hash: String,
    pub indexed_epoch: i64,
    pub parse_failed: bool,
}

/// A path rejected by the ignore resolver.
#[derive(Debug, Clone)]
pub struct ExcludedPath {
    pub path: PathBuf,
    pub reason: String,
}
