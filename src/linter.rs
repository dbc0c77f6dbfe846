//! Schema linting: static checks over schema files.
//!
//! Each file is parsed, resolved and compiled exactly as
//! [`compile_schema`](crate::compile_schema) would, and every failure is
//! reported as a coded diagnostic instead of aborting the run:
//!
//! | Code   | Severity | Meaning                                   |
//! |--------|----------|-------------------------------------------|
//! | `E001` | error    | file does not parse as JSON/YAML          |
//! | `E002` | error    | `$ref` cannot be resolved                 |
//! | `E003` | error    | referenced document cannot be fetched     |
//! | `E004` | error    | schema does not compile                   |
//! | `W001` | warning  | root has no `$id`                         |
//! | `W002` | warning  | schema compiles to no object types        |

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::compiler::compile;
use crate::document::{load_document, DocumentFetcher, FileFetcher, MemoryFetcher};
use crate::error::{FetchError, ResolutionError, Severity};
use crate::resolver::resolve;
use crate::types::CompileOptions;

/// A single diagnostic message from linting.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub file: PathBuf,
    /// JSON pointer to the offending node ("/" for the whole document).
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn error(code: &str, file: &Path, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code: code.to_string(),
            file: file.to_path_buf(),
            path: path.into(),
            message: message.into(),
        }
    }

    fn warning(code: &str, file: &Path, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.to_string(),
            file: file.to_path_buf(),
            path: "/".to_string(),
            message: message.into(),
        }
    }
}

/// Result of linting a single file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Error,
    Warning,
}

/// Result of linting a directory or set of files.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub path: PathBuf,
    pub files_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<FileResult>,
}

impl LintResult {
    /// Returns true if no file produced an error.
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }
}

/// Lint a file or directory.
///
/// Directories are walked recursively for `.json`, `.yaml` and `.yml`
/// files. Files in the set may reference each other by their `$id`
/// without any network access. With `strict`, files with warnings count
/// as failed.
pub fn lint(path: &Path, strict: bool) -> LintResult {
    let files = collect_schema_files(path);
    let fetcher = LintFetcher::for_files(&files);

    let results: Vec<FileResult> = files
        .iter()
        .map(|file| lint_with(file, path, &fetcher))
        .collect();

    let count = |severity: Severity| {
        results
            .iter()
            .flat_map(|r| &r.diagnostics)
            .filter(|d| d.severity == severity)
            .count()
    };
    let errors = count(Severity::Error);
    let warnings = count(Severity::Warning);

    let failed = results
        .iter()
        .filter(|r| match r.status {
            FileStatus::Error => true,
            FileStatus::Warning => strict,
            FileStatus::Ok => false,
        })
        .count();

    LintResult {
        path: path.to_path_buf(),
        files_checked: files.len(),
        passed: files.len() - failed,
        failed,
        errors,
        warnings,
        results,
    }
}

/// Lint a single schema file on its own.
pub fn lint_file(file: &Path, base_path: &Path) -> FileResult {
    lint_with(file, base_path, &LintFetcher::default())
}

fn lint_with(file: &Path, base_path: &Path, fetcher: &LintFetcher) -> FileResult {
    let diagnostics = diagnose(file, fetcher);
    let status = if diagnostics.iter().any(|d| d.severity == Severity::Error) {
        FileStatus::Error
    } else if diagnostics.is_empty() {
        FileStatus::Ok
    } else {
        FileStatus::Warning
    };
    tracing::debug!(file = %file.display(), ?status, "linted schema");
    FileResult {
        file: file.strip_prefix(base_path).unwrap_or(file).to_path_buf(),
        status,
        diagnostics,
    }
}

fn diagnose(file: &Path, fetcher: &LintFetcher) -> Vec<Diagnostic> {
    let document = match load_document(file) {
        Ok(document) => document,
        Err(e @ FetchError::Parse { .. }) => {
            return vec![Diagnostic::error("E001", file, "/", format!("syntax error: {}", e))]
        }
        Err(e) => return vec![Diagnostic::error("E003", file, "/", e.to_string())],
    };

    let mut diagnostics = Vec::new();
    if document.get("$id").and_then(Value::as_str).is_none() {
        diagnostics.push(Diagnostic::warning("W001", file, "schema has no $id"));
    }

    let base = match file_uri(file) {
        Some(uri) => uri,
        None => {
            diagnostics.push(Diagnostic::error(
                "E003",
                file,
                "/",
                format!("cannot express {} as a file URI", file.display()),
            ));
            return diagnostics;
        }
    };

    let graph = match resolve(&document, base.as_str(), fetcher) {
        Ok(graph) => graph,
        Err(e) => {
            let code = match &e {
                ResolutionError::Fetch { .. } => "E003",
                ResolutionError::InvalidSchema { .. } => "E004",
                _ => "E002",
            };
            diagnostics.push(Diagnostic::error(code, file, pointer_of(e.uri()), e.to_string()));
            return diagnostics;
        }
    };

    match compile(&graph, &CompileOptions::default()) {
        Ok(set) if set.is_empty() => {
            diagnostics.push(Diagnostic::warning("W002", file, "schema defines no object types"));
        }
        Ok(_) => {}
        Err(e) => {
            diagnostics.push(Diagnostic::error("E004", file, pointer_of(e.uri()), e.to_string()));
        }
    }
    diagnostics
}

/// JSON pointer part of a node URI.
fn pointer_of(uri: &str) -> String {
    match uri.split_once('#') {
        Some((_, pointer)) if pointer.starts_with('/') => pointer.to_string(),
        _ => "/".to_string(),
    }
}

fn file_uri(file: &Path) -> Option<Url> {
    let absolute = std::fs::canonicalize(file).ok()?;
    Url::from_file_path(absolute).ok()
}

/// Serves documents of the linted set by `$id`, then local files.
/// Never touches the network.
#[derive(Debug, Default)]
struct LintFetcher {
    by_id: MemoryFetcher,
}

impl LintFetcher {
    fn for_files(files: &[PathBuf]) -> Self {
        let mut by_id = MemoryFetcher::new();
        for file in files {
            let Ok(document) = load_document(file) else {
                continue;
            };
            let id = document
                .get("$id")
                .and_then(Value::as_str)
                .and_then(|id| Url::parse(id).ok());
            if let Some(mut id) = id {
                id.set_fragment(None);
                by_id.insert(id.to_string(), document);
            }
        }
        Self { by_id }
    }
}

impl DocumentFetcher for LintFetcher {
    fn fetch_document(&self, uri: &Url) -> Result<Value, FetchError> {
        match self.by_id.fetch_document(uri) {
            Err(FetchError::NotFound { .. }) => FileFetcher.fetch_document(uri),
            found => found,
        }
    }
}

/// Collect schema files in a path (file or directory), sorted.
fn collect_schema_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        if is_schema_file(path) {
            return vec![path.to_path_buf()];
        }
        return vec![];
    }

    let mut files = Vec::new();
    collect_files_recursive(path, &mut files);
    files.sort();
    files
}

fn collect_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files_recursive(&path, files);
        } else if is_schema_file(&path) {
            files.push(path);
        }
    }
}

fn is_schema_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json" | "yaml" | "yml")
    )
}
