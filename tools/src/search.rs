//! Project search tools: text search and type-declaration lookup.
//!
//! Both walk the project with `ignore`, so `.gitignore` rules apply and `.git`
//! is never entered. The walk runs on a blocking thread and stops as soon as
//! the owning tool future is dropped.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use bif_types::{CapabilitySet, ToolCapability, ToolIcon};
use ignore::WalkBuilder;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ToolCtx, ToolError, ToolExecutor, ToolFut, parse_args};

const NO_MATCHES: &str = "no matches found.";
const MORE_MATCHES: &str = "... and more matches found.";

/// Files larger than this are skipped by both searches.
const MAX_SEARCHED_FILE_BYTES: u64 = 4 * 1024 * 1024;

const SOURCE_EXTENSIONS: &[&str] = &[
    "kt", "kts", "java", "scala", "groovy", "rs", "ts", "tsx", "js", "jsx", "py", "swift", "go",
    "cs",
];

static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:@\w+(?:\([^)]*\))?\s+)*(?:(?:public|private|protected|internal|abstract|final|sealed|open|data|inner|static|export|default|annotation|value|pub(?:\([^)]*\))?)\s+)*(?:class|interface|object|struct|enum|trait|type|typealias|record)\s+([A-Za-z_][A-Za-z0-9_]*)",
    )
    .unwrap_or_else(|e| unreachable!("declaration regex is valid: {e}"))
});

static PACKAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*package\s+([A-Za-z_][A-Za-z0-9_.]*)")
        .unwrap_or_else(|e| unreachable!("package regex is valid: {e}"))
});

/// Set when the owning tool future is dropped; the blocking walk polls it.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn walker(root: &Path) -> ignore::Walk {
    let mut builder = WalkBuilder::new(root);
    builder.hidden(true);
    builder.filter_entry(|entry| entry.file_name() != ".git");
    builder.build()
}

fn searchable_files(root: &Path, cancelled: &AtomicBool) -> impl Iterator<Item = PathBuf> {
    walker(root)
        .filter_map(Result::ok)
        .take_while(move |_| !cancelled.load(Ordering::Relaxed))
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .filter(|entry| {
            entry
                .metadata()
                .is_ok_and(|meta| meta.len() <= MAX_SEARCHED_FILE_BYTES)
        })
        .map(ignore::DirEntry::into_path)
}

/// Read a file as text; binary (NUL-containing) files read as `None`.
fn read_text(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    if bytes.contains(&0) {
        return None;
    }
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

async fn run_blocking<T, F>(tool: &str, work: F) -> Result<T, ToolError>
where
    T: Send + 'static,
    F: FnOnce(&AtomicBool) -> T + Send + 'static,
{
    let cancelled = Arc::new(AtomicBool::new(false));
    let _guard = CancelOnDrop(Arc::clone(&cancelled));
    tokio::task::spawn_blocking(move || work(&cancelled))
        .await
        .map_err(|e| ToolError::failed(tool, format!("search task failed: {e}")))
}

#[derive(Debug)]
pub struct FindTextInFilesTool {
    max_results: usize,
    timeout: Duration,
}

impl FindTextInFilesTool {
    #[must_use]
    pub fn new(max_results: usize, timeout: Duration) -> Self {
        Self {
            max_results,
            timeout,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FindTextArgs {
    text: String,
    #[serde(default)]
    dir_path: Option<String>,
}

fn find_text(
    root: &Path,
    display_root: &crate::ProjectRoot,
    needle: &str,
    max_results: usize,
    cancelled: &AtomicBool,
) -> String {
    let mut out = String::new();
    let mut hits = 0usize;
    for path in searchable_files(root, cancelled) {
        let Some(text) = read_text(&path) else {
            continue;
        };
        let display = display_root.relative_display(&path);
        for (idx, line) in text.lines().enumerate() {
            if !line.contains(needle) {
                continue;
            }
            if hits == max_results {
                out.push_str(MORE_MATCHES);
                return out;
            }
            let _ = writeln!(out, "{display}:{}:{}", idx + 1, line.trim());
            hits += 1;
        }
    }
    if hits == 0 {
        return NO_MATCHES.to_string();
    }
    out.truncate(out.trim_end().len());
    out
}

impl ToolExecutor for FindTextInFilesTool {
    fn name(&self) -> &'static str {
        "findTextInFiles"
    }

    fn description(&self) -> &'static str {
        "Search project files for an exact piece of text. Returns path:line:content \
         for each matching line."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Exact text to search for" },
                "dirPath": {
                    "type": "string",
                    "description": "Optional directory to limit the search to, relative to the project root"
                }
            },
            "required": ["text"]
        })
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::of(&[ToolCapability::ReadOnly])
    }

    fn icon(&self) -> Option<ToolIcon> {
        Some(ToolIcon::Find)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: FindTextArgs = parse_args(&args)?;
            if args.text.trim().is_empty() {
                return Err(ToolError::BadArgs {
                    message: "text must not be empty".to_string(),
                });
            }
            let root = match args.dir_path.as_deref().filter(|p| !p.trim().is_empty()) {
                Some(dir) => {
                    let resolved = ctx.project.resolve_existing(dir)?;
                    if !resolved.is_dir() {
                        return Err(ToolError::BadArgs {
                            message: "Provided path is not a directory".to_string(),
                        });
                    }
                    resolved
                }
                None => ctx.project.path().to_path_buf(),
            };
            let project = ctx.project.clone();
            let max_results = self.max_results;
            run_blocking(self.name(), move |cancelled| {
                find_text(&root, &project, &args.text, max_results, cancelled)
            })
            .await
        })
    }
}

#[derive(Debug)]
pub struct FindClassByNameTool {
    timeout: Duration,
}

impl FindClassByNameTool {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FindClassArgs {
    short_name: String,
}

/// Declarations of `short_name` in `text`, as fully qualified names.
fn declarations_in(text: &str, short_name: &str) -> Vec<String> {
    let package = text
        .lines()
        .find_map(|line| PACKAGE.captures(line))
        .map(|caps| caps[1].to_string());
    text.lines()
        .filter_map(|line| DECLARATION.captures(line))
        .filter(|caps| &caps[1] == short_name)
        .map(|caps| match &package {
            Some(pkg) => format!("{pkg}.{}", &caps[1]),
            None => caps[1].to_string(),
        })
        .collect()
}

fn find_declarations(
    project: &crate::ProjectRoot,
    short_name: &str,
    cancelled: &AtomicBool,
) -> String {
    let mut found: Vec<(usize, String, String)> = Vec::new();
    for path in searchable_files(project.path(), cancelled) {
        let is_source = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext));
        if !is_source {
            continue;
        }
        let Some(text) = read_text(&path) else {
            continue;
        };
        let relative = project.relative_display(&path);
        let depth = relative.matches('/').count();
        for fqn in declarations_in(&text, short_name) {
            let entry = (depth, relative.clone(), fqn);
            if !found.contains(&entry) {
                found.push(entry);
            }
        }
    }
    if found.is_empty() {
        return NO_MATCHES.to_string();
    }
    found.sort();
    found
        .into_iter()
        .map(|(_, path, fqn)| format!("{fqn}|{path}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl ToolExecutor for FindClassByNameTool {
    fn name(&self) -> &'static str {
        "findClassByName"
    }

    fn description(&self) -> &'static str {
        "Find where a class, interface, object, struct, enum, trait or type alias is declared, \
         by its short name. Returns fully-qualified-name|path lines, shallowest paths first."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "shortName": { "type": "string", "description": "Unqualified type name, e.g. UserService" }
            },
            "required": ["shortName"]
        })
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::of(&[ToolCapability::ReadOnly])
    }

    fn icon(&self) -> Option<ToolIcon> {
        Some(ToolIcon::Symbol)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: FindClassArgs = parse_args(&args)?;
            let short_name = args.short_name.trim().to_string();
            if short_name.is_empty() {
                return Err(ToolError::BadArgs {
                    message: "shortName must not be empty".to_string(),
                });
            }
            let project = ctx.project.clone();
            run_blocking(self.name(), move |cancelled| {
                find_declarations(&project, &short_name, cancelled)
            })
            .await
        })
    }
}
