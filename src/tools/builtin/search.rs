//! Search tools: glob, find_files, and grep.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use globset::GlobBuilder;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::ToolError;
use crate::tools::tool::{opt_bool, opt_i64, opt_str, opt_str_list, Outcome, Tool};

const MAX_GLOB_RESULTS: usize = 1000;
const MAX_GREP_RESULTS: usize = 500;
const MAX_GREP_LINE_LENGTH: usize = 500;
const MAX_FIND_FILES_LIMIT: usize = 2000;
const DEFAULT_FIND_FILES_PAGE_SIZE: usize = 30;

// ── Shared helpers ──────────────────────────────────────────────────

/// Compile a double-star glob. `*` does not cross path separators.
fn compile_glob(pattern: &str) -> Result<globset::GlobMatcher, String> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| e.to_string())
}

/// Whether a relative path matches any exclude pattern, either directly or
/// nested under any directory (`**/pattern`).
fn is_excluded(rel: &str, patterns: &[String]) -> bool {
    for pattern in patterns {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            continue;
        }
        if let Ok(matcher) = compile_glob(pattern) {
            if matcher.is_match(rel) {
                return true;
            }
        }
        if let Ok(matcher) = compile_glob(&format!("**/{pattern}")) {
            if matcher.is_match(rel) {
                return true;
            }
        }
    }
    false
}

/// Whether any path component is hidden (starts with `.`).
fn is_hidden_path(rel: &str) -> bool {
    Path::new(rel).components().any(|c| {
        matches!(c, std::path::Component::Normal(name)
            if name.to_string_lossy().starts_with('.'))
    })
}

fn resolve_base(work_dir: &Path, path_param: Option<&str>) -> PathBuf {
    match path_param {
        Some(p) if !p.is_empty() => {
            let p = Path::new(p);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                work_dir.join(p)
            }
        }
        _ => work_dir.to_path_buf(),
    }
}

fn mtime_nanos(path: &Path) -> i128 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i128)
        .unwrap_or(0)
}

/// Walk all regular files under `base`, yielding base-relative paths.
/// Follows symlinks, matching the original globbing behavior.
fn walk_files(
    base: &Path,
    cancel: &CancellationToken,
) -> Result<Vec<(String, PathBuf)>, ToolError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(base).follow_links(true) {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(base)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        files.push((rel, entry.path().to_path_buf()));
    }
    Ok(files)
}

/// Binary heuristic: a null byte in the first 512 bytes.
fn is_binary_file(path: &Path) -> bool {
    use std::io::Read;
    let mut buf = [0u8; 512];
    match std::fs::File::open(path) {
        Ok(mut file) => match file.read(&mut buf) {
            Ok(n) => buf[..n].contains(&0),
            Err(_) => true,
        },
        Err(_) => true,
    }
}

// ── glob ────────────────────────────────────────────────────────────

/// Finds files by double-star glob pattern, newest first.
pub struct GlobTool {
    work_dir: PathBuf,
}

impl GlobTool {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files by pattern matching using glob patterns.\n\
         Supports patterns like \"**/*.rs\", \"src/**/*.ts\", \"*.json\".\n\
         Returns matching file paths sorted by modification time (newest first)."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern to match files (e.g., '**/*.rs', 'src/**/*.ts')"
                },
                "path": {
                    "type": "string",
                    "description": "Base directory to search in (optional, defaults to working directory)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ToolError> {
        let pattern = match opt_str(&params, "pattern") {
            Some(p) if !p.is_empty() => p,
            _ => return Ok(Outcome::fail("pattern is required")),
        };
        let base = resolve_base(&self.work_dir, opt_str(&params, "path"));

        let matcher = match compile_glob(pattern) {
            Ok(m) => m,
            Err(e) => return Ok(Outcome::fail(format!("glob error: {e}"))),
        };

        let mut files: Vec<(String, i128)> = walk_files(&base, cancel)?
            .into_iter()
            .filter(|(rel, _)| matcher.is_match(rel))
            .map(|(rel, full)| {
                let mtime = mtime_nanos(&full);
                (rel, mtime)
            })
            .collect();

        if files.is_empty() {
            return Ok(Outcome::ok("No files found matching pattern"));
        }

        files.sort_by(|a, b| b.1.cmp(&a.1));
        let total = files.len();
        files.truncate(MAX_GLOB_RESULTS);

        let mut output = files
            .iter()
            .map(|(rel, _)| rel.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if total > MAX_GLOB_RESULTS {
            output.push_str(&format!(
                "\n\n(showing {MAX_GLOB_RESULTS} of {total} matches)"
            ));
        }

        Ok(Outcome::ok(output))
    }
}

// ── find_files ──────────────────────────────────────────────────────

/// Finds files with include/exclude filters, sorting, and pagination.
pub struct FindFilesTool {
    work_dir: PathBuf,
}

impl FindFilesTool {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[async_trait]
impl Tool for FindFilesTool {
    fn name(&self) -> &str {
        "find_files"
    }

    fn description(&self) -> &str {
        "Find files with glob patterns and exclude filters.\n\
         Supports pagination (30 files per page by default) and hides hidden files by default.\n\
         Optimized for precise file discovery with compact output.\n\
         Use this before grep/read/edit to minimize context usage."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Base directory to search in (optional, defaults to working directory)"
                },
                "pattern": {
                    "type": "string",
                    "description": "Include glob pattern (default: '**/*')"
                },
                "exclude": {
                    "type": "array",
                    "description": "Exclude glob patterns matched against relative paths",
                    "items": { "type": "string" }
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (default: 2000)"
                },
                "sort": {
                    "type": "string",
                    "description": "Sort mode: none, path, or mtime (default: path)",
                    "enum": ["none", "path", "mtime"]
                },
                "page": {
                    "type": "integer",
                    "description": "Page number for pagination (1-based, default: 1)",
                    "minimum": 1
                },
                "page_size": {
                    "type": "integer",
                    "description": "Number of results per page (default: 30, max: 100)",
                    "minimum": 1,
                    "maximum": 100
                },
                "show_hidden": {
                    "type": "boolean",
                    "description": "Include hidden files and folders (default: false)"
                }
            }
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ToolError> {
        let base = resolve_base(&self.work_dir, opt_str(&params, "path"));
        let pattern = opt_str(&params, "pattern")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or("**/*");
        let excludes = opt_str_list(&params, "exclude");
        let show_hidden = opt_bool(&params, "show_hidden").unwrap_or(false);

        let page = opt_i64(&params, "page").filter(|p| *p > 0).unwrap_or(1) as usize;
        let page_size = opt_i64(&params, "page_size")
            .filter(|s| *s > 0)
            .map(|s| (s as usize).min(100))
            .unwrap_or(DEFAULT_FIND_FILES_PAGE_SIZE);
        let limit = opt_i64(&params, "max_results")
            .filter(|l| *l > 0)
            .map(|l| (l as usize).min(MAX_FIND_FILES_LIMIT))
            .unwrap_or(MAX_FIND_FILES_LIMIT);

        let sort_mode = opt_str(&params, "sort")
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "path".to_string());
        if !matches!(sort_mode.as_str(), "none" | "path" | "mtime") {
            return Ok(Outcome::fail("sort must be one of: none, path, mtime"));
        }

        let matcher = match compile_glob(pattern) {
            Ok(m) => m,
            Err(e) => return Ok(Outcome::fail(format!("glob error: {e}"))),
        };

        let mut results: Vec<(String, i128)> = Vec::new();
        for (rel, full) in walk_files(&base, cancel)? {
            if !matcher.is_match(&rel) || is_excluded(&rel, &excludes) {
                continue;
            }
            if !show_hidden && is_hidden_path(&rel) {
                continue;
            }
            if results.len() < limit {
                let mtime = mtime_nanos(&full);
                results.push((rel, mtime));
            }
        }

        match sort_mode.as_str() {
            "path" => results.sort_by(|a, b| a.0.cmp(&b.0)),
            "mtime" => results.sort_by(|a, b| b.1.cmp(&a.1)),
            _ => {}
        }

        if results.is_empty() {
            return Ok(Outcome::ok("No files found"));
        }

        let total = results.len();
        let total_pages = total.div_ceil(page_size);
        if page > total_pages {
            return Ok(Outcome::ok(format!(
                "Page {page} does not exist. Total pages: {total_pages}"
            )));
        }

        let start = (page - 1) * page_size;
        let end = (start + page_size).min(total);
        let mut output = results[start..end]
            .iter()
            .map(|(rel, _)| rel.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if total_pages > 1 {
            output.push_str(&format!(
                "\n\nPage {page} of {total_pages} (showing {}-{end} of {total} files)",
                start + 1
            ));
            if page < total_pages {
                output.push_str(&format!("\nUse page={} for next page", page + 1));
            }
        } else {
            output.push_str(&format!("\n\n(showing all {total} files)"));
        }

        Ok(Outcome::ok(output))
    }
}

// ── grep ────────────────────────────────────────────────────────────

/// Regex content search across a directory tree.
pub struct GrepTool {
    work_dir: PathBuf,
}

impl GrepTool {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

struct GrepMatch {
    file: String,
    line: usize,
    content: String,
    mtime: i128,
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents using regular expressions.\n\
         Use mode=files or mode=count for compact outputs.\n\
         Use include/exclude and limits to reduce context usage."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in (optional, defaults to working directory)"
                },
                "include": {
                    "type": "string",
                    "description": "File pattern to include (e.g., '*.rs', '*.{ts,tsx}')"
                },
                "exclude": {
                    "type": "array",
                    "description": "Exclude glob patterns matched against relative paths",
                    "items": { "type": "string" }
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum output rows (default: 500)"
                },
                "max_matches_per_file": {
                    "type": "integer",
                    "description": "Maximum matches to emit per file (default: unlimited)"
                },
                "mode": {
                    "type": "string",
                    "description": "Output mode: lines (default), files, count",
                    "enum": ["lines", "files", "count"]
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ToolError> {
        let pattern = match opt_str(&params, "pattern") {
            Some(p) if !p.is_empty() => p,
            _ => return Ok(Outcome::fail("pattern is required")),
        };
        let mode = opt_str(&params, "mode")
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "lines".to_string());
        if !matches!(mode.as_str(), "lines" | "files" | "count") {
            return Ok(Outcome::fail("mode must be one of: lines, files, count"));
        }

        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => return Ok(Outcome::fail(format!("invalid regex: {e}"))),
        };

        let base = resolve_base(&self.work_dir, opt_str(&params, "path"));
        let include_pattern = match opt_str(&params, "include") {
            Some(inc) if !inc.is_empty() => format!("**/{inc}"),
            _ => "**/*".to_string(),
        };
        let matcher = match compile_glob(&include_pattern) {
            Ok(m) => m,
            Err(e) => return Ok(Outcome::fail(format!("glob error: {e}"))),
        };
        let excludes = opt_str_list(&params, "exclude");

        let max_results = opt_i64(&params, "max_results")
            .filter(|m| *m > 0)
            .map(|m| (m as usize).min(MAX_GREP_RESULTS))
            .unwrap_or(MAX_GREP_RESULTS);
        let max_per_file = opt_i64(&params, "max_matches_per_file")
            .filter(|m| *m > 0)
            .map(|m| m as usize);

        let mut matches: Vec<GrepMatch> = Vec::new();
        let mut file_counts: Vec<(String, usize)> = Vec::new();
        let stop_at_first = mode == "files";

        for (rel, full) in walk_files(&base, cancel)? {
            if !matcher.is_match(&rel) || is_excluded(&rel, &excludes) {
                continue;
            }
            if is_binary_file(&full) {
                continue;
            }

            let content = match std::fs::read(&full) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(_) => continue,
            };
            let mtime = mtime_nanos(&full);

            let mut total_count = 0usize;
            let mut emitted = 0usize;
            for (idx, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    total_count += 1;
                    if max_per_file.map(|m| emitted < m).unwrap_or(true) {
                        matches.push(GrepMatch {
                            file: rel.clone(),
                            line: idx + 1,
                            content: line.trim().to_string(),
                            mtime,
                        });
                        emitted += 1;
                    }
                    if stop_at_first {
                        break;
                    }
                }
            }
            if total_count > 0 {
                file_counts.push((rel, total_count));
            }

            if matches.len() >= max_results {
                break;
            }
        }

        if matches.is_empty() && file_counts.is_empty() {
            return Ok(Outcome::ok("No matches found"));
        }

        matches.sort_by(|a, b| b.mtime.cmp(&a.mtime));
        matches.truncate(max_results);

        let lines: Vec<String> = match mode.as_str() {
            "files" => {
                let mut seen = std::collections::HashSet::new();
                matches
                    .iter()
                    .filter(|m| seen.insert(m.file.clone()))
                    .map(|m| m.file.clone())
                    .collect()
            }
            "count" => {
                file_counts.sort_by(|a, b| a.0.cmp(&b.0));
                file_counts
                    .iter()
                    .map(|(path, n)| format!("{path}: {n}"))
                    .collect()
            }
            _ => matches
                .iter()
                .map(|m| {
                    let content = if m.content.len() > MAX_GREP_LINE_LENGTH {
                        let cut = crate::tools::tool::floor_char_boundary(
                            &m.content,
                            MAX_GREP_LINE_LENGTH,
                        );
                        format!("{}...", &m.content[..cut])
                    } else {
                        m.content.clone()
                    };
                    format!("{}:{}: {}", m.file, m.line, content)
                })
                .collect(),
        };

        Ok(Outcome::ok(lines.join("\n")))
    }
}
