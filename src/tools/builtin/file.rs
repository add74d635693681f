//! File tools: read, write, and exact-string edit.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::tools::tool::{
    floor_char_boundary, opt_bool, opt_i64, opt_str, resolve_path, Outcome, Tool,
};

const DEFAULT_READ_LIMIT: usize = 2000;
const MAX_LINE_LENGTH: usize = 2000;

// ── read ────────────────────────────────────────────────────────────

/// Reads file contents with 1-based line numbering.
pub struct ReadTool {
    work_dir: PathBuf,
}

impl ReadTool {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read file contents from the filesystem.\n\
         By default reads up to 2000 lines from the beginning.\n\
         Use offset and limit for reading specific sections of large files.\n\
         Use start_line and end_line for exact 1-based range reads.\n\
         Line numbers in output start at 1."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (0-based, optional)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to read (default: 2000)"
                },
                "start_line": {
                    "type": "integer",
                    "description": "1-based start line for exact range read (inclusive, optional)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "1-based end line for exact range read (inclusive, optional)"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ToolError> {
        let path_param = match opt_str(&params, "path") {
            Some(p) if !p.is_empty() => p,
            _ => return Ok(Outcome::fail("path is required")),
        };
        let offset = opt_i64(&params, "offset").unwrap_or(0).max(0) as usize;
        let limit = match opt_i64(&params, "limit") {
            Some(l) if l > 0 => l as usize,
            _ => DEFAULT_READ_LIMIT,
        };
        let start_line = opt_i64(&params, "start_line").unwrap_or(0);
        let end_line = opt_i64(&params, "end_line").unwrap_or(0);

        if start_line < 0 || end_line < 0 {
            return Ok(Outcome::fail(
                "start_line and end_line must be >= 1 when provided",
            ));
        }
        if start_line > 0 && end_line > 0 && start_line > end_line {
            return Ok(Outcome::fail("start_line must be <= end_line"));
        }

        let path = resolve_path(&self.work_dir, path_param);
        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Outcome::fail(format!("file not found: {path_param}")));
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            return Ok(Outcome::fail(format!("{path_param} is a directory")));
        }

        let content = fs::read(&path).await?;
        let content = String::from_utf8_lossy(&content);

        let range_mode = start_line > 0 || end_line > 0;
        let range_start = if start_line > 0 { start_line as usize } else { 1 };
        let range_end = if end_line > 0 {
            end_line as usize
        } else {
            range_start + DEFAULT_READ_LIMIT - 1
        };

        let mut lines = Vec::new();
        let mut line_num = 0usize;
        let mut lines_read = 0usize;

        for line in content.lines() {
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled);
            }
            line_num += 1;

            if range_mode {
                if line_num < range_start {
                    continue;
                }
                if line_num > range_end {
                    break;
                }
            } else {
                if line_num <= offset {
                    continue;
                }
                if lines_read >= limit {
                    break;
                }
            }

            let line = if line.len() > MAX_LINE_LENGTH {
                let cut = floor_char_boundary(line, MAX_LINE_LENGTH);
                format!("{}...", &line[..cut])
            } else {
                line.to_string()
            };

            lines.push(format!("{line_num:>6}\t{line}"));
            lines_read += 1;
        }

        if lines.is_empty() {
            return Ok(Outcome::ok("(empty file or no lines in range)"));
        }

        let mut output = lines.join("\n");
        if !range_mode && lines_read == limit {
            output.push_str(&format!(
                "\n\n(showing lines {}-{}, file may have more content)",
                offset + 1,
                line_num
            ));
        }
        if range_mode && start_line > 0 {
            let shown_end = if end_line > 0 {
                end_line as usize
            } else {
                start_line as usize + lines_read - 1
            };
            output.push_str(&format!(
                "\n\n(showing requested range starting at line {start_line} through {shown_end})"
            ));
        }

        Ok(Outcome::ok(output))
    }
}

// ── write ───────────────────────────────────────────────────────────

/// Creates or overwrites files, creating parent directories as needed.
pub struct WriteTool {
    work_dir: PathBuf,
}

impl WriteTool {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Create a new file or completely overwrite an existing file.\n\
         Use this when you need to create a new file or replace all contents.\n\
         For partial modifications, use the edit tool instead."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _cancel: &CancellationToken,
    ) -> Result<Outcome, ToolError> {
        let path_param = match opt_str(&params, "path") {
            Some(p) if !p.is_empty() => p,
            _ => return Ok(Outcome::fail("path is required")),
        };
        let content = opt_str(&params, "content").unwrap_or("");

        let path = resolve_path(&self.work_dir, path_param);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let existed = fs::metadata(&path).await.is_ok();
        fs::write(&path, content).await?;

        let action = if existed { "Overwrote" } else { "Created" };
        Ok(Outcome::ok(format!(
            "{action} {path_param} ({} bytes)",
            content.len()
        )))
    }
}

// ── edit ────────────────────────────────────────────────────────────

/// Performs exact string replacements in files.
pub struct EditTool {
    work_dir: PathBuf,
}

impl EditTool {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Perform exact string replacements in files.\n\
         The old_string must match exactly (including whitespace and indentation).\n\
         By default, replaces only the first occurrence.\n\
         Set replace_all to true to replace all occurrences.\n\
         The edit will fail if old_string is not found or if it matches multiple times (without replace_all)."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to edit"
                },
                "old_string": {
                    "type": "string",
                    "description": "The exact string to find and replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "The string to replace it with"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace all occurrences (default: false)"
                }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _cancel: &CancellationToken,
    ) -> Result<Outcome, ToolError> {
        let path_param = match opt_str(&params, "path") {
            Some(p) if !p.is_empty() => p,
            _ => return Ok(Outcome::fail("path is required")),
        };
        let old_string = match opt_str(&params, "old_string") {
            Some(s) if !s.is_empty() => s,
            _ => return Ok(Outcome::fail("old_string is required")),
        };
        let new_string = opt_str(&params, "new_string").unwrap_or("");
        let replace_all = opt_bool(&params, "replace_all").unwrap_or(false);

        if old_string == new_string {
            return Ok(Outcome::fail("old_string and new_string must be different"));
        }

        let path = resolve_path(&self.work_dir, path_param);
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Outcome::fail(format!("file not found: {path_param}")));
            }
            Err(e) => return Err(e.into()),
        };

        let count = content.matches(old_string).count();
        if count == 0 {
            return Ok(Outcome::fail("old_string not found in file"));
        }
        if count > 1 && !replace_all {
            return Ok(Outcome::fail(format!(
                "old_string found {count} times - provide more context to match uniquely, or set replace_all to true"
            )));
        }

        let new_content = if replace_all {
            content.replace(old_string, new_string)
        } else {
            content.replacen(old_string, new_string, 1)
        };
        fs::write(&path, new_content).await?;

        if replace_all && count > 1 {
            Ok(Outcome::ok(format!(
                "Replaced {count} occurrences in {path_param}"
            )))
        } else {
            Ok(Outcome::ok(format!("Edited {path_param}")))
        }
    }
}
