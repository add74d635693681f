//! Line-precise edit tools: replace_lines and insert_lines.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::tools::tool::{opt_i64, opt_str, resolve_path, Outcome, Tool};

/// Split content into lines, reporting whether it ended with a newline.
fn split_lines(s: &str) -> (Vec<&str>, bool) {
    if s.is_empty() {
        return (Vec::new(), false);
    }
    let had_trailing_newline = s.ends_with('\n');
    let trimmed = s.strip_suffix('\n').unwrap_or(s);
    (trimmed.split('\n').collect(), had_trailing_newline)
}

fn should_keep_trailing_newline(
    original_trailing: bool,
    replacement_trailing: bool,
    line_count: usize,
) -> bool {
    if replacement_trailing {
        return true;
    }
    original_trailing && line_count > 0
}

// ── replace_lines ───────────────────────────────────────────────────

/// Replaces an exact 1-based inclusive line range in a file.
pub struct ReplaceLinesTool {
    work_dir: PathBuf,
}

impl ReplaceLinesTool {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[async_trait]
impl Tool for ReplaceLinesTool {
    fn name(&self) -> &str {
        "replace_lines"
    }

    fn description(&self) -> &str {
        "Replace a specific line range in a file.\n\
         Use this for precise edits when you know the line numbers.\n\
         This avoids sending large old_string payloads and reduces context usage."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to edit"
                },
                "start_line": {
                    "type": "integer",
                    "description": "1-based start line (inclusive)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "1-based end line (inclusive)"
                },
                "content": {
                    "type": "string",
                    "description": "Replacement text for the line range"
                }
            },
            "required": ["path", "start_line", "end_line", "content"]
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
        let start_line = opt_i64(&params, "start_line").unwrap_or(0);
        let end_line = opt_i64(&params, "end_line").unwrap_or(0);
        let content_param = opt_str(&params, "content").unwrap_or("");

        if start_line <= 0 || end_line <= 0 {
            return Ok(Outcome::fail("start_line and end_line must be >= 1"));
        }
        if start_line > end_line {
            return Ok(Outcome::fail("start_line must be <= end_line"));
        }
        let (start_line, end_line) = (start_line as usize, end_line as usize);

        let path = resolve_path(&self.work_dir, path_param);
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Outcome::fail(format!("file not found: {path_param}")));
            }
            Err(e) => return Err(e.into()),
        };

        let (lines, had_trailing_newline) = split_lines(&content);
        if end_line > lines.len() {
            return Ok(Outcome::fail(format!(
                "line range {start_line}-{end_line} exceeds file length ({} lines)",
                lines.len()
            )));
        }

        let (replacement, replacement_trailing) = split_lines(content_param);

        let mut new_lines =
            Vec::with_capacity(lines.len() - (end_line - start_line + 1) + replacement.len());
        new_lines.extend_from_slice(&lines[..start_line - 1]);
        new_lines.extend_from_slice(&replacement);
        new_lines.extend_from_slice(&lines[end_line..]);

        let mut new_content = new_lines.join("\n");
        if should_keep_trailing_newline(had_trailing_newline, replacement_trailing, new_lines.len())
        {
            new_content.push('\n');
        }
        fs::write(&path, new_content).await?;

        Ok(Outcome::ok(format!(
            "Replaced lines {start_line}-{end_line} in {path_param}"
        )))
    }
}

// ── insert_lines ────────────────────────────────────────────────────

/// Inserts lines at a position: 0 prepends, absent or -1 appends.
pub struct InsertLinesTool {
    work_dir: PathBuf,
}

impl InsertLinesTool {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[async_trait]
impl Tool for InsertLinesTool {
    fn name(&self) -> &str {
        "insert_lines"
    }

    fn description(&self) -> &str {
        "Insert lines at a specific position in a file.\n\
         Use this to add content without replacing existing lines.\n\
         Set after_line to 0 to insert at the beginning.\n\
         Omit after_line or set to -1 to append at the end."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to edit"
                },
                "after_line": {
                    "type": "integer",
                    "description": "Line number after which to insert (0 = beginning, omit/-1 = append)"
                },
                "content": {
                    "type": "string",
                    "description": "Lines to insert (will be added after after_line)"
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
        let after_line = opt_i64(&params, "after_line").unwrap_or(-1);
        let content_param = opt_str(&params, "content").unwrap_or("");

        let path = resolve_path(&self.work_dir, path_param);
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Outcome::fail(format!("file not found: {path_param}")));
            }
            Err(e) => return Err(e.into()),
        };

        let (lines, had_trailing_newline) = split_lines(&content);
        let (insert_lines, _) = split_lines(content_param);

        let insert_after = if after_line < 0 {
            lines.len()
        } else {
            after_line as usize
        };
        if insert_after > lines.len() {
            return Ok(Outcome::fail(format!(
                "after_line {insert_after} exceeds file length ({} lines)",
                lines.len()
            )));
        }

        let mut new_lines = Vec::with_capacity(lines.len() + insert_lines.len());
        new_lines.extend_from_slice(&lines[..insert_after]);
        new_lines.extend_from_slice(&insert_lines);
        new_lines.extend_from_slice(&lines[insert_after..]);

        let mut new_content = new_lines.join("\n");
        if had_trailing_newline || !new_lines.is_empty() {
            new_content.push('\n');
        }
        fs::write(&path, new_content).await?;

        let msg = if insert_after == 0 {
            format!(
                "Inserted {} line(s) at beginning of {path_param}",
                insert_lines.len()
            )
        } else if insert_after == lines.len() {
            format!(
                "Appended {} line(s) to end of {path_param}",
                insert_lines.len()
            )
        } else {
            format!(
                "Inserted {} line(s) after line {insert_after} in {path_param}",
                insert_lines.len()
            )
        };
        Ok(Outcome::ok(msg))
    }
}
