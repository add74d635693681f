//! Shell execution tool.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::tools::tool::{floor_char_boundary, opt_str, opt_u64, Outcome, Tool};

/// Default command timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum combined output size before truncation (50 KiB).
const MAX_OUTPUT_SIZE: usize = 50 * 1024;

/// How long to wait for output pipes to close after a kill.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Executes shell commands in the project environment.
pub struct BashTool {
    work_dir: PathBuf,
}

impl BashTool {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute shell commands in the project environment.\n\
         Use this for running terminal commands like git, npm, make, etc.\n\
         Commands run in the project's working directory by default."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory for the command (optional)"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in milliseconds (default: 30000)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ToolError> {
        let command = match opt_str(&params, "command") {
            Some(c) if !c.is_empty() => c,
            _ => return Ok(Outcome::fail("command is required")),
        };
        let work_dir = opt_str(&params, "workdir")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.work_dir.clone());
        let timeout = opt_u64(&params, "timeout")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);

        let mut child = match Command::new("bash")
            .args(["-c", command])
            .current_dir(&work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return Ok(Outcome::fail(format!("failed to spawn command: {e}"))),
        };

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let stdout_task = tokio::spawn(read_pipe(child.stdout.take(), stdout_buf.clone()));
        let stderr_task = tokio::spawn(read_pipe(child.stderr.take(), stderr_buf.clone()));

        enum Waited {
            Done(Option<i32>),
            TimedOut,
            Cancelled,
        }

        let waited = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Waited::Done(status.code()),
                Err(e) => return Ok(Outcome::fail(format!("command failed: {e}"))),
            },
            _ = tokio::time::sleep(timeout) => Waited::TimedOut,
            _ = cancel.cancelled() => Waited::Cancelled,
        };

        if matches!(waited, Waited::Done(_)) {
            let _ = stdout_task.await;
            let _ = stderr_task.await;
        } else {
            let _ = child.start_kill();
            let _ = child.wait().await;
            // Orphaned grandchildren can keep the pipes open; bound the drain.
            let _ = tokio::time::timeout(PIPE_DRAIN_TIMEOUT, async {
                let _ = stdout_task.await;
                let _ = stderr_task.await;
            })
            .await;
        }

        let stdout = take_buffer(&stdout_buf);
        let stderr = take_buffer(&stderr_buf);
        let output = truncate_output(combine_output(stdout, stderr));

        match waited {
            Waited::Cancelled => Err(ToolError::Cancelled),
            Waited::TimedOut => Ok(Outcome::fail_with_output(
                format!("command timed out after {}ms", timeout.as_millis()),
                output,
            )),
            Waited::Done(code) => {
                let code = code.unwrap_or(-1);
                if code != 0 {
                    Ok(Outcome::fail_with_output(
                        format!("command failed: exit status {code}"),
                        output,
                    ))
                } else {
                    Ok(Outcome::ok(output.trim()))
                }
            }
        }
    }
}

async fn read_pipe<R>(pipe: Option<R>, buf: Arc<Mutex<Vec<u8>>>)
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    let Some(mut pipe) = pipe else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut buf = buf.lock().unwrap_or_else(|e| e.into_inner());
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

fn take_buffer(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    let buf = buf.lock().unwrap_or_else(|e| e.into_inner());
    String::from_utf8_lossy(&buf).into_owned()
}

/// Concatenate stdout and stderr, separated by a newline when both present.
fn combine_output(stdout: String, stderr: String) -> String {
    let mut output = stdout;
    if !stderr.is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(&stderr);
    }
    output
}

fn truncate_output(output: String) -> String {
    if output.len() <= MAX_OUTPUT_SIZE {
        return output;
    }
    let cut = floor_char_boundary(&output, MAX_OUTPUT_SIZE);
    format!("{}\n... (output truncated)", &output[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> BashTool {
        BashTool::new(std::env::temp_dir())
    }

    #[tokio::test]
    async fn echo_succeeds() {
        let result = tool()
            .execute(
                serde_json::json!({"command": "echo hello"}),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "hello");
    }

    #[tokio::test]
    async fn missing_command_fails() {
        let result = tool()
            .execute(serde_json::json!({}), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error, "command is required");
    }

    #[tokio::test]
    async fn nonzero_exit_fails_with_output() {
        let result = tool()
            .execute(
                serde_json::json!({"command": "echo partial && exit 3"}),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.contains("exit status 3"));
        assert!(result.output.contains("partial"));
    }

    #[tokio::test]
    async fn stderr_is_appended() {
        let result = tool()
            .execute(
                serde_json::json!({"command": "echo out; echo err >&2"}),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "out\nerr");
    }

    #[tokio::test]
    async fn timeout_preserves_partial_output() {
        let result = tool()
            .execute(
                serde_json::json!({"command": "echo early; sleep 10", "timeout": 200}),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.contains("timed out"));
        assert!(result.output.contains("early"));
    }

    #[tokio::test]
    async fn cancellation_kills_command() {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        let result = tool()
            .execute(serde_json::json!({"command": "sleep 30"}), &cancel)
            .await;
        assert!(matches!(result, Err(ToolError::Cancelled)));
    }

    #[tokio::test]
    async fn workdir_param_is_respected() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = tool()
            .execute(
                serde_json::json!({"command": "pwd", "workdir": dir.path().to_str().unwrap()}),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains(dir.path().file_name().unwrap().to_str().unwrap()));
    }

    #[test]
    fn truncation_marks_long_output() {
        let long = "x".repeat(MAX_OUTPUT_SIZE + 100);
        let truncated = truncate_output(long);
        assert!(truncated.ends_with("... (output truncated)"));
        assert!(truncated.len() <= MAX_OUTPUT_SIZE + 30);
    }
}
