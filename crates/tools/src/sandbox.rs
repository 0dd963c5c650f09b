//! Exec sandbox — run external binaries without a shell.
//!
//! The default sandbox spawns the binary directly (argv exec, never
//! `sh -c`), requires the binary to be on the configured allowlist, and
//! enforces both a hard timeout and a combined output cap. Hosts with
//! stronger isolation (containers, jails) implement [`ExecSandbox`]
//! themselves and hand it to the exec tool.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};

use perch_domain::config::{ExecSandboxConfig, ToolsConfig};
use perch_domain::tool::{DecisionReasonCode, RiskLevel, ToolDefinition};
use perch_domain::{Error, Result};

use crate::router::{ToolContext, ToolHandler};

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub timeout_ms: Option<u64>,
    pub max_buffer_bytes: Option<usize>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process died to a signal.
    pub code: Option<i32>,
}

#[async_trait::async_trait]
pub trait ExecSandbox: Send + Sync {
    async fn run(&self, command: &str, args: &[String], opts: &ExecOptions) -> Result<ExecOutcome>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Output buffer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Byte-capped text buffer. On overflow the oldest quarter is dropped at a
/// char boundary, so a chatty process degrades to "newest output wins"
/// instead of failing the call.
struct OutputBuffer {
    text: String,
    max_bytes: usize,
}

impl OutputBuffer {
    fn new(max_bytes: usize) -> Self {
        Self {
            text: String::new(),
            max_bytes: max_bytes.max(16),
        }
    }

    fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        if self.text.len() > self.max_bytes {
            let keep = self.max_bytes * 3 / 4;
            let mut boundary = self.text.len() - keep;
            while boundary < self.text.len() && !self.text.is_char_boundary(boundary) {
                boundary += 1;
            }
            self.text.drain(..boundary);
        }
    }

    fn into_string(self) -> String {
        self.text
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Direct child-process sandbox
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProcessSandbox {
    config: ExecSandboxConfig,
    allowed_bins: Vec<String>,
}

impl ProcessSandbox {
    pub fn new(config: ExecSandboxConfig, allowed_bins: Vec<String>) -> Self {
        Self {
            config,
            allowed_bins,
        }
    }

    fn check_allowed(&self, command: &str) -> Result<()> {
        // Match on the bare binary name so "/usr/bin/echo" and "echo"
        // resolve to the same allowlist entry.
        let bin = std::path::Path::new(command)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(command);
        if self.allowed_bins.iter().any(|b| b == bin) {
            return Ok(());
        }
        Err(Error::PolicyDenied {
            reason: DecisionReasonCode::ToolPolicyBlocked,
            detail: format!("binary \"{bin}\" is not in allowed_exec_bins"),
        })
    }
}

#[async_trait::async_trait]
impl ExecSandbox for ProcessSandbox {
    async fn run(&self, command: &str, args: &[String], opts: &ExecOptions) -> Result<ExecOutcome> {
        self.check_allowed(command)?;

        let timeout_ms = opts.timeout_ms.unwrap_or(self.config.timeout_ms);
        let max_bytes = opts.max_buffer_bytes.unwrap_or(self.config.max_buffer_bytes);

        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args);
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);
        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Transient(format!("failed to spawn \"{command}\": {e}")))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_buf = Arc::new(Mutex::new(OutputBuffer::new(max_bytes)));
        let err_buf = Arc::new(Mutex::new(OutputBuffer::new(max_bytes)));

        let out_task = spawn_reader(stdout, out_buf.clone());
        let err_task = spawn_reader(stderr, err_buf.clone());

        let timeout = std::time::Duration::from_millis(timeout_ms);
        let status = tokio::select! {
            result = child.wait() => result?,
            _ = tokio::time::sleep(timeout) => {
                let _ = child.kill().await;
                out_task.abort();
                err_task.abort();
                return Err(Error::Timeout(format!(
                    "\"{command}\" exceeded {timeout_ms}ms"
                )));
            }
        };

        let _ = out_task.await;
        let _ = err_task.await;

        let stdout = Arc::try_unwrap(out_buf)
            .map(|m| m.into_inner().into_string())
            .unwrap_or_default();
        let stderr = Arc::try_unwrap(err_buf)
            .map(|m| m.into_inner().into_string())
            .unwrap_or_default();

        Ok(ExecOutcome {
            stdout,
            stderr,
            code: status.code(),
        })
    }
}

fn spawn_reader<R>(
    source: Option<R>,
    buf: Arc<Mutex<OutputBuffer>>,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Some(source) = source {
            let mut reader = BufReader::new(source).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                let mut b = buf.lock();
                b.push(&line);
                b.push("\n");
            }
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The exec tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ExecArgs {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    cwd: Option<PathBuf>,
}

/// The built-in exec tool: high risk, always approval-gated, routed
/// through whatever [`ExecSandbox`] the host configured.
pub struct ExecTool {
    sandbox: Arc<dyn ExecSandbox>,
}

impl ExecTool {
    pub fn new(sandbox: Arc<dyn ExecSandbox>) -> Self {
        Self { sandbox }
    }

    /// Build the sandbox from config and wrap it.
    pub fn from_config(config: &ToolsConfig) -> Self {
        Self::new(Arc::new(ProcessSandbox::new(
            config.exec.clone(),
            config.allowed_exec_bins.clone(),
        )))
    }

    pub fn definition() -> ToolDefinition {
        ToolDefinition {
            name: "exec".into(),
            description: "Run an allowlisted binary with arguments. No shell is involved.".into(),
            schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Binary to run" },
                    "args": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Argument vector"
                    },
                    "cwd": { "type": "string", "description": "Working directory" }
                },
                "required": ["command"],
                "additionalProperties": false
            }),
            risk_level: RiskLevel::High,
            requires_approval: false,
        }
    }
}

#[async_trait::async_trait]
impl ToolHandler for ExecTool {
    async fn run(
        &self,
        arguments: &serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value> {
        let args: ExecArgs = serde_json::from_value(arguments.clone())?;
        let opts = ExecOptions {
            cwd: args.cwd,
            ..Default::default()
        };
        let outcome = self.sandbox.run(&args.command, &args.args, &opts).await?;
        Ok(serde_json::to_value(outcome)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox(bins: &[&str]) -> ProcessSandbox {
        ProcessSandbox::new(
            ExecSandboxConfig::default(),
            bins.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn runs_allowlisted_binary() {
        let sb = sandbox(&["echo"]);
        let outcome = sb
            .run("echo", &["hello".into(), "sandbox".into()], &ExecOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.code, Some(0));
        assert_eq!(outcome.stdout.trim(), "hello sandbox");
        assert!(outcome.stderr.is_empty());
    }

    #[tokio::test]
    async fn unlisted_binary_is_denied() {
        let sb = sandbox(&["echo"]);
        let err = sb
            .run("cat", &["/etc/hostname".into()], &ExecOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), DecisionReasonCode::ToolPolicyBlocked);
    }

    #[tokio::test]
    async fn path_prefix_does_not_bypass_allowlist() {
        let sb = sandbox(&["echo"]);
        // Same binary name through an absolute path is still allowed…
        assert!(sb
            .run("/bin/echo", &["ok".into()], &ExecOptions::default())
            .await
            .is_ok());
        // …but an unlisted one is not, path or no path.
        assert!(sb
            .run("/bin/sh", &["-c".into(), "true".into()], &ExecOptions::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let sb = sandbox(&["sleep"]);
        let opts = ExecOptions {
            timeout_ms: Some(50),
            ..Default::default()
        };
        let err = sb.run("sleep", &["30".into()], &opts).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn output_is_capped_keeping_the_tail() {
        let sb = sandbox(&["seq"]);
        let opts = ExecOptions {
            max_buffer_bytes: Some(256),
            ..Default::default()
        };
        let outcome = sb.run("seq", &["1".into(), "5000".into()], &opts).await.unwrap();
        assert!(outcome.stdout.len() <= 256 + 8);
        assert!(outcome.stdout.contains("5000"), "newest output must survive");
        assert!(!outcome.stdout.contains("\n1\n"), "oldest output is dropped");
    }

    #[test]
    fn output_buffer_respects_char_boundaries() {
        let mut buf = OutputBuffer::new(20);
        buf.push(&"é".repeat(40));
        let s = buf.into_string();
        assert!(s.len() <= 20);
        assert!(s.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn missing_binary_is_transient() {
        let sb = sandbox(&["definitely-not-installed"]);
        let err = sb
            .run("definitely-not-installed", &[], &ExecOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transient(_)));
    }
}
