use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::types::{AgentOptions, Message};
use crate::{AgentError, Result};

// ─── AgentProcess ─────────────────────────────────────────────────────────

/// A running agent CLI subprocess in bidirectional stream-json mode.
///
/// The prompt is sent as a user message on stdin, after which stdin is
/// closed (single-turn operation). Responses are read as JSONL from
/// stdout; stderr is drained by a background task and surfaced when the
/// process exits without a result.
pub(crate) struct AgentProcess {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    stdin: Option<ChildStdin>,
    stderr_buf: Arc<Mutex<String>>,
}

impl AgentProcess {
    pub(crate) async fn spawn(prompt: &str, opts: &AgentOptions) -> Result<Self> {
        let mut process = Self::from_command(build_command(opts))?;

        let user_msg = serde_json::json!({
            "type": "user",
            "message": {
                "role": "user",
                "content": [{"type": "text", "text": prompt}]
            }
        });
        process.send_message(&user_msg).await?;
        process.close_stdin();
        Ok(process)
    }

    /// Spawn an arbitrary command as a mock agent process. Used in tests to
    /// replay fixed JSON lines without a real CLI.
    #[cfg(test)]
    pub(crate) fn spawn_command(cmd: Command) -> Result<Self> {
        Self::from_command(cmd)
    }

    fn from_command(mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(AgentError::Io)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Process("stdout not captured".into()))?;
        let stdin = child.stdin.take();

        // Drain stderr in the background so a chatty process can't block on
        // a full pipe; the buffer is surfaced on exit errors.
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if let Ok(mut b) = buf.lock() {
                        if !b.is_empty() {
                            b.push('\n');
                        }
                        b.push_str(&line);
                    }
                }
            });
        }

        let lines = BufReader::new(stdout).lines();
        Ok(Self {
            child,
            lines,
            stdin,
            stderr_buf,
        })
    }

    async fn send_message(&mut self, msg: &serde_json::Value) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AgentError::Process("stdin already closed".into()))?;
        let mut buf = serde_json::to_vec(msg)
            .map_err(|e| AgentError::Process(format!("failed to serialize stdin message: {e}")))?;
        buf.push(b'\n');
        stdin.write_all(&buf).await.map_err(AgentError::Io)?;
        stdin.flush().await.map_err(AgentError::Io)?;
        Ok(())
    }

    fn close_stdin(&mut self) {
        self.stdin.take();
    }

    /// Next known message from stdout. Blank lines and unknown message
    /// types are skipped; `Ok(None)` is EOF. A line that is not JSON at
    /// all is a parse error — the process is not speaking the protocol.
    pub(crate) async fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            let Some(line) = self.lines.next_line().await.map_err(AgentError::Io)? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            let value: serde_json::Value =
                serde_json::from_str(&line).map_err(|source| AgentError::Parse {
                    line: line.clone(),
                    source,
                })?;
            match serde_json::from_value::<Message>(value) {
                Ok(message) => return Ok(Some(message)),
                Err(_) => {
                    // Valid JSON, unknown or unneeded type — skip.
                    tracing::trace!(%line, "skipping unhandled stream message");
                    continue;
                }
            }
        }
    }

    /// After EOF without a result message: surface a non-zero exit status
    /// with collected stderr.
    pub(crate) async fn wait_exit_error(&mut self) -> Option<AgentError> {
        match self.child.wait().await {
            Ok(status) if status.success() => None,
            Ok(status) => {
                let stderr = self.stderr_buf.lock().map(|b| b.clone()).unwrap_or_default();
                Some(AgentError::Process(format!(
                    "agent exited with {status}: {stderr}"
                )))
            }
            Err(e) => Some(AgentError::Io(e)),
        }
    }

    pub(crate) async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

// ─── Command construction ─────────────────────────────────────────────────

fn build_command(opts: &AgentOptions) -> Command {
    let mut cmd = Command::new(&opts.binary);
    cmd.arg("--print")
        .args(["--output-format", "stream-json"])
        .args(["--input-format", "stream-json"])
        .arg("--model")
        .arg(&opts.model)
        .args(["--effort", opts.effort.as_str()])
        .args(["--permission-mode", opts.permission_mode()]);
    let allowed = opts.allowed_tools();
    if !allowed.is_empty() {
        cmd.arg("--allowed-tools").arg(allowed.join(","));
    }
    if let Some(system_prompt) = &opts.system_prompt {
        cmd.arg("--system-prompt").arg(system_prompt);
    }
    if let Some(cwd) = &opts.cwd {
        cmd.current_dir(cwd);
    }
    // Works both from a terminal and from inside a running agent session.
    cmd.env_remove("CLAUDECODE");
    cmd
}

// ─── Tests ────────────────────────────────────────────────────────────────
