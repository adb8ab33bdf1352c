//! Structuring command adapter.
//!
//! Runs an external model CLI as a subprocess: segment text goes to stdin,
//! the structured answer comes back on stdout. The argument template may
//! contain `{action}`, replaced by the per-tag action name.

use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::{Adapter, AdapterOutput};

const ACTION_PLACEHOLDER: &str = "{action}";

/// Subprocess adapter for a structuring model
#[derive(Debug, Clone)]
pub struct CommandAdapter {
    program: String,
    args: Vec<String>,
}

impl CommandAdapter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Argument list with `{action}` substituted
    pub fn args_for(&self, action: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(ACTION_PLACEHOLDER, action))
            .collect()
    }

    async fn run(&self, action: &str, input: &str, limit: Duration) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(self.args_for(action))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}' for action '{}'", self.program, action))?;

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(input.as_bytes()).await?;
                // stdin dropped here: EOF
            }
            Ok::<_, io::Error>(())
        };

        // Feeding and waiting share one deadline; on expiry the child is
        // dropped and killed
        let (fed, output) = timeout(limit, async { tokio::join!(feed, child.wait_with_output()) })
            .await
            .with_context(|| format!("Action '{}' timed out after {:?}", action, limit))?;
        let output = output.with_context(|| format!("Failed to wait for '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Action '{}' failed with exit code {}: {}",
                action,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        // A child may exit successfully without reading all of its input
        match fed {
            Err(err) if err.kind() != io::ErrorKind::BrokenPipe => {
                return Err(err).with_context(|| format!("Failed to write to '{}' stdin", self.program));
            }
            _ => {}
        }

        String::from_utf8(output.stdout)
            .with_context(|| format!("Output of '{}' is not valid UTF-8", self.program))
    }
}

#[async_trait]
impl Adapter for CommandAdapter {
    fn name(&self) -> &str {
        &self.program
    }

    async fn execute(&self, action: &str, input: &str, limit: Duration) -> Result<AdapterOutput> {
        let started = Instant::now();
        let content = self.run(action, input, limit).await?;
        Ok(AdapterOutput {
            content,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> CommandAdapter {
        CommandAdapter::new("sh", vec!["-c".into(), script.into()])
    }

    #[test]
    fn test_action_placeholder() {
        let adapter = CommandAdapter::new(
            "llm",
            vec!["-t".into(), "{action}".into(), "--model=gpt".into()],
        );
        assert_eq!(adapter.args_for("calendar_event"), ["-t", "calendar_event", "--model=gpt"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdin_round_trip() {
        let output = shell("cat")
            .execute("any", r#"{"summary": "x"}"#, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.content, r#"{"summary": "x"}"#);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let err = shell("echo nope >&2; exit 3")
            .execute("calendar", "", Duration::from_secs(5))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("exit code 3"), "{message}");
        assert!(message.contains("nope"), "{message}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let err = shell("sleep 5")
            .execute("calendar", "", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_covers_unread_stdin() {
        let input = "x".repeat(4 * 1024 * 1024);
        let started = Instant::now();
        let err = shell("sleep 5")
            .execute("calendar", &input, Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("timed out"), "{err:#}");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_ignoring_stdin_still_succeeds() {
        let input = "x".repeat(1024 * 1024);
        let output = shell("echo done")
            .execute("any", &input, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.content.trim(), "done");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let adapter = CommandAdapter::new("voxroute-no-such-binary", Vec::new());
        assert!(adapter.execute("x", "", Duration::from_secs(1)).await.is_err());
    }
}
