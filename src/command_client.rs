//! A [`CompletionClient`] backed by an external command.
//!
//! The command runs under `sh -c` once per completion. It receives the
//! request as JSON on stdin (`messages`, `model`, `tags`, `project`) and the
//! model name in `THUMB_MODEL`. Its stdout is the completion: either a JSON
//! object shaped like [`Completion`] or plain text used as the content.
//! A non-zero exit status is a provider error carrying stderr.

use crate::error::{Error, Result};
use crate::generate::CompletionClient;
use crate::model::{Completion, CompletionRequest};
use asupersync::time::{sleep, wall_now};
use async_trait::async_trait;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const PROVIDER: &str = "command";
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Grace period for stdout/stderr readers after the process exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct CommandClient {
    command: String,
    shell: String,
    timeout: Option<Duration>,
}

impl CommandClient {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            shell: "sh".to_string(),
            timeout: None,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl CompletionClient for CommandClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let payload = serde_json::to_vec(request)?;

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&self.command)
            .env("THUMB_MODEL", request.model.name())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::provider(PROVIDER, format!("Failed to spawn command: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::provider(PROVIDER, "Missing stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::provider(PROVIDER, "Missing stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::provider(PROVIDER, "Missing stderr"))?;

        // Commands that never read stdin must not block the write.
        thread::spawn(move || {
            let _ = stdin.write_all(&payload);
        });
        let stdout_rx = read_to_end_in_background(stdout);
        let stderr_rx = read_to_end_in_background(stderr);

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(err) => return Err(Error::provider(PROVIDER, err.to_string())),
            }
            if let Some(timeout) = self.timeout {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::provider(
                        PROVIDER,
                        format!("Command timed out after {}s", timeout.as_secs_f64()),
                    ));
                }
            }
            sleep(wall_now(), POLL_INTERVAL).await;
        };

        let stdout = stdout_rx.recv_timeout(DRAIN_TIMEOUT).unwrap_or_default();
        let stderr = stderr_rx.recv_timeout(DRAIN_TIMEOUT).unwrap_or_default();

        if !status.success() {
            let code = status
                .code()
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(Error::provider(
                PROVIDER,
                format!("Command exited with {code}: {}", stderr.trim()),
            ));
        }

        Ok(parse_output(&String::from_utf8_lossy(&stdout)))
    }
}

fn read_to_end_in_background<R: Read + Send + 'static>(mut reader: R) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}

/// JSON objects with a `content` field are read as a [`Completion`];
/// anything else is plain content.
pub fn parse_output(stdout: &str) -> Completion {
    let trimmed = stdout.trim();
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if value.get("content").is_some_and(serde_json::Value::is_string) {
                if let Ok(completion) = serde_json::from_value::<Completion>(value) {
                    return completion;
                }
            }
        }
    }
    Completion::text(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_output_is_content() {
        let completion = parse_output("  Why did the chicken cross the road?\n");
        assert_eq!(completion.content, "Why did the chicken cross the road?");
        assert_eq!(completion.prompt_tokens, 0);
        assert!(completion.cost.is_none());
    }

    #[test]
    fn json_output_carries_usage() {
        let completion = parse_output(
            r#"{"content": "hi", "prompt_tokens": 3, "completion_tokens": 1, "cost": 0.01}"#,
        );
        assert_eq!(completion.content, "hi");
        assert_eq!(completion.total_tokens(), 4);
        assert_eq!(completion.cost, Some(0.01));
    }

    #[test]
    fn malformed_json_falls_back_to_text() {
        let completion = parse_output("{not json");
        assert_eq!(completion.content, "{not json");
    }

    #[test]
    fn json_without_content_is_text() {
        let completion = parse_output(r#"{"answer": 42}"#);
        assert_eq!(completion.content, r#"{"answer": 42}"#);
    }

    #[test]
    fn timeout_is_configurable() {
        let client = CommandClient::new("cat").with_timeout(Some(Duration::from_secs(5)));
        assert_eq!(client.command(), "cat");
        assert_eq!(client.timeout, Some(Duration::from_secs(5)));
    }
}
