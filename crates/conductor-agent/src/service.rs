use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conductor_core::config::ReasoningConfig;
use conductor_core::protocol::{encode, Envelope};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::{AgentError, Result};

// ─── ReasoningService ─────────────────────────────────────────────────────

/// The external model: takes an envelope, returns raw text.
///
/// Transport-level retries belong to the implementation. The execution
/// loop only retries responses it cannot decode.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn complete(&self, envelope: &Envelope) -> Result<String>;
}

// ─── CommandService ───────────────────────────────────────────────────────

/// Runs a configured command once per request. The encoded envelope goes to
/// stdin; everything on stdout is the response. Stderr is captured and
/// surfaced when the process exits non-zero.
#[derive(Debug, Clone)]
pub struct CommandService {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandService {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(cfg: &ReasoningConfig) -> Self {
        Self::new(
            cfg.command.clone(),
            cfg.args.clone(),
            Duration::from_secs(cfg.timeout_secs),
        )
    }

    async fn exchange(&self, prompt: String) -> Result<String> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .env_remove("CLAUDECODE")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::Service(format!("failed to spawn '{}': {e}", self.command)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Service("stdout not captured".into()))?;

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

        // Written from its own task so a child that echoes while reading
        // cannot fill the stdout pipe and stall us. Dropping stdin closes it.
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                stdin.write_all(prompt.as_bytes()).await?;
                stdin.flush().await
            })
        });

        let mut out = String::new();
        stdout.read_to_string(&mut out).await?;
        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                // A child may exit without reading all of stdin.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(e) => return Err(AgentError::Service(format!("stdin writer failed: {e}"))),
            }
        }
        let status = child.wait().await?;

        if status.success() {
            return Ok(out);
        }

        let stderr = stderr_buf
            .lock()
            .ok()
            .map(|b| b.clone())
            .unwrap_or_default();
        let what = match status.code() {
            Some(code) => format!("'{}' exited with code {code}", self.command),
            None => format!("'{}' terminated by signal", self.command),
        };
        Err(AgentError::Service(if stderr.is_empty() {
            what
        } else {
            format!("{what}\nstderr: {stderr}")
        }))
    }
}

#[async_trait]
impl ReasoningService for CommandService {
    async fn complete(&self, envelope: &Envelope) -> Result<String> {
        let prompt = encode(envelope);
        debug!(command = %self.command, bytes = prompt.len(), "reasoning request");
        match tokio::time::timeout(self.timeout, self.exchange(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout(self.timeout.as_secs())),
        }
    }
}

// ─── ScriptedService ──────────────────────────────────────────────────────

/// Replays canned responses in order and records every envelope it was
/// sent. Running past the end of the script is a service error.
#[derive(Debug, Default)]
pub struct ScriptedService {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Envelope>>,
    calls: AtomicUsize,
}

impl ScriptedService {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, response: impl Into<String>) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(response.into());
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<Envelope> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ReasoningService for ScriptedService {
    async fn complete(&self, envelope: &Envelope) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut r) = self.requests.lock() {
            r.push(envelope.clone());
        }
        self.responses
            .lock()
            .map_err(|_| AgentError::Service("script lock poisoned".into()))?
            .pop_front()
            .ok_or_else(|| AgentError::Service("scripted responses exhausted".into()))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::protocol::ActionCatalog;

    fn envelope() -> Envelope {
        Envelope::new("be brief", &ActionCatalog::new())
    }

    #[tokio::test]
    async fn scripted_replays_in_order_and_counts() {
        let svc = ScriptedService::new(["one", "two"]);
        assert_eq!(svc.complete(&envelope()).await.unwrap(), "one");
        assert_eq!(svc.complete(&envelope()).await.unwrap(), "two");
        assert!(matches!(
            svc.complete(&envelope()).await,
            Err(AgentError::Service(_))
        ));
        assert_eq!(svc.calls(), 3);
        assert_eq!(svc.requests().len(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_service_echoes_stdin() {
        let svc = CommandService::new("cat", vec![], Duration::from_secs(10));
        let out = svc.complete(&envelope()).await.unwrap();
        assert!(out.starts_with("be brief"));
        assert!(out.contains("finish(output)"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_service_reports_exit_code_and_stderr() {
        let svc = CommandService::new(
            "sh",
            vec!["-c".into(), "echo boom >&2; exit 3".into()],
            Duration::from_secs(10),
        );
        match svc.complete(&envelope()).await {
            Err(AgentError::Service(msg)) => {
                assert!(msg.contains("code 3"), "{msg}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_service_times_out() {
        let svc = CommandService::new(
            "sh",
            vec!["-c".into(), "sleep 5".into()],
            Duration::from_millis(100),
        );
        assert!(matches!(
            svc.complete(&envelope()).await,
            Err(AgentError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn missing_command_is_a_service_error() {
        let svc = CommandService::new("conductor-no-such-binary", vec![], Duration::from_secs(1));
        assert!(matches!(
            svc.complete(&envelope()).await,
            Err(AgentError::Service(_))
        ));
    }
}
