//! ReplBackend - fragments fed to a long-lived interpreter over stdin
//!
//! Each fragment is wrapped in `ProcessConfig::fragment_template`, which
//! must print `<marker> <status>` when the fragment is done. Output is
//! read line by line until that marker shows up.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, instrument, warn};

use super::{DispatchOutcome, ProcessBackend, ProcessSession, SessionId};
use crate::config::ProcessConfig;
use crate::error::ScratchError;
use crate::fragment::Fragment;

/// Stderr lines kept for error reports
const STDERR_TAIL: usize = 20;
/// How long a closed-stdin interpreter gets to exit before it is killed
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Launches interpreter processes
#[derive(Debug, Clone)]
pub struct ReplBackend {
    config: ProcessConfig,
}

impl ReplBackend {
    pub fn new(config: ProcessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }
}

#[async_trait]
impl ProcessBackend for ReplBackend {
    fn name(&self) -> &str {
        &self.config.program
    }

    #[instrument(skip(self), fields(program = %self.config.program))]
    async fn launch(&self, id: SessionId) -> anyhow::Result<Box<dyn ProcessSession>> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScratchError::LaunchFailed {
                program: self.config.program.clone(),
                reason: e.to_string(),
            })?;

        let stdin = child.stdin.take().context("interpreter stdin not captured")?;
        let stdout = child.stdout.take().context("interpreter stdout not captured")?;
        let stderr = child.stderr.take().context("interpreter stderr not captured")?;

        // Stderr outside the fragment wrapper (startup noise, syntax errors)
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL)));
        let tail = Arc::clone(&stderr_tail);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(session = %id, stderr = %line);
                let mut tail = tail.lock();
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        });

        let marker = Regex::new(&format!(
            r"^(.*){}\s+(-?\d+)\s*$",
            regex::escape(&self.config.end_marker)
        ))?;

        debug!(session = %id, pid = ?child.id(), "interpreter launched");

        Ok(Box::new(ReplSession {
            id,
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            stderr_tail,
            marker,
            config: self.config.clone(),
            alive: true,
        }))
    }
}

/// One running interpreter
pub struct ReplSession {
    id: SessionId,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    marker: Regex,
    config: ProcessConfig,
    alive: bool,
}

impl ReplSession {
    fn closed(&self) -> ScratchError {
        ScratchError::SessionClosed {
            session: self.id.get(),
        }
    }

    fn exited(&mut self, partial: &[String]) -> ScratchError {
        self.alive = false;
        let mut reason = String::from("interpreter exited mid-fragment");
        if !partial.is_empty() {
            reason.push('\n');
            reason.push_str(&partial.join("\n"));
        }
        let tail = self.stderr_tail.lock();
        if !tail.is_empty() {
            reason.push_str("\nstderr:\n");
            reason.push_str(&tail.iter().cloned().collect::<Vec<_>>().join("\n"));
        }
        ScratchError::ProcessIo { reason }
    }

    async fn read_until_marker(&mut self) -> anyhow::Result<DispatchOutcome> {
        let mut output: Vec<String> = Vec::new();
        loop {
            match self.stdout.next_line().await {
                Ok(Some(line)) => {
                    if let Some(caps) = self.marker.captures(&line) {
                        let prefix = caps.get(1).map_or("", |m| m.as_str());
                        if !prefix.is_empty() {
                            output.push(prefix.to_string());
                        }
                        // Digits only, but may overflow i32
                        let status = caps[2].parse::<i32>().unwrap_or(-1);
                        return Ok(DispatchOutcome {
                            output: output.join("\n"),
                            status,
                        });
                    }
                    output.push(line);
                }
                Ok(None) => return Err(self.exited(&output).into()),
                Err(e) => {
                    self.alive = false;
                    bail!(ScratchError::ProcessIo {
                        reason: e.to_string()
                    });
                }
            }
        }
    }
}

#[async_trait]
impl ProcessSession for ReplSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn is_alive(&mut self) -> bool {
        self.alive && matches!(self.child.try_wait(), Ok(None))
    }

    #[instrument(skip(self, fragment), fields(session = %self.id, fragment = %fragment.id()))]
    async fn dispatch(&mut self, fragment: &Fragment) -> anyhow::Result<DispatchOutcome> {
        if !self.is_alive() {
            bail!(self.closed());
        }

        let payload = self.config.render(fragment.text());
        let Some(stdin) = self.stdin.as_mut() else {
            bail!(self.closed());
        };
        let written = async {
            stdin.write_all(payload.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            self.alive = false;
            bail!(ScratchError::ProcessIo {
                reason: format!("failed to write fragment: {}", e)
            });
        }

        let timeout = self.config.fragment_timeout();
        match tokio::time::timeout(timeout, self.read_until_marker()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "fragment timed out, killing interpreter");
                self.alive = false;
                let _ = self.child.start_kill();
                bail!("Fragment timed out after {}s", timeout.as_secs())
            }
        }
    }

    async fn await_exit(&mut self) -> anyhow::Result<Option<i32>> {
        let status = self.child.wait().await?;
        self.alive = false;
        Ok(status.code())
    }

    #[instrument(skip(self), fields(session = %self.id))]
    async fn terminate(&mut self) -> anyhow::Result<Option<i32>> {
        self.alive = false;
        // EOF on stdin ends a well-behaved REPL
        drop(self.stdin.take());

        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(status) => Ok(status?.code()),
            Err(_) => {
                debug!("interpreter ignored EOF, killing");
                self.child.kill().await?;
                Ok(self.child.wait().await?.code())
            }
        }
    }
}
