//! Process supervisor: owns the language server child process.
//!
//! Wires the child's stdout/stdin into a [`Connection`], forwards stderr to
//! `tracing` while keeping the last lines for error reports, and watches for
//! exit. Whatever the exit status, every pending request is failed when the
//! process goes away.

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{Mutex, oneshot, watch};

use crate::connection::Connection;
use crate::types::{ServerConfig, ServerExit};

/// Number of stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Upper bound on waiting for stderr to drain after the process exits.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a closed stdout may precede the process exit before pending
/// requests are failed without an exit report.
const EXIT_AFTER_EOF_TIMEOUT: Duration = Duration::from_secs(2);

type StderrTail = Arc<Mutex<VecDeque<String>>>;

pub struct ServerProcess {
    name: String,
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<Option<ServerExit>>,
}

impl ServerProcess {
    /// Launch `clangd` for a workspace.
    pub fn launch(config: &ServerConfig, workspace_root: &Path) -> Result<(Self, Connection)> {
        let name = config
            .command()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "language server".to_string());
        Self::spawn_command(config.command(), &config.args(), workspace_root, &name)
    }

    /// Spawn an arbitrary stdio server.
    pub fn spawn_command(
        program: &Path,
        args: &[String],
        cwd: &Path,
        name: &str,
    ) -> Result<(Self, Connection)> {
        tracing::info!(
            program = %program.display(),
            ?args,
            "Starting language server '{name}'"
        );

        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", program.display()))?;

        let stdout = child.stdout.take().context("no stdout from child")?;
        let stdin = child.stdin.take().context("no stdin from child")?;
        let stderr = child.stderr.take().context("no stderr from child")?;
        let pid = child.id();

        let (connection, mut stream_ended) = Connection::spawn_supervised(stdout, stdin, name);

        let tail: StderrTail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_handle = tokio::spawn(forward_stderr(stderr, tail.clone(), name.to_string()));

        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(None);
        let registry = connection.registry().clone();
        let exit_name = name.to_string();

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                // Fires on explicit kill and when the supervisor is dropped.
                _ = &mut kill_rx => kill_and_wait(&mut child, &exit_name).await,
                Some(reason) = stream_ended.recv() => {
                    // A crashing server closes stdout just before it exits.
                    match tokio::time::timeout(EXIT_AFTER_EOF_TIMEOUT, child.wait()).await {
                        Ok(status) => status,
                        Err(_) => {
                            registry.fail_all(&reason).await;
                            tokio::select! {
                                status = child.wait() => status,
                                _ = &mut kill_rx => kill_and_wait(&mut child, &exit_name).await,
                            }
                        }
                    }
                }
            };

            let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, stderr_handle).await;
            let stderr_tail: Vec<String> = tail.lock().await.iter().cloned().collect();

            let exit = ServerExit {
                code: status.ok().and_then(|s| s.code()),
                stderr_tail,
            };
            if exit.is_clean() {
                tracing::info!("Language server '{exit_name}' exited cleanly");
            } else {
                tracing::warn!("Language server '{exit_name}': {}", exit.describe());
            }

            // Publish the report before failing requests, so callers that
            // see the failure can already read it.
            let reason = exit.describe();
            let _ = exit_tx.send(Some(exit));
            registry.fail_all(&reason).await;
        });

        let process = Self {
            name: name.to_string(),
            pid,
            kill_tx: Some(kill_tx),
            exit_rx,
        };
        Ok((process, connection))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit report, once the process has gone.
    #[must_use]
    pub fn exit_status(&self) -> Option<ServerExit> {
        self.exit_rx.borrow().clone()
    }

    /// Wait for the process to exit on its own.
    pub async fn wait(&mut self) -> Option<ServerExit> {
        match self.exit_rx.wait_for(Option::is_some).await {
            Ok(exit) => exit.clone(),
            Err(_) => None,
        }
    }

    /// Kill the process and wait for the exit report.
    pub async fn kill(&mut self) -> Option<ServerExit> {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        self.wait().await
    }
}

async fn kill_and_wait(child: &mut Child, name: &str) -> std::io::Result<ExitStatus> {
    tracing::debug!("Killing language server '{name}'");
    let _ = child.start_kill();
    child.wait().await
}

async fn forward_stderr(stderr: ChildStderr, tail: StderrTail, name: String) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!(server = %name, "{line}");
                let mut tail = tail.lock().await;
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(server = %name, "stderr read error: {e}");
                break;
            }
        }
    }
}
