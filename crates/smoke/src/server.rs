//! Server management - spawning the server and waiting for its readiness marker

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{SmokeError, SmokeResult};
use crate::process::{forward_output, kill_now, GroupKillGuard, OutputLines};

/// Starts and stops the server under test
#[async_trait]
pub trait ProcessSupervisor: Send {
    /// Resolves once the server has announced readiness and the settle delay has passed
    async fn start(&mut self) -> SmokeResult<()>;

    /// Sends a single termination signal and waits for the process to exit
    async fn stop(&mut self) -> SmokeResult<()>;
}

/// Configuration for spawning a server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Program to run
    pub program: String,

    /// Arguments passed to the program
    pub args: Vec<String>,

    /// Working directory (None = inherit)
    pub working_dir: Option<PathBuf>,

    /// Substring the server prints on stdout once it is listening
    pub ready_marker: String,

    /// Pause after the marker before the server is considered usable
    pub settle_delay: Duration,

    /// Upper bound on the readiness wait (None = wait until the process exits)
    pub startup_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            program: "npm".to_string(),
            args: vec!["start".to_string()],
            working_dir: None,
            ready_marker: "http://127.0.0.1:8080".to_string(),
            settle_delay: Duration::from_millis(1000),
            startup_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Handle to the server subprocess
pub struct ServerProcess {
    config: ServerConfig,
    child: Option<Child>,
    forwarders: Vec<JoinHandle<()>>,
}

impl ServerProcess {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            child: None,
            forwarders: Vec::new(),
        }
    }

    /// OS process id, if the server has been started
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Whether the child is still alive
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        // npm forks the real server; a dedicated group lets one signal reach both
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }

    fn describe(&self) -> String {
        if self.config.args.is_empty() {
            self.config.program.clone()
        } else {
            format!("{} {}", self.config.program, self.config.args.join(" "))
        }
    }

    fn abort_forwarders(&mut self) {
        for task in self.forwarders.drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl ProcessSupervisor for ServerProcess {
    async fn start(&mut self) -> SmokeResult<()> {
        if self.child.is_some() {
            return Ok(()); // Already running
        }

        info!("Starting server: {}", self.describe());

        let mut child = self.command().spawn().map_err(|e| {
            SmokeError::ServerStartup(format!("Failed to spawn {}: {}", self.describe(), e))
        })?;

        // Kills the group if this future is dropped before the child is handed over
        let mut guard = GroupKillGuard::new(&child);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SmokeError::ServerStartup("stdout was not captured".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            self.forwarders
                .push(forward_output(OutputLines::new(BufReader::new(stderr)), "stderr"));
        }
        let mut lines = OutputLines::new(BufReader::new(stdout));

        let watch = wait_for_marker(&mut lines, child.wait(), &self.config.ready_marker);
        let outcome = match self.config.startup_timeout {
            Some(limit) => tokio::time::timeout(limit, watch)
                .await
                .unwrap_or_else(|_| Err(SmokeError::ServerStartTimeout(limit))),
            None => watch.await,
        };

        if let Err(e) = outcome {
            warn!("Server start failed, reaping process: {}", e);
            kill_now(&mut child);
            guard.disarm();
            let _ = child.wait().await;
            self.abort_forwarders();
            return Err(e);
        }

        info!(
            "Server announced {}, settling for {:?}",
            self.config.ready_marker, self.config.settle_delay
        );
        self.forwarders.push(forward_output(lines, "stdout"));
        self.child = Some(child);
        guard.disarm();

        tokio::time::sleep(self.config.settle_delay).await;
        Ok(())
    }

    async fn stop(&mut self) -> SmokeResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Some(status) = child.try_wait()? {
            debug!("Server already exited ({})", status);
            self.abort_forwarders();
            return Ok(());
        }

        info!("Stopping server (pid: {:?})", child.id());
        terminate(&mut child)?;

        let status = child.wait().await?;
        info!("Server exited ({})", status);

        // Grandchildren can keep the pipes open after the leader is gone
        self.abort_forwarders();
        Ok(())
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            kill_now(child);
        }
        self.abort_forwarders();
    }
}

/// Reads `lines` until one contains `marker`, racing against `exited`.
///
/// Output that is already readable wins over the exit event, so a marker
/// written just before the process dies still counts. A closed stdout
/// is not a failure on its own: the wait continues until the process exits.
/// Lines that are not valid UTF-8 are matched after lossy decoding.
pub async fn wait_for_marker<R, F>(
    lines: &mut OutputLines<R>,
    exited: F,
    marker: &str,
) -> SmokeResult<()>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = io::Result<ExitStatus>>,
{
    tokio::pin!(exited);
    let mut stdout_open = true;

    loop {
        tokio::select! {
            biased;

            line = lines.next_line(), if stdout_open => match line? {
                Some(line) => {
                    debug!(stream = "stdout", "{}", line);
                    if line.contains(marker) {
                        return Ok(());
                    }
                }
                None => {
                    debug!("Server closed stdout before announcing readiness");
                    stdout_open = false;
                }
            },

            status = &mut exited => {
                let status = status?;
                return Err(SmokeError::ServerStartup(format!(
                    "Server did not start ({})",
                    status
                )));
            }
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> SmokeResult<()> {
    use nix::sys::signal::Signal;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    crate::process::signal_group(pid, Signal::SIGTERM)
        .map_err(|e| SmokeError::Teardown(format!("SIGTERM failed: {}", e)))
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> SmokeResult<()> {
    child.start_kill().map_err(SmokeError::from)
}
