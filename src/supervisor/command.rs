//! Managed OS commands

use std::path::PathBuf;
use std::process::Stdio;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};

/// Description of an external command owned by the supervisor
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub id: String,
    pub program: String,
    pub args: Vec<String>,
    /// Added on top of the inherited environment
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
    /// Registered stopped when false
    pub auto_start: bool,
}

impl CommandSpec {
    pub fn new(id: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            auto_start: true,
        }
    }

    /// `sh -c <script>`
    pub fn shell(id: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(id, "sh").args(["-c".to_string(), script.into()])
    }

    /// `su <user> -c <script>`
    pub fn as_user(id: impl Into<String>, user: &str, script: impl Into<String>) -> Self {
        Self::new(id, "su").args([user.to_string(), "-c".to_string(), script.into()])
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Command line as it would be typed in a shell, for logging
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Kills the whole process group of a spawned command when dropped.
///
/// Wrappers like `su` and `sh -c` fork the real worker instead of exec'ing
/// it, so signalling only the direct child would leave the worker running.
struct ProcessGroup {
    id: String,
    pgid: Option<Pid>,
}

impl ProcessGroup {
    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(process = %self.id, "Failed to kill process group {}: {}", pgid, e),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Run `spec` until it exits or `token` is cancelled.
///
/// The command runs in its own process group. Cancellation kills the group
/// and returns `Ok(())`; anything left in the group after a normal exit is
/// killed too. A non-zero exit is a [`AppError::Process`].
pub(crate) async fn run_command(
    spec: &CommandSpec,
    token: CancellationToken,
    log_output: bool,
) -> Result<()> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .process_group(0)
        .kill_on_drop(true);

    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }

    if log_output {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        command.stdout(Stdio::null()).stderr(Stdio::null());
    }

    let mut child = command.spawn().map_err(|e| AppError::Process {
        id: spec.id.clone(),
        reason: format!("failed to spawn {}: {}", spec.program, e),
    })?;

    tracing::debug!(process = %spec.id, pid = ?child.id(), "Spawned: {}", spec.display());
    let mut group = ProcessGroup {
        id: spec.id.clone(),
        pgid: child.id().map(|pid| Pid::from_raw(pid as i32)),
    };

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(spec.id.clone(), stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(spec.id.clone(), stderr));
    }

    let outcome = tokio::select! {
        status = child.wait() => Some(status),
        _ = token.cancelled() => None,
    };

    group.kill();

    match outcome {
        None => {
            if let Err(e) = child.wait().await {
                tracing::warn!(process = %spec.id, "Failed to reap child: {}", e);
            }
            Ok(())
        }
        Some(Ok(status)) if status.success() => Ok(()),
        Some(Ok(status)) => Err(AppError::Process {
            id: spec.id.clone(),
            reason: format!("exited with {}", status),
        }),
        Some(Err(e)) => Err(AppError::Process {
            id: spec.id.clone(),
            reason: format!("wait failed: {}", e),
        }),
    }
}

/// Re-emit each line of child output as a tracing event
async fn forward_output<R: AsyncRead + Unpin>(id: String, reader: R) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(target: "deskcast::child", process = %id, "{}", line),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(process = %id, "Error reading output: {}", e);
                break;
            }
        }
    }
}
