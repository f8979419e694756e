//! Supervisor registry and per-process run loops

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::command::{run_command, CommandSpec};
use super::ProcessControl;
use crate::error::{AppError, Result};

/// Delay between a failed execution and the next attempt
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);

type SimpleFn = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;

enum ProcessBody {
    Command(CommandSpec),
    Simple(SimpleFn),
}

impl ProcessBody {
    async fn execute(&self, token: CancellationToken, log_output: bool) -> Result<()> {
        match self {
            ProcessBody::Command(spec) => run_command(spec, token, log_output).await,
            ProcessBody::Simple(start) => start(token).await,
        }
    }
}

struct ProcessState {
    /// Desired state, not the state of the OS process
    running: bool,
    /// Token of the in-flight execution
    current: Option<CancellationToken>,
}

struct Process {
    id: String,
    body: ProcessBody,
    state: Mutex<ProcessState>,
    wake: Notify,
}

/// Snapshot of one registered process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessStatus {
    pub id: String,
    pub running: bool,
}

/// Keeps a fixed set of named processes alive
pub struct Supervisor {
    processes: RwLock<Vec<Arc<Process>>>,
    restart_delay: Duration,
    log_output: bool,
    launched: AtomicBool,
}

impl Supervisor {
    pub fn new(log_output: bool) -> Self {
        Self {
            processes: RwLock::new(Vec::new()),
            restart_delay: DEFAULT_RESTART_DELAY,
            log_output,
            launched: AtomicBool::new(false),
        }
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Register an external command
    pub fn add_command(&self, spec: CommandSpec) -> Result<()> {
        let id = spec.id.clone();
        let running = spec.auto_start;
        self.register(id, running, ProcessBody::Command(spec))
    }

    /// Register an in-process body. It is started immediately and may honour
    /// the cancellation token it receives.
    pub fn add_simple<F, Fut>(&self, id: impl Into<String>, start: F) -> Result<()>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let start: SimpleFn = Arc::new(move |token| start(token).boxed());
        self.register(id.into(), true, ProcessBody::Simple(start))
    }

    fn register(&self, id: String, running: bool, body: ProcessBody) -> Result<()> {
        let mut processes = self.processes.write();
        if processes.iter().any(|p| p.id == id) {
            return Err(AppError::Duplicate(id));
        }

        debug!(process = %id, running, "Registered process");
        let process = Arc::new(Process {
            id,
            body,
            state: Mutex::new(ProcessState {
                running,
                current: None,
            }),
            wake: Notify::new(),
        });
        processes.push(process.clone());

        // Checked under the registry lock so `launch` cannot spawn it a second time
        if self.launched.load(Ordering::SeqCst) {
            self.spawn_loop(process);
        }
        Ok(())
    }

    fn find(&self, id: &str) -> Result<Arc<Process>> {
        self.processes
            .read()
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("process {}", id)))
    }

    /// Mark `id` as running and wake its loop
    pub fn start(&self, id: &str) -> Result<()> {
        let process = self.find(id)?;
        {
            let mut state = process.state.lock();
            if state.running {
                return Err(AppError::AlreadyInState {
                    id: id.to_string(),
                    state: "running",
                });
            }
            state.running = true;
        }
        process.wake.notify_one();
        Ok(())
    }

    /// Mark `id` as stopped and cancel its current execution
    pub fn stop(&self, id: &str) -> Result<()> {
        let process = self.find(id)?;
        let mut state = process.state.lock();
        if !state.running {
            return Err(AppError::AlreadyInState {
                id: id.to_string(),
                state: "stopped",
            });
        }
        state.running = false;
        if let Some(token) = state.current.take() {
            info!(process = %id, "Stopping process");
            token.cancel();
        }
        Ok(())
    }

    /// Stop every process that is currently marked running
    pub fn stop_all(&self) {
        let processes = self.processes.read().clone();
        for process in processes.iter().rev() {
            if let Err(e) = self.stop(&process.id) {
                debug!("{}", e);
            }
        }
    }

    /// Desired state of every process, in registration order
    pub fn status(&self) -> Vec<ProcessStatus> {
        self.processes
            .read()
            .iter()
            .map(|p| ProcessStatus {
                id: p.id.clone(),
                running: p.state.lock().running,
            })
            .collect()
    }

    /// Spawn one loop per registered process. Returns `false` if already launched.
    pub fn launch(&self) -> bool {
        let processes = self.processes.read();
        if self.launched.swap(true, Ordering::SeqCst) {
            return false;
        }
        for process in processes.iter() {
            self.spawn_loop(process.clone());
        }
        true
    }

    /// Launch all loops and block forever. Later calls return immediately.
    pub async fn run(&self) {
        if self.launch() {
            std::future::pending::<()>().await;
        }
    }

    fn spawn_loop(&self, process: Arc<Process>) {
        tokio::spawn(process_loop(process, self.restart_delay, self.log_output));
    }
}

impl ProcessControl for Supervisor {
    fn start(&self, id: &str) -> Result<()> {
        Supervisor::start(self, id)
    }

    fn stop(&self, id: &str) -> Result<()> {
        Supervisor::stop(self, id)
    }
}

async fn process_loop(process: Arc<Process>, restart_delay: Duration, log_output: bool) {
    loop {
        let token = {
            let mut state = process.state.lock();
            if state.running {
                let token = CancellationToken::new();
                state.current = Some(token.clone());
                Some(token)
            } else {
                None
            }
        };

        let Some(token) = token else {
            process.wake.notified().await;
            continue;
        };

        info!(process = %process.id, "Starting process");
        let result = process.body.execute(token.clone(), log_output).await;

        process.state.lock().current = None;

        if token.is_cancelled() {
            info!(process = %process.id, "Process stopped");
            continue;
        }

        match result {
            Ok(()) => warn!(
                process = %process.id,
                "Process exited, restarting in {:?}", restart_delay
            ),
            Err(e) => error!(
                process = %process.id,
                "Process failed: {}, restarting in {:?}", e, restart_delay
            ),
        }
        tokio::time::sleep(restart_delay).await;
    }
}
