use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Unique identifier for a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display, derive_more::From)]
pub struct ProcessId(pub u32);

/// Write half of a spawned process' stdin
pub type ProcessStdin = Box<dyn AsyncWrite + Unpin + Sync + Send>;

/// Read half of a spawned process' stdout or stderr
pub type ProcessOutput = Box<dyn AsyncRead + Unpin + Sync + Send>;

/// Status of a process after termination
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStatus {
    /// Process exited with status information
    Exited(std::process::ExitStatus),
    /// Process was terminated by a signal (Unix) or forcibly terminated (Windows)
    Terminated,
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Process was successfully terminated
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Permission denied (insufficient privileges)
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

/// Role a tool process plays in a debug session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ProcessRole {
    #[display("adapter")]
    Adapter,
    #[display("debugger")]
    Debugger,
}

/// Everything needed to start one tool process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSpec {
    pub role: ProcessRole,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Whether the process gets a writable stdin; otherwise stdin is null
    pub piped_stdin: bool,
}

impl ProcessSpec {
    pub fn new(role: ProcessRole, program: impl Into<PathBuf>) -> Self {
        Self {
            role,
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            piped_stdin: false,
        }
    }

    pub fn args<S: ToString, I: IntoIterator<Item = S>>(mut self, args: I) -> Self {
        self.args = args.into_iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, env: &HashMap<String, String>) -> Self {
        self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn piped_stdin(mut self) -> Self {
        self.piped_stdin = true;
        self
    }

    pub fn program_display(&self) -> String {
        self.program.display().to_string()
    }
}

/// A freshly spawned process together with its standard streams
pub struct SpawnedProcess {
    pub handle: Box<dyn ProcessHandle>,
    pub stdin: Option<ProcessStdin>,
    pub stdout: Option<ProcessOutput>,
    pub stderr: Option<ProcessOutput>,
}

/// Error types for process operations
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Core trait for process lifecycle management
#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    /// Spawn a new process with stdout and stderr piped back to the caller
    async fn spawn_process(&self, spec: &ProcessSpec) -> Result<SpawnedProcess, ProcessError>;

    /// Check if a process is still running and healthy
    async fn is_process_healthy(&self, handle: &dyn ProcessHandle) -> bool {
        handle.is_running().await
    }

    /// Wait for a process to exit with optional timeout
    async fn wait_for_exit(
        &self,
        handle: &mut dyn ProcessHandle,
        timeout: Option<Duration>,
    ) -> Result<ProcessStatus> {
        match timeout {
            Some(duration) => tokio::time::timeout(duration, handle.wait())
                .await
                .map_err(|_| anyhow::anyhow!("Timeout waiting for process exit"))?,
            None => handle.wait().await,
        }
    }
}

/// Trait for comprehensive process termination including process trees
#[async_trait]
pub trait ProcessTermination: Send + Sync {
    /// Time a process gets to exit after a graceful termination request
    fn grace_period(&self) -> Duration {
        Duration::from_millis(1000)
    }

    /// Terminate a single process gracefully (SIGTERM on Unix)
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    /// Force kill a single process (SIGKILL on Unix)
    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    /// Find all child processes of a given process
    async fn find_child_processes(&self, pid: ProcessId) -> Result<Vec<ProcessId>>;

    /// Terminate an entire process tree (parent and all descendants)
    async fn terminate_process_tree(&self, root_pid: ProcessId) -> TerminationResult;

    /// Terminate a process group (Unix only, returns ProcessNotFound on Windows)
    async fn terminate_process_group(&self, pid: ProcessId) -> TerminationResult;

    /// Complete termination strategy: process group -> process tree -> individual process
    async fn terminate_completely(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        if !handle.is_running().await {
            return TerminationResult::ProcessNotFound;
        }

        if let Some(pid) = handle.get_pid() {
            if self.terminate_process_group(pid).await == TerminationResult::Success {
                return TerminationResult::Success;
            }

            if self.terminate_process_tree(pid).await == TerminationResult::Success {
                return TerminationResult::Success;
            }
        }

        match self.terminate_gracefully(handle).await {
            TerminationResult::Success => {
                tokio::time::sleep(self.grace_period()).await;

                if handle.is_running().await {
                    self.force_kill(handle).await
                } else {
                    TerminationResult::Success
                }
            }
            TerminationResult::ProcessNotFound => TerminationResult::Success,
            _ => self.force_kill(handle).await,
        }
    }
}

/// Trait representing a handle to a running process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None if process has exited)
    fn get_pid(&self) -> Option<ProcessId>;

    /// Get the command that started this process
    fn get_command(&self) -> &str;

    /// Check if the process is still running (non-blocking)
    async fn is_running(&self) -> bool;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ProcessStatus>;

    /// Kill the process (platform-specific implementation)
    async fn kill(&mut self) -> Result<()>;
}

/// High-level process manager trait that combines lifecycle and termination
#[async_trait]
pub trait ProcessManager: ProcessLifecycle + ProcessTermination {
    /// Cleanup any resources held by the process manager
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory trait for creating platform-specific process managers
pub trait ProcessManagerFactory {
    /// The type of process manager this factory creates
    type Manager: ProcessManager;

    /// Create a process manager for the current platform
    fn create_process_manager(grace_period: Duration) -> Self::Manager;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}
