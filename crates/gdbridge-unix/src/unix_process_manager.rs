use anyhow::Result;
use async_trait::async_trait;
use gdbridge_core::{
    ProcessError, ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager, ProcessOutput,
    ProcessSpec, ProcessStatus, ProcessStdin, ProcessTermination, SpawnedProcess,
    TerminationResult,
};
use std::time::Duration;

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::process::Stdio;
    use std::sync::Mutex;
    use sysinfo::System;
    use tokio::process::{Child, Command};
    use tracing::{debug, info, warn};

    /// Unix-specific process handle implementation
    pub struct UnixProcessHandle {
        child: Mutex<Child>,
        command: String,
    }

    impl UnixProcessHandle {
        pub fn new(child: Child, command: String) -> Self {
            Self {
                child: Mutex::new(child),
                command,
            }
        }

        fn child(&self) -> std::sync::MutexGuard<'_, Child> {
            self.child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }
    }

    #[async_trait]
    impl ProcessHandle for UnixProcessHandle {
        fn get_pid(&self) -> Option<ProcessId> {
            self.child().id().map(ProcessId::from)
        }

        fn get_command(&self) -> &str {
            &self.command
        }

        /// Reaps the child if it exited, so a zombie never counts as running
        async fn is_running(&self) -> bool {
            match self.child().try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    debug!(command = %self.command, %status, "Process has exited");
                    false
                }
                Err(e) => {
                    warn!(command = %self.command, error = %e, "Failed to poll process status");
                    false
                }
            }
        }

        async fn wait(&mut self) -> Result<ProcessStatus> {
            let child = self.child.get_mut().unwrap_or_else(|p| p.into_inner());
            let status = child.wait().await?;
            Ok(ProcessStatus::Exited(status))
        }

        async fn kill(&mut self) -> Result<()> {
            self.child
                .get_mut()
                .unwrap_or_else(|p| p.into_inner())
                .kill()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to kill process: {}", e))
        }
    }

    /// Unix-specific process manager with process group and tree termination
    pub struct UnixProcessManager {
        system: Mutex<System>,
        grace_period: Duration,
    }

    impl UnixProcessManager {
        pub fn new(grace_period: Duration) -> Self {
            info!(grace_period = ?grace_period, "Initializing Unix process manager");
            Self {
                system: Mutex::new(System::new()),
                grace_period,
            }
        }
    }

    impl Default for UnixProcessManager {
        fn default() -> Self {
            Self::new(Duration::from_millis(1000))
        }
    }

    #[async_trait]
    impl ProcessLifecycle for UnixProcessManager {
        async fn spawn_process(&self, spec: &ProcessSpec) -> Result<SpawnedProcess, ProcessError> {
            let mut cmd = Command::new(&spec.program);
            cmd.args(&spec.args);

            if let Some(dir) = &spec.working_dir {
                cmd.current_dir(dir);
            }
            cmd.envs(&spec.env);

            cmd.stdin(if spec.piped_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            });
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());

            // Own process group so the whole tool tree can be signalled at once
            cmd.process_group(0);
            cmd.kill_on_drop(true);

            let mut child = cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
                program: spec.program_display(),
                source,
            })?;

            if let Some(pid) = child.id() {
                info!(
                    role = %spec.role,
                    pid,
                    program = %spec.program_display(),
                    args = ?spec.args,
                    "Spawned Unix process"
                );
            }

            let stdin = child.stdin.take().map(|s| Box::new(s) as ProcessStdin);
            let stdout = child.stdout.take().map(|s| Box::new(s) as ProcessOutput);
            let stderr = child.stderr.take().map(|s| Box::new(s) as ProcessOutput);

            Ok(SpawnedProcess {
                handle: Box::new(UnixProcessHandle::new(
                    child,
                    spec.program_display(),
                )),
                stdin,
                stdout,
                stderr,
            })
        }
    }

    #[async_trait]
    impl ProcessTermination for UnixProcessManager {
        fn grace_period(&self) -> Duration {
            self.grace_period
        }

        async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
            let Some(pid) = handle.get_pid() else {
                return TerminationResult::ProcessNotFound;
            };

            match signal::kill(NixPid::from_raw(pid.0 as i32), Signal::SIGTERM) {
                Ok(()) => {
                    info!("Sent SIGTERM to process {}", pid);
                    TerminationResult::Success
                }
                Err(nix::errno::Errno::ESRCH) => {
                    info!("Process {} not found (already terminated)", pid);
                    TerminationResult::ProcessNotFound
                }
                Err(nix::errno::Errno::EPERM) => {
                    warn!("Permission denied to terminate process {}", pid);
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!("Failed to send SIGTERM to process {}: {}", pid, e);
                    TerminationResult::Failed(format!("SIGTERM failed: {e}"))
                }
            }
        }

        async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
            let Some(pid) = handle.get_pid() else {
                return TerminationResult::ProcessNotFound;
            };

            match signal::kill(NixPid::from_raw(pid.0 as i32), Signal::SIGKILL) {
                Ok(()) => {
                    info!("Sent SIGKILL to process {}", pid);
                    // Reap through the handle as well
                    if let Err(e) = handle.kill().await {
                        warn!("Handle kill cleanup failed: {}", e);
                    }
                    TerminationResult::Success
                }
                Err(nix::errno::Errno::ESRCH) => {
                    info!("Process {} not found (already terminated)", pid);
                    TerminationResult::ProcessNotFound
                }
                Err(nix::errno::Errno::EPERM) => {
                    warn!("Permission denied to kill process {}", pid);
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!("Failed to send SIGKILL to process {}: {}", pid, e);
                    TerminationResult::Failed(format!("SIGKILL failed: {e}"))
                }
            }
        }

        async fn find_child_processes(&self, parent_pid: ProcessId) -> Result<Vec<ProcessId>> {
            let mut system = self
                .system
                .lock()
                .map_err(|_| anyhow::anyhow!("process table lock poisoned"))?;
            system.refresh_processes_specifics(
                sysinfo::ProcessesToUpdate::All,
                true,
                sysinfo::ProcessRefreshKind::default(),
            );

            let mut children = Vec::new();
            Self::find_children_recursive(&system, parent_pid.0, &mut children);

            Ok(children.into_iter().map(ProcessId::from).collect())
        }

        async fn terminate_process_tree(&self, root_pid: ProcessId) -> TerminationResult {
            info!("Terminating process tree for root PID {}", root_pid);

            let children = match self.find_child_processes(root_pid).await {
                Ok(children) => children,
                Err(e) => {
                    warn!("Failed to find child processes for PID {}: {}", root_pid, e);
                    return TerminationResult::Failed(format!("Failed to enumerate children: {e}"));
                }
            };

            // Deepest descendants first
            for child_pid in &children {
                match self.terminate_single_process(*child_pid).await {
                    TerminationResult::Success | TerminationResult::ProcessNotFound => {}
                    result => {
                        warn!("Failed to terminate child process {}: {:?}", child_pid, result);
                    }
                }
            }

            self.terminate_single_process(root_pid).await
        }

        async fn terminate_process_group(&self, pid: ProcessId) -> TerminationResult {
            let pgid = NixPid::from_raw(pid.0 as i32);

            match signal::killpg(pgid, Signal::SIGTERM) {
                Ok(()) => {
                    info!("Sent SIGTERM to process group {}", pid);
                    tokio::time::sleep(self.grace_period).await;

                    match signal::killpg(pgid, Signal::SIGKILL) {
                        Ok(()) => {
                            info!("Sent SIGKILL to process group {}", pid);
                            TerminationResult::Success
                        }
                        Err(nix::errno::Errno::ESRCH) => {
                            info!("Process group {} already terminated", pid);
                            TerminationResult::Success
                        }
                        Err(e) => {
                            warn!("Failed to send SIGKILL to process group {}: {}", pid, e);
                            TerminationResult::Failed(format!("SIGKILL to process group failed: {e}"))
                        }
                    }
                }
                Err(nix::errno::Errno::ESRCH) => {
                    info!("Process group {} not found (already terminated)", pid);
                    TerminationResult::Success
                }
                Err(nix::errno::Errno::EPERM) => {
                    warn!("Permission denied to terminate process group {}", pid);
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!("Failed to send SIGTERM to process group {}: {}", pid, e);
                    TerminationResult::Failed(format!("SIGTERM to process group failed: {e}"))
                }
            }
        }
    }

    impl UnixProcessManager {
        /// Terminate a single process by PID with escalation
        async fn terminate_single_process(&self, pid: ProcessId) -> TerminationResult {
            let nix_pid = NixPid::from_raw(pid.0 as i32);

            match signal::kill(nix_pid, Signal::SIGTERM) {
                Ok(()) => {
                    info!("Sent SIGTERM to process {}", pid);
                    tokio::time::sleep(self.grace_period / 2).await;

                    match signal::kill(nix_pid, Signal::SIGKILL) {
                        Ok(()) => {
                            info!("Sent SIGKILL to process {}", pid);
                            TerminationResult::Success
                        }
                        Err(nix::errno::Errno::ESRCH) => TerminationResult::Success,
                        Err(e) => {
                            warn!("Failed to kill process {}: {}", pid, e);
                            TerminationResult::Failed(format!("SIGKILL failed: {e}"))
                        }
                    }
                }
                Err(nix::errno::Errno::ESRCH) => TerminationResult::ProcessNotFound,
                Err(nix::errno::Errno::EPERM) => {
                    warn!("Permission denied to terminate process {}", pid);
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!("Failed to send SIGTERM to process {}: {e}", pid);
                    TerminationResult::Failed(format!("SIGTERM failed: {e}"))
                }
            }
        }

        /// Recursively collect descendants, deepest first
        fn find_children_recursive(system: &System, parent_pid: u32, result: &mut Vec<u32>) {
            for (pid, process) in system.processes() {
                if process.parent().is_some_and(|ppid| ppid.as_u32() == parent_pid) {
                    let child_pid = pid.as_u32();
                    Self::find_children_recursive(system, child_pid, result);
                    result.push(child_pid);
                }
            }
        }
    }

    #[async_trait]
    impl ProcessManager for UnixProcessManager {}

}

#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessManager};

// Stubs so the crate still builds on non-Unix targets
#[cfg(not(unix))]
pub struct UnixProcessHandle;

#[cfg(not(unix))]
pub struct UnixProcessManager;

#[cfg(not(unix))]
impl UnixProcessManager {
    pub fn new(_grace_period: Duration) -> Self {
        Self
    }
}

#[cfg(not(unix))]
impl Default for UnixProcessManager {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}
