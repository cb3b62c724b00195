use anyhow::Result;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use sysinfo::System;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use gdbridge_core::*;

/// CREATE_NO_WINDOW: no console window pops up for the tool processes
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Windows-specific process handle implementation
pub struct WindowsProcessHandle {
    child: Mutex<Child>,
    command: String,
}

impl WindowsProcessHandle {
    pub fn new(child: Child, command: String) -> Self {
        Self {
            child: Mutex::new(child),
            command,
        }
    }

    fn child(&self) -> std::sync::MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn child_mut(&mut self) -> &mut Child {
        self.child.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ProcessHandle for WindowsProcessHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        self.child().id().map(ProcessId::from)
    }

    fn get_command(&self) -> &str {
        &self.command
    }

    async fn is_running(&self) -> bool {
        match self.child().try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(command = %self.command, %status, "Windows process has exited");
                false
            }
            Err(e) => {
                warn!(command = %self.command, error = %e, "Failed to poll Windows process status");
                false
            }
        }
    }

    async fn wait(&mut self) -> Result<ProcessStatus> {
        let status = self.child_mut().wait().await?;
        Ok(ProcessStatus::Exited(status))
    }

    async fn kill(&mut self) -> Result<()> {
        self.child_mut()
            .kill()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to kill process: {}", e))
    }
}

/// Windows-specific process manager with process tree management
pub struct WindowsProcessManager {
    system: Mutex<System>,
    grace_period: Duration,
}

impl WindowsProcessManager {
    pub fn new(grace_period: Duration) -> Self {
        info!(grace_period = ?grace_period, "Initializing Windows process manager");
        Self {
            system: Mutex::new(System::new()),
            grace_period,
        }
    }

    fn process_exists(&self, pid: u32) -> bool {
        let Ok(mut system) = self.system.lock() else {
            return false;
        };
        system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::Some(&[sysinfo::Pid::from_u32(pid)]),
            true,
            sysinfo::ProcessRefreshKind::default(),
        );
        system.process(sysinfo::Pid::from_u32(pid)).is_some()
    }
}

impl Default for WindowsProcessManager {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}

#[async_trait]
impl ProcessLifecycle for WindowsProcessManager {
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
        cmd.kill_on_drop(true);

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
            program: spec.program_display(),
            source,
        })?;

        if let Some(pid) = child.id() {
            info!(
                role = %spec.role,
                pid = %pid,
                program = %spec.program_display(),
                args = ?spec.args,
                "Spawned Windows process"
            );
        }

        let stdin = child.stdin.take().map(|s| Box::new(s) as ProcessStdin);
        let stdout = child.stdout.take().map(|s| Box::new(s) as ProcessOutput);
        let stderr = child.stderr.take().map(|s| Box::new(s) as ProcessOutput);

        Ok(SpawnedProcess {
            handle: Box::new(WindowsProcessHandle::new(
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
impl ProcessTermination for WindowsProcessManager {
    fn grace_period(&self) -> Duration {
        self.grace_period
    }

    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        match self.taskkill(pid.0, false).await {
            Ok(true) => {
                info!(pid = %pid, "Sent graceful termination to process");
                TerminationResult::Success
            }
            Ok(false) => {
                warn!(pid = %pid, "Process not found for graceful termination");
                TerminationResult::ProcessNotFound
            }
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to gracefully terminate process");
                TerminationResult::Failed(format!("Graceful termination failed: {e}"))
            }
        }
    }

    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        match self.taskkill(pid.0, true).await {
            Ok(true) => {
                info!(pid = %pid, "Force killed process");
                if let Err(e) = handle.kill().await {
                    warn!(error = %e, "Handle kill cleanup failed");
                }
                TerminationResult::Success
            }
            Ok(false) => {
                info!(pid = %pid, "Process not found for force kill");
                TerminationResult::ProcessNotFound
            }
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to force kill process");
                TerminationResult::Failed(format!("Force kill failed: {e}"))
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
        info!(root_pid = %root_pid, "Terminating process tree");

        // taskkill /T takes the whole tree in one go
        match self.taskkill_tree(root_pid.0).await {
            Ok(true) => {
                info!(root_pid = %root_pid, "Terminated process tree");
                TerminationResult::Success
            }
            Ok(false) => {
                info!(root_pid = %root_pid, "Process tree not found");
                TerminationResult::ProcessNotFound
            }
            Err(e) => {
                warn!(root_pid = %root_pid, error = %e, "taskkill failed, terminating tree manually");

                let children = match self.find_child_processes(root_pid).await {
                    Ok(children) => children,
                    Err(e) => {
                        warn!(root_pid = %root_pid, error = %e, "Failed to find child processes");
                        return TerminationResult::Failed(format!("Failed to enumerate children: {e}"));
                    }
                };

                // Deepest descendants first
                for child_pid in &children {
                    match self.terminate_single_process(*child_pid).await {
                        TerminationResult::Success | TerminationResult::ProcessNotFound => {}
                        result => {
                            warn!(pid = %child_pid, result = ?result, "Failed to terminate child process");
                        }
                    }
                }

                self.terminate_single_process(root_pid).await
            }
        }
    }

    async fn terminate_process_group(&self, _pid: ProcessId) -> TerminationResult {
        // No Unix-style process groups on Windows
        TerminationResult::ProcessNotFound
    }
}

impl WindowsProcessManager {
    async fn taskkill(&self, pid: u32, force: bool) -> Result<bool> {
        let pid_string = pid.to_string();
        let mut args = vec!["/PID", &pid_string];
        if force {
            args.push("/F");
        }

        let output = Command::new("taskkill").args(&args).output().await?;
        Ok(output.status.success())
    }

    async fn taskkill_tree(&self, pid: u32) -> Result<bool> {
        let output = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .output()
            .await?;

        Ok(output.status.success())
    }

    /// Terminate a single process by PID with escalation
    async fn terminate_single_process(&self, pid: ProcessId) -> TerminationResult {
        match self.taskkill(pid.0, false).await {
            Ok(true) => {
                tokio::time::sleep(self.grace_period).await;

                if !self.process_exists(pid.0) {
                    info!(pid = %pid, "Process terminated gracefully");
                    return TerminationResult::Success;
                }

                match self.taskkill(pid.0, true).await {
                    Ok(_) => {
                        info!(pid = %pid, "Force killed process");
                        TerminationResult::Success
                    }
                    Err(e) => {
                        warn!(pid = %pid, error = %e, "Failed to force kill process");
                        TerminationResult::Failed(format!("Force kill failed: {e}"))
                    }
                }
            }
            Ok(false) => TerminationResult::ProcessNotFound,
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to send graceful termination to process");
                TerminationResult::Failed(format!("Graceful termination failed: {e}"))
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
impl ProcessManager for WindowsProcessManager {}
