//! In-memory process manager standing in for the adapter and debugger.

use crate::process::{
    ProcessError, ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager, ProcessRole,
    ProcessSpec, ProcessStatus, ProcessTermination, SpawnedProcess, TerminationResult,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, DuplexStream};

const PIPE_CAPACITY: usize = 4096;

/// Test-side ends of a fake process' pipes
pub(crate) struct FakeProcess {
    pub(crate) spec: ProcessSpec,
    pub(crate) pid: ProcessId,
    alive: Arc<AtomicBool>,
    /// Reads what the bridge wrote to the process' stdin
    pub(crate) stdin: Option<DuplexStream>,
    /// Writes to the process' stdout
    pub(crate) stdout: DuplexStream,
    /// Writes to the process' stderr
    pub(crate) stderr: DuplexStream,
}

impl FakeProcess {
    /// Simulate the process exiting on its own
    pub(crate) fn exit(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Read everything currently buffered on stdin
    pub(crate) async fn read_stdin(&mut self) -> String {
        let stdin = self.stdin.as_mut().expect("process has no stdin");
        let mut buf = vec![0u8; PIPE_CAPACITY];
        let n = stdin.read(&mut buf).await.expect("stdin read");
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }
}

struct FakeHandle {
    pid: ProcessId,
    alive: Arc<AtomicBool>,
    command: String,
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        Some(self.pid)
    }

    fn get_command(&self) -> &str {
        &self.command
    }

    async fn is_running(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn wait(&mut self) -> Result<ProcessStatus> {
        while self.is_running().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(ProcessStatus::Terminated)
    }

    async fn kill(&mut self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeProcessManager {
    next_pid: AtomicU32,
    spawned: Mutex<Vec<FakeProcess>>,
    terminated: Mutex<Vec<ProcessId>>,
}

impl FakeProcessManager {
    pub(crate) fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            ..Default::default()
        }
    }

    /// Take the test-side ends of the most recent process spawned for `role`
    pub(crate) fn take(&self, role: ProcessRole) -> FakeProcess {
        let mut spawned = self.spawned.lock().unwrap();
        let index = spawned
            .iter()
            .rposition(|p| p.spec.role == role)
            .expect("no process spawned for role");
        spawned.remove(index)
    }

    pub(crate) fn spawn_count(&self, role: ProcessRole) -> usize {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.spec.role == role)
            .count()
    }

    pub(crate) fn terminated(&self) -> Vec<ProcessId> {
        self.terminated.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessLifecycle for FakeProcessManager {
    async fn spawn_process(&self, spec: &ProcessSpec) -> Result<SpawnedProcess, ProcessError> {
        if spec.program.to_string_lossy().contains("missing") {
            return Err(ProcessError::SpawnFailed {
                program: spec.program_display(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
            });
        }

        let pid = ProcessId(self.next_pid.fetch_add(1, Ordering::SeqCst));
        let alive = Arc::new(AtomicBool::new(true));

        let (stdin_bridge, stdin_test) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdout_test, stdout_bridge) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_test, stderr_bridge) = tokio::io::duplex(PIPE_CAPACITY);

        self.spawned.lock().unwrap().push(FakeProcess {
            spec: spec.clone(),
            pid,
            alive: alive.clone(),
            stdin: spec.piped_stdin.then_some(stdin_test),
            stdout: stdout_test,
            stderr: stderr_test,
        });

        Ok(SpawnedProcess {
            handle: Box::new(FakeHandle {
                pid,
                alive,
                command: spec.program_display(),
            }),
            stdin: spec
                .piped_stdin
                .then(|| Box::new(stdin_bridge) as crate::process::ProcessStdin),
            stdout: Some(Box::new(stdout_bridge)),
            stderr: Some(Box::new(stderr_bridge)),
        })
    }
}

#[async_trait]
impl ProcessTermination for FakeProcessManager {
    fn grace_period(&self) -> Duration {
        Duration::ZERO
    }

    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };
        if !handle.is_running().await {
            return TerminationResult::ProcessNotFound;
        }

        handle.kill().await.ok();
        self.terminated.lock().unwrap().push(pid);
        TerminationResult::Success
    }

    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        self.terminate_gracefully(handle).await
    }

    async fn find_child_processes(&self, _pid: ProcessId) -> Result<Vec<ProcessId>> {
        Ok(Vec::new())
    }

    async fn terminate_process_tree(&self, _root_pid: ProcessId) -> TerminationResult {
        TerminationResult::ProcessNotFound
    }

    async fn terminate_process_group(&self, _pid: ProcessId) -> TerminationResult {
        TerminationResult::ProcessNotFound
    }
}

impl ProcessManager for FakeProcessManager {}
