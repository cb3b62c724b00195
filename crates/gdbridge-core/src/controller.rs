use crate::command::{CommandChannel, DebugCommand};
use crate::config::{BridgeConfig, LaunchPolicy};
use crate::error::BridgeError;
use crate::events::{DebugEvent, EventChannel, EventHub, OutputWatcher};
use crate::process::{ProcessId, ProcessManager, ProcessRole, ProcessSpec, TerminationResult};
use crate::registry::{DebugDomain, DomainDescriptor};
use crate::relay::{drain_to_log, relay};
use crate::sequencer::StartupSequencer;
use crate::session::{DebuggerProcess, LiveProcess, Session, SessionState};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Launches the adapter and debugger and exposes one operation per debug action.
///
/// Actions are fire-and-forget: a successful call means the command text was
/// written, and the echo published on `debug_data` is not the debugger's
/// answer. Answers arrive later, uncorrelated, on the same event stream.
pub struct SessionController<Manager> {
    config: BridgeConfig,
    process_manager: Arc<Manager>,
    session: Arc<Mutex<Session>>,
    hub: EventHub,
}

impl<Manager> Clone for SessionController<Manager> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            process_manager: self.process_manager.clone(),
            session: self.session.clone(),
            hub: self.hub.clone(),
        }
    }
}

impl<Manager: ProcessManager + 'static> SessionController<Manager> {
    pub fn new(config: BridgeConfig, process_manager: Arc<Manager>) -> Result<Self, BridgeError> {
        config.validate()?;
        let hub = EventHub::new(config.domain.clone(), config.event_capacity);

        Ok(Self {
            config,
            process_manager,
            session: Arc::new(Mutex::new(Session::new())),
            hub,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn events(&self) -> &EventHub {
        &self.hub
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DebugEvent> {
        self.hub.subscribe()
    }

    /// See [`EventHub::watch`]
    pub fn watch(&self, needle: impl Into<String>) -> OutputWatcher {
        self.hub.watch(needle)
    }

    /// Current session state, after dropping handles of processes that have
    /// exited on their own.
    ///
    /// With both processes gone the session reads as terminated. A debugger
    /// that dies while the adapter keeps running leaves the last launch phase
    /// in place; commands still fail with `TargetUnavailable`.
    pub async fn state(&self) -> SessionState {
        let mut session = self.session.lock().await;
        session.refresh().await;
        session.state()
    }

    /// Start the hardware adapter and return its process id.
    ///
    /// Adapter output is only drained into the log, never published.
    pub async fn launch_adapter(&self) -> Result<ProcessId, BridgeError> {
        let mut session = self.session.lock().await;
        self.make_room(&mut session, ProcessRole::Adapter).await?;

        let tools = &self.config.tools;
        let spec = ProcessSpec::new(ProcessRole::Adapter, &tools.adapter)
            .args(tools.adapter_args())
            .env(&self.config.env);

        let spawned = self
            .process_manager
            .spawn_process(&spec)
            .await
            .map_err(|e| BridgeError::launch_failure(e.to_string()))?;

        let pid = spawned.handle.get_pid().ok_or_else(|| {
            BridgeError::launch_failure(format!("{} exited before reporting a pid", spec.program_display()))
        })?;

        for output in [spawned.stdout, spawned.stderr].into_iter().flatten() {
            tokio::spawn(drain_to_log(output, ProcessRole::Adapter));
        }

        session.set_adapter(LiveProcess::new(spawned.handle));
        info!(pid = %pid, adapter = %spec.program_display(), "Adapter launched");
        Ok(pid)
    }

    /// Start the debugger in `working_folder` and schedule the startup sequence.
    ///
    /// Output relays are attached before anything is written, so no early
    /// output is lost. Returns once the process is spawned; symbol loading and
    /// remote attach happen later and show up as data events.
    pub async fn launch_debugger(
        &self,
        symbol_file: impl AsRef<Path>,
        working_folder: impl AsRef<Path>,
    ) -> Result<(), BridgeError> {
        let symbol_file = symbol_file.as_ref().to_path_buf();
        let working_folder = working_folder.as_ref();

        let mut session = self.session.lock().await;
        self.make_room(&mut session, ProcessRole::Debugger).await?;

        let tools = &self.config.tools;
        let spec = ProcessSpec::new(ProcessRole::Debugger, &tools.debugger)
            .args(tools.debugger_args(working_folder))
            .working_dir(working_folder)
            .env(&self.config.env)
            .piped_stdin();

        let spawned = self
            .process_manager
            .spawn_process(&spec)
            .await
            .map_err(|e| BridgeError::launch_failure(e.to_string()))?;

        let stdin = spawned
            .stdin
            .ok_or_else(|| BridgeError::launch_failure("debugger stdin was not captured"))?;

        if let Some(stdout) = spawned.stdout {
            tokio::spawn(relay(stdout, self.hub.clone(), EventChannel::Data));
        }
        if let Some(stderr) = spawned.stderr {
            tokio::spawn(relay(stderr, self.hub.clone(), EventChannel::Error));
        }

        let pid = spawned.handle.get_pid();
        let cancel = CancellationToken::new();
        let generation = session.set_debugger(DebuggerProcess {
            process: LiveProcess::new(spawned.handle),
            channel: CommandChannel::new(stdin, cancel.clone()),
            closed: cancel.clone(),
        })?;

        match pid {
            Some(pid) if pid.0 != 0 => {
                info!(pid = %pid, symbol_file = %symbol_file.display(), "Debugger launched");
                StartupSequencer {
                    session: self.session.clone(),
                    hub: self.hub.clone(),
                    startup: self.config.startup.clone(),
                    remote: self.config.remote.clone(),
                    symbol_file,
                    generation,
                    cancel,
                }
                .spawn();
            }
            _ => warn!("Debugger has no process id, startup sequence not scheduled"),
        }

        Ok(())
    }

    /// `monitor reset halt`
    pub async fn halt(&self) -> Result<(), BridgeError> {
        self.execute(DebugCommand::Halt).await
    }

    /// `monitor reset run`, announced as `monitor reset resume`
    pub async fn restart(&self) -> Result<(), BridgeError> {
        self.execute(DebugCommand::Restart).await
    }

    /// `continue`
    pub async fn step_next_bp(&self) -> Result<(), BridgeError> {
        self.execute(DebugCommand::Continue).await
    }

    /// `next`
    pub async fn step_next_line(&self) -> Result<(), BridgeError> {
        self.execute(DebugCommand::Next).await
    }

    /// `info breakpoints`; the list itself arrives later as data events
    pub async fn show_breakpoints(&self) -> Result<(), BridgeError> {
        self.execute(DebugCommand::ListBreakpoints).await
    }

    /// `b <line>`
    pub async fn set_breakpoint(&self, line: u32) -> Result<(), BridgeError> {
        self.execute(DebugCommand::SetBreakpoint(line)).await
    }

    /// `print <variable>`; the value arrives later as data events
    pub async fn show_value(&self, variable: &str) -> Result<(), BridgeError> {
        self.execute(DebugCommand::Print(variable.to_string())).await
    }

    pub fn tmp_folder(&self) -> PathBuf {
        std::env::temp_dir()
    }

    /// Write `command` to the debugger and announce it.
    ///
    /// The session lock is only held while queueing, so a debugger that stops
    /// reading cannot block `terminate`.
    pub async fn execute(&self, command: DebugCommand) -> Result<(), BridgeError> {
        let receipt = self.session.lock().await.enqueue(&command).await?;
        receipt.written().await?;
        self.hub.data(command.announcement());
        Ok(())
    }

    /// Cancel pending startup steps and terminate the debugger, then the adapter.
    pub async fn terminate(&self) -> Result<(), BridgeError> {
        let mut session = self.session.lock().await;
        let (adapter, debugger) = session.take_all();

        let mut failures = Vec::new();
        if let Some(debugger) = debugger {
            if let Err(e) = self.shutdown(ProcessRole::Debugger, debugger.process).await {
                failures.push(e);
            }
        }
        if let Some(adapter) = adapter {
            if let Err(e) = self.shutdown(ProcessRole::Adapter, adapter).await {
                failures.push(e);
            }
        }

        session.mark_terminated();
        if let Err(e) = self.process_manager.cleanup().await {
            warn!(error = %e, "Process manager cleanup failed");
        }

        match failures.into_iter().next() {
            Some(e) => Err(e),
            None => {
                info!("Debug session terminated");
                Ok(())
            }
        }
    }

    /// Ensure no live process holds `role`, honoring the launch policy
    async fn make_room(&self, session: &mut Session, role: ProcessRole) -> Result<(), BridgeError> {
        if !session.has_live(role).await {
            session.reap(role).await;
            return Ok(());
        }

        match self.config.launch_policy {
            LaunchPolicy::Reject => Err(BridgeError::SessionActive(format!(
                "{role} process is still running; terminate the session first"
            ))),
            LaunchPolicy::Replace => {
                info!(role = %role, "Replacing live process");
                let process = match role {
                    ProcessRole::Adapter => session.adapter.take(),
                    ProcessRole::Debugger => session.debugger.take().map(|d| {
                        d.closed.cancel();
                        d.process
                    }),
                };
                match process {
                    Some(process) => self.shutdown(role, process).await,
                    None => Ok(()),
                }
            }
        }
    }

    async fn shutdown(&self, role: ProcessRole, mut process: LiveProcess) -> Result<(), BridgeError> {
        let result = self
            .process_manager
            .terminate_completely(process.handle.as_mut())
            .await;

        match result {
            TerminationResult::Success | TerminationResult::ProcessNotFound => {
                info!(role = %role, pid = ?process.pid, command = process.handle.get_command(), "Process terminated");
                if let Err(e) = self
                    .process_manager
                    .wait_for_exit(process.handle.as_mut(), Some(self.config.shutdown_grace()))
                    .await
                {
                    warn!(role = %role, error = %e, "Process did not report exit status");
                }
                Ok(())
            }
            other => {
                error!(
                    role = %role,
                    pid = ?process.pid,
                    command = process.handle.get_command(),
                    result = ?other,
                    "Failed to terminate process"
                );
                Err(BridgeError::Other(anyhow::anyhow!(
                    "failed to terminate {role} process: {other:?}"
                )))
            }
        }
    }
}

#[async_trait]
impl<Manager: ProcessManager + 'static> DebugDomain for SessionController<Manager> {
    fn descriptor(&self) -> DomainDescriptor {
        DomainDescriptor::debug(self.config.domain.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<DebugEvent> {
        self.hub.subscribe()
    }

    async fn launch_adapter(&self) -> Result<ProcessId, BridgeError> {
        SessionController::launch_adapter(self).await
    }

    async fn launch_debugger(&self, symbol_file: &Path, working_folder: &Path) -> Result<(), BridgeError> {
        SessionController::launch_debugger(self, symbol_file, working_folder).await
    }

    async fn halt(&self) -> Result<(), BridgeError> {
        SessionController::halt(self).await
    }

    async fn restart(&self) -> Result<(), BridgeError> {
        SessionController::restart(self).await
    }

    async fn step_next_line(&self) -> Result<(), BridgeError> {
        SessionController::step_next_line(self).await
    }

    async fn step_next_bp(&self) -> Result<(), BridgeError> {
        SessionController::step_next_bp(self).await
    }

    async fn show_breakpoints(&self) -> Result<(), BridgeError> {
        SessionController::show_breakpoints(self).await
    }

    async fn set_breakpoint(&self, line: u32) -> Result<(), BridgeError> {
        SessionController::set_breakpoint(self, line).await
    }

    async fn show_value(&self, variable: &str) -> Result<(), BridgeError> {
        SessionController::show_value(self, variable).await
    }

    async fn terminate(&self) -> Result<(), BridgeError> {
        SessionController::terminate(self).await
    }

    fn tmp_folder(&self) -> PathBuf {
        SessionController::tmp_folder(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReadinessCheck, RemoteTarget, StartupConfig, ToolLayout};
    use crate::test_support::FakeProcessManager;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::time::Instant;

    fn config() -> BridgeConfig {
        BridgeConfig::builder()
            .tools(ToolLayout::new("/opt/tools/openocd", "/opt/tools/gdb"))
            .startup(StartupConfig::fixed_delay())
            .build()
            .unwrap()
    }

    fn controller_with(config: BridgeConfig) -> (SessionController<FakeProcessManager>, Arc<FakeProcessManager>) {
        let manager = Arc::new(FakeProcessManager::new());
        let controller = SessionController::new(config, manager.clone()).unwrap();
        (controller, manager)
    }

    async fn next_data(rx: &mut broadcast::Receiver<DebugEvent>) -> DebugEvent {
        loop {
            let event = rx.recv().await.unwrap();
            if event.is_data() {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_launch_adapter_returns_pid() {
        let (controller, manager) = controller_with(config());

        let pid = controller.launch_adapter().await.unwrap();
        let adapter = manager.take(ProcessRole::Adapter);

        assert_eq!(adapter.pid, pid);
        assert_eq!(adapter.spec.program, PathBuf::from("/opt/tools/openocd"));
        assert!(adapter.stdin.is_none());
        assert_eq!(controller.state().await, SessionState::AdapterStarting);
    }

    #[tokio::test]
    async fn test_launch_failure_emits_nothing() {
        let config = BridgeConfig::builder()
            .tools(ToolLayout::new("/missing/openocd", "/missing/gdb"))
            .build()
            .unwrap();
        let (controller, _manager) = controller_with(config);
        let mut rx = controller.subscribe();

        let err = controller.launch_adapter().await.unwrap_err();
        assert!(matches!(err, BridgeError::LaunchFailure(_)));

        let err = controller.launch_debugger("/tmp/a.elf", "/tmp").await.unwrap_err();
        assert!(matches!(err, BridgeError::LaunchFailure(_)));

        assert!(rx.try_recv().is_err());
        assert_eq!(controller.state().await, SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_breakpoint_writes_and_announces() {
        let (controller, manager) = controller_with(config());
        controller.launch_debugger("/tmp/build/sketch.elf", "/tmp/build").await.unwrap();
        let mut debugger = manager.take(ProcessRole::Debugger);
        let mut rx = controller.subscribe();

        controller.set_breakpoint(42).await.unwrap();

        assert_eq!(debugger.read_stdin().await, "b 42\n");
        let event = rx.try_recv().unwrap();
        assert_eq!(event.name(), "debug_data");
        assert_eq!(event.payload, "b 42");
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_table() {
        let (controller, manager) = controller_with(config());
        controller.launch_debugger("/tmp/build/sketch.elf", "/tmp/build").await.unwrap();
        let mut debugger = manager.take(ProcessRole::Debugger);
        let mut rx = controller.subscribe();

        controller.halt().await.unwrap();
        assert_eq!(debugger.read_stdin().await, "monitor reset halt\n");
        assert_eq!(rx.try_recv().unwrap().payload, "monitor reset halt");

        controller.restart().await.unwrap();
        assert_eq!(debugger.read_stdin().await, "monitor reset run\n");
        assert_eq!(rx.try_recv().unwrap().payload, "monitor reset resume");

        controller.step_next_bp().await.unwrap();
        assert_eq!(debugger.read_stdin().await, "continue\n");
        assert_eq!(rx.try_recv().unwrap().payload, "continue");

        controller.step_next_line().await.unwrap();
        assert_eq!(debugger.read_stdin().await, "next\n");
        assert_eq!(rx.try_recv().unwrap().payload, "next");

        controller.show_breakpoints().await.unwrap();
        assert_eq!(debugger.read_stdin().await, "info breakpoints\n");
        assert_eq!(rx.try_recv().unwrap().payload, "info breakpoints");

        controller.show_value("ledState").await.unwrap();
        assert_eq!(debugger.read_stdin().await, "print ledState\n");
        assert_eq!(rx.try_recv().unwrap().payload, "print ledState");
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_sequence_timing() {
        let (controller, manager) = controller_with(config());
        let mut rx = controller.subscribe();
        let started = Instant::now();

        controller.launch_debugger("/tmp/build/sketch.elf", "/tmp/build").await.unwrap();
        let mut debugger = manager.take(ProcessRole::Debugger);
        assert_eq!(debugger.spec.working_dir, Some(PathBuf::from("/tmp/build")));
        assert_eq!(debugger.spec.args, vec!["-d", "/tmp/build"]);
        assert_eq!(controller.state().await, SessionState::DebuggerStarting);

        let load = next_data(&mut rx).await;
        assert!(load.payload.contains("file /tmp/build/sketch.elf"));
        assert_eq!(started.elapsed(), Duration::from_millis(2000));
        assert_eq!(debugger.read_stdin().await, "file /tmp/build/sketch.elf\n");

        let attach = next_data(&mut rx).await;
        assert!(attach.payload.contains("target remote localhost:3333"));
        assert_eq!(started.elapsed(), Duration::from_millis(4000));
        assert_eq!(debugger.read_stdin().await, "target remote localhost:3333\n");

        tokio::task::yield_now().await;
        assert_eq!(controller.state().await, SessionState::Attached);

        // Nothing else fires for this launch.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_attached_before_startup() {
        let (controller, manager) = controller_with(config());
        let mut rx = controller.subscribe();

        controller.launch_debugger("/tmp/build/sketch.elf", "/tmp/build").await.unwrap();
        let mut debugger = manager.take(ProcessRole::Debugger);

        debugger.stdout.write_all(b"GNU gdb (GDB) 7.8.1\n").await.unwrap();
        let banner = rx.recv().await.unwrap();
        assert_eq!(banner.name(), "debug_data");
        assert_eq!(banner.payload, "GNU gdb (GDB) 7.8.1\n");

        debugger.stderr.write_all(b"warning: no symbols\n").await.unwrap();
        let warning = rx.recv().await.unwrap();
        assert_eq!(warning.name(), "debug_err");
        assert_eq!(warning.payload, "warning: no symbols\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_debugger_exit_before_startup_is_stale() {
        let (controller, manager) = controller_with(config());
        let mut rx = controller.subscribe();

        controller.launch_debugger("/tmp/build/sketch.elf", "/tmp/build").await.unwrap();
        let debugger = manager.take(ProcessRole::Debugger);
        debugger.exit();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "debug_err");
        assert!(event.payload.contains("Stale debug target"));

        // The sequence stops: no attach attempt follows.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_after_exit_is_target_unavailable() {
        let (controller, manager) = controller_with(config());
        controller.launch_debugger("/tmp/build/sketch.elf", "/tmp/build").await.unwrap();
        let debugger = manager.take(ProcessRole::Debugger);
        let mut rx = controller.subscribe();

        debugger.exit();
        let err = controller.step_next_line().await.unwrap_err();
        assert!(matches!(err, BridgeError::TargetUnavailable(_)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_pipe_is_target_unavailable() {
        let (controller, manager) = controller_with(config());
        controller.launch_debugger("/tmp/build/sketch.elf", "/tmp/build").await.unwrap();
        let mut debugger = manager.take(ProcessRole::Debugger);
        drop(debugger.stdin.take());

        let err = controller.halt().await.unwrap_err();
        assert!(matches!(err, BridgeError::TargetUnavailable(_)));
    }

    #[tokio::test]
    async fn test_commands_without_debugger() {
        let (controller, _manager) = controller_with(config());
        let err = controller.set_breakpoint(1).await.unwrap_err();
        assert!(err.is_precondition_violation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debugger_before_adapter() {
        let (controller, manager) = controller_with(config());
        controller.launch_debugger("/tmp/build/sketch.elf", "/tmp/build").await.unwrap();
        controller.launch_adapter().await.unwrap();

        assert_eq!(manager.spawn_count(ProcessRole::Adapter), 1);
        assert_eq!(controller.state().await, SessionState::DebuggerStarting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_launch_rejected_while_live() {
        let (controller, manager) = controller_with(config());
        controller.launch_adapter().await.unwrap();
        controller.launch_debugger("/tmp/build/sketch.elf", "/tmp/build").await.unwrap();

        let err = controller.launch_adapter().await.unwrap_err();
        assert!(matches!(err, BridgeError::SessionActive(_)));
        let err = controller.launch_debugger("/tmp/build/sketch.elf", "/tmp/build").await.unwrap_err();
        assert!(matches!(err, BridgeError::SessionActive(_)));

        assert_eq!(manager.spawn_count(ProcessRole::Debugger), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relaunch_after_exit_reaps_handle() {
        let (controller, manager) = controller_with(config());
        controller.launch_debugger("/tmp/build/first.elf", "/tmp/build").await.unwrap();
        manager.take(ProcessRole::Debugger).exit();

        controller.launch_debugger("/tmp/build/second.elf", "/tmp/build").await.unwrap();
        assert_eq!(manager.spawn_count(ProcessRole::Debugger), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_policy_cancels_previous_sequence() {
        let config = BridgeConfig::builder()
            .tools(ToolLayout::new("/opt/tools/openocd", "/opt/tools/gdb"))
            .startup(StartupConfig::fixed_delay())
            .launch_policy(LaunchPolicy::Replace)
            .build()
            .unwrap();
        let (controller, manager) = controller_with(config);
        let mut rx = controller.subscribe();

        controller.launch_debugger("/tmp/build/first.elf", "/tmp/build").await.unwrap();
        let first = manager.take(ProcessRole::Debugger);
        tokio::time::sleep(Duration::from_millis(1000)).await;

        controller.launch_debugger("/tmp/build/second.elf", "/tmp/build").await.unwrap();
        assert!(!first.is_alive());
        assert_eq!(manager.terminated(), vec![first.pid]);

        let load = next_data(&mut rx).await;
        assert_eq!(load.payload, "file /tmp/build/second.elf");
        let attach = next_data(&mut rx).await;
        assert_eq!(attach.payload, "target remote localhost:3333");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_cancels_startup_and_kills_processes() {
        let (controller, manager) = controller_with(config());
        let mut rx = controller.subscribe();

        let adapter_pid = controller.launch_adapter().await.unwrap();
        controller.launch_debugger("/tmp/build/sketch.elf", "/tmp/build").await.unwrap();
        let debugger = manager.take(ProcessRole::Debugger);

        controller.terminate().await.unwrap();
        assert_eq!(controller.state().await, SessionState::Terminated);
        assert_eq!(manager.terminated(), vec![debugger.pid, adapter_pid]);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());

        let err = controller.halt().await.unwrap_err();
        assert!(matches!(err, BridgeError::TargetUnavailable(_)));

        // A fresh session may start after termination.
        controller.launch_adapter().await.unwrap();
        assert_eq!(controller.state().await, SessionState::AdapterStarting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_correlates_answer() {
        let (controller, manager) = controller_with(config());
        controller.launch_debugger("/tmp/build/sketch.elf", "/tmp/build").await.unwrap();
        let mut debugger = manager.take(ProcessRole::Debugger);

        let watcher = controller.watch("$1 = ");
        controller.show_value("counter").await.unwrap();
        assert_eq!(debugger.read_stdin().await, "print counter\n");
        debugger.stdout.write_all(b"$1 = 17\n").await.unwrap();

        let answer = watcher.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(answer.payload, "$1 = 17\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_while_write_blocked() {
        let (controller, manager) = controller_with(config());
        controller.launch_debugger("/tmp/build/sketch.elf", "/tmp/build").await.unwrap();
        // Keep the pipe open but never read from it
        let _debugger = manager.take(ProcessRole::Debugger);

        let pending = tokio::spawn({
            let controller = controller.clone();
            async move { controller.show_value(&"x".repeat(8192)).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!pending.is_finished());

        tokio::time::timeout(Duration::from_secs(3), controller.terminate())
            .await
            .expect("terminate blocked behind a stalled write")
            .unwrap();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(BridgeError::TargetUnavailable(_))));
        assert_eq!(controller.state().await, SessionState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_after_debugger_exits() {
        let (controller, manager) = controller_with(config());
        let mut rx = controller.subscribe();
        controller.launch_debugger("/tmp/build/sketch.elf", "/tmp/build").await.unwrap();
        manager.take(ProcessRole::Debugger).exit();

        assert_eq!(controller.state().await, SessionState::Terminated);

        // The pending startup step still reports the lost target
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "debug_err");
        assert!(event.payload.contains("Stale debug target"));

        controller.launch_debugger("/tmp/build/sketch.elf", "/tmp/build").await.unwrap();
        assert_eq!(controller.state().await, SessionState::DebuggerStarting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_keeps_phase_while_adapter_runs() {
        let (controller, manager) = controller_with(config());
        controller.launch_adapter().await.unwrap();
        controller.launch_debugger("/tmp/build/sketch.elf", "/tmp/build").await.unwrap();
        manager.take(ProcessRole::Debugger).exit();

        assert_eq!(controller.state().await, SessionState::DebuggerStarting);
        let err = controller.halt().await.unwrap_err();
        assert!(matches!(err, BridgeError::TargetUnavailable(_)));

        manager.take(ProcessRole::Adapter).exit();
        assert_eq!(controller.state().await, SessionState::Terminated);
    }

    fn endpoint_config(port: u16) -> BridgeConfig {
        BridgeConfig::builder()
            .tools(ToolLayout::new("/opt/tools/openocd", "/opt/tools/gdb"))
            .startup(StartupConfig {
                symbol_load_delay_ms: 50,
                attach_delay_ms: 1500,
                poll_interval_ms: 20,
                readiness: ReadinessCheck::Endpoint,
            })
            .remote(RemoteTarget {
                host: "127.0.0.1".to_string(),
                port,
            })
            .build()
            .unwrap()
    }

    /// Time from the symbol load announcement to the attach announcement
    async fn load_to_attach(controller: &SessionController<FakeProcessManager>) -> Duration {
        let mut rx = controller.subscribe();
        controller.launch_debugger("/tmp/build/sketch.elf", "/tmp/build").await.unwrap();

        let load = next_data(&mut rx).await;
        assert!(load.payload.starts_with("file "));
        let loaded = Instant::now();
        let attach = next_data(&mut rx).await;
        assert!(attach.payload.starts_with("target remote 127.0.0.1:"));
        loaded.elapsed()
    }

    #[tokio::test]
    async fn test_endpoint_open_attaches_early() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (controller, manager) = controller_with(endpoint_config(port));

        let waited = load_to_attach(&controller).await;
        assert!(waited < Duration::from_millis(1000), "attached after {waited:?}");

        let mut debugger = manager.take(ProcessRole::Debugger);
        let written = debugger.read_stdin().await;
        assert!(written.contains(&format!("target remote 127.0.0.1:{port}\n")));
        controller.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_endpoint_closed_attaches_after_budget() {
        // Grab a free port, then release it so nothing listens there
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let (controller, _manager) = controller_with(endpoint_config(port));

        let waited = load_to_attach(&controller).await;
        assert!(waited >= Duration::from_millis(1300), "attached after {waited:?}");
        tokio::task::yield_now().await;
        assert_eq!(controller.state().await, SessionState::Attached);
        controller.terminate().await.unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = BridgeConfig::builder()
            .tools(ToolLayout::new("openocd", "gdb"))
            .event_capacity(0usize)
            .build()
            .unwrap();
        let result = SessionController::new(config, Arc::new(FakeProcessManager::new()));
        assert!(matches!(result, Err(BridgeError::Configuration(_))));
    }
}
