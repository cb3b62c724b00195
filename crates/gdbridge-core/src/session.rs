//! Debug session lifecycle
//!
//! A session owns at most one adapter and one debugger process. Its state
//! only moves along the transitions allowed by [`SessionState::can_transition_to`].

use crate::command::{CommandChannel, DebugCommand, WriteReceipt};
use crate::error::BridgeError;
use crate::process::{ProcessHandle, ProcessId, ProcessRole};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Nothing launched yet
    Idle,
    /// Adapter spawned, no debugger yet
    AdapterStarting,
    /// Debugger spawned, startup sequence pending
    DebuggerStarting,
    /// Startup sequence finished, debugger attached to the remote target
    Attached,
    /// All processes torn down
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AdapterStarting => write!(f, "adapter-starting"),
            Self::DebuggerStarting => write!(f, "debugger-starting"),
            Self::Attached => write!(f, "attached"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

impl SessionState {
    pub fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Idle | Terminated, AdapterStarting)
                | (_, DebuggerStarting)
                | (DebuggerStarting, Attached)
                | (AdapterStarting | DebuggerStarting | Attached | Terminated, Terminated)
        )
    }

    /// State after an adapter launch; a running debugger keeps its phase
    pub fn after_adapter_launch(self) -> SessionState {
        match self {
            SessionState::Idle | SessionState::Terminated | SessionState::AdapterStarting => {
                SessionState::AdapterStarting
            }
            other => other,
        }
    }
}

/// A spawned process with its liveness-checkable handle
pub(crate) struct LiveProcess {
    pub(crate) handle: Box<dyn ProcessHandle>,
    pub(crate) pid: Option<ProcessId>,
}

impl LiveProcess {
    pub(crate) fn new(handle: Box<dyn ProcessHandle>) -> Self {
        let pid = handle.get_pid();
        Self { handle, pid }
    }

    pub(crate) async fn is_running(&self) -> bool {
        self.handle.is_running().await
    }
}

pub(crate) struct DebuggerProcess {
    pub(crate) process: LiveProcess,
    pub(crate) channel: CommandChannel,
    /// Cancels the startup sequence scheduled for this debugger and stops
    /// its command writer
    pub(crate) closed: CancellationToken,
}

/// Owned session object: the single source of truth for process handles
pub(crate) struct Session {
    state: SessionState,
    pub(crate) adapter: Option<LiveProcess>,
    pub(crate) debugger: Option<DebuggerProcess>,
    /// Increments with every debugger launch so stale sequencers can tell
    /// they no longer own the debugger
    pub(crate) generation: u64,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            state: SessionState::Idle,
            adapter: None,
            debugger: None,
            generation: 0,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    /// Drop handles of processes that exited on their own. Once nothing is
    /// left running the session reads as terminated.
    ///
    /// Unlike [`reap`](Self::reap) this leaves a pending startup sequence
    /// alone, so its next step still reports the stale target.
    pub(crate) async fn refresh(&mut self) {
        if self.debugger.is_some() && !self.has_live(ProcessRole::Debugger).await {
            if let Some(debugger) = self.debugger.take() {
                info!(pid = ?debugger.process.pid, "Debugger exited");
            }
        }
        if self.adapter.is_some() && !self.has_live(ProcessRole::Adapter).await {
            if let Some(adapter) = self.adapter.take() {
                info!(pid = ?adapter.pid, "Adapter exited");
            }
        }
        if self.adapter.is_none() && self.debugger.is_none() {
            self.mark_terminated();
        }
    }

    pub(crate) fn transition(&mut self, to: SessionState) -> Result<(), BridgeError> {
        if !self.state.can_transition_to(to) {
            return Err(BridgeError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        debug!(from = %self.state, to = %to, "Session transition");
        self.state = to;
        Ok(())
    }

    pub(crate) fn set_adapter(&mut self, process: LiveProcess) {
        self.state = self.state.after_adapter_launch();
        self.adapter = Some(process);
    }

    /// Install a new debugger and return its generation
    pub(crate) fn set_debugger(&mut self, debugger: DebuggerProcess) -> Result<u64, BridgeError> {
        self.transition(SessionState::DebuggerStarting)?;
        self.generation += 1;
        self.debugger = Some(debugger);
        Ok(self.generation)
    }

    /// Whether a live process currently holds `role`
    pub(crate) async fn has_live(&self, role: ProcessRole) -> bool {
        match role {
            ProcessRole::Adapter => match &self.adapter {
                Some(process) => process.is_running().await,
                None => false,
            },
            ProcessRole::Debugger => match &self.debugger {
                Some(debugger) => debugger.process.is_running().await,
                None => false,
            },
        }
    }

    /// Drop a handle whose process has already exited
    pub(crate) async fn reap(&mut self, role: ProcessRole) {
        if self.has_live(role).await {
            return;
        }
        let reaped = match role {
            ProcessRole::Adapter => self.adapter.take().map(|p| p.pid),
            ProcessRole::Debugger => self.debugger.take().map(|d| {
                d.closed.cancel();
                d.process.pid
            }),
        };
        if let Some(pid) = reaped {
            info!(role = %role, pid = ?pid, "Reaped exited process handle");
        }
    }

    /// Queue a command for the live debugger.
    ///
    /// Only the queueing happens under the caller's lock; await the receipt
    /// after releasing it.
    pub(crate) async fn enqueue(&self, command: &DebugCommand) -> Result<WriteReceipt, BridgeError> {
        let debugger = self
            .debugger
            .as_ref()
            .ok_or_else(|| BridgeError::target_unavailable("no debugger has been launched"))?;

        if !debugger.process.is_running().await {
            return Err(BridgeError::target_unavailable(format!(
                "debugger process {} has exited",
                debugger
                    .process
                    .pid
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "<unknown>".to_string())
            )));
        }

        debugger.channel.enqueue(command)
    }

    /// Empty the session and hand back the processes that need terminating
    pub(crate) fn take_all(&mut self) -> (Option<LiveProcess>, Option<DebuggerProcess>) {
        if let Some(debugger) = &self.debugger {
            debugger.closed.cancel();
        }
        (self.adapter.take(), self.debugger.take())
    }

    pub(crate) fn mark_terminated(&mut self) {
        if self.state != SessionState::Idle {
            self.state = SessionState::Terminated;
        }
    }
}
