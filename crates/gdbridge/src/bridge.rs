use crate::factory::{PlatformProcessManager, PlatformProcessManagerFactory};
use gdbridge_core::{
    BridgeConfig, BridgeError, DebugEvent, DomainDescriptor, OutputWatcher, ProcessId,
    ProcessManagerFactory, SessionController, SessionState, dispatch,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Session controller bound to the process manager of the current platform
pub type PlatformController = SessionController<PlatformProcessManager>;

/// High-level platform-independent debug bridge
#[derive(Clone)]
pub struct DebugBridge {
    inner: PlatformController,
}

impl DebugBridge {
    /// Create a bridge with the given configuration
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        let manager = PlatformProcessManagerFactory::create_process_manager(config.shutdown_grace());
        info!(
            platform = PlatformProcessManagerFactory::platform_name(),
            domain = %config.domain,
            "Creating debug bridge"
        );

        Ok(Self {
            inner: SessionController::new(config, Arc::new(manager))?,
        })
    }

    /// Typed controller, usable wherever a [`gdbridge_core::DebugDomain`] is expected
    pub fn controller(&self) -> &PlatformController {
        &self.inner
    }

    pub fn descriptor(&self) -> DomainDescriptor {
        DomainDescriptor::debug(self.inner.config().domain.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DebugEvent> {
        self.inner.subscribe()
    }

    pub fn watch(&self, needle: impl Into<String>) -> OutputWatcher {
        self.inner.watch(needle)
    }

    pub async fn state(&self) -> SessionState {
        self.inner.state().await
    }

    pub async fn launch_adapter(&self) -> Result<ProcessId, BridgeError> {
        self.inner.launch_adapter().await
    }

    pub async fn launch_debugger(
        &self,
        symbol_file: impl AsRef<Path>,
        working_folder: impl AsRef<Path>,
    ) -> Result<(), BridgeError> {
        self.inner.launch_debugger(symbol_file, working_folder).await
    }

    pub async fn halt(&self) -> Result<(), BridgeError> {
        self.inner.halt().await
    }

    pub async fn restart(&self) -> Result<(), BridgeError> {
        self.inner.restart().await
    }

    pub async fn step_next_line(&self) -> Result<(), BridgeError> {
        self.inner.step_next_line().await
    }

    pub async fn step_next_bp(&self) -> Result<(), BridgeError> {
        self.inner.step_next_bp().await
    }

    pub async fn show_breakpoints(&self) -> Result<(), BridgeError> {
        self.inner.show_breakpoints().await
    }

    pub async fn set_breakpoint(&self, line: u32) -> Result<(), BridgeError> {
        self.inner.set_breakpoint(line).await
    }

    pub async fn show_value(&self, variable: &str) -> Result<(), BridgeError> {
        self.inner.show_value(variable).await
    }

    pub fn tmp_folder(&self) -> PathBuf {
        self.inner.tmp_folder()
    }

    /// Invoke a command by name, see [`gdbridge_core::dispatch`]
    pub async fn dispatch(&self, name: &str, args: &[Value]) -> Result<Value, BridgeError> {
        dispatch(&self.inner, name, args).await
    }

    /// Terminate the debugger and the adapter
    pub async fn terminate(&self) -> Result<(), BridgeError> {
        self.inner.terminate().await
    }
}
