//! Windows-specific process management implementation

mod windows_process_manager;

pub use windows_process_manager::{WindowsProcessHandle, WindowsProcessManager};

/// Windows-specific process manager factory
pub struct WindowsProcessManagerFactory;

impl gdbridge_core::ProcessManagerFactory for WindowsProcessManagerFactory {
    type Manager = WindowsProcessManager;

    fn create_process_manager(grace_period: std::time::Duration) -> WindowsProcessManager {
        WindowsProcessManager::new(grace_period)
    }

    fn platform_name() -> &'static str {
        "windows"
    }
}
