mod unix_process_manager;

pub use unix_process_manager::{UnixProcessHandle, UnixProcessManager};

pub struct UnixProcessManagerFactory;

#[cfg(unix)]
impl gdbridge_core::ProcessManagerFactory for UnixProcessManagerFactory {
    type Manager = UnixProcessManager;

    fn create_process_manager(grace_period: std::time::Duration) -> UnixProcessManager {
        UnixProcessManager::new(grace_period)
    }

    fn platform_name() -> &'static str {
        "unix"
    }
}
