use gdbridge_core::ProcessManagerFactory;
use std::time::Duration;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformProcessManagerFactory;

impl ProcessManagerFactory for PlatformProcessManagerFactory {
    #[cfg(unix)]
    type Manager = gdbridge_unix::UnixProcessManager;

    #[cfg(windows)]
    type Manager = gdbridge_windows::WindowsProcessManager;

    fn create_process_manager(grace_period: Duration) -> Self::Manager {
        #[cfg(unix)]
        return gdbridge_unix::UnixProcessManagerFactory::create_process_manager(grace_period);

        #[cfg(windows)]
        return gdbridge_windows::WindowsProcessManagerFactory::create_process_manager(grace_period);
    }

    fn platform_name() -> &'static str {
        #[cfg(unix)]
        return gdbridge_unix::UnixProcessManagerFactory::platform_name();

        #[cfg(windows)]
        return gdbridge_windows::WindowsProcessManagerFactory::platform_name();
    }
}

/// Process manager used on the current platform
pub type PlatformProcessManager = <PlatformProcessManagerFactory as ProcessManagerFactory>::Manager;
