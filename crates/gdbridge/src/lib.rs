//! gdbridge - drive an on-chip debug adapter and a command-line debugger
//!
//! [`DebugBridge`] binds the platform-independent session controller from
//! `gdbridge-core` to the process manager of the current platform.

mod bridge;
mod factory;
pub mod telemetry;

pub use bridge::{DebugBridge, PlatformController};
pub use factory::{PlatformProcessManager, PlatformProcessManagerFactory};

// Re-export core functionality
pub use gdbridge_core::*;
