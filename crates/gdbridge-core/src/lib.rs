//! gdbridge core - platform-independent session control for embedded debugging
//!
//! This crate drives a hardware debug adapter and a command-line debugger,
//! relays the debugger's output as events, and exposes the debug actions as a
//! typed domain. Process spawning and termination are delegated to the
//! platform crates through [`ProcessManager`].

mod command;
mod config;
mod controller;
mod error;
mod events;
mod process;
mod registry;
mod relay;
mod sequencer;
mod session;

#[cfg(test)]
mod test_support;

pub use command::*;
pub use config::*;
pub use controller::*;
pub use error::*;
pub use events::*;
pub use process::*;
pub use registry::*;
pub use relay::{Utf8ChunkCodec, drain_to_log, relay};
pub use session::SessionState;
