use crate::error::BridgeError;
use crate::events::DomainId;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_DELAY_MS: u64 = 60_000;

/// How the sequencer decides the adapter endpoint is ready before attaching
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ReadinessCheck {
    /// Sleep the attach delay, then attach unconditionally
    FixedDelay,
    /// Poll the remote endpoint until it accepts a connection; the attach
    /// delay becomes the upper bound after which the sequencer attaches anyway
    #[default]
    Endpoint,
}

/// Timing of the startup sequence run after every debugger launch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartupConfig {
    /// Delay between debugger start and the symbol file load (in milliseconds)
    #[serde(default = "default_symbol_load_delay_ms")]
    pub symbol_load_delay_ms: u64,

    /// Delay (or polling budget) between symbol load and remote attach (in milliseconds)
    #[serde(default = "default_attach_delay_ms")]
    pub attach_delay_ms: u64,

    /// Interval between endpoint connection attempts (in milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub readiness: ReadinessCheck,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            symbol_load_delay_ms: default_symbol_load_delay_ms(),
            attach_delay_ms: default_attach_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            readiness: ReadinessCheck::default(),
        }
    }
}

impl StartupConfig {
    /// Two fixed delays and no endpoint probing
    pub fn fixed_delay() -> Self {
        Self {
            readiness: ReadinessCheck::FixedDelay,
            ..Default::default()
        }
    }

    pub fn symbol_load_delay(&self) -> Duration {
        Duration::from_millis(self.symbol_load_delay_ms)
    }

    pub fn attach_delay(&self) -> Duration {
        Duration::from_millis(self.attach_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.symbol_load_delay_ms > MAX_DELAY_MS || self.attach_delay_ms > MAX_DELAY_MS {
            return Err(BridgeError::Configuration(
                "startup delays should not exceed 60 seconds".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(BridgeError::Configuration(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Network endpoint the adapter exposes and the debugger attaches to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteTarget {
    #[serde(default = "default_remote_host")]
    pub host: String,
    #[serde(default = "default_remote_port")]
    pub port: u16,
}

impl Default for RemoteTarget {
    fn default() -> Self {
        Self {
            host: default_remote_host(),
            port: default_remote_port(),
        }
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// What a launch does when a live process already holds its role
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LaunchPolicy {
    /// Refuse the launch with `SessionActive`
    #[default]
    Reject,
    /// Terminate the live process, then launch
    Replace,
}

/// Locations of the adapter and debugger executables and their support files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolLayout {
    pub adapter: PathBuf,
    pub adapter_scripts: PathBuf,
    pub adapter_config: PathBuf,
    pub debugger: PathBuf,
    /// Flag used to hand the working folder to the debugger as a source directory
    pub source_dir_flag: Option<String>,
    /// Passed to the adapter ahead of the script and config arguments
    pub extra_adapter_args: Vec<String>,
    pub extra_debugger_args: Vec<String>,
}

impl ToolLayout {
    /// Layout of the tools bundled under an IDE installation root.
    ///
    /// Path separators and the executable suffix follow the host platform.
    pub fn bundled(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let ocd = ["hardware", "tools", "OpenOCD-0.9.0-arduino"];

        Self {
            adapter: executable(join(root, &ocd).join("bin"), "openocd"),
            adapter_scripts: join(root, &ocd).join("share").join("openocd").join("scripts"),
            adapter_config: join(
                root,
                &[
                    "hardware",
                    "arduino",
                    "samd",
                    "variants",
                    "arduino_zero",
                    "openocd_scripts",
                    "arduino_zero.cfg",
                ],
            ),
            debugger: executable(
                join(root, &["hardware", "tools", "samd", "bin"]),
                "arm-none-eabi-gdb",
            ),
            source_dir_flag: Some("-d".to_string()),
            extra_adapter_args: Vec::new(),
            extra_debugger_args: Vec::new(),
        }
    }

    /// Layout with explicit executables and no adapter support files
    pub fn new(adapter: impl Into<PathBuf>, debugger: impl Into<PathBuf>) -> Self {
        Self {
            adapter: adapter.into(),
            adapter_scripts: PathBuf::new(),
            adapter_config: PathBuf::new(),
            debugger: debugger.into(),
            source_dir_flag: Some("-d".to_string()),
            extra_adapter_args: Vec::new(),
            extra_debugger_args: Vec::new(),
        }
    }

    /// Arguments for the adapter: script search dir and target configuration
    pub fn adapter_args(&self) -> Vec<String> {
        let mut args = self.extra_adapter_args.clone();
        if !self.adapter_scripts.as_os_str().is_empty() {
            args.push("-s".to_string());
            args.push(self.adapter_scripts.to_string_lossy().into_owned());
        }
        if !self.adapter_config.as_os_str().is_empty() {
            args.push("-f".to_string());
            args.push(self.adapter_config.to_string_lossy().into_owned());
        }
        args
    }

    pub fn debugger_args(&self, working_folder: &Path) -> Vec<String> {
        let mut args = self.extra_debugger_args.clone();
        if let Some(flag) = &self.source_dir_flag {
            args.push(flag.clone());
            args.push(working_folder.to_string_lossy().into_owned());
        }
        args
    }
}

fn join(root: &Path, segments: &[&str]) -> PathBuf {
    segments
        .iter()
        .fold(root.to_path_buf(), |path, segment| path.join(segment))
}

fn executable(dir: PathBuf, name: &str) -> PathBuf {
    dir.join(format!("{name}{}", std::env::consts::EXE_SUFFIX))
}

/// Main bridge configuration
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into))]
pub struct BridgeConfig {
    #[builder(default)]
    pub domain: DomainId,
    pub tools: ToolLayout,
    #[builder(default)]
    pub startup: StartupConfig,
    #[builder(default)]
    pub remote: RemoteTarget,
    #[builder(default)]
    pub launch_policy: LaunchPolicy,
    #[builder(default = "default_event_capacity()")]
    pub event_capacity: usize,
    #[builder(default = "default_shutdown_grace_ms()")]
    pub shutdown_grace_ms: u64,
    #[builder(default)]
    #[builder(setter(custom))]
    pub env: HashMap<String, String>,
}

impl BridgeConfig {
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), BridgeError> {
        self.startup.validate()?;

        if self.event_capacity == 0 {
            return Err(BridgeError::Configuration(
                "event_capacity must be greater than zero".to_string(),
            ));
        }

        if self.tools.debugger.as_os_str().is_empty() {
            return Err(BridgeError::Configuration(
                "debugger executable path is empty".to_string(),
            ));
        }

        if self.shutdown_grace_ms > MAX_DELAY_MS {
            return Err(BridgeError::Configuration(
                "shutdown_grace_ms should not exceed 60 seconds".to_string(),
            ));
        }

        Ok(())
    }
}

impl BridgeConfigBuilder {
    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());
        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }
}

// Default value functions for serde
fn default_symbol_load_delay_ms() -> u64 {
    2_000
}
fn default_attach_delay_ms() -> u64 {
    2_000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_remote_host() -> String {
    "localhost".to_string()
}
fn default_remote_port() -> u16 {
    3333
}
fn default_event_capacity() -> usize {
    256
}
fn default_shutdown_grace_ms() -> u64 {
    2_000
}
