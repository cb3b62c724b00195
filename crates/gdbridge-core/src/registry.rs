//! Typed command registry
//!
//! [`DebugDomain`] is the typed surface hosts call directly. Hosts that route
//! commands by name (a message bus, an IPC bridge) use [`dispatch`], which
//! checks arity and argument types before invoking the typed method.

use crate::error::BridgeError;
use crate::events::{DebugEvent, DomainId, EventChannel};
use crate::process::ProcessId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Int,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    pub returns: Option<ParamSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub payload: ParamSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[display("{major}.{minor}")]
pub struct DomainVersion {
    pub major: u32,
    pub minor: u32,
}

/// Everything a host needs to register the debug domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainDescriptor {
    pub domain: DomainId,
    pub version: DomainVersion,
    pub commands: Vec<CommandSpec>,
    pub events: Vec<EventSpec>,
}

const fn param(name: &'static str, kind: ParamType, description: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        description,
    }
}

fn command(name: &'static str, description: &'static str, params: Vec<ParamSpec>, returns: Option<ParamSpec>) -> CommandSpec {
    CommandSpec {
        name,
        description,
        params,
        returns,
    }
}

impl DomainDescriptor {
    pub fn debug(domain: DomainId) -> Self {
        use ParamType::*;

        let commands = vec![
            command(
                "launch_adapter",
                "Start the hardware debug adapter",
                vec![],
                Some(param("pid", String, "Process id of the adapter")),
            ),
            command(
                "launch_debugger",
                "Start the debugger and schedule symbol loading and remote attach",
                vec![
                    param("symbol_file", String, "Path of the compiled program with debug symbols"),
                    param("working_folder", String, "Folder holding sources and build output"),
                ],
                None,
            ),
            command("halt", "Reset and halt the target", vec![], None),
            command("restart", "Reset and run the target", vec![], None),
            command("step_next_line", "Step to the next source line", vec![], None),
            command("step_next_bp", "Continue to the next breakpoint", vec![], None),
            command("show_breakpoints", "List breakpoints", vec![], None),
            command(
                "set_breakpoint",
                "Set a breakpoint at a source line",
                vec![param("line", Int, "Line number")],
                None,
            ),
            command(
                "show_value",
                "Print the value of a variable",
                vec![param("variable", String, "Variable name")],
                None,
            ),
            command(
                "get_tmp_folder",
                "Return the system temporary folder",
                vec![],
                Some(param("path", String, "Temporary folder path")),
            ),
            command("terminate", "Terminate the debugger and the adapter", vec![], None),
        ];

        let events = [EventChannel::Data, EventChannel::Error]
            .into_iter()
            .map(|channel| EventSpec {
                name: channel.event_name(),
                description: match channel {
                    EventChannel::Data => "Debugger standard output and command echoes",
                    EventChannel::Error => "Debugger standard error and startup faults",
                },
                payload: param("text", String, "Output text"),
            })
            .collect();

        Self {
            domain,
            version: DomainVersion { major: 0, minor: 1 },
            commands,
            events,
        }
    }

    pub fn command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.name == name)
    }
}

/// The debug domain: one typed method per command
#[async_trait]
pub trait DebugDomain: Send + Sync {
    fn descriptor(&self) -> DomainDescriptor;

    fn subscribe(&self) -> broadcast::Receiver<DebugEvent>;

    async fn launch_adapter(&self) -> Result<ProcessId, BridgeError>;

    async fn launch_debugger(&self, symbol_file: &Path, working_folder: &Path) -> Result<(), BridgeError>;

    async fn halt(&self) -> Result<(), BridgeError>;

    async fn restart(&self) -> Result<(), BridgeError>;

    async fn step_next_line(&self) -> Result<(), BridgeError>;

    async fn step_next_bp(&self) -> Result<(), BridgeError>;

    async fn show_breakpoints(&self) -> Result<(), BridgeError>;

    async fn set_breakpoint(&self, line: u32) -> Result<(), BridgeError>;

    async fn show_value(&self, variable: &str) -> Result<(), BridgeError>;

    async fn terminate(&self) -> Result<(), BridgeError>;

    fn tmp_folder(&self) -> PathBuf;
}

/// Invoke a command by name with positional JSON arguments.
///
/// Unknown names fail with [`BridgeError::UnknownCommand`], wrong arity or
/// argument types with [`BridgeError::InvalidArgument`]. Nothing is written
/// to the debugger when validation fails.
pub async fn dispatch<D>(domain: &D, name: &str, args: &[Value]) -> Result<Value, BridgeError>
where
    D: DebugDomain + ?Sized,
{
    let descriptor = domain.descriptor();
    let spec = descriptor
        .command(name)
        .ok_or_else(|| BridgeError::UnknownCommand(name.to_string()))?;

    if args.len() != spec.params.len() {
        return Err(BridgeError::InvalidArgument(format!(
            "{name} takes {} argument(s), got {}",
            spec.params.len(),
            args.len()
        )));
    }

    let args = Args { command: name, spec, values: args };

    match name {
        "launch_adapter" => Ok(Value::String(domain.launch_adapter().await?.to_string())),
        "launch_debugger" => {
            let symbol_file = args.string(0)?;
            let working_folder = args.string(1)?;
            domain
                .launch_debugger(Path::new(symbol_file), Path::new(working_folder))
                .await?;
            Ok(Value::Null)
        }
        "halt" => domain.halt().await.map(|()| Value::Null),
        "restart" => domain.restart().await.map(|()| Value::Null),
        "step_next_line" => domain.step_next_line().await.map(|()| Value::Null),
        "step_next_bp" => domain.step_next_bp().await.map(|()| Value::Null),
        "show_breakpoints" => domain.show_breakpoints().await.map(|()| Value::Null),
        "set_breakpoint" => {
            let line = args.line(0)?;
            domain.set_breakpoint(line).await.map(|()| Value::Null)
        }
        "show_value" => {
            let variable = args.string(0)?;
            domain.show_value(variable).await.map(|()| Value::Null)
        }
        "get_tmp_folder" => Ok(Value::String(domain.tmp_folder().display().to_string())),
        "terminate" => domain.terminate().await.map(|()| Value::Null),
        other => Err(BridgeError::UnknownCommand(other.to_string())),
    }
}

struct Args<'a> {
    command: &'a str,
    spec: &'a CommandSpec,
    values: &'a [Value],
}

impl<'a> Args<'a> {
    fn invalid(&self, index: usize, expected: &str) -> BridgeError {
        BridgeError::InvalidArgument(format!(
            "{}: argument `{}` must be {expected}, got {}",
            self.command, self.spec.params[index].name, self.values[index]
        ))
    }

    fn string(&self, index: usize) -> Result<&'a str, BridgeError> {
        self.values[index]
            .as_str()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| self.invalid(index, "a non-empty string"))
    }

    fn line(&self, index: usize) -> Result<u32, BridgeError> {
        self.values[index]
            .as_u64()
            .filter(|line| *line > 0)
            .and_then(|line| u32::try_from(line).ok())
            .ok_or_else(|| self.invalid(index, "a positive line number"))
    }
}
