//! Debugger commands and the channel that writes them to the debugger's stdin.

use crate::error::BridgeError;
use crate::process::ProcessStdin;
use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One line of the debugger's command language
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugCommand {
    /// Load the symbol file of the program under debug
    LoadSymbols(PathBuf),
    /// Attach to the adapter's remote endpoint
    AttachRemote(String),
    Halt,
    Restart,
    Continue,
    Next,
    ListBreakpoints,
    SetBreakpoint(u32),
    Print(String),
}

impl DebugCommand {
    /// Text written to the debugger, without the line terminator
    pub fn render(&self) -> String {
        match self {
            DebugCommand::LoadSymbols(path) => format!("file {}", path.display()),
            DebugCommand::AttachRemote(endpoint) => format!("target remote {endpoint}"),
            DebugCommand::Halt => "monitor reset halt".to_string(),
            DebugCommand::Restart => "monitor reset run".to_string(),
            DebugCommand::Continue => "continue".to_string(),
            DebugCommand::Next => "next".to_string(),
            DebugCommand::ListBreakpoints => "info breakpoints".to_string(),
            DebugCommand::SetBreakpoint(line) => format!("b {line}"),
            DebugCommand::Print(variable) => format!("print {variable}"),
        }
    }

    /// Text announced as a data event once the command is written.
    ///
    /// Identical to [`render`](Self::render) except for `Restart`: it sends
    /// `monitor reset run` but is announced as `monitor reset resume`.
    pub fn announcement(&self) -> String {
        match self {
            DebugCommand::Restart => "monitor reset resume".to_string(),
            other => other.render(),
        }
    }
}

impl fmt::Display for DebugCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Sole writer of a debugger's stdin.
///
/// Commands are queued in call order and written by a dedicated task, so a
/// debugger that stops reading never blocks the caller that queued the command
/// while it holds other locks. Cancelling the token handed to [`new`](Self::new)
/// stops the writer; queued and in-flight commands then fail with
/// [`BridgeError::TargetUnavailable`].
pub struct CommandChannel {
    queue: mpsc::UnboundedSender<QueuedCommand>,
}

struct QueuedCommand {
    command: DebugCommand,
    done: oneshot::Sender<Result<(), BridgeError>>,
}

/// Completion of one queued command
pub struct WriteReceipt {
    command: DebugCommand,
    done: oneshot::Receiver<Result<(), BridgeError>>,
}

impl WriteReceipt {
    /// Wait until the command is written and flushed, or the writer gave up
    pub async fn written(self) -> Result<(), BridgeError> {
        self.done.await.unwrap_or_else(|_| {
            Err(BridgeError::target_unavailable(format!(
                "debugger closed before `{}` was written",
                self.command
            )))
        })
    }
}

impl CommandChannel {
    /// Spawn the writer task for `stdin`; it runs until `closed` is cancelled
    /// or the channel is dropped.
    pub fn new(stdin: ProcessStdin, closed: CancellationToken) -> Self {
        let (queue, pending) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(stdin, pending, closed));
        Self { queue }
    }

    /// Queue `command` behind every command queued before it
    pub fn enqueue(&self, command: &DebugCommand) -> Result<WriteReceipt, BridgeError> {
        let (done, receipt) = oneshot::channel();
        self.queue
            .send(QueuedCommand {
                command: command.clone(),
                done,
            })
            .map_err(|_| BridgeError::target_unavailable("debugger input closed"))?;
        Ok(WriteReceipt {
            command: command.clone(),
            done: receipt,
        })
    }

    /// Write `command` followed by `\n` and flush it.
    pub async fn send(&self, command: &DebugCommand) -> Result<(), BridgeError> {
        self.enqueue(command)?.written().await
    }
}

async fn write_loop(
    mut stdin: ProcessStdin,
    mut pending: mpsc::UnboundedReceiver<QueuedCommand>,
    closed: CancellationToken,
) {
    loop {
        let queued = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            next = pending.recv() => match next {
                Some(queued) => queued,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = closed.cancelled() => Err(BridgeError::target_unavailable(format!(
                "debugger closed while writing `{}`",
                queued.command
            ))),
            result = write_line(&mut stdin, &queued.command) => result,
        };
        let _ = queued.done.send(result);
    }
    debug!("Debugger command writer stopped");
}

async fn write_line(stdin: &mut ProcessStdin, command: &DebugCommand) -> Result<(), BridgeError> {
    let line = format!("{}\n", command.render());
    debug!(command = %command, "Writing debugger command");

    let result = async {
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }
    .await;

    result.map_err(|e| {
        warn!(command = %command, error = %e, "Debugger stdin write failed");
        match e.kind() {
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof => {
                BridgeError::target_unavailable(format!("debugger input closed: {e}"))
            }
            _ => BridgeError::target_unavailable(format!("failed to write {command:?}: {e}")),
        }
    })
}
