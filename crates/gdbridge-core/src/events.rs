//! Event types published by the bridge and the hub that fans them out.
//!
//! Events are raw text. Announcements are echoes of what was written to the
//! debugger, and real answers arrive later on the same `Data` channel with no
//! link to the command that caused them.

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::warn;

/// Name a group of commands and events is registered under
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display, derive_more::From,
)]
#[serde(transparent)]
pub struct DomainId(String);

impl DomainId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DomainId {
    fn default() -> Self {
        Self::new("gdbridge.debug")
    }
}

impl From<&str> for DomainId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Output channel an event was published on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventChannel {
    /// Debugger stdout and command announcements
    Data,
    /// Debugger stderr and stream faults
    Error,
}

impl EventChannel {
    /// Event name as declared in the domain descriptor
    pub fn event_name(self) -> &'static str {
        match self {
            EventChannel::Data => "debug_data",
            EventChannel::Error => "debug_err",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugEvent {
    pub domain: DomainId,
    pub channel: EventChannel,
    pub payload: String,
}

impl DebugEvent {
    pub fn name(&self) -> &'static str {
        self.channel.event_name()
    }

    pub fn is_data(&self) -> bool {
        self.channel == EventChannel::Data
    }
}

/// Fan-out point for every event of one domain
#[derive(Clone)]
pub struct EventHub {
    domain: DomainId,
    sender: broadcast::Sender<DebugEvent>,
}

impl EventHub {
    pub fn new(domain: DomainId, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { domain, sender }
    }

    pub fn domain(&self) -> &DomainId {
        &self.domain
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DebugEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, channel: EventChannel, payload: impl Into<String>) {
        let event = DebugEvent {
            domain: self.domain.clone(),
            channel,
            payload: payload.into(),
        };
        // No subscribers is not an error: the event is simply unobserved.
        let _ = self.sender.send(event);
    }

    pub fn data(&self, payload: impl Into<String>) {
        self.publish(EventChannel::Data, payload);
    }

    pub fn error(&self, payload: impl Into<String>) {
        self.publish(EventChannel::Error, payload);
    }

    /// Watch for the first data event containing `needle`.
    ///
    /// Create the watcher before sending the command whose output it waits for,
    /// otherwise a fast answer may be missed.
    pub fn watch(&self, needle: impl Into<String>) -> OutputWatcher {
        OutputWatcher {
            needle: needle.into(),
            receiver: self.subscribe(),
        }
    }
}

/// Caller-side correlation of output text with a command that was sent
pub struct OutputWatcher {
    needle: String,
    receiver: broadcast::Receiver<DebugEvent>,
}

impl OutputWatcher {
    pub async fn wait(mut self, timeout: Duration) -> Result<DebugEvent, BridgeError> {
        let needle = self.needle.clone();
        let search = async {
            loop {
                match self.receiver.recv().await {
                    Ok(event) if event.is_data() && event.payload.contains(&needle) => {
                        return Ok(event);
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Output watcher lagged behind the event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(BridgeError::target_unavailable(
                            "event stream closed while waiting for output",
                        ));
                    }
                }
            }
        };

        tokio::time::timeout(timeout, search)
            .await
            .map_err(|_| BridgeError::Timeout(format!("no output containing {needle:?}")))?
    }
}
