//! Startup sequencer: loads symbols, waits for the adapter, attaches.
//!
//! The adapter opens its endpoint with no notification, so the sequencer
//! either sleeps a fixed delay or polls the endpoint, bounded by that delay.

use crate::command::DebugCommand;
use crate::config::{ReadinessCheck, RemoteTarget, StartupConfig};
use crate::error::BridgeError;
use crate::events::EventHub;
use crate::session::{Session, SessionState};
use backon::{ConstantBuilder, Retryable};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) struct StartupSequencer {
    pub(crate) session: Arc<Mutex<Session>>,
    pub(crate) hub: EventHub,
    pub(crate) startup: StartupConfig,
    pub(crate) remote: RemoteTarget,
    pub(crate) symbol_file: PathBuf,
    /// Debugger generation this sequence was scheduled for
    pub(crate) generation: u64,
    pub(crate) cancel: CancellationToken,
}

impl StartupSequencer {
    /// Run the sequence in the background; it fires exactly once.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(generation = self.generation, "Startup sequence cancelled");
                }
                _ = self.run() => {}
            }
        })
    }

    async fn run(&self) {
        tokio::time::sleep(self.startup.symbol_load_delay()).await;
        info!(symbol_file = %self.symbol_file.display(), "Loading symbol file");
        if self
            .step(DebugCommand::LoadSymbols(self.symbol_file.clone()))
            .await
            .is_err()
        {
            return;
        }

        self.wait_for_adapter().await;

        info!(remote = %self.remote, "Attaching to remote target");
        if self
            .step(DebugCommand::AttachRemote(self.remote.to_string()))
            .await
            .is_err()
        {
            return;
        }

        let mut session = self.session.lock().await;
        if session.generation == self.generation {
            if let Err(e) = session.transition(SessionState::Attached) {
                warn!(error = %e, "Could not mark session attached");
            }
        }
    }

    /// Send one startup command if the debugger it was scheduled for is still alive.
    async fn step(&self, command: DebugCommand) -> Result<(), BridgeError> {
        let queued = {
            let session = self.session.lock().await;
            if self.cancel.is_cancelled() || session.generation != self.generation {
                return Err(BridgeError::stale_target("debugger was replaced or terminated"));
            }
            session.enqueue(&command).await
        };

        let written = match queued {
            Ok(receipt) => receipt.written().await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                self.hub.data(command.announcement());
                Ok(())
            }
            Err(e) => {
                let stale = BridgeError::stale_target(format!("startup command `{command}` not sent: {e}"));
                warn!(error = %stale, "Startup step found no live debugger");
                self.hub.error(stale.to_string());
                Err(stale)
            }
        }
    }

    async fn wait_for_adapter(&self) {
        let budget = self.startup.attach_delay();

        match self.startup.readiness {
            ReadinessCheck::FixedDelay => tokio::time::sleep(budget).await,
            ReadinessCheck::Endpoint => {
                let host = self.remote.host.as_str();
                let port = self.remote.port;
                let interval = self.startup.poll_interval();
                let attempts = (budget.as_millis() / interval.as_millis().max(1)).max(1) as usize;

                let connect = || async move { TcpStream::connect((host, port)).await.map(drop) };
                let polled = tokio::time::timeout(
                    budget,
                    connect
                        .retry(
                            ConstantBuilder::default()
                                .with_delay(interval)
                                .with_max_times(attempts),
                        )
                        .notify(|e, after| {
                            debug!(error = %e, retry_in = ?after, "Adapter endpoint not ready");
                        }),
                )
                .await;

                match polled {
                    Ok(Ok(())) => info!(remote = %self.remote, "Adapter endpoint accepting connections"),
                    Ok(Err(e)) => {
                        warn!(remote = %self.remote, error = %e, "Adapter endpoint never accepted, attaching anyway")
                    }
                    Err(_) => {
                        warn!(remote = %self.remote, budget = ?budget, "Adapter endpoint still closed after budget, attaching anyway")
                    }
                }
            }
        }
    }
}
