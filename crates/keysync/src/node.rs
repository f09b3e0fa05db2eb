//! A sync engine driven over a transport.
//!
//! The engine itself performs no I/O. [`SyncNode`] pairs it with a
//! [`Transport`], sending whatever the engine produces and feeding received
//! payloads back into it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use keysync_engine::{EngineConfig, HandleReport, PeerId, SyncEngine, Transport};
use keysync_store::DataSource;

use crate::error::{NodeError, Result};

/// Configuration for a sync node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Engine configuration.
    pub engine: EngineConfig,
    /// How long to wait for a peer message before treating the link as idle.
    pub message_timeout: Duration,
    /// Upper bound on sync rounds in [`SyncNode::run_until_quiet`].
    pub max_rounds: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            message_timeout: Duration::from_millis(500),
            max_rounds: 64,
        }
    }
}

/// What happened to one received message.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// The engine accepted the message.
    Handled { from: PeerId, report: HandleReport },
    /// The message was malformed or incompatible and was dropped.
    Rejected { from: PeerId, reason: String },
    /// No message arrived before the timeout.
    Idle,
}

/// A sync engine bound to a transport.
pub struct SyncNode<D: DataSource, T: Transport> {
    engine: SyncEngine<D>,
    transport: T,
    config: NodeConfig,
}

impl<D: DataSource, T: Transport> SyncNode<D, T> {
    /// Create a node over `data_source`, reachable through `transport`.
    pub fn new(data_source: Arc<D>, transport: T, config: NodeConfig) -> Self {
        Self {
            engine: SyncEngine::new(data_source, config.engine.clone()),
            transport,
            config,
        }
    }

    /// Wrap an existing engine, e.g. one restored with
    /// [`SyncEngine::with_state`].
    pub fn with_engine(engine: SyncEngine<D>, transport: T, config: NodeConfig) -> Self {
        Self {
            engine,
            transport,
            config,
        }
    }

    pub fn engine(&self) -> &SyncEngine<D> {
        &self.engine
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.transport.local_peer_id()
    }

    /// Send the next message for `peer`, if any. Returns whether one was sent.
    pub async fn sync_peer(&self, peer: PeerId, force: bool) -> Result<bool> {
        match self.engine.sync_with_peer(peer, force).await? {
            Some(payload) => {
                self.transport.send(&peer, payload).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run [`SyncNode::sync_peer`] for every connected peer. Returns how many
    /// messages were sent.
    pub async fn sync_all(&self, force: bool) -> Result<usize> {
        let mut sent = 0;
        for peer in self.transport.connected_peers().await? {
            if self.sync_peer(peer, force).await? {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Receive one message and hand it to the engine.
    ///
    /// Malformed messages are reported as [`ProcessOutcome::Rejected`]; the
    /// sending peer's state is left as it was.
    pub async fn process_next(&self, timeout: Duration) -> Result<ProcessOutcome> {
        let Some((from, payload)) = self.transport.recv_timeout(timeout).await? else {
            return Ok(ProcessOutcome::Idle);
        };

        match self.engine.handle_message(from, &payload).await {
            Ok(report) => Ok(ProcessOutcome::Handled { from, report }),
            Err(e) if e.is_invalid_message() => {
                warn!(peer = %from, error = %e, "dropping message");
                Ok(ProcessOutcome::Rejected {
                    from,
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Process received messages until none arrives within `timeout`.
    /// Returns how many were processed.
    pub async fn drain(&self, timeout: Duration) -> Result<usize> {
        let mut processed = 0;
        loop {
            match self.process_next(timeout).await? {
                ProcessOutcome::Idle => return Ok(processed),
                _ => processed += 1,
            }
        }
    }

    /// Alternate syncing and processing until a round neither sends nor
    /// receives anything. Returns the number of rounds taken.
    pub async fn run_until_quiet(&self) -> Result<usize> {
        for round in 0..self.config.max_rounds {
            let sent = self.sync_all(false).await?;
            let received = self.drain(self.config.message_timeout).await?;
            debug!(round, sent, received, "sync round finished");

            if sent == 0 && received == 0 {
                return Ok(round);
            }
        }

        Err(NodeError::NotQuiet {
            rounds: self.config.max_rounds,
        })
    }
}
