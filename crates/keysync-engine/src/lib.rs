//! # Keysync Engine
//!
//! Manifest-based set reconciliation between a local [`DataSource`] and any
//! number of peers.
//!
//! ## Overview
//!
//! Each peer is tracked through four tiers:
//!
//! ```text
//! Unknown -> DigestExchanged -> ManifestExchanged -> Synced
//!                                      ^               |
//!                                      +-- local store changed
//! ```
//!
//! [`SyncEngine::sync_with_peer`] sends the cheapest message that can make
//! progress: a manifest digest, the full manifest, or the manifest plus the
//! objects the peer lacks. [`SyncEngine::handle_message`] validates incoming
//! messages, merges carried objects into the data source all-or-nothing,
//! and advances the peer's tier.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keysync_engine::{PeerId, SyncEngine};
//! use keysync_store::{merge::NewestWins, MemoryDataSource};
//!
//! async fn example(incoming: Vec<u8>) -> keysync_engine::Result<()> {
//!     let store = Arc::new(MemoryDataSource::new(["class", "acct"], NewestWins::new("mdat")));
//!     let engine = SyncEngine::create(store);
//!     let peer = PeerId::random();
//!
//!     // Hand the outgoing bytes to a transport
//!     if let Some(message) = engine.sync_with_peer(peer, false).await? {
//!         let _ = message;
//!     }
//!
//!     // Feed the peer's reply back in
//!     let report = engine.handle_message(peer, &incoming).await?;
//!     println!("peer is now {:?}", report.tier);
//!     Ok(())
//! }
//! ```
//!
//! [`DataSource`]: keysync_store::DataSource

pub mod engine;
pub mod error;
pub mod messages;
pub mod peer;
pub mod state;
pub mod transport;

pub use engine::{EngineConfig, HandleReport, SyncEngine};
pub use error::{Result, SyncError};
pub use messages::{limits, DecodedMessage, MessageKind, PeerId, SyncMessage, PROTOCOL_VERSION};
pub use peer::{PeerState, Tier};
pub use state::STATE_VERSION;
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Transport};
