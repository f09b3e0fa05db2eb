//! # Keysync
//!
//! Keeps keychain-like object stores consistent across peers without
//! shipping the whole store on every exchange.
//!
//! ## Overview
//!
//! - **Manifests**: a store is summarized as a sorted set of object digests,
//!   and peers compare stores with exact set algebra over manifests
//! - **Data sources**: the store behind a manifest, including the merge
//!   policy used when two peers edited the same record
//! - **Engine**: a per-peer state machine that escalates from a manifest
//!   digest to a full manifest to the missing objects themselves
//! - **Nodes**: an engine driven over a [`Transport`](engine::Transport)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keysync::{NodeConfig, PeerId, SyncNode};
//! use keysync::engine::MemoryNetwork;
//! use keysync::store::{merge::NewestWins, MemoryDataSource};
//!
//! async fn example() -> keysync::Result<()> {
//!     let network = MemoryNetwork::new();
//!     let transport = network.create_transport(PeerId::random()).await;
//!
//!     // Records are identified by class and account; the newer edit wins
//!     let store = MemoryDataSource::new(["class", "acct"], NewestWins::new("mdat"));
//!     let node = SyncNode::new(Arc::new(store), transport, NodeConfig::default());
//!
//!     let rounds = node.run_until_quiet().await?;
//!     println!("quiet after {} rounds", rounds);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `keysync::core` - digests, digest vectors, manifests, objects
//! - `keysync::store` - the `DataSource` trait, merge policies, memory store
//! - `keysync::engine` - sync engine, wire messages, transports

pub mod error;
pub mod node;

// Re-export component crates
pub use keysync_core as core;
pub use keysync_engine as engine;
pub use keysync_store as store;

pub use error::{NodeError, Result};
pub use node::{NodeConfig, ProcessOutcome, SyncNode};

// Commonly used types
pub use keysync_core::{Digest, DigestVector, Manifest, Object, PropertyList, PropertyValue};
pub use keysync_engine::{EngineConfig, HandleReport, PeerId, SyncEngine, SyncError, Tier};
pub use keysync_store::{DataSource, MemoryDataSource, MergePolicy, MergeResult};
