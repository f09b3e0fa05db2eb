//! # Keysync Store
//!
//! The object store a sync engine reconciles, expressed as the [`DataSource`]
//! trait, plus [`MemoryDataSource`] as an in-memory implementation.
//!
//! ## Key Types
//!
//! - [`DataSource`] - The async contract the engine consumes
//! - [`MergeResult`] - Outcome of adding a peer's object
//! - [`MergePolicy`] - Pluggable conflict resolution between objects sharing a primary key
//! - [`MemoryDataSource`] - In-memory store keeping its manifest up to date incrementally
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keysync_core::Object;
//! use keysync_store::{merge::TakePeer, DataSource, MemoryDataSource, MergeResult};
//!
//! async fn example() {
//!     // Objects are keyed by their class and account attributes
//!     let store = MemoryDataSource::new(["class", "acct"], TakePeer);
//!
//!     let object = Object::builder().set("class", "genp").set("acct", "alice").build();
//!     let result = store.add(object.clone()).await.unwrap();
//!     assert_eq!(result, MergeResult::PeersWins);
//!
//!     let manifest = store.copy_manifest().await.unwrap();
//!     assert!(manifest.contains(&object.digest()));
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Generations**: every visible mutation bumps [`DataSource::generation`]
//! - **Merging**: there is no default [`MergePolicy`]; callers choose one
//! - **Rollback**: [`DataSource::backup_object`] / [`DataSource::restore_object`]
//!   let the engine undo a partially applied message

pub mod error;
pub mod memory;
pub mod merge;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryDataSource;
pub use merge::{MergeDecision, MergePolicy};
pub use traits::{DataSource, MergeResult, ObjectBackup, ObjectVisitor, PrimaryKey};
