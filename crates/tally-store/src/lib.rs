//! Resource store interface for tally.
//!
//! The exporter reads scan reports from, and writes small amounts of
//! bookkeeping back to, a store of versioned objects. This crate defines
//! that boundary and ships two backends.
//!
//! # Backends
//!
//! All backends implement the [`ResourceStore`] trait:
//!
//! - [`InMemoryResourceStore`] -- `HashMap`-based store for tests and embedding
//! - [`DirResourceStore`] -- JSON files on disk, polled for external changes
//!
//! # Contract
//!
//! 1. A missing object is `Ok(None)` from [`ResourceStore::get`], never an error.
//! 2. Updates carry the `resource_version` they were read at; a stale version
//!    fails with [`StoreError::Conflict`].
//! 3. Deleting an object that still has finalizers only marks it
//!    `deletion_requested`; it disappears once an update clears the last one.
//! 4. Every successful write is announced on the kind's watch channel.

pub mod dir;
pub mod error;
pub mod event;
pub mod memory;
pub mod selector;
pub mod traits;

pub use dir::DirResourceStore;
pub use error::{StoreError, StoreResult};
pub use event::{EventHub, ResourceEvent};
pub use memory::InMemoryResourceStore;
pub use selector::LabelSelector;
pub use traits::ResourceStore;
