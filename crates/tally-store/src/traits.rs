use async_trait::async_trait;
use tokio::sync::broadcast;

use tally_types::{ObjectKey, Resource, ResourceKind};

use crate::error::{StoreError, StoreResult};
use crate::event::ResourceEvent;
use crate::selector::LabelSelector;

/// Versioned store of report objects.
///
/// All implementations must satisfy these invariants:
/// - Every successful write assigns a new, strictly larger `resource_version`.
/// - `update` succeeds only when the caller's `resource_version` equals the
///   stored one; otherwise it fails with [`StoreError::Conflict`].
/// - `deletion_requested` can be set by `delete` but never cleared by `update`.
/// - An object with `deletion_requested` and no finalizers is removed.
/// - Each write is announced on the watch channel of the object's kind.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Read one object.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<Option<Resource>>;

    /// List every object of `kind` whose labels match `selector`.
    async fn list(
        &self,
        kind: ResourceKind,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<Resource>>;

    /// Store a new object. Fails if one already exists under the same key.
    async fn create(&self, resource: Resource) -> StoreResult<Resource>;

    /// Replace an existing object's metadata and body.
    ///
    /// Returns the stored copy with its new version. When the write clears
    /// the last finalizer of an object pending deletion, the object is
    /// removed and the returned copy is the final state.
    async fn update(&self, resource: Resource) -> StoreResult<Resource>;

    /// Request deletion. Returns `false` if the object did not exist.
    async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<bool>;

    /// Subscribe to change notifications for one kind.
    fn watch(&self, kind: ResourceKind) -> broadcast::Receiver<ResourceEvent>;
}

/// Outcome of applying an update to a stored object.
#[derive(Debug)]
pub(crate) enum Revision {
    /// Keep the object at its new version.
    Stored(Resource),
    /// The update released the last finalizer of a deleted object.
    Finalized(Resource),
}

/// Apply the optimistic-concurrency and finalizer rules shared by backends.
pub(crate) fn next_revision(
    stored: &Resource,
    mut incoming: Resource,
    version: u64,
) -> StoreResult<Revision> {
    let expected = incoming.metadata.resource_version;
    let actual = stored.metadata.resource_version;
    if expected != actual {
        return Err(StoreError::Conflict {
            key: stored.key(),
            expected,
            actual,
        });
    }

    incoming.metadata.resource_version = version;
    incoming.metadata.deletion_requested |= stored.metadata.deletion_requested;

    if incoming.metadata.deletion_requested && incoming.metadata.finalizers.is_empty() {
        Ok(Revision::Finalized(incoming))
    } else {
        Ok(Revision::Stored(incoming))
    }
}
