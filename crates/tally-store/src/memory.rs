use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::broadcast;

use tally_types::{ObjectKey, Resource, ResourceKind};

use crate::error::{StoreError, StoreResult};
use crate::event::{EventHub, ResourceEvent};
use crate::selector::LabelSelector;
use crate::traits::{next_revision, ResourceStore, Revision};

type Slot = (ResourceKind, ObjectKey);

/// In-memory, HashMap-based resource store.
///
/// Intended for tests and embedding. Objects are held behind a `RwLock` and
/// cloned on read and write. Versions come from one store-wide counter, so
/// they increase across all objects.
///
/// Failures can be injected per operation with the `fail_next_*` methods;
/// each injected failure surfaces as [`StoreError::Unavailable`].
pub struct InMemoryResourceStore {
    objects: RwLock<HashMap<Slot, Resource>>,
    version: AtomicU64,
    events: EventHub,
    updates: AtomicUsize,
    failing_gets: AtomicUsize,
    failing_lists: AtomicUsize,
    failing_updates: AtomicUsize,
}

impl InMemoryResourceStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            version: AtomicU64::new(0),
            events: EventHub::default(),
            updates: AtomicUsize::new(0),
            failing_gets: AtomicUsize::new(0),
            failing_lists: AtomicUsize::new(0),
            failing_updates: AtomicUsize::new(0),
        }
    }

    /// Store `resource` unconditionally, replacing any existing copy.
    ///
    /// The scanner side of the store: no version check, and the object's
    /// `deletion_requested` flag is taken as given.
    pub fn insert(&self, mut resource: Resource) -> Resource {
        resource.metadata.resource_version = self.next_version();
        let kind = resource.kind();
        let key = resource.key();
        self.objects
            .write()
            .expect("lock poisoned")
            .insert((kind, key.clone()), resource.clone());
        self.events.publish(ResourceEvent::Applied { kind, key });
        resource
    }

    /// Drop an object without consulting its finalizers.
    pub fn remove(&self, kind: ResourceKind, key: &ObjectKey) -> Option<Resource> {
        let removed = self
            .objects
            .write()
            .expect("lock poisoned")
            .remove(&(kind, key.clone()));
        if removed.is_some() {
            self.events.publish(ResourceEvent::Deleted {
                kind,
                key: key.clone(),
            });
        }
        removed
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Number of successful `update` calls so far.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn fail_next_gets(&self, n: usize) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_lists(&self, n: usize) {
        self.failing_lists.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_updates(&self, n: usize) {
        self.failing_updates.store(n, Ordering::SeqCst);
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn injected(counter: &AtomicUsize, op: &str) -> StoreResult<()> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StoreError::Unavailable(format!("injected {op} failure")))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<Option<Resource>> {
        Self::injected(&self.failing_gets, "get")?;
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(&(kind, key.clone())).cloned())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<Resource>> {
        Self::injected(&self.failing_lists, "list")?;
        let map = self.objects.read().expect("lock poisoned");
        let mut found: Vec<Resource> = map
            .iter()
            .filter(|((k, _), r)| *k == kind && selector.matches(&r.metadata.labels))
            .map(|(_, r)| r.clone())
            .collect();
        found.sort_by_key(|r| r.key());
        Ok(found)
    }

    async fn create(&self, mut resource: Resource) -> StoreResult<Resource> {
        let kind = resource.kind();
        let key = resource.key();
        {
            let mut map = self.objects.write().expect("lock poisoned");
            if map.contains_key(&(kind, key.clone())) {
                return Err(StoreError::AlreadyExists { kind, key });
            }
            resource.metadata.resource_version = self.next_version();
            resource.metadata.deletion_requested = false;
            map.insert((kind, key.clone()), resource.clone());
        }
        self.events.publish(ResourceEvent::Applied { kind, key });
        Ok(resource)
    }

    async fn update(&self, resource: Resource) -> StoreResult<Resource> {
        Self::injected(&self.failing_updates, "update")?;
        let kind = resource.kind();
        let key = resource.key();

        let (event, stored) = {
            let mut map = self.objects.write().expect("lock poisoned");
            let slot = (kind, key.clone());
            let current = map.get(&slot).ok_or_else(|| StoreError::NotFound {
                kind,
                key: key.clone(),
            })?;
            match next_revision(current, resource, self.next_version())? {
                Revision::Stored(r) => {
                    map.insert(slot, r.clone());
                    (ResourceEvent::Applied { kind, key }, r)
                }
                Revision::Finalized(r) => {
                    map.remove(&slot);
                    (ResourceEvent::Deleted { kind, key }, r)
                }
            }
        };

        self.updates.fetch_add(1, Ordering::SeqCst);
        self.events.publish(event);
        Ok(stored)
    }

    async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<bool> {
        let event = {
            let mut map = self.objects.write().expect("lock poisoned");
            let slot = (kind, key.clone());
            let Some(current) = map.get_mut(&slot) else {
                return Ok(false);
            };
            if current.metadata.finalizers.is_empty() {
                map.remove(&slot);
                ResourceEvent::Deleted {
                    kind,
                    key: key.clone(),
                }
            } else {
                current.metadata.deletion_requested = true;
                current.metadata.resource_version = self.next_version();
                ResourceEvent::Applied {
                    kind,
                    key: key.clone(),
                }
            }
        };
        self.events.publish(event);
        Ok(true)
    }

    fn watch(&self, kind: ResourceKind) -> broadcast::Receiver<ResourceEvent> {
        self.events.subscribe(kind)
    }
}
