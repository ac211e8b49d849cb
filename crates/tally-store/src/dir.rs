use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use tally_types::{ObjectKey, Resource, ResourceKind};

use crate::error::{StoreError, StoreResult};
use crate::event::{EventHub, ResourceEvent};
use crate::selector::LabelSelector;
use crate::traits::{next_revision, ResourceStore, Revision};

/// Directory holding cluster-scoped objects of a kind.
const CLUSTER_DIR: &str = "_cluster";

type Slot = (ResourceKind, ObjectKey);

/// What a rescan compares to decide whether a file changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Fingerprint {
    version: u64,
    modified: Option<SystemTime>,
}

/// Resource store backed by JSON files.
///
/// Layout: `<root>/<kind>/<namespace>/<name>.json`, with cluster-scoped
/// objects under `<root>/<kind>/_cluster/`. Writes go to a temporary file
/// and are renamed into place.
///
/// Scanners may drop or edit files directly; [`DirResourceStore::run_poller`]
/// rescans the tree and turns those external edits into watch events.
pub struct DirResourceStore {
    root: PathBuf,
    writes: tokio::sync::Mutex<()>,
    seen: Mutex<HashMap<Slot, Fingerprint>>,
    events: EventHub,
}

impl DirResourceStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Objects already on disk form the baseline for change detection and
    /// are not announced.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        for kind in ResourceKind::ALL {
            tokio::fs::create_dir_all(root.join(kind.as_str())).await?;
        }
        let store = Self {
            root,
            writes: tokio::sync::Mutex::new(()),
            seen: Mutex::new(HashMap::new()),
            events: EventHub::default(),
        };
        let baseline = store.scan().await?;
        info!(root = %store.root.display(), objects = baseline.len(), "opened resource directory");
        *store.seen.lock().expect("lock poisoned") = baseline;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compare the tree against the last scan and announce differences.
    pub async fn rescan(&self) -> StoreResult<Vec<ResourceEvent>> {
        let current = self.scan().await?;
        let events = {
            let mut seen = self.seen.lock().expect("lock poisoned");
            let mut events = Vec::new();
            for ((kind, key), print) in &current {
                if seen.get(&(*kind, key.clone())) != Some(print) {
                    events.push(ResourceEvent::Applied {
                        kind: *kind,
                        key: key.clone(),
                    });
                }
            }
            for (kind, key) in seen.keys() {
                if !current.contains_key(&(*kind, key.clone())) {
                    events.push(ResourceEvent::Deleted {
                        kind: *kind,
                        key: key.clone(),
                    });
                }
            }
            *seen = current;
            events
        };

        for event in &events {
            debug!(kind = %event.kind(), key = %event.key(), "external change detected");
            self.events.publish(event.clone());
        }
        Ok(events)
    }

    /// Rescan every `interval` until `shutdown` flips to `true`.
    pub async fn run_poller(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait_for(|stop| *stop) => return,
            }
            if let Err(e) = self.rescan().await {
                warn!(root = %self.root.display(), error = %e, "resource directory rescan failed");
            }
        }
    }

    fn path_for(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<PathBuf> {
        let invalid = || StoreError::InvalidKey(key.to_string());
        let segment_ok = |s: &str| {
            !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\']) && s != CLUSTER_DIR
        };
        if !segment_ok(&key.name) {
            return Err(invalid());
        }
        let dir = match &key.namespace {
            Some(ns) if segment_ok(ns) => ns.as_str(),
            Some(_) => return Err(invalid()),
            None => CLUSTER_DIR,
        };
        Ok(self
            .root
            .join(kind.as_str())
            .join(dir)
            .join(format!("{}.json", key.name)))
    }

    async fn read_path(path: &Path) -> StoreResult<Option<Resource>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Serialization(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_path(path: &Path, resource: &Resource) -> StoreResult<Fingerprint> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(resource)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        let modified = tokio::fs::metadata(path).await?.modified().ok();
        Ok(Fingerprint {
            version: resource.metadata.resource_version,
            modified,
        })
    }

    async fn remove_path(path: &Path) -> StoreResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn record(&self, kind: ResourceKind, key: &ObjectKey, print: Option<Fingerprint>) {
        let mut seen = self.seen.lock().expect("lock poisoned");
        match print {
            Some(print) => seen.insert((kind, key.clone()), print),
            None => seen.remove(&(kind, key.clone())),
        };
    }

    /// Load one object, making its metadata agree with where it was found.
    async fn load(
        kind: ResourceKind,
        key: &ObjectKey,
        path: &Path,
    ) -> StoreResult<Option<Resource>> {
        let Some(mut resource) = Self::read_path(path).await? else {
            return Ok(None);
        };
        if resource.kind() != kind {
            return Err(StoreError::Serialization(format!(
                "{} holds a {}, expected {kind}",
                path.display(),
                resource.kind()
            )));
        }
        resource.metadata.name = key.name.clone();
        resource.metadata.namespace = key.namespace.clone();
        Ok(Some(resource))
    }

    async fn list_kind(&self, kind: ResourceKind) -> StoreResult<Vec<(ObjectKey, PathBuf)>> {
        let mut found = Vec::new();
        let kind_dir = self.root.join(kind.as_str());
        let mut scopes = match tokio::fs::read_dir(&kind_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };
        while let Some(scope) = scopes.next_entry().await? {
            if !scope.file_type().await?.is_dir() {
                continue;
            }
            let scope_name = scope.file_name().to_string_lossy().into_owned();
            let namespace = (scope_name != CLUSTER_DIR).then_some(scope_name);

            let mut files = tokio::fs::read_dir(scope.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let key = ObjectKey {
                    namespace: namespace.clone(),
                    name: name.to_string(),
                };
                found.push((key, path));
            }
        }
        found.sort();
        Ok(found)
    }

    async fn scan(&self) -> StoreResult<HashMap<Slot, Fingerprint>> {
        let mut prints = HashMap::new();
        for kind in ResourceKind::ALL {
            for (key, path) in self.list_kind(kind).await? {
                let resource = match Self::load(kind, &key, &path).await {
                    Ok(Some(r)) => r,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable report");
                        continue;
                    }
                };
                let modified = match tokio::fs::metadata(&path).await {
                    Ok(meta) => meta.modified().ok(),
                    Err(_) => continue,
                };
                prints.insert(
                    (kind, key),
                    Fingerprint {
                        version: resource.metadata.resource_version,
                        modified,
                    },
                );
            }
        }
        Ok(prints)
    }
}

#[async_trait]
impl ResourceStore for DirResourceStore {
    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<Option<Resource>> {
        let path = self.path_for(kind, key)?;
        Self::load(kind, key, &path).await
    }

    async fn list(
        &self,
        kind: ResourceKind,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<Resource>> {
        let mut found = Vec::new();
        for (key, path) in self.list_kind(kind).await? {
            match Self::load(kind, &key, &path).await {
                Ok(Some(r)) if selector.matches(&r.metadata.labels) => found.push(r),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable report"),
            }
        }
        Ok(found)
    }

    async fn create(&self, mut resource: Resource) -> StoreResult<Resource> {
        let kind = resource.kind();
        let key = resource.key();
        let path = self.path_for(kind, &key)?;

        let _guard = self.writes.lock().await;
        if tokio::fs::try_exists(&path).await? {
            return Err(StoreError::AlreadyExists { kind, key });
        }
        resource.metadata.resource_version = 1;
        resource.metadata.deletion_requested = false;
        let print = Self::write_path(&path, &resource).await?;
        self.record(kind, &key, Some(print));
        self.events.publish(ResourceEvent::Applied { kind, key });
        Ok(resource)
    }

    async fn update(&self, resource: Resource) -> StoreResult<Resource> {
        let kind = resource.kind();
        let key = resource.key();
        let path = self.path_for(kind, &key)?;

        let _guard = self.writes.lock().await;
        let current = Self::load(kind, &key, &path)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind,
                key: key.clone(),
            })?;
        let version = current.metadata.resource_version + 1;

        match next_revision(&current, resource, version)? {
            Revision::Stored(r) => {
                let print = Self::write_path(&path, &r).await?;
                self.record(kind, &key, Some(print));
                self.events.publish(ResourceEvent::Applied { kind, key });
                Ok(r)
            }
            Revision::Finalized(r) => {
                Self::remove_path(&path).await?;
                self.record(kind, &key, None);
                self.events.publish(ResourceEvent::Deleted { kind, key });
                Ok(r)
            }
        }
    }

    async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<bool> {
        let path = self.path_for(kind, key)?;

        let _guard = self.writes.lock().await;
        let Some(mut current) = Self::load(kind, key, &path).await? else {
            return Ok(false);
        };
        if current.metadata.finalizers.is_empty() {
            Self::remove_path(&path).await?;
            self.record(kind, key, None);
            self.events.publish(ResourceEvent::Deleted {
                kind,
                key: key.clone(),
            });
        } else {
            current.metadata.deletion_requested = true;
            current.metadata.resource_version += 1;
            let print = Self::write_path(&path, &current).await?;
            self.record(kind, key, Some(print));
            self.events.publish(ResourceEvent::Applied {
                kind,
                key: key.clone(),
            });
        }
        Ok(true)
    }

    fn watch(&self, kind: ResourceKind) -> broadcast::Receiver<ResourceEvent> {
        self.events.subscribe(kind)
    }
}
