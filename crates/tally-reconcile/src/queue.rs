use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

struct Inner<K> {
    queue: VecDeque<K>,
    /// Keys waiting to be handed out (queued, or re-added while processing).
    dirty: HashSet<K>,
    /// Keys handed out by `get` and not yet `done`.
    processing: HashSet<K>,
    /// Latest delayed-add token per key; older timers are stale.
    delayed: HashMap<K, u64>,
    next_token: u64,
    shutting_down: bool,
}

/// De-duplicating work queue that never hands the same key to two workers.
///
/// - `add` of a key that is already pending is a no-op.
/// - A key handed out by `get` is not handed out again until `done`.
/// - A key added while it is being processed is queued again on `done`.
/// - A later `add_after` for a key supersedes an earlier pending one.
/// - `shut_down` drops every pending and delayed key. Adds are ignored
///   from then on and `get` returns `None`; keys already handed out may
///   still be marked `done`.
pub struct WorkQueue<K> {
    inner: Mutex<Inner<K>>,
    notify: Notify,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                delayed: HashMap::new(),
                next_token: 0,
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn add(&self, key: K) {
        {
            let mut inner = self.inner.lock().expect("work queue lock poisoned");
            if inner.shutting_down || inner.dirty.contains(&key) {
                return;
            }
            inner.dirty.insert(key.clone());
            if inner.processing.contains(&key) {
                return;
            }
            inner.queue.push_back(key);
        }
        self.notify.notify_one();
    }

    /// Add `key` once `delay` has passed.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        let token = {
            let mut inner = self.inner.lock().expect("work queue lock poisoned");
            if inner.shutting_down {
                return;
            }
            inner.next_token += 1;
            let token = inner.next_token;
            inner.delayed.insert(key.clone(), token);
            token
        };

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let current = {
                let mut inner = queue.inner.lock().expect("work queue lock poisoned");
                if inner.delayed.get(&key) == Some(&token) {
                    inner.delayed.remove(&key);
                    true
                } else {
                    false
                }
            };
            if current {
                queue.add(key);
            }
        });
    }

    /// Cancel a pending delayed add of `key`, if any.
    pub fn forget(&self, key: &K) {
        self.inner
            .lock()
            .expect("work queue lock poisoned")
            .delayed
            .remove(key);
    }

    /// Keys with a pending delayed add.
    pub fn scheduled(&self) -> usize {
        self.inner
            .lock()
            .expect("work queue lock poisoned")
            .delayed
            .len()
    }

    /// Wait for the next key. `None` means the queue is shut down and empty.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().expect("work queue lock poisoned");
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
                if inner.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `key` finished, requeueing it if it was re-added meanwhile.
    pub fn done(&self, key: &K) {
        let requeued = {
            let mut inner = self.inner.lock().expect("work queue lock poisoned");
            inner.processing.remove(key);
            if inner.dirty.contains(key) {
                inner.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys. Returns how many queued keys were dropped.
    pub fn shut_down(&self) -> usize {
        let dropped = {
            let mut inner = self.inner.lock().expect("work queue lock poisoned");
            inner.shutting_down = true;
            let dropped = inner.queue.len();
            inner.queue.clear();
            inner.dirty.clear();
            inner.delayed.clear();
            dropped
        };
        self.notify.notify_waiters();
        dropped
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner
            .lock()
            .expect("work queue lock poisoned")
            .shutting_down
    }

    /// Keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("work queue lock poisoned").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
