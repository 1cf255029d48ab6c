//! Subscriber bookkeeping shared by every signal source.
//!
//! A source keeps its subscribers in an insertion-ordered set. Notification
//! takes a snapshot of that set (a "wave") and invokes each callback with no
//! lock held, so a callback may freely subscribe, unsubscribe or write to any
//! source, including the one that is notifying it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

/// A change callback registered through `subscribe`.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Unique identifier for a subscription.
///
/// Every call to `subscribe` gets a fresh ID, so registering the same closure
/// twice yields two independent subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `subscribe`.
///
/// Calling [`unsubscribe`](Self::unsubscribe) removes the subscription. The
/// call is idempotent and may happen from inside a notification of the same
/// source. Clones share the same underlying subscription. Dropping the handle
/// leaves the subscription in place.
#[derive(Clone)]
pub struct Unsubscribe {
    release: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl Unsubscribe {
    /// Wrap a release function; it runs at most once.
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Arc::new(Mutex::new(Some(Box::new(release)))),
        }
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self {
            release: Arc::new(Mutex::new(None)),
        }
    }

    /// Remove the subscription. Subsequent calls do nothing.
    pub fn unsubscribe(&self) {
        let release = self.release.lock().take();
        if let Some(release) = release {
            release();
        }
    }

    /// Whether the subscription is still registered.
    pub fn is_active(&self) -> bool {
        self.release.lock().is_some()
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Insertion-ordered set of subscriber callbacks.
#[derive(Default)]
pub(crate) struct Subscribers {
    entries: Mutex<IndexMap<SubscriberId, Callback>>,
}

impl Subscribers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, callback: Callback) -> SubscriberId {
        let id = SubscriberId::new();
        self.entries.lock().insert(id, callback);
        id
    }

    /// Remove a subscriber, returning how many remain if it was present.
    pub(crate) fn remove(&self, id: SubscriberId) -> Option<usize> {
        let mut entries = self.entries.lock();
        entries.shift_remove(&id).map(|_| entries.len())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Run one notification wave.
    ///
    /// The wave is the subscriber list as it stood when notification began.
    /// Entries removed mid-wave are skipped; entries added mid-wave wait for
    /// the next one. A panicking callback aborts the rest of the wave.
    pub(crate) fn notify(&self) {
        let wave: SmallVec<[(SubscriberId, Callback); 4]> = self
            .entries
            .lock()
            .iter()
            .map(|(id, callback)| (*id, Arc::clone(callback)))
            .collect();

        for (id, callback) in wave {
            let live = self.entries.lock().contains_key(&id);
            if live {
                callback();
            }
        }
    }
}

/// A source whose underlying work is started on the first subscriber and
/// stopped when the last one leaves.
pub(crate) trait Lifecycle: Send + Sync + 'static {
    fn subscribers(&self) -> &Subscribers;

    /// Called on the 0 → 1 subscriber transition, before the subscriber is
    /// registered.
    fn activate(&self) {}

    /// Called on the 1 → 0 subscriber transition.
    fn deactivate(&self) {}
}

/// Register `callback` on `source`, driving its activation lifecycle.
pub(crate) fn subscribe<L: Lifecycle>(source: &Arc<L>, callback: Callback) -> Unsubscribe {
    if source.subscribers().is_empty() {
        source.activate();
    }
    let id = source.subscribers().insert(callback);

    let weak = Arc::downgrade(source);
    Unsubscribe::new(move || {
        if let Some(source) = weak.upgrade() {
            if source.subscribers().remove(id) == Some(0) {
                source.deactivate();
            }
        }
    })
}
