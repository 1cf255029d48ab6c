//! Collection reconciler.
//!
//! [`Each`] keeps one rendered output per item of a reactive collection,
//! matching items across updates by key.
//!
//! # Algorithm
//!
//! Every pass (once at bind time, then once per source notification):
//!
//! 1. Materialize the collection and compute each item's key.
//! 2. Release every tracked entry whose key is gone: unmount its output, tear
//!    it down and dispose its scope.
//! 3. Unmount every remaining output.
//! 4. Walk the new sequence. A known key keeps its entry: its index signal is
//!    updated and its output re-appended. A new key gets a child scope, a
//!    fresh index signal and a render call, and its output is appended.
//! 5. A key already placed in this pass is skipped with a warning; the first
//!    occurrence wins.
//!
//! Disposing the scope that was current at bind time releases every entry
//! and detaches from the source.
//!
//! A panic from `render` propagates out of the pass. Entries tracked before
//! the pass stay tracked and mounted, and the panicking item's scope is
//! disposed.

use std::collections::HashSet;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{trace, warn};

use super::{Container, PassGate};
use crate::error::ScopeError;
use crate::reactive::{create_state, Accessor, Setter, Unsubscribe};
use crate::scope::{get_scope, Scope, WeakScope};

type RenderFn<I, O> = Box<dyn Fn(I, Accessor<usize>) -> Option<O> + Send + Sync>;
type KeyFn<I, K> = Box<dyn Fn(&I) -> K + Send + Sync>;
type CleanupFn<I, O> = Box<dyn Fn(&O, &I, usize) + Send + Sync>;

/// Keyed collection reconciler.
///
/// # Example
///
/// ```rust,ignore
/// let (rows, set_rows) = create_state(vec![row1, row2]);
///
/// scope.run(|| {
///     Each::keyed(list_box, |row: &Row| row.id, |row, index| Some(render_row(row, index)))
///         .bind(rows.clone())
/// })?;
/// ```
pub struct Each<C: Container, I, K> {
    container: C,
    render: RenderFn<I, C::Output>,
    key_of: KeyFn<I, K>,
    cleanup: Option<CleanupFn<I, C::Output>>,
}

impl<C, I> Each<C, I, I>
where
    C: Container,
    I: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Reconcile items keyed by their own value.
    pub fn new<R>(container: C, render: R) -> Self
    where
        R: Fn(I, Accessor<usize>) -> Option<C::Output> + Send + Sync + 'static,
    {
        Self::keyed(container, I::clone, render)
    }
}

impl<C, I, K> Each<C, I, K>
where
    C: Container,
    I: Clone + Send + Sync + 'static,
    K: Eq + Hash + Send + Sync + 'static,
{
    /// Reconcile items keyed by `key_of`.
    ///
    /// `render` runs inside the item's own scope and receives the item plus an
    /// accessor for its current position.
    pub fn keyed<F, R>(container: C, key_of: F, render: R) -> Self
    where
        F: Fn(&I) -> K + Send + Sync + 'static,
        R: Fn(I, Accessor<usize>) -> Option<C::Output> + Send + Sync + 'static,
    {
        Self {
            container,
            render: Box::new(render),
            key_of: Box::new(key_of),
            cleanup: None,
        }
    }

    /// Release outputs with `cleanup(output, item, index)` instead of
    /// [`Container::teardown`].
    pub fn with_cleanup<F>(mut self, cleanup: F) -> Self
    where
        F: Fn(&C::Output, &I, usize) + Send + Sync + 'static,
    {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    /// Start reconciling `source` under the current scope.
    ///
    /// Renders the initial collection immediately. Everything is released
    /// when the current scope is disposed.
    pub fn bind<S>(self, source: Accessor<S>) -> Result<(), ScopeError>
    where
        S: IntoIterator<Item = I> + 'static,
    {
        let owner = get_scope()?;
        let inner = Arc::new(EachInner {
            container: self.container,
            render: self.render,
            key_of: self.key_of,
            cleanup: self.cleanup,
            source,
            owner: owner.downgrade(),
            tracked: Mutex::new(Tracked {
                entries: IndexMap::new(),
                disposed: false,
            }),
            gate: PassGate::default(),
            subscription: Mutex::new(None),
        });

        let weak: Weak<EachInner<C, I, K, S>> = Arc::downgrade(&inner);
        let subscription = inner.source.subscribe(move || {
            if let Some(inner) = weak.upgrade() {
                inner.reconcile();
            }
        });
        *inner.subscription.lock() = Some(subscription);

        let releaser = Arc::clone(&inner);
        owner.on_cleanup(move || releaser.dispose());

        inner.reconcile();
        Ok(())
    }
}

struct Entry<I, O> {
    item: I,
    output: Option<O>,
    index: Accessor<usize>,
    set_index: Setter<usize>,
    scope: Scope,
}

type Entries<K, I, O> = IndexMap<K, Entry<I, O>>;

struct Tracked<K, I, O> {
    entries: Entries<K, I, O>,
    disposed: bool,
}

struct EachInner<C: Container, I, K, S> {
    container: C,
    render: RenderFn<I, C::Output>,
    key_of: KeyFn<I, K>,
    cleanup: Option<CleanupFn<I, C::Output>>,
    source: Accessor<S>,
    owner: WeakScope,
    tracked: Mutex<Tracked<K, I, C::Output>>,
    gate: PassGate,
    subscription: Mutex<Option<Unsubscribe>>,
}

impl<C, I, K, S> EachInner<C, I, K, S>
where
    C: Container,
    I: Clone + Send + Sync + 'static,
    K: Eq + Hash + Send + Sync + 'static,
    S: IntoIterator<Item = I> + 'static,
{
    fn reconcile(&self) {
        self.gate.run(|| self.pass());
    }

    fn pass(&self) {
        let previous = {
            let mut tracked = self.tracked.lock();
            if tracked.disposed {
                return;
            }
            std::mem::take(&mut tracked.entries)
        };

        let keyed: Vec<(K, I)> = self
            .source
            .get()
            .into_iter()
            .map(|item| ((self.key_of)(&item), item))
            .collect();

        let mut kept: Entries<K, I, C::Output> = IndexMap::with_capacity(previous.len());
        let mut removed = Vec::new();
        {
            let present: HashSet<&K> = keyed.iter().map(|(key, _)| key).collect();
            for (key, entry) in previous {
                if present.contains(&key) {
                    kept.insert(key, entry);
                } else {
                    removed.push(entry);
                }
            }
        }
        trace!(items = keyed.len(), removed = removed.len(), "each: reconciling");

        for entry in removed {
            self.release(entry);
        }

        for entry in kept.values() {
            if let Some(output) = &entry.output {
                self.container.unmount(output);
            }
        }

        let mut next: Entries<K, I, C::Output> = IndexMap::with_capacity(keyed.len());
        let walked = panic::catch_unwind(AssertUnwindSafe(|| {
            for (position, (key, item)) in keyed.into_iter().enumerate() {
                if next.contains_key(&key) {
                    warn!(position, "each: duplicate key in collection; item skipped");
                    continue;
                }

                let entry = match kept.swap_remove(&key) {
                    Some(mut entry) => {
                        entry.item = item;
                        entry
                    }
                    None => self.create(item, position),
                };
                let output = entry.output.clone();
                let set_index = entry.set_index.clone();
                next.insert(key, entry);

                if let Some(output) = &output {
                    self.container.mount(output, None);
                }
                set_index.set(position);
            }
        }));

        // Entries not reached before a panic go back in, still tracked.
        if walked.is_err() {
            for (key, entry) in kept {
                if let Some(output) = &entry.output {
                    self.container.mount(output, None);
                }
                next.insert(key, entry);
            }
        }

        let orphaned = {
            let mut tracked = self.tracked.lock();
            if tracked.disposed {
                Some(next)
            } else {
                tracked.entries = next;
                None
            }
        };
        if let Some(orphaned) = orphaned {
            for (_, entry) in orphaned {
                self.release(entry);
            }
        }

        if let Err(payload) = walked {
            panic::resume_unwind(payload);
        }
    }

    fn create(&self, item: I, position: usize) -> Entry<I, C::Output> {
        let owner = self.owner.upgrade();
        let scope = Scope::new(owner.as_ref());
        let (index, set_index) = create_state(position);
        let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
            scope.run(|| (self.render)(item.clone(), index.clone()))
        }));
        let output = match rendered {
            Ok(output) => output,
            Err(payload) => {
                scope.dispose();
                panic::resume_unwind(payload);
            }
        };
        Entry {
            item,
            output,
            index,
            set_index,
            scope,
        }
    }

    /// Unmount, tear down and dispose one entry.
    fn release(&self, entry: Entry<I, C::Output>) {
        if let Some(output) = &entry.output {
            self.container.unmount(output);
            match &self.cleanup {
                Some(cleanup) => cleanup(output, &entry.item, entry.index.get()),
                None => self.container.teardown(output),
            }
        }
        entry.scope.dispose();
    }

    fn dispose(&self) {
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }

        let entries = {
            let mut tracked = self.tracked.lock();
            tracked.disposed = true;
            std::mem::take(&mut tracked.entries)
        };
        for (_, entry) in entries {
            self.release(entry);
        }
    }
}
