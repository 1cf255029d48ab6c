//! Accessor Implementation
//!
//! An [`Accessor`] is the read-only face of every signal source. It exposes
//! two operations:
//!
//! - `get()` returns the most recently pushed value.
//! - `subscribe(cb)` registers `cb` to run on each subsequent change and
//!   returns an [`Unsubscribe`] handle. `cb` is never invoked at
//!   subscription time.
//!
//! Derived accessors share their parent's subscription mechanism and apply a
//! pure transform on `get()`.

use std::fmt::Debug;
use std::sync::Arc;

use super::subscriber::{Callback, Unsubscribe};

/// The contract every signal source fulfils.
///
/// Implement this to plug a custom source into the runtime, then wrap it with
/// [`Accessor::new`].
pub trait Source<T>: Send + Sync {
    /// Current value. May recompute when the source does not cache.
    fn get(&self) -> T;

    /// Register `callback` for subsequent changes.
    fn subscribe(&self, callback: Callback) -> Unsubscribe;
}

/// Read-only reactive value.
///
/// Cloning an accessor is cheap and clones share the same source.
///
/// # Example
///
/// ```rust
/// use sprout_core::reactive::create_state;
///
/// let (count, set_count) = create_state(1);
/// let doubled = count.derive(|n| n * 2);
///
/// set_count.set(4);
/// assert_eq!(doubled.get(), 8);
/// ```
pub struct Accessor<T> {
    source: Arc<dyn Source<T>>,
}

impl<T: 'static> Accessor<T> {
    /// Wrap a source.
    pub fn new<S>(source: S) -> Self
    where
        S: Source<T> + 'static,
    {
        Self {
            source: Arc::new(source),
        }
    }

    /// Build an accessor from a raw `get` / `subscribe` pair.
    pub fn from_fns<G, S>(get: G, subscribe: S) -> Self
    where
        G: Fn() -> T + Send + Sync + 'static,
        S: Fn(Callback) -> Unsubscribe + Send + Sync + 'static,
    {
        Self::new(FnSource { get, subscribe })
    }

    /// An accessor whose value never changes.
    pub fn constant(value: T) -> Self
    where
        T: Clone + Send + Sync,
    {
        Self::new(Constant(value))
    }

    /// Read the current value.
    pub fn get(&self) -> T {
        self.source.get()
    }

    /// Run `callback` on every subsequent change.
    pub fn subscribe<F>(&self, callback: F) -> Unsubscribe
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.source.subscribe(Arc::new(callback))
    }

    /// Same as [`subscribe`](Self::subscribe) for an already shared callback.
    pub fn subscribe_callback(&self, callback: Callback) -> Unsubscribe {
        self.source.subscribe(callback)
    }

    /// Derive a new accessor by applying `transform` to every read.
    ///
    /// `transform` must be pure: it runs on each `get()` of the derived
    /// accessor and nothing is cached.
    pub fn derive<R, F>(&self, transform: F) -> Accessor<R>
    where
        R: 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        Accessor::new(Derived {
            parent: self.clone(),
            transform,
        })
    }
}

impl<T> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<T> Debug for Accessor<T>
where
    T: Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessor")
            .field("value", &self.get())
            .finish()
    }
}

impl<T> From<T> for Accessor<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn from(value: T) -> Self {
        Self::constant(value)
    }
}

struct FnSource<G, S> {
    get: G,
    subscribe: S,
}

impl<T, G, S> Source<T> for FnSource<G, S>
where
    G: Fn() -> T + Send + Sync,
    S: Fn(Callback) -> Unsubscribe + Send + Sync,
{
    fn get(&self) -> T {
        (self.get)()
    }

    fn subscribe(&self, callback: Callback) -> Unsubscribe {
        (self.subscribe)(callback)
    }
}

struct Constant<T>(T);

impl<T> Source<T> for Constant<T>
where
    T: Clone + Send + Sync,
{
    fn get(&self) -> T {
        self.0.clone()
    }

    fn subscribe(&self, _callback: Callback) -> Unsubscribe {
        Unsubscribe::noop()
    }
}

struct Derived<T, F> {
    parent: Accessor<T>,
    transform: F,
}

impl<T, R, F> Source<R> for Derived<T, F>
where
    T: 'static,
    F: Fn(T) -> R + Send + Sync,
{
    fn get(&self) -> R {
        (self.transform)(self.parent.get())
    }

    fn subscribe(&self, callback: Callback) -> Unsubscribe {
        self.parent.subscribe_callback(callback)
    }
}
