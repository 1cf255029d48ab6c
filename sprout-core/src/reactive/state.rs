//! Stateful Signals
//!
//! A stateful signal holds its value directly and is always live: there is no
//! activation step, and `get()` never recomputes.
//!
//! # Change Detection
//!
//! `set` compares the new value to the current one with `!=`. Equal values
//! are dropped without notifying anyone. Composite values must therefore
//! compare unequal for a change to be observed.
//!
//! # Thread Safety
//!
//! The value lives behind a `parking_lot::Mutex`. The lock is released before
//! subscribers run, so a subscriber may read or write the same signal.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;

use super::accessor::{Accessor, Source};
use super::subscriber::{self, Callback, Lifecycle, Subscribers, Unsubscribe};

/// A value plus the subscribers watching it.
///
/// Shared by the stateful, external and connection sources, which differ
/// only in how writes reach the cell.
pub(crate) struct ValueCell<T> {
    value: Mutex<T>,
    subscribers: Subscribers,
}

impl<T> ValueCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
            subscribers: Subscribers::new(),
        }
    }

    pub(crate) fn get(&self) -> T {
        self.value.lock().clone()
    }

    /// Store `value` and notify if it differs from the current one.
    ///
    /// Returns whether a change was observed.
    pub(crate) fn set(&self, value: T) -> bool {
        {
            let mut current = self.value.lock();
            if *current == value {
                return false;
            }
            *current = value;
        }
        self.subscribers.notify();
        true
    }

    pub(crate) fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.get();
        self.set(f(&current))
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<T> Lifecycle for ValueCell<T>
where
    T: Send + Sync + 'static,
{
    fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }
}

/// Write half of a stateful signal.
///
/// Cloning a setter is cheap; clones write to the same signal.
pub struct Setter<T> {
    cell: Arc<ValueCell<T>>,
}

impl<T> Setter<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn from_cell(cell: Arc<ValueCell<T>>) -> Self {
        Self { cell }
    }

    /// Set a new value.
    ///
    /// When `value != current`, every subscriber is notified synchronously,
    /// in registration order, before this call returns.
    pub fn set(&self, value: T) {
        self.cell.set(value);
    }

    /// Compute the next value from the current one, then [`set`](Self::set) it.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        self.cell.update(f);
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.cell.subscriber_count()
    }
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> Debug for Setter<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Setter")
            .field("value", &self.cell.get())
            .field("subscriber_count", &self.cell.subscriber_count())
            .finish()
    }
}

/// Read side of a [`ValueCell`].
pub(crate) struct CellSource<T>(pub(crate) Arc<ValueCell<T>>);

impl<T> Source<T> for CellSource<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn get(&self) -> T {
        self.0.get()
    }

    fn subscribe(&self, callback: Callback) -> Unsubscribe {
        subscriber::subscribe(&self.0, callback)
    }
}

/// Create a stateful signal with the given initial value.
///
/// # Example
///
/// ```rust
/// use sprout_core::reactive::create_state;
///
/// let (count, set_count) = create_state(0);
/// assert_eq!(count.get(), 0);
///
/// set_count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub fn create_state<T>(init: T) -> (Accessor<T>, Setter<T>)
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    let cell = Arc::new(ValueCell::new(init));
    (
        Accessor::new(CellSource(Arc::clone(&cell))),
        Setter::from_cell(cell),
    )
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
