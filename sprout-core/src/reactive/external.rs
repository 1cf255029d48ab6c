//! Externally-driven signals.
//!
//! An external signal is fed by a producer: a function that receives a
//! [`Setter`] and starts pushing values into it, returning a disposer that
//! stops it. The producer runs on the first subscription and its disposer on
//! the last unsubscription, so idle sources cost nothing. A later
//! resubscription starts the producer again.
//!
//! `get()` always returns the last pushed value, even while cold.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::accessor::{Accessor, Source};
use super::state::{Setter, ValueCell};
use super::subscriber::{self, Callback, Lifecycle, Subscribers, Unsubscribe};

type Producer<T> = Box<dyn Fn(Setter<T>) -> Box<dyn FnOnce() + Send> + Send + Sync>;

struct ExternalInner<T> {
    cell: Arc<ValueCell<T>>,
    producer: Producer<T>,
    disposer: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl<T> Lifecycle for ExternalInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn subscribers(&self) -> &Subscribers {
        self.cell.subscribers()
    }

    fn activate(&self) {
        trace!("external: starting producer");
        let disposer = (self.producer)(Setter::from_cell(Arc::clone(&self.cell)));
        *self.disposer.lock() = Some(disposer);
    }

    fn deactivate(&self) {
        trace!("external: disposing producer");
        let disposer = self.disposer.lock().take();
        if let Some(disposer) = disposer {
            disposer();
        }
    }
}

struct ExternalSource<T>(Arc<ExternalInner<T>>);

impl<T> Source<T> for ExternalSource<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn get(&self) -> T {
        self.0.cell.get()
    }

    fn subscribe(&self, callback: Callback) -> Unsubscribe {
        subscriber::subscribe(&self.0, callback)
    }
}

/// Create a signal driven by `producer`.
///
/// `producer` is called exactly once per cold → warm transition and must
/// return a disposer, which is called exactly once on the following
/// warm → cold transition. Values pushed through the setter are compared with
/// `!=` before subscribers are notified.
///
/// The producer runs before the first subscriber is registered, so a value it
/// pushes synchronously updates `get()` without notifying that subscriber.
///
/// # Example
///
/// ```rust
/// use sprout_core::reactive::create_external;
///
/// let clock = create_external(0u64, |set| {
///     set.set(1);
///     || {}
/// });
///
/// let handle = clock.subscribe(|| {});
/// assert_eq!(clock.get(), 1);
/// handle.unsubscribe();
/// ```
pub fn create_external<T, P, D>(init: T, producer: P) -> Accessor<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    P: Fn(Setter<T>) -> D + Send + Sync + 'static,
    D: FnOnce() + Send + 'static,
{
    let producer: Producer<T> =
        Box::new(move |setter: Setter<T>| -> Box<dyn FnOnce() + Send> { Box::new(producer(setter)) });
    let inner = Arc::new(ExternalInner {
        cell: Arc::new(ValueCell::new(init)),
        producer,
        disposer: Mutex::new(None),
    });
    Accessor::new(ExternalSource(inner))
}
