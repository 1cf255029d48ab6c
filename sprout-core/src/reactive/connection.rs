//! Event-connection signals.
//!
//! A connection signal folds events from one or more [`EventSource`]s into a
//! value. Each handler is a `(source, event name, reducer)` triple; the
//! reducer receives the event payload and the current value and returns the
//! next value.
//!
//! Handlers are connected on the first subscription and disconnected on the
//! last unsubscription. The current value is kept across those transitions,
//! so `get()` on a cold connection returns whatever was last folded in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::accessor::{Accessor, Source};
use super::state::ValueCell;
use super::subscriber::{self, Callback, Lifecycle, Subscribers, Unsubscribe};

/// Identifies one connected handler on an [`EventSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Generate a new unique handler ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler invoked with an event payload.
pub type EventHandler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Something that emits named events.
///
/// Host object systems implement this to feed connection signals.
pub trait EventSource: Send + Sync + 'static {
    /// Payload delivered with each event.
    type Event: ?Sized;

    /// Connect `handler` to `event`.
    fn connect(&self, event: &str, handler: EventHandler<Self::Event>) -> HandlerId;

    /// Disconnect a handler. Unknown IDs are ignored.
    fn disconnect(&self, id: HandlerId);
}

impl<S> EventSource for Arc<S>
where
    S: EventSource + ?Sized,
{
    type Event = S::Event;

    fn connect(&self, event: &str, handler: EventHandler<Self::Event>) -> HandlerId {
        (**self).connect(event, handler)
    }

    fn disconnect(&self, id: HandlerId) {
        (**self).disconnect(id)
    }
}

struct Registration<E: ?Sized> {
    id: HandlerId,
    event: String,
    handler: EventHandler<E>,
}

/// In-process event emitter.
///
/// Handlers run synchronously, in connection order, on [`emit`](Self::emit).
pub struct Emitter<E: ?Sized> {
    handlers: RwLock<Vec<Registration<E>>>,
}

impl<E: ?Sized> Emitter<E> {
    /// Create an emitter with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Deliver `payload` to every handler connected to `event`.
    ///
    /// Returns the number of handlers invoked.
    pub fn emit(&self, event: &str, payload: &E) -> usize {
        let targets: Vec<EventHandler<E>> = self
            .handlers
            .read()
            .iter()
            .filter(|registration| registration.event == event)
            .map(|registration| Arc::clone(&registration.handler))
            .collect();

        for handler in &targets {
            handler(payload);
        }
        targets.len()
    }

    /// Number of connected handlers across all events.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl<E: ?Sized> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventSource for Emitter<E>
where
    E: ?Sized + 'static,
{
    type Event = E;

    fn connect(&self, event: &str, handler: EventHandler<E>) -> HandlerId {
        let id = HandlerId::new();
        self.handlers.write().push(Registration {
            id,
            event: event.to_string(),
            handler,
        });
        id
    }

    fn disconnect(&self, id: HandlerId) {
        self.handlers.write().retain(|registration| registration.id != id);
    }
}

type Detach = Box<dyn FnOnce() + Send>;
type Attach<T> = Box<dyn Fn(Weak<ValueCell<T>>) -> Detach + Send + Sync>;

struct ConnectionInner<T> {
    cell: Arc<ValueCell<T>>,
    handlers: Vec<Attach<T>>,
    attached: Mutex<Vec<Detach>>,
}

impl<T> Lifecycle for ConnectionInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn subscribers(&self) -> &Subscribers {
        self.cell.subscribers()
    }

    fn activate(&self) {
        trace!(handlers = self.handlers.len(), "connection: attaching handlers");
        let attached: Vec<Detach> = self
            .handlers
            .iter()
            .map(|attach| attach(Arc::downgrade(&self.cell)))
            .collect();
        *self.attached.lock() = attached;
    }

    fn deactivate(&self) {
        trace!("connection: detaching handlers");
        let attached = std::mem::take(&mut *self.attached.lock());
        for detach in attached {
            detach();
        }
    }
}

struct ConnectionSource<T>(Arc<ConnectionInner<T>>);

impl<T> Source<T> for ConnectionSource<T>
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

/// Builder for an event-connection signal.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use sprout_core::reactive::{Connection, Emitter};
///
/// let clicks: Arc<Emitter<u32>> = Arc::new(Emitter::new());
/// let total = Connection::new(0u32)
///     .on(clicks.clone(), "clicked", |count, total| total + count)
///     .build();
///
/// let handle = total.subscribe(|| {});
/// clicks.emit("clicked", &2);
/// clicks.emit("clicked", &3);
/// assert_eq!(total.get(), 5);
/// handle.unsubscribe();
/// ```
pub struct Connection<T> {
    init: T,
    handlers: Vec<Attach<T>>,
}

impl<T> Connection<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Start a connection signal with an initial value.
    pub fn new(init: T) -> Self {
        Self {
            init,
            handlers: Vec::new(),
        }
    }

    /// Fold `event` from `source` into the value with `reducer`.
    pub fn on<S, R>(mut self, source: S, event: impl Into<String>, reducer: R) -> Self
    where
        S: EventSource,
        R: Fn(&S::Event, &T) -> T + Send + Sync + 'static,
    {
        let source = Arc::new(source);
        let event = event.into();
        let reducer = Arc::new(reducer);

        self.handlers.push(Box::new(move |cell: Weak<ValueCell<T>>| -> Detach {
            let reducer = Arc::clone(&reducer);
            let handler: EventHandler<S::Event> = Arc::new(move |payload: &S::Event| {
                if let Some(cell) = cell.upgrade() {
                    let next = reducer(payload, &cell.get());
                    cell.set(next);
                }
            });
            let id = source.connect(&event, handler);

            let source = Arc::clone(&source);
            Box::new(move || source.disconnect(id))
        }));
        self
    }

    /// Finish the builder.
    pub fn build(self) -> Accessor<T> {
        let inner = Arc::new(ConnectionInner {
            cell: Arc::new(ValueCell::new(self.init)),
            handlers: self.handlers,
            attached: Mutex::new(Vec::new()),
        });
        Accessor::new(ConnectionSource(inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq)]
    enum Power {
        On,
        Off,
    }

    #[test]
    fn handlers_attach_only_while_subscribed() {
        let emitter: Arc<Emitter<()>> = Arc::new(Emitter::new());
        let power = Connection::new(Power::Off)
            .on(emitter.clone(), "on", |_, _| Power::On)
            .on(emitter.clone(), "off", |_, _| Power::Off)
            .build();

        assert_eq!(emitter.handler_count(), 0);
        let handle = power.subscribe(|| {});
        assert_eq!(emitter.handler_count(), 2);

        handle.unsubscribe();
        assert_eq!(emitter.handler_count(), 0);
    }

    #[test]
    fn reducer_output_is_compared_before_notifying() {
        let emitter: Arc<Emitter<()>> = Arc::new(Emitter::new());
        let power = Connection::new(Power::Off)
            .on(emitter.clone(), "on", |_, _| Power::On)
            .on(emitter.clone(), "off", |_, _| Power::Off)
            .build();

        let notified = Arc::new(AtomicUsize::new(0));
        let notified_clone = notified.clone();
        let _handle = power.subscribe(move || {
            notified_clone.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit("off", &());
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        emitter.emit("on", &());
        emitter.emit("on", &());
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(power.get(), Power::On);
    }

    #[test]
    fn events_while_cold_are_not_observed() {
        let emitter: Arc<Emitter<i32>> = Arc::new(Emitter::new());
        let last = Connection::new(0)
            .on(emitter.clone(), "value", |payload, _| *payload)
            .build();

        emitter.emit("value", &5);
        assert_eq!(last.get(), 0);

        let handle = last.subscribe(|| {});
        emitter.emit("value", &6);
        handle.unsubscribe();
        emitter.emit("value", &7);

        // Cached value survives deactivation
        assert_eq!(last.get(), 6);
    }

    #[test]
    fn multiple_sources_fold_into_one_value() {
        let left: Arc<Emitter<i32>> = Arc::new(Emitter::new());
        let right: Arc<Emitter<str>> = Arc::new(Emitter::new());
        let log = Connection::new(Vec::<String>::new())
            .on(left.clone(), "n", |n, log| {
                let mut log = log.clone();
                log.push(n.to_string());
                log
            })
            .on(right.clone(), "s", |s, log| {
                let mut log = log.clone();
                log.push(s.to_string());
                log
            })
            .build();

        let _handle = log.subscribe(|| {});
        left.emit("n", &1);
        right.emit("s", "two");
        left.emit("other", &3);

        assert_eq!(log.get(), vec!["1".to_string(), "two".to_string()]);
    }

    #[test]
    fn emitter_delivers_in_connection_order() {
        let emitter: Emitter<i32> = Emitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = seen.clone();
            emitter.connect("tick", Arc::new(move |n: &i32| seen.lock().push(format!("{tag}{n}"))));
        }
        let id = emitter.connect("tock", Arc::new(|_: &i32| {}));

        assert_eq!(emitter.emit("tick", &1), 2);
        emitter.disconnect(id);
        assert_eq!(emitter.emit("tock", &1), 0);
        assert_eq!(*seen.lock(), vec!["a1".to_string(), "b1".to_string()]);
    }
}
