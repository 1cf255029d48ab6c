//! Computed Signals
//!
//! A computed signal derives its value from a fixed list of dependency
//! accessors through a transform.
//!
//! # How Computed Signals Work
//!
//! 1. With no subscribers the signal is cold. Every `get()` reads each
//!    dependency afresh and runs the transform; nothing is cached.
//!
//! 2. The first subscriber warms it up: each dependency is read into a cache
//!    slot, the transform runs once, and one listener is attached per
//!    dependency.
//!
//! 3. While warm, a dependency notification re-reads that dependency. If the
//!    value differs (`!=`) from its slot, the slot is updated, the transform
//!    re-runs and every subscriber is notified. `get()` returns the cached
//!    result.
//!
//! 4. When the last subscriber leaves, the listeners are detached and the
//!    cache is cleared.
//!
//! Diamond-shaped graphs may run a shared computed more than once per
//! upstream write. That is accepted behaviour.
//!
//! # Dependencies
//!
//! Dependencies are a tuple of accessors (up to eight, each with its own value
//! type) or a `Vec` of accessors sharing one value type. The transform
//! receives the matching tuple or `Vec` of values.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use super::accessor::{Accessor, Source};
use super::subscriber::{self, Callback, Lifecycle, Subscribers, Unsubscribe};

/// A fixed set of dependency accessors.
///
/// Implemented for tuples of [`Accessor`]s and for `Vec<Accessor<T>>`.
pub trait Dependencies: Send + Sync + 'static {
    /// The values read from every dependency, in slot order.
    type Values: Clone + Send + Sync + 'static;

    /// Read every dependency.
    fn read_all(&self) -> Self::Values;

    /// Re-read the dependency in `slot`. Returns `true` and updates `cache`
    /// when the value differs from the cached one.
    ///
    /// Called with no lock held on the computed.
    fn refresh(&self, slot: usize, cache: &mut Self::Values) -> bool;

    /// Attach `on_change(slot)` to every dependency.
    fn watch(&self, on_change: Arc<dyn Fn(usize) + Send + Sync>) -> Vec<Unsubscribe>;
}

macro_rules! impl_dependencies_for_tuple {
    ($($name:ident => $slot:tt),+) => {
        impl<$($name),+> Dependencies for ($(Accessor<$name>,)+)
        where
            $($name: Clone + PartialEq + Send + Sync + 'static),+
        {
            type Values = ($($name,)+);

            fn read_all(&self) -> Self::Values {
                ($(self.$slot.get(),)+)
            }

            fn refresh(&self, slot: usize, cache: &mut Self::Values) -> bool {
                match slot {
                    $(
                        $slot => {
                            let next = self.$slot.get();
                            if next != cache.$slot {
                                cache.$slot = next;
                                true
                            } else {
                                false
                            }
                        }
                    )+
                    _ => false,
                }
            }

            fn watch(&self, on_change: Arc<dyn Fn(usize) + Send + Sync>) -> Vec<Unsubscribe> {
                vec![$({
                    let on_change = Arc::clone(&on_change);
                    self.$slot.subscribe(move || on_change($slot))
                }),+]
            }
        }
    };
}

impl_dependencies_for_tuple!(A => 0);
impl_dependencies_for_tuple!(A => 0, B => 1);
impl_dependencies_for_tuple!(A => 0, B => 1, C => 2);
impl_dependencies_for_tuple!(A => 0, B => 1, C => 2, D => 3);
impl_dependencies_for_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4);
impl_dependencies_for_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);
impl_dependencies_for_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6);
impl_dependencies_for_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6, H => 7);

impl<T> Dependencies for Vec<Accessor<T>>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    type Values = Vec<T>;

    fn read_all(&self) -> Self::Values {
        self.iter().map(Accessor::get).collect()
    }

    fn refresh(&self, slot: usize, cache: &mut Self::Values) -> bool {
        let (Some(dependency), Some(cached)) = (self.get(slot), cache.get_mut(slot)) else {
            return false;
        };
        let next = dependency.get();
        if next != *cached {
            *cached = next;
            true
        } else {
            false
        }
    }

    fn watch(&self, on_change: Arc<dyn Fn(usize) + Send + Sync>) -> Vec<Unsubscribe> {
        self.iter()
            .enumerate()
            .map(|(slot, dependency)| {
                let on_change = Arc::clone(&on_change);
                dependency.subscribe(move || on_change(slot))
            })
            .collect()
    }
}

/// Cache held only while the computed has subscribers.
struct Warm<V, T> {
    slots: V,
    value: T,
    /// Bumped on every slot write, so a transform that finishes after a
    /// nested update does not overwrite the newer result.
    revision: u64,
    listeners: Vec<Unsubscribe>,
}

struct ComputedInner<D: Dependencies, T> {
    dependencies: D,
    transform: Box<dyn Fn(D::Values) -> T + Send + Sync>,
    warm: Mutex<Option<Warm<D::Values, T>>>,
    subscribers: Subscribers,
    /// Handle to ourselves for dependency listeners.
    this: Weak<ComputedInner<D, T>>,
}

impl<D, T> ComputedInner<D, T>
where
    D: Dependencies,
    T: Clone + Send + Sync + 'static,
{
    fn get(&self) -> T {
        let cached = self.warm.lock().as_ref().map(|warm| warm.value.clone());
        match cached {
            Some(value) => value,
            None => (self.transform)(self.dependencies.read_all()),
        }
    }

    fn on_dependency_change(&self, slot: usize) {
        loop {
            let (mut slots, seen) = {
                let warm = self.warm.lock();
                let Some(warm) = warm.as_ref() else {
                    return;
                };
                (warm.slots.clone(), warm.revision)
            };

            // Unlocked: dependency reads may run user code.
            if !self.dependencies.refresh(slot, &mut slots) {
                return;
            }

            let revision = {
                let mut warm = self.warm.lock();
                let Some(warm) = warm.as_mut() else {
                    return;
                };
                if warm.revision != seen {
                    continue;
                }
                warm.slots = slots.clone();
                warm.revision += 1;
                warm.revision
            };

            let value = (self.transform)(slots);

            {
                let mut warm = self.warm.lock();
                match warm.as_mut() {
                    Some(warm) if warm.revision == revision => warm.value = value,
                    _ => return,
                }
            }
            self.subscribers.notify();
            return;
        }
    }
}

impl<D, T> Lifecycle for ComputedInner<D, T>
where
    D: Dependencies,
    T: Clone + Send + Sync + 'static,
{
    fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }

    fn activate(&self) {
        trace!("computed: activating");
        let slots = self.dependencies.read_all();
        let value = (self.transform)(slots.clone());

        let this = self.this.clone();
        let listeners = self.dependencies.watch(Arc::new(move |slot| {
            if let Some(inner) = this.upgrade() {
                inner.on_dependency_change(slot);
            }
        }));

        *self.warm.lock() = Some(Warm {
            slots,
            value,
            revision: 0,
            listeners,
        });
    }

    fn deactivate(&self) {
        trace!("computed: deactivating");
        let warm = self.warm.lock().take();
        if let Some(warm) = warm {
            for listener in warm.listeners {
                listener.unsubscribe();
            }
        }
    }
}

struct ComputedSource<D: Dependencies, T>(Arc<ComputedInner<D, T>>);

impl<D, T> Source<T> for ComputedSource<D, T>
where
    D: Dependencies,
    T: Clone + Send + Sync + 'static,
{
    fn get(&self) -> T {
        self.0.get()
    }

    fn subscribe(&self, callback: Callback) -> Unsubscribe {
        subscriber::subscribe(&self.0, callback)
    }
}

/// Create a computed signal from `dependencies` and a pure `transform`.
///
/// # Example
///
/// ```rust
/// use sprout_core::reactive::{create_computed, create_state};
///
/// let (a, set_a) = create_state(1);
/// let (b, _set_b) = create_state(10);
/// let sum = create_computed((a, b), |(a, b)| a + b);
///
/// set_a.set(2);
/// assert_eq!(sum.get(), 12);
/// ```
pub fn create_computed<D, T, F>(dependencies: D, transform: F) -> Accessor<T>
where
    D: Dependencies,
    T: Clone + Send + Sync + 'static,
    F: Fn(D::Values) -> T + Send + Sync + 'static,
{
    let inner = Arc::new_cyclic(|this| ComputedInner {
        dependencies,
        transform: Box::new(transform),
        warm: Mutex::new(None),
        subscribers: Subscribers::new(),
        this: this.clone(),
    });
    Accessor::new(ComputedSource(inner))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::create_state;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted<V, T>(
        f: impl Fn(V) -> T + Send + Sync + 'static,
    ) -> (Arc<AtomicUsize>, impl Fn(V) -> T + Send + Sync + 'static) {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        (calls, move |values| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            f(values)
        })
    }

    #[test]
    fn cold_computed_recomputes_every_get() {
        let (a, _) = create_state(1);
        let (b, _) = create_state(2);
        let (calls, transform) = counted(|(a, b): (i32, i32)| a + b);
        let sum = create_computed((a, b), transform);

        assert_eq!(sum.get(), 3);
        assert_eq!(sum.get(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cold_computed_reads_fresh_dependencies() {
        let (a, set_a) = create_state(1);
        let sum = create_computed((a,), |(a,)| a * 10);

        set_a.set(4);
        assert_eq!(sum.get(), 40);
    }

    #[test]
    fn warm_computed_only_recomputes_on_change() {
        let (a, set_a) = create_state(1);
        let (b, set_b) = create_state(2);
        let (calls, transform) = counted(|(a, b): (i32, i32)| a + b);
        let sum = create_computed((a, b), transform);

        let _handle = sum.subscribe(|| {});
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Cached reads do not recompute
        assert_eq!(sum.get(), 3);
        assert_eq!(sum.get(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        set_a.set(5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        set_b.set(2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        set_b.set(7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        set_a.set(5);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        assert_eq!(sum.get(), 12);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unchanged_derived_dependency_does_not_recompute() {
        // `parity` notifies on every write to `n` but only its derived value
        // matters to the slot comparison.
        let (n, set_n) = create_state(1);
        let parity = n.derive(|n| n % 2);
        let (calls, transform) = counted(|(p,): (i32,)| p == 0);
        let even = create_computed((parity,), transform);

        let notified = Arc::new(AtomicUsize::new(0));
        let notified_clone = notified.clone();
        let _handle = even.subscribe(move || {
            notified_clone.fetch_add(1, Ordering::SeqCst);
        });

        set_n.set(3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        set_n.set(4);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert!(even.get());
    }

    #[test]
    fn last_unsubscribe_detaches_and_clears_cache() {
        let (a, set_a) = create_state(1);
        let (calls, transform) = counted(|(a,): (i32,)| a);
        let value = create_computed((a.clone(),), transform);

        let first = value.subscribe(|| {});
        let second = value.subscribe(|| {});
        first.unsubscribe();
        set_a.set(2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        second.unsubscribe();
        set_a.set(3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Cold again: every read recomputes
        assert_eq!(value.get(), 3);
        assert_eq!(value.get(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn vec_dependencies() {
        let states: Vec<_> = (1..=3).map(create_state).collect();
        let accessors: Vec<_> = states.iter().map(|(get, _)| get.clone()).collect();
        let total = create_computed(accessors, |values: Vec<i32>| values.iter().sum::<i32>());

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let total_clone = total.clone();
        let seen_clone = seen.clone();
        let _handle = total.subscribe(move || seen_clone.lock().push(total_clone.get()));

        states[1].1.set(20);
        states[2].1.set(30);
        assert_eq!(*seen.lock(), vec![24, 51]);
    }

    #[test]
    fn computed_chain_propagates() {
        let (n, set_n) = create_state(1);
        let doubled = create_computed((n,), |(n,)| n * 2);
        let label = create_computed((doubled,), |(d,)| format!("{d}"));

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let label_clone = label.clone();
        let seen_clone = seen.clone();
        let _handle = label.subscribe(move || seen_clone.lock().push(label_clone.get()));

        set_n.set(2);
        set_n.set(3);
        assert_eq!(*seen.lock(), vec!["4".to_string(), "6".to_string()]);
    }

    #[test]
    fn dependency_getter_may_read_the_computed() {
        let (a, set_a) = create_state(1);
        let doubled_slot: Arc<parking_lot::Mutex<Option<Accessor<i32>>>> = Arc::default();
        let observed = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let (reader_slot, observed_clone, a_get) = (doubled_slot.clone(), observed.clone(), a.clone());
        let peeking = Accessor::from_fns(
            move || {
                let doubled = reader_slot.lock().clone();
                if let Some(doubled) = doubled {
                    observed_clone.lock().push(doubled.get());
                }
                a_get.get()
            },
            move |callback| a.subscribe_callback(callback),
        );
        let doubled = create_computed((peeking,), |(x,)| x * 2);

        let _handle = doubled.subscribe(|| {});
        *doubled_slot.lock() = Some(doubled.clone());

        set_a.set(5);
        assert_eq!(doubled.get(), 10);
        assert_eq!(*observed.lock(), vec![2]);
    }
}
