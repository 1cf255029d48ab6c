//! Optional-value reconciler.
//!
//! [`With`] renders the current value of an accessor into at most one
//! output. Every change throws the previous output and its scope away and
//! renders from scratch in a fresh child scope.
//!
//! A panic from `render` propagates after the fresh scope is disposed; the
//! container is left empty until the next change.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use super::{Container, PassGate};
use crate::error::ScopeError;
use crate::reactive::{Accessor, Unsubscribe};
use crate::scope::{get_scope, Scope, WeakScope};

type RenderFn<T, O> = Box<dyn Fn(T) -> Option<O> + Send + Sync>;
type CleanupFn<T, O> = Box<dyn Fn(&O, &T) + Send + Sync>;

/// Single-value reconciler.
///
/// # Example
///
/// ```rust,ignore
/// let (user, set_user) = create_state(None::<User>);
///
/// scope.run(|| {
///     With::new(panel, |user: Option<User>| user.map(render_profile)).bind(user.clone())
/// })?;
/// ```
pub struct With<C: Container, T> {
    container: C,
    render: RenderFn<T, C::Output>,
    cleanup: Option<CleanupFn<T, C::Output>>,
}

impl<C, T> With<C, T>
where
    C: Container,
    T: Clone + Send + Sync + 'static,
{
    pub fn new<R>(container: C, render: R) -> Self
    where
        R: Fn(T) -> Option<C::Output> + Send + Sync + 'static,
    {
        Self {
            container,
            render: Box::new(render),
            cleanup: None,
        }
    }

    /// Release outputs with `cleanup(output, value)` instead of
    /// [`Container::teardown`].
    pub fn with_cleanup<F>(mut self, cleanup: F) -> Self
    where
        F: Fn(&C::Output, &T) + Send + Sync + 'static,
    {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    /// Start reconciling `source` under the current scope.
    pub fn bind(self, source: Accessor<T>) -> Result<(), ScopeError> {
        let owner = get_scope()?;
        let inner = Arc::new(WithInner {
            container: self.container,
            render: self.render,
            cleanup: self.cleanup,
            source,
            owner: owner.downgrade(),
            current: Mutex::new(Current {
                rendered: None,
                disposed: false,
            }),
            gate: PassGate::default(),
            subscription: Mutex::new(None),
        });

        let weak: Weak<WithInner<C, T>> = Arc::downgrade(&inner);
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

struct Rendered<T, O> {
    value: T,
    output: Option<O>,
    scope: Scope,
}

struct Current<T, O> {
    rendered: Option<Rendered<T, O>>,
    disposed: bool,
}

struct WithInner<C: Container, T> {
    container: C,
    render: RenderFn<T, C::Output>,
    cleanup: Option<CleanupFn<T, C::Output>>,
    source: Accessor<T>,
    owner: WeakScope,
    current: Mutex<Current<T, C::Output>>,
    gate: PassGate,
    subscription: Mutex<Option<Unsubscribe>>,
}

impl<C, T> WithInner<C, T>
where
    C: Container,
    T: Clone + Send + Sync + 'static,
{
    fn reconcile(&self) {
        self.gate.run(|| self.pass());
    }

    fn pass(&self) {
        let previous = {
            let mut current = self.current.lock();
            if current.disposed {
                return;
            }
            current.rendered.take()
        };
        if let Some(previous) = previous {
            self.release(previous);
        }

        let value = self.source.get();
        let owner = self.owner.upgrade();
        let scope = Scope::new(owner.as_ref());
        let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
            scope.run(|| (self.render)(value.clone()))
        }));
        let output = match rendered {
            Ok(output) => output,
            Err(payload) => {
                scope.dispose();
                panic::resume_unwind(payload);
            }
        };
        if let Some(output) = &output {
            self.container.mount(output, None);
        }
        trace!(rendered = output.is_some(), "with: reconciled");

        let rendered = Rendered {
            value,
            output,
            scope,
        };
        let orphaned = {
            let mut current = self.current.lock();
            if current.disposed {
                Some(rendered)
            } else {
                current.rendered = Some(rendered);
                None
            }
        };
        if let Some(orphaned) = orphaned {
            self.release(orphaned);
        }
    }

    fn release(&self, rendered: Rendered<T, C::Output>) {
        if let Some(output) = &rendered.output {
            self.container.unmount(output);
            match &self.cleanup {
                Some(cleanup) => cleanup(output, &rendered.value),
                None => self.container.teardown(output),
            }
        }
        rendered.scope.dispose();
    }

    fn dispose(&self) {
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }

        let rendered = {
            let mut current = self.current.lock();
            current.disposed = true;
            current.rendered.take()
        };
        if let Some(rendered) = rendered {
            self.release(rendered);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::create_state;
    use crate::reconcile::testing::{Op, Recorder};
    use crate::scope::{create_context, on_cleanup};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bind_label(
        scope: &Scope,
        recorder: &Arc<Recorder>,
        source: Accessor<Option<&'static str>>,
    ) -> Result<(), ScopeError> {
        let with = With::new(recorder.clone(), |label: Option<&'static str>| {
            label.map(str::to_string)
        });
        scope.run(|| with.bind(source))
    }

    #[test]
    fn initial_value_is_rendered() {
        let recorder = Arc::new(Recorder::default());
        let (source, _set) = create_state(Some("home"));
        let scope = Scope::new(None);

        assert_eq!(bind_label(&scope, &recorder, source), Ok(()));
        assert_eq!(recorder.children(), vec!["home"]);
    }

    #[test]
    fn change_replaces_output() {
        let recorder = Arc::new(Recorder::default());
        let (source, set_source) = create_state(Some("home"));
        let scope = Scope::new(None);
        bind_label(&scope, &recorder, source).ok();
        recorder.take_ops();

        set_source.set(Some("settings"));

        assert_eq!(
            recorder.take_ops(),
            vec![
                Op::Unmount("home".into()),
                Op::Teardown("home".into()),
                Op::Mount("settings".into()),
            ]
        );
        assert_eq!(recorder.children(), vec!["settings"]);
    }

    #[test]
    fn empty_render_leaves_container_empty() {
        let recorder = Arc::new(Recorder::default());
        let (source, set_source) = create_state(Some("home"));
        let scope = Scope::new(None);
        bind_label(&scope, &recorder, source).ok();

        set_source.set(None);
        assert!(recorder.children().is_empty());

        set_source.set(Some("back"));
        assert_eq!(recorder.children(), vec!["back"]);
    }

    #[test]
    fn every_change_gets_a_fresh_scope() {
        let recorder = Arc::new(Recorder::default());
        let (source, set_source) = create_state(1);
        let scope = Scope::new(None);
        let released = Arc::new(AtomicUsize::new(0));

        let released_clone = released.clone();
        let with = With::new(recorder.clone(), move |n: i32| {
            let released = released_clone.clone();
            on_cleanup(move || {
                released.fetch_add(1, Ordering::SeqCst);
            });
            Some(n.to_string())
        });
        scope.run(|| with.bind(source)).ok();

        set_source.set(2);
        set_source.set(3);
        assert_eq!(released.load(Ordering::SeqCst), 2);

        scope.dispose();
        assert_eq!(released.load(Ordering::SeqCst), 3);
        assert!(recorder.children().is_empty());
        assert_eq!(set_source.subscriber_count(), 0);
    }

    #[test]
    fn explicit_cleanup_receives_value() {
        let recorder = Arc::new(Recorder::default());
        let (source, set_source) = create_state(7);
        let scope = Scope::new(None);
        let released = Arc::new(Mutex::new(Vec::new()));

        let released_clone = released.clone();
        let with = With::new(recorder.clone(), |n: i32| Some(format!("#{n}")))
            .with_cleanup(move |output: &String, value: &i32| {
                released_clone.lock().push((output.clone(), *value));
            });
        scope.run(|| with.bind(source)).ok();

        set_source.set(8);
        assert_eq!(*released.lock(), vec![("#7".to_string(), 7)]);
        assert!(recorder.teardowns().is_empty());
    }

    #[test]
    fn render_sees_owner_context() {
        let recorder = Arc::new(Recorder::default());
        let (source, _set) = create_state(1);
        let unit = create_context("px");
        let scope = Scope::new(None);

        let unit_clone = unit.clone();
        let with = With::new(recorder.clone(), move |n: i32| {
            Some(format!("{n}{}", unit_clone.get()))
        });
        let bound = scope.run(|| unit.provide("em", || with.bind(source)));

        assert_eq!(bound, Ok(Ok(())));
        assert_eq!(recorder.children(), vec!["1em"]);
    }

    #[test]
    fn bind_outside_scope_fails() {
        let recorder = Arc::new(Recorder::default());
        let (source, set_source) = create_state(1);

        let with = With::new(recorder.clone(), |n: i32| Some(n.to_string()));
        assert_eq!(with.bind(source), Err(ScopeError::NoActiveScope));
        assert_eq!(set_source.subscriber_count(), 0);
    }

    #[test]
    fn render_writing_to_source_settles_on_last_value() {
        let recorder = Arc::new(Recorder::default());
        let (source, set_source) = create_state(0);
        let scope = Scope::new(None);

        let with = With::new(recorder.clone(), move |n: i32| {
            if n < 3 {
                set_source.set(n + 1);
            }
            Some(n.to_string())
        });
        scope.run(|| with.bind(source)).ok();

        assert_eq!(recorder.children(), vec!["3"]);
        assert_eq!(recorder.teardowns(), vec!["0", "1", "2"]);
    }

    #[test]
    fn render_panic_propagates_and_disposes_fresh_scope() {
        let recorder = Arc::new(Recorder::default());
        let (source, set_source) = create_state(1);
        let scope = Scope::new(None);
        let released = Arc::new(Mutex::new(Vec::new()));

        let released_clone = released.clone();
        let with = With::new(recorder.clone(), move |n: i32| {
            let released = released_clone.clone();
            on_cleanup(move || released.lock().push(n));
            if n == 2 {
                panic!("value two failed to render");
            }
            Some(n.to_string())
        });
        scope.run(|| with.bind(source)).ok();

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| set_source.set(2)));
        assert!(result.is_err());
        assert!(recorder.children().is_empty());
        assert_eq!(*released.lock(), vec![1, 2]);

        set_source.set(3);
        assert_eq!(recorder.children(), vec!["3"]);

        scope.dispose();
        assert!(recorder.children().is_empty());
        assert_eq!(*released.lock(), vec![1, 2, 3]);
    }
}
