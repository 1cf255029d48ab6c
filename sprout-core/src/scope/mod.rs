//! Lifecycle Scopes
//!
//! A [`Scope`] is a node in a lifecycle tree. It owns three things:
//!
//! - cleanup callbacks, run once by [`Scope::dispose`]
//! - mount callbacks, run when the outermost still-constructing ancestor
//!   finishes its [`Scope::run`]
//! - a context map read by [`Context`]
//!
//! # Ownership
//!
//! A scope holds a weak link to its parent, used only for context lookup and
//! mount bubbling. It never holds or enumerates its children. Whoever creates
//! a child scope (a reconciler, or the caller of [`create_root`]) is
//! responsible for disposing it; disposal never cascades.
//!
//! # States
//!
//! `unmounted → mounted → disposed`. A scope becomes mounted at the end of its
//! first `run`; disposal is terminal and a second `dispose` does nothing.

mod context;
mod current;

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::ScopeError;

pub use context::{create_context, Context};
pub(crate) use context::ContextKey;
use current::CurrentScope;

type Cleanup = Box<dyn FnOnce() + Send>;
type Mount = Box<dyn FnOnce() + Send>;
type ContextValue = Arc<dyn Any + Send + Sync>;

/// Unique identifier for a scope, for logging and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Default)]
struct ScopeState {
    parent: Option<Weak<ScopeInner>>,
    cleanups: Vec<Cleanup>,
    mounts: Vec<Mount>,
    mounted: bool,
    disposed: bool,
    contexts: HashMap<ContextKey, ContextValue>,
}

struct ScopeInner {
    id: ScopeId,
    state: Mutex<ScopeState>,
}

/// Handle to a lifecycle scope.
///
/// Clones refer to the same scope. Equality is identity.
///
/// # Example
///
/// ```rust
/// use sprout_core::scope::{on_cleanup, Scope};
///
/// let scope = Scope::new(None);
/// scope.run(|| {
///     on_cleanup(|| println!("released"));
/// });
/// scope.dispose(); // prints "released"
/// ```
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

/// Non-owning handle to a [`Scope`].
#[derive(Clone, Default)]
pub struct WeakScope {
    inner: Weak<ScopeInner>,
}

impl WeakScope {
    /// Recover the scope if any strong handle is still alive.
    pub fn upgrade(&self) -> Option<Scope> {
        self.inner.upgrade().map(|inner| Scope { inner })
    }
}

impl Scope {
    /// Create an unmounted scope, optionally linked to `parent` for context
    /// lookup and mount bubbling.
    pub fn new(parent: Option<&Scope>) -> Self {
        let state = ScopeState {
            parent: parent.map(|parent| Arc::downgrade(&parent.inner)),
            ..ScopeState::default()
        };
        Self {
            inner: Arc::new(ScopeInner {
                id: ScopeId::new(),
                state: Mutex::new(state),
            }),
        }
    }

    /// The innermost scope currently running on this thread.
    pub fn current() -> Option<Scope> {
        CurrentScope::get()
    }

    /// This scope's identifier.
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// The parent scope, if linked and still alive.
    pub fn parent(&self) -> Option<Scope> {
        let parent = self.inner.state.lock().parent.clone();
        parent
            .and_then(|parent| parent.upgrade())
            .map(|inner| Scope { inner })
    }

    /// A non-owning handle to this scope.
    pub fn downgrade(&self) -> WeakScope {
        WeakScope {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.state.lock().mounted
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    /// Run `f` with this scope as the current scope.
    ///
    /// After `f` returns, pending mount callbacks fire, the scope becomes
    /// mounted and the previous current scope is restored. This happens even
    /// when `f` panics; the panic resumes afterwards.
    pub fn run<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let guard = CurrentScope::enter(self.clone());
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        self.flush_mounts();
        drop(guard);

        match result {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    fn flush_mounts(&self) {
        loop {
            let pending = std::mem::take(&mut self.inner.state.lock().mounts);
            if pending.is_empty() {
                break;
            }
            for mount in pending {
                mount();
            }
        }
        self.inner.state.lock().mounted = true;
    }

    /// Register a callback for [`dispose`](Self::dispose).
    ///
    /// On an already disposed scope the callback runs immediately.
    pub fn on_cleanup<F>(&self, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let cleanup: Cleanup = Box::new(cleanup);
        let rejected = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                Some(cleanup)
            } else {
                state.cleanups.push(cleanup);
                None
            }
        };

        if let Some(cleanup) = rejected {
            warn!(scope = ?self.id(), "cleanup registered on a disposed scope; running it now");
            cleanup();
        }
    }

    /// Register a callback for when the surrounding tree is fully built.
    ///
    /// The callback bubbles up past every unmounted ancestor and fires at the
    /// end of the outermost one's `run`. If the parent is already mounted it
    /// stays on this scope and fires at the end of this scope's `run`.
    pub fn on_mount<F>(&self, mount: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut target = self.clone();
        while let Some(parent) = target.parent() {
            if parent.is_mounted() {
                break;
            }
            target = parent;
        }
        target.inner.state.lock().mounts.push(Box::new(mount));
    }

    /// Run every cleanup once, in registration order, then clear contexts and
    /// detach from the parent. Child scopes are not touched.
    ///
    /// Calling `dispose` again does nothing.
    pub fn dispose(&self) {
        let cleanups = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.parent = None;
            state.contexts.clear();
            state.mounts.clear();
            std::mem::take(&mut state.cleanups)
        };

        debug!(scope = ?self.id(), cleanups = cleanups.len(), "disposing scope");
        for cleanup in cleanups {
            cleanup();
        }
    }

    pub(crate) fn provide(&self, key: ContextKey, value: ContextValue) {
        self.inner.state.lock().contexts.insert(key, value);
    }

    /// Find `key` on this scope or the nearest ancestor that maps it.
    pub(crate) fn lookup(&self, key: ContextKey) -> Option<ContextValue> {
        let mut scope = Some(self.clone());
        while let Some(current) = scope {
            let found = current.inner.state.lock().contexts.get(&key).cloned();
            if found.is_some() {
                return found;
            }
            scope = current.parent();
        }
        None
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Scope {}

impl Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("mounted", &state.mounted)
            .field("disposed", &state.disposed)
            .field("cleanups", &state.cleanups.len())
            .field("mounts", &state.mounts.len())
            .finish()
    }
}

/// The scope currently running.
///
/// Fails fast with [`ScopeError::NoActiveScope`] outside any scope.
pub fn get_scope() -> Result<Scope, ScopeError> {
    Scope::current().ok_or(ScopeError::NoActiveScope)
}

/// Register a cleanup on the current scope.
///
/// Outside any scope this logs a warning and does nothing.
pub fn on_cleanup<F>(cleanup: F)
where
    F: FnOnce() + Send + 'static,
{
    match Scope::current() {
        Some(scope) => scope.on_cleanup(cleanup),
        None => warn!("on_cleanup called outside of any scope; ignoring"),
    }
}

/// Register a mount callback on the current scope. See [`Scope::on_mount`].
///
/// Outside any scope this logs a warning and does nothing.
pub fn on_mount<F>(mount: F)
where
    F: FnOnce() + Send + 'static,
{
    match Scope::current() {
        Some(scope) => scope.on_mount(mount),
        None => warn!("on_mount called outside of any scope; ignoring"),
    }
}

/// Create a parentless scope and run `f` under it.
///
/// `f` receives the new scope; the caller disposes it when done.
pub fn create_root<R, F>(f: F) -> R
where
    F: FnOnce(Scope) -> R,
{
    let scope = Scope::new(None);
    scope.run(|| f(scope.clone()))
}
