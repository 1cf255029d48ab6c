//! Scoped dependency injection.
//!
//! A [`Context`] is a private key plus a default value. [`Context::provide`]
//! stores a value in the current scope's context map; [`Context::get`] walks
//! from the current scope up through its ancestors and returns the first
//! value found, falling back to the default.
//!
//! Providing does not create a new scope. A second `provide` for the same
//! context on the same scope overwrites the first for the rest of that
//! scope's lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::Scope;
use crate::error::ScopeError;

/// Identity of a context within scope maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ContextKey(u64);

impl ContextKey {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A typed context with a default value.
///
/// Clones share the same key.
///
/// # Example
///
/// ```rust
/// use sprout_core::scope::{create_context, Scope};
///
/// let theme = create_context("light");
/// let scope = Scope::new(None);
///
/// scope.run(|| {
///     assert_eq!(theme.get(), "light");
///     theme.provide("dark", || assert_eq!(theme.get(), "dark")).unwrap();
/// });
/// ```
#[derive(Debug, Clone)]
pub struct Context<T> {
    key: ContextKey,
    default: T,
}

impl<T> Context<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a context with a fresh key.
    pub fn new(default: T) -> Self {
        Self {
            key: ContextKey::new(),
            default,
        }
    }

    /// The nearest provided value, or the default.
    ///
    /// Outside any scope this returns the default.
    pub fn get(&self) -> T {
        Scope::current()
            .and_then(|scope| scope.lookup(self.key))
            .and_then(|value| value.downcast_ref::<T>().cloned())
            .unwrap_or_else(|| self.default.clone())
    }

    /// Store `value` on the current scope, then run `f`.
    ///
    /// Fails with [`ScopeError::NoActiveScope`] outside any scope.
    pub fn provide<R, F>(&self, value: T, f: F) -> Result<R, ScopeError>
    where
        F: FnOnce() -> R,
    {
        let scope = Scope::current().ok_or(ScopeError::NoActiveScope)?;
        scope.provide(self.key, Arc::new(value));
        Ok(f())
    }

    /// The value returned when nothing was provided.
    pub fn default_value(&self) -> &T {
        &self.default
    }
}

/// Create a context. Shorthand for [`Context::new`].
pub fn create_context<T>(default: T) -> Context<T>
where
    T: Clone + Send + Sync + 'static,
{
    Context::new(default)
}
