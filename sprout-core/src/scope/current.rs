//! Current Scope
//!
//! Tracks which scope is running so that free functions such as
//! [`on_cleanup`](super::on_cleanup) can find it.
//!
//! # Implementation
//!
//! A thread-local stack holds the active scopes. [`Scope::run`] pushes its
//! scope through a [`CurrentScope`] guard and the guard pops it on drop, so
//! the previous scope is restored even when the body panics.
//!
//! The stack is per thread because propagation is single-threaded and
//! synchronous: one thread is one logical thread of control.
//!
//! [`Scope::run`]: super::Scope::run

use std::cell::RefCell;

use super::Scope;

thread_local! {
    static SCOPE_STACK: RefCell<Vec<Scope>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the scope when dropped.
pub(crate) struct CurrentScope {
    scope: Scope,
}

impl CurrentScope {
    /// Make `scope` current until the returned guard is dropped.
    pub(crate) fn enter(scope: Scope) -> Self {
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(scope.clone()));
        Self { scope }
    }

    /// The innermost running scope, if any.
    pub(crate) fn get() -> Option<Scope> {
        SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Whether any scope is running on this thread.
    pub(crate) fn is_active() -> bool {
        SCOPE_STACK.with(|stack| !stack.borrow().is_empty())
    }
}

impl Drop for CurrentScope {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(popped) = popped {
                debug_assert!(
                    popped == self.scope,
                    "CurrentScope mismatch: expected {:?}, got {:?}",
                    self.scope.id(),
                    popped.id()
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_tracks_scope() {
        let scope = Scope::new(None);

        assert!(!CurrentScope::is_active());
        assert!(CurrentScope::get().is_none());

        {
            let _guard = CurrentScope::enter(scope.clone());

            assert!(CurrentScope::is_active());
            assert_eq!(CurrentScope::get(), Some(scope.clone()));
        }

        // Restored after drop
        assert!(!CurrentScope::is_active());
        assert!(CurrentScope::get().is_none());
    }

    #[test]
    fn nested_guards() {
        let outer = Scope::new(None);
        let inner = Scope::new(Some(&outer));

        {
            let _outer = CurrentScope::enter(outer.clone());
            assert_eq!(CurrentScope::get(), Some(outer.clone()));

            {
                let _inner = CurrentScope::enter(inner.clone());
                assert_eq!(CurrentScope::get(), Some(inner.clone()));
            }

            assert_eq!(CurrentScope::get(), Some(outer.clone()));
        }

        assert!(CurrentScope::get().is_none());
    }

    #[test]
    fn stack_is_per_thread() {
        let scope = Scope::new(None);
        let _guard = CurrentScope::enter(scope);

        let seen = std::thread::spawn(CurrentScope::is_active).join();
        assert_eq!(seen.ok(), Some(false));
    }
}
