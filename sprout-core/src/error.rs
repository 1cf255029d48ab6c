//! Error types.
//!
//! Only direct scope access can fail. Lifecycle registration helpers such as
//! [`on_cleanup`](crate::scope::on_cleanup) degrade to a logged no-op instead.

/// Errors raised when scope-bound operations run outside any scope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    /// The caller is not running under [`Scope::run`](crate::scope::Scope::run).
    #[error("no active scope: this call must run inside Scope::run")]
    NoActiveScope,
}
