//! Sprout Core
//!
//! This crate provides the runtime underneath the Sprout component model.
//! It implements:
//!
//! - Reactive accessors and their sources (state, computed, external, connection)
//! - Lifecycle scopes with cleanup, mount and context
//! - Keyed collection and optional-value reconcilers
//!
//! Propagation is synchronous: a `set` call has notified every transitive
//! subscriber by the time it returns.
//!
//! # Architecture
//!
//! - `reactive`: accessors, signal sources and subscriber bookkeeping
//! - `scope`: the scope tree, current-scope tracking and contexts
//! - `reconcile`: projection of reactive inputs onto a host [`Container`]
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use sprout_core::reactive::{create_computed, create_state};
//!
//! let (n, set_n) = create_state(0);
//! let doubled = create_computed((n.clone(),), |(x,)| x * 2);
//!
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let (log_clone, reader) = (log.clone(), doubled.clone());
//! let _subscription = doubled.subscribe(move || log_clone.lock().unwrap().push(reader.get()));
//!
//! set_n.set(1);
//! set_n.set(2);
//! assert_eq!(*log.lock().unwrap(), vec![2, 4]);
//! ```

pub mod error;
pub mod reactive;
pub mod reconcile;
pub mod scope;

#[cfg(test)]
mod test_support;

pub use error::ScopeError;
pub use reactive::{create_computed, create_external, create_state, Accessor, Setter, Unsubscribe};
pub use reconcile::{Container, Each, With};
pub use scope::{create_context, create_root, get_scope, on_cleanup, on_mount, Context, Scope};
