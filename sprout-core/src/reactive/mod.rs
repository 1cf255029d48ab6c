//! Reactive Primitives
//!
//! This module implements the signal layer: the read-only [`Accessor`]
//! handle and the four sources that produce one.
//!
//! # Concepts
//!
//! ## Accessors
//!
//! An [`Accessor`] exposes `get()` and `subscribe(cb)`. Subscribing never
//! calls `cb` right away, only on later changes. `derive` produces a new
//! accessor that applies a pure transform to every read.
//!
//! ## Sources
//!
//! | Constructor         | Activation                  | Caching                           |
//! |---------------------|-----------------------------|-----------------------------------|
//! | [`create_state`]    | always live                 | value held directly               |
//! | [`create_computed`] | cold until first subscriber | slots + result while subscribed   |
//! | [`Connection`]      | cold until first subscriber | value always cached               |
//! | [`create_external`] | cold until first subscriber | value always cached               |
//!
//! Every source compares old and new values with `!=` and, on change,
//! notifies its subscribers synchronously in registration order before the
//! triggering call returns.
//!
//! # Propagation
//!
//! There is no scheduler and no batching: N writes produce up to N waves. A
//! subscriber may write to any signal; the nested wave completes before the
//! outer wave moves on to its next subscriber.

mod accessor;
mod computed;
mod connection;
mod external;
mod state;
mod subscriber;

pub use accessor::{Accessor, Source};
pub use computed::{create_computed, Dependencies};
pub use connection::{Connection, Emitter, EventHandler, EventSource, HandlerId};
pub use external::create_external;
pub use state::{create_state, Setter};
pub use subscriber::{Callback, SubscriberId, Unsubscribe};
