//! Reconcilers
//!
//! Reconcilers project a reactive input onto outputs owned by a host
//! [`Container`]:
//!
//! - [`Each`] keeps one child scope and output per keyed item of a
//!   collection.
//! - [`With`] keeps a single child scope and optional output for the current
//!   value of an accessor.
//!
//! Each rendered output gets its own child [`Scope`](crate::scope::Scope),
//! parented to the reconciler's scope for context lookup. The reconciler owns
//! those child scopes and disposes them itself; nothing cascades.
//!
//! # Ordering
//!
//! Outputs are always re-established by unmounting and appending, never by
//! moving in place. After a pass the container holds the outputs in input
//! order, but siblings outside the reconciler end up before them.

mod each;
mod with;

use std::sync::Arc;

use parking_lot::Mutex;

pub use each::Each;
pub use with::With;

/// The host side of reconciliation.
///
/// Implemented by whatever owns rendered outputs, such as a widget container.
pub trait Container: Send + Sync + 'static {
    /// A rendered output. Usually a cheap handle.
    type Output: Clone + Send + Sync + 'static;

    /// Insert `output`, at `index` or at the end when `None`.
    ///
    /// Reconcilers always append.
    fn mount(&self, output: &Self::Output, index: Option<usize>);

    /// Remove `output`.
    fn unmount(&self, output: &Self::Output);

    /// Release `output` once it leaves for good, when the reconciler was not
    /// given an explicit cleanup.
    fn teardown(&self, _output: &Self::Output) {}
}

impl<C> Container for Arc<C>
where
    C: Container + ?Sized,
{
    type Output = C::Output;

    fn mount(&self, output: &Self::Output, index: Option<usize>) {
        (**self).mount(output, index)
    }

    fn unmount(&self, output: &Self::Output) {
        (**self).unmount(output)
    }

    fn teardown(&self, output: &Self::Output) {
        (**self).teardown(output)
    }
}

#[derive(Default)]
struct PassState {
    running: bool,
    dirty: bool,
}

/// Serializes reconciliation passes.
///
/// A change that arrives while a pass is running (for example a render
/// function writing to the reconciled source) marks the gate dirty instead of
/// re-entering; the running pass then repeats before returning.
#[derive(Default)]
pub(crate) struct PassGate {
    state: Mutex<PassState>,
}

impl PassGate {
    pub(crate) fn run(&self, mut pass: impl FnMut()) {
        {
            let mut state = self.state.lock();
            if state.running {
                state.dirty = true;
                return;
            }
            state.running = true;
        }

        let _running = Running(self);
        loop {
            pass();
            let mut state = self.state.lock();
            if !state.dirty {
                break;
            }
            state.dirty = false;
        }
    }
}

struct Running<'a>(&'a PassGate);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.running = false;
        state.dirty = false;
    }
}
