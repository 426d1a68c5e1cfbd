//! Internal disposal bag for scoped cleanup hooks.

use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

/// Cleanup hooks executed in LIFO order.
///
/// A panicking hook is logged and does not prevent the remaining hooks from
/// running; disposal is best effort.
#[derive(Default)]
pub(crate) struct DisposeBag {
    hooks: Vec<(&'static str, Box<dyn FnOnce() + Send>)>,
}

impl DisposeBag {
    /// Adds a hook labelled with the type it disposes.
    pub(crate) fn push(&mut self, label: &'static str, f: Box<dyn FnOnce() + Send>) {
        self.hooks.push((label, f));
    }

    /// Runs every hook, most recently added first.
    pub(crate) fn run_all_reverse(&mut self) {
        while let Some((label, f)) = self.hooks.pop() {
            if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
                warn!(instance = label, "dispose hook panicked");
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.hooks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}
